//! V1 capture: one mapping split into frames, MCAPTURE/SYNC in FIFO order.

use std::collections::VecDeque;
use std::io;

use super::pool::{driver_index, BufferPool};
use super::{CaptureActions, CaptureParams};
use crate::traits::{DeviceFile, Dequeued, Format, FourCC, V1Ops};

/// V1 palette codes and the pixel formats they carry.
const PALETTES: [(u16, FourCC); 9] = [
    (1, FourCC::GREY),
    (3, FourCC::RGBP),
    (4, FourCC::BGR3),
    (5, FourCC::BGR4),
    (8, FourCC::YUYV),
    (9, FourCC::UYVY),
    (13, FourCC::YUV422P),
    (14, FourCC::YUV411P),
    (15, FourCC::YU12),
];

fn palette_for(fourcc: FourCC) -> Option<u16> {
    PALETTES
        .iter()
        .find(|(_, f)| *f == fourcc)
        .map(|(palette, _)| *palette)
}

fn fourcc_for(palette: u16) -> Option<FourCC> {
    PALETTES
        .iter()
        .find(|(p, _)| *p == palette)
        .map(|(_, fourcc)| *fourcc)
}

fn depth_of(fourcc: FourCC) -> u16 {
    fourcc
        .bits_per_pixel()
        .and_then(|bpp| u16::try_from(bpp).ok())
        .unwrap_or(0)
}

/// Pixel formats the device accepts, found by trying every known palette.
/// The picture settings are restored afterwards.
pub fn supported_formats<F: V1Ops>(file: &F) -> io::Result<Vec<FourCC>> {
    let original = file.get_picture()?;
    let mut formats = Vec::new();

    for &(palette, fourcc) in &PALETTES {
        let attempt = crate::traits::V1Picture {
            palette,
            depth: depth_of(fourcc),
            ..original
        };
        if file.set_picture(&attempt).is_err() {
            continue;
        }
        if file.get_picture().is_ok_and(|p| p.palette == palette) {
            formats.push(fourcc);
        }
    }

    file.set_picture(&original)?;
    Ok(formats)
}

#[derive(Debug, Default)]
pub struct V1Capture {
    width: u32,
    height: u32,
    palette: u16,
    frame_size: usize,
    frame_lens: Vec<usize>,
    queued: VecDeque<usize>,
    sequence: u32,
}

impl<F: DeviceFile> CaptureActions<F> for V1Capture {
    fn set_params(&mut self, file: &F, params: &CaptureParams) -> io::Result<Format> {
        let norm = match params.standard.v1_norm() {
            Some(norm) => norm,
            None => file.get_channel(params.channel)?.norm,
        };
        file.set_channel(params.channel, norm)?;

        if let Some(fourcc) = params.fourcc {
            let palette = palette_for(fourcc).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{fourcc} has no V1 palette"),
                )
            })?;
            let mut picture = file.get_picture()?;
            picture.palette = palette;
            picture.depth = depth_of(fourcc);
            file.set_picture(&picture)?;
        }

        let picture = file.get_picture()?;
        let fourcc = fourcc_for(picture.palette).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported V1 palette {}", picture.palette),
            )
        })?;
        let (width, height) = file.set_window(params.width, params.height)?;

        self.width = width;
        self.height = height;
        self.palette = picture.palette;
        Ok(Format::new(width, height, fourcc))
    }

    fn init(
        &mut self,
        file: &F,
        format: &Format,
        count: u32,
    ) -> io::Result<BufferPool<F::Mapping>> {
        let mbuf = file.get_mbuf()?;
        if mbuf.offsets.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "driver exposes no capture frames",
            ));
        }

        let mut pool = BufferPool::default();
        let mapping = pool.push_mapping(file.map(0, mbuf.size)?);
        let frames = mbuf.offsets.len().min(count as usize);

        self.frame_lens.clear();
        for (frame, &offset) in mbuf.offsets.iter().take(frames).enumerate() {
            let end = mbuf.offsets.get(frame + 1).copied().unwrap_or(mbuf.size);
            let len = end.saturating_sub(offset);
            pool.add_slot(mapping, offset, len)?;
            self.frame_lens.push(len);
        }
        self.frame_size = format.size as usize;
        Ok(pool)
    }

    fn start(&mut self, file: &F, buffers: usize) -> io::Result<()> {
        for frame in 0..buffers {
            self.enqueue(file, frame)?;
        }
        Ok(())
    }

    fn dequeue(&mut self, file: &F) -> io::Result<Dequeued> {
        let frame = self.queued.pop_front().ok_or_else(|| {
            io::Error::new(io::ErrorKind::WouldBlock, "no frame queued for capture")
        })?;
        if let Err(err) = file.sync(driver_index(frame)?) {
            self.queued.push_front(frame);
            return Err(err);
        }

        let len = self.frame_lens.get(frame).copied().unwrap_or(0);
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Dequeued {
            index: frame,
            bytes_used: self.frame_size.min(len),
            sequence,
        })
    }

    fn enqueue(&mut self, file: &F, index: usize) -> io::Result<()> {
        file.mcapture(driver_index(index)?, self.width, self.height, self.palette)?;
        self.queued.push_back(index);
        Ok(())
    }

    fn stop(&mut self, file: &F) -> io::Result<()> {
        // V1 has no stream-off; wait out every frame still in flight and
        // report the first one that failed.
        let mut first_err = None;
        while let Some(frame) = self.queued.pop_front() {
            if let Err(err) = driver_index(frame).and_then(|index| file.sync(index)) {
                log::warn!("draining frame {frame}: {err}");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn free(&mut self, _file: &F) -> io::Result<()> {
        self.frame_lens.clear();
        self.sequence = 0;
        Ok(())
    }

    fn list_formats(&self, file: &F) -> io::Result<Vec<FourCC>> {
        supported_formats(file)
    }
}
