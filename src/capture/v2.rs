//! V2 capture: one mapping per driver buffer, QBUF/DQBUF streaming.

use std::io;

use super::pool::{driver_index, BufferPool};
use super::{CaptureActions, CaptureParams};
use crate::traits::{DeviceFile, Dequeued, Format, FourCC};

#[derive(Debug, Default)]
pub struct V2Capture {
    granted: u32,
}

impl<F: DeviceFile> CaptureActions<F> for V2Capture {
    fn set_params(&mut self, file: &F, params: &CaptureParams) -> io::Result<Format> {
        file.set_input(params.channel)?;
        if let Some(id) = params.standard.v2_id() {
            file.set_std(id)?;
        }
        file.set_format(params.width, params.height, params.fourcc)
    }

    fn init(
        &mut self,
        file: &F,
        _format: &Format,
        count: u32,
    ) -> io::Result<BufferPool<F::Mapping>> {
        self.granted = file.request_buffers(count)?;
        if self.granted == 0 {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "driver granted no capture buffers",
            ));
        }
        if self.granted < count {
            log::debug!("requested {count} buffers, driver granted {}", self.granted);
        }

        let mut pool = BufferPool::default();
        for index in 0..self.granted {
            let location = file.query_buffer(index)?;
            let mapping = pool.push_mapping(file.map(location.offset, location.length)?);
            pool.add_slot(mapping, 0, location.length)?;
        }
        Ok(pool)
    }

    fn start(&mut self, file: &F, buffers: usize) -> io::Result<()> {
        for index in 0..buffers {
            file.queue_buffer(driver_index(index)?)?;
        }
        file.stream_on()
    }

    fn dequeue(&mut self, file: &F) -> io::Result<Dequeued> {
        file.dequeue_buffer()
    }

    fn enqueue(&mut self, file: &F, index: usize) -> io::Result<()> {
        file.queue_buffer(driver_index(index)?)
    }

    fn stop(&mut self, file: &F) -> io::Result<()> {
        file.stream_off()
    }

    fn free(&mut self, file: &F) -> io::Result<()> {
        self.granted = 0;
        file.request_buffers(0).map(drop)
    }

    fn list_formats(&self, file: &F) -> io::Result<Vec<FourCC>> {
        file.enum_formats()
    }
}
