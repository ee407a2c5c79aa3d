//! HM12 macroblock decoding.
//!
//! HM12 is the raw output of the Conexant cx2341x MPEG encoders: a luma plane
//! followed by an interleaved chroma plane, both stored as 16x16 macroblocks
//! on lines that are always [`HM12_STRIDE`] bytes long. Columns past the image
//! width are padding. The height should be a multiple of 32, otherwise the
//! chroma of the last macroblock row is not meaningful.
//!
//! Every routine checks the source and destination lengths up front and reads
//! macroblock rows through checked slices, so malformed input yields
//! [`Error::InvalidFrame`] instead of an out-of-bounds access.

use crate::traits::{Error, Result};

/// Line length of both HM12 planes, in bytes.
pub const HM12_STRIDE: usize = 720;

const MB_SIZE: usize = 256;
const MB_PER_ROW: usize = HM12_STRIDE / 16;

/// Byte order of packed RGB output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    /// Red, green, blue.
    Rgb,
    /// Blue, green, red.
    Bgr,
}

/// Output format of [`convert_hm12`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hm12Target {
    /// Packed 24-bit RGB.
    Rgb24,
    /// Packed 24-bit BGR.
    Bgr24,
    /// Planar Y, U, V (4:2:0).
    Yuv420,
    /// Planar Y, V, U (4:2:0).
    Yvu420,
}

impl Hm12Target {
    /// Bytes needed for a `width` x `height` frame in this format.
    #[must_use]
    pub const fn output_len(self, width: u32, height: u32) -> usize {
        match self {
            Self::Rgb24 | Self::Bgr24 => packed_rgb_len(width, height),
            Self::Yuv420 | Self::Yvu420 => planar_yuv420_len(width, height),
        }
    }
}

/// Bytes in a packed 24-bit RGB frame.
#[must_use]
pub const fn packed_rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// Bytes in a planar 4:2:0 frame: full luma plus two quarter chroma planes.
#[must_use]
pub const fn planar_yuv420_len(width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    w * h + 2 * (w / 2) * (h / 2)
}

/// Bytes an HM12 frame of `height` lines occupies.
#[must_use]
pub const fn hm12_len(height: u32) -> usize {
    HM12_STRIDE * height as usize * 3 / 2
}

fn check_source(src: &[u8], width: u32, height: u32) -> Result<(usize, usize)> {
    let (w, h) = (width as usize, height as usize);
    if w > HM12_STRIDE {
        return Err(Error::InvalidFrame(format!(
            "width {w} exceeds the {HM12_STRIDE} byte HM12 stride"
        )));
    }
    let needed = hm12_len(height);
    if src.len() < needed {
        return Err(Error::InvalidFrame(format!(
            "HM12 source is {} bytes, {width}x{height} needs {needed}",
            src.len()
        )));
    }
    Ok((w, h))
}

fn check_dest(dest: &[u8], needed: usize) -> Result<()> {
    if dest.len() < needed {
        return Err(Error::InvalidFrame(format!(
            "destination is {} bytes, needs {needed}",
            dest.len()
        )));
    }
    Ok(())
}

fn block_row(plane: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    plane.get(start..start + len).ok_or_else(|| {
        Error::InvalidFrame(format!(
            "macroblock row {start}..{} past the {} byte plane",
            start + len,
            plane.len()
        ))
    })
}

fn dest_row(dest: &mut [u8], start: usize, len: usize) -> Result<&mut [u8]> {
    let dest_len = dest.len();
    dest.get_mut(start..start + len).ok_or_else(|| {
        Error::InvalidFrame(format!(
            "output row {start}..{} past the {dest_len} byte buffer",
            start + len
        ))
    })
}

fn clip(value: i32) -> u8 {
    u8::try_from(value.clamp(0, 255)).unwrap_or(u8::MAX)
}

/// Fixed-point YUV to RGB. `u` and `v` are already centred on zero.
fn yuv_to_rgb(luma: u8, u: i32, v: i32) -> (u8, u8, u8) {
    let y = i32::from(luma);
    let u1 = ((u << 7) + u) >> 6;
    let rg = ((u << 1) + u + (v << 2) + (v << 1)) >> 3;
    let v1 = ((v << 1) + v) >> 1;
    (clip(y + v1), clip(y - rg), clip(y + u1))
}

/// Decode HM12 into packed 24-bit pixels in `dest`.
///
/// # Arguments
///
/// * `src` - HM12 frame, at least [`hm12_len`]`(height)` bytes
/// * `dest` - Output, at least [`packed_rgb_len`]`(width, height)` bytes
/// * `order` - Whether red or blue comes first
pub fn hm12_to_packed_rgb_into(
    src: &[u8],
    dest: &mut [u8],
    width: u32,
    height: u32,
    order: ChannelOrder,
) -> Result<()> {
    let (w, h) = check_source(src, width, height)?;
    check_dest(dest, packed_rgb_len(width, height))?;
    let (y_plane, uv_plane) = src.split_at(HM12_STRIDE * h);

    for y in (0..h).step_by(16) {
        let max_y = (h - y).min(16);

        for (column, x) in (0..w).step_by(16).enumerate() {
            let max_x = (w - x).min(16);
            let mut y_offset = ((y / 16) * MB_PER_ROW + column) * MB_SIZE;
            let mut uv_offset = ((y / 32) * MB_PER_ROW + column) * MB_SIZE;
            // Each chroma macroblock serves two luma macroblock rows.
            if y & 16 != 0 {
                uv_offset += MB_SIZE / 2;
            }

            for i in 0..max_y {
                let luma = block_row(y_plane, y_offset, max_x)?;
                let chroma = block_row(uv_plane, uv_offset, 16)?;
                let out = dest_row(dest, ((y + i) * w + x) * 3, max_x * 3)?;

                for ((pair_out, pair_luma), uv) in out
                    .chunks_mut(6)
                    .zip(luma.chunks(2))
                    .zip(chroma.chunks_exact(2))
                {
                    let (u, v) = match uv {
                        [u, v] => (i32::from(*u) - 128, i32::from(*v) - 128),
                        _ => (0, 0),
                    };
                    for (pixel, &sample) in pair_out.chunks_exact_mut(3).zip(pair_luma) {
                        let (red, green, blue) = yuv_to_rgb(sample, u, v);
                        let (first, last) = match order {
                            ChannelOrder::Rgb => (red, blue),
                            ChannelOrder::Bgr => (blue, red),
                        };
                        pixel.copy_from_slice(&[first, green, last]);
                    }
                }

                y_offset += 16;
                if i & 1 == 1 {
                    uv_offset += 16;
                }
            }
        }
    }
    Ok(())
}

/// Decode HM12 into a newly allocated packed 24-bit frame.
pub fn hm12_to_packed_rgb(
    src: &[u8],
    width: u32,
    height: u32,
    order: ChannelOrder,
) -> Result<Vec<u8>> {
    let mut dest = vec![0; packed_rgb_len(width, height)];
    hm12_to_packed_rgb_into(src, &mut dest, width, height, order)?;
    Ok(dest)
}

fn de_macro_y(dest: &mut [u8], src: &[u8], w: usize, h: usize) -> Result<()> {
    for y in (0..h).step_by(16) {
        let max_y = (h - y).min(16);
        for x in (0..w).step_by(16) {
            let max_x = (w - x).min(16);
            let mut offset = y * HM12_STRIDE + x * 16;
            for i in 0..max_y {
                dest_row(dest, (y + i) * w + x, max_x)?
                    .copy_from_slice(block_row(src, offset, max_x)?);
                offset += 16;
            }
        }
    }
    Ok(())
}

fn de_macro_uv(dest_u: &mut [u8], dest_v: &mut [u8], src: &[u8], w: usize, h: usize) -> Result<()> {
    for y in (0..h).step_by(16) {
        let max_y = (h - y).min(16);
        for x in (0..w).step_by(8) {
            let max_x = (w - x).min(8);
            let mut offset = y * HM12_STRIDE + x * 32;
            for i in 0..max_y {
                let pairs = block_row(src, offset, max_x * 2)?;
                let idx = (y + i) * w + x;
                for (dst, &sample) in dest_row(dest_u, idx, max_x)?
                    .iter_mut()
                    .zip(pairs.iter().step_by(2))
                {
                    *dst = sample;
                }
                for (dst, &sample) in dest_row(dest_v, idx, max_x)?
                    .iter_mut()
                    .zip(pairs.iter().skip(1).step_by(2))
                {
                    *dst = sample;
                }
                offset += 16;
            }
        }
    }
    Ok(())
}

/// Decode HM12 into planar 4:2:0 in `dest`.
///
/// The luma plane is followed by two `(width / 2) * (height / 2)` chroma
/// planes, U first unless `swap_uv` is set.
pub fn hm12_to_planar_yuv420_into(
    src: &[u8],
    dest: &mut [u8],
    width: u32,
    height: u32,
    swap_uv: bool,
) -> Result<()> {
    let (w, h) = check_source(src, width, height)?;
    check_dest(dest, planar_yuv420_len(width, height))?;
    let (y_plane, uv_plane) = src.split_at(HM12_STRIDE * h);

    let (luma, chroma) = dest.split_at_mut(w * h);
    let (cw, ch) = (w / 2, h / 2);
    let (first, second) = chroma.split_at_mut(cw * ch);
    let (dest_u, dest_v) = if swap_uv {
        (second, first)
    } else {
        (first, second)
    };

    de_macro_y(luma, y_plane, w, h)?;
    de_macro_uv(dest_u, dest_v, uv_plane, cw, ch)
}

/// Decode HM12 into a newly allocated planar 4:2:0 frame.
pub fn hm12_to_planar_yuv420(
    src: &[u8],
    width: u32,
    height: u32,
    swap_uv: bool,
) -> Result<Vec<u8>> {
    let mut dest = vec![0; planar_yuv420_len(width, height)];
    hm12_to_planar_yuv420_into(src, &mut dest, width, height, swap_uv)?;
    Ok(dest)
}

/// HM12 to packed RGB24.
pub fn hm12_to_rgb24(src: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    hm12_to_packed_rgb(src, width, height, ChannelOrder::Rgb)
}

/// HM12 to packed BGR24.
pub fn hm12_to_bgr24(src: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    hm12_to_packed_rgb(src, width, height, ChannelOrder::Bgr)
}

/// HM12 to planar YUV 4:2:0 (YU12).
pub fn hm12_to_yuv420(src: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    hm12_to_planar_yuv420(src, width, height, false)
}

/// HM12 to planar YVU 4:2:0 (YV12).
pub fn hm12_to_yvu420(src: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    hm12_to_planar_yuv420(src, width, height, true)
}

/// Decode HM12 into `dest` in the given target format.
pub fn convert_hm12(
    src: &[u8],
    dest: &mut [u8],
    width: u32,
    height: u32,
    target: Hm12Target,
) -> Result<()> {
    match target {
        Hm12Target::Rgb24 => hm12_to_packed_rgb_into(src, dest, width, height, ChannelOrder::Rgb),
        Hm12Target::Bgr24 => hm12_to_packed_rgb_into(src, dest, width, height, ChannelOrder::Bgr),
        Hm12Target::Yuv420 => hm12_to_planar_yuv420_into(src, dest, width, height, false),
        Hm12Target::Yvu420 => hm12_to_planar_yuv420_into(src, dest, width, height, true),
    }
}
