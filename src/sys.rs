//! Raw kernel requests.
//!
//! The V1 structs follow the historical `linux/videodev.h`, which no crate
//! carries; request numbers are generated with the `nix` ioctl macros from
//! those layouts, so a size mismatch produces a different request code
//! rather than a silent overrun. Driver-private requests go through
//! [`private_ioctl`]. V2 requests missing from the safe `v4l` API live in
//! [`v2`] on the crate's own bindings.

#![allow(unsafe_code)]
#![allow(clippy::struct_field_names)]

use std::io;
use std::os::unix::io::RawFd;
use std::ptr::{self, NonNull};

use libc::{c_int, c_void};

use crate::traits::PrivateRequest;

pub const VIDEO_MAX_FRAME: usize = 32;

pub const VID_TYPE_CAPTURE: c_int = 1;
pub const VIDEO_VC_TUNER: u32 = 1;

pub mod v2;

// ---------------------------------------------------------------------------
// V1
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoCapability {
    pub name: [u8; 32],
    pub kind: c_int,
    pub channels: c_int,
    pub audios: c_int,
    pub maxwidth: c_int,
    pub maxheight: c_int,
    pub minwidth: c_int,
    pub minheight: c_int,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoChannel {
    pub channel: c_int,
    pub name: [u8; 32],
    pub tuners: c_int,
    pub flags: u32,
    pub kind: u16,
    pub norm: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoPicture {
    pub brightness: u16,
    pub hue: u16,
    pub colour: u16,
    pub contrast: u16,
    pub whiteness: u16,
    pub depth: u16,
    pub palette: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VideoWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub chromakey: u32,
    pub flags: u32,
    pub clips: *mut c_void,
    pub clipcount: c_int,
}

impl Default for VideoWindow {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            chromakey: 0,
            flags: 0,
            clips: ptr::null_mut(),
            clipcount: 0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoMbuf {
    pub size: c_int,
    pub frames: c_int,
    pub offsets: [c_int; VIDEO_MAX_FRAME],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoMmap {
    pub frame: u32,
    pub height: c_int,
    pub width: c_int,
    pub format: u32,
}

nix::ioctl_read!(vidiocgcap, b'v', 1, VideoCapability);
nix::ioctl_readwrite!(vidiocgchan, b'v', 2, VideoChannel);
nix::ioctl_write_ptr!(vidiocschan, b'v', 3, VideoChannel);
nix::ioctl_read!(vidiocgpict, b'v', 6, VideoPicture);
nix::ioctl_write_ptr!(vidiocspict, b'v', 7, VideoPicture);
nix::ioctl_read!(vidiocgwin, b'v', 9, VideoWindow);
nix::ioctl_write_ptr!(vidiocswin, b'v', 10, VideoWindow);
nix::ioctl_write_ptr!(vidiocsync, b'v', 18, c_int);
nix::ioctl_write_ptr!(vidiocmcapture, b'v', 19, VideoMmap);
nix::ioctl_read!(vidiocgmbuf, b'v', 20, VideoMbuf);

// ---------------------------------------------------------------------------
// Safe wrappers
// ---------------------------------------------------------------------------

type MutRequest<T> = unsafe fn(c_int, *mut T) -> nix::Result<c_int>;
type PtrRequest<T> = unsafe fn(c_int, *const T) -> nix::Result<c_int>;

/// Issue a request whose argument the kernel may overwrite.
pub fn ioctl_mut<T>(request: MutRequest<T>, fd: RawFd, arg: &mut T) -> io::Result<()> {
    // SAFETY: `request` was generated from the layout of `T` and `arg` is a
    // live, exclusively borrowed `T`.
    unsafe { request(fd, arg) }
        .map(drop)
        .map_err(io::Error::from)
}

/// Issue a request that only reads its argument.
pub fn ioctl_ptr<T>(request: PtrRequest<T>, fd: RawFd, arg: &T) -> io::Result<()> {
    // SAFETY: `request` was generated from the layout of `T` and `arg` is a
    // live `T`.
    unsafe { request(fd, arg) }
        .map(drop)
        .map_err(io::Error::from)
}

/// Issue a driver-private request on an opaque argument block.
pub fn private_ioctl(fd: RawFd, request: PrivateRequest, arg: &mut [u8]) -> io::Result<()> {
    if arg.len() != request.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "argument is {} bytes, request expects {}",
                arg.len(),
                request.len()
            ),
        ));
    }
    let ptr = if arg.is_empty() {
        ptr::null_mut()
    } else {
        arg.as_mut_ptr().cast::<c_void>()
    };
    // SAFETY: the kernel reads or writes at most `request.len()` bytes, which
    // is exactly the length of `arg`.
    let ret = unsafe { libc::ioctl(fd, request.code() as _, ptr) };
    nix::errno::Errno::result(ret)
        .map(|_| ())
        .map_err(io::Error::from)
}

/// Block until `fd` becomes readable.
pub fn wait_readable(fd: RawFd) -> io::Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    loop {
        // SAFETY: `pfd` is a single valid pollfd.
        let ret = unsafe { libc::poll(&mut pfd, 1, -1) };
        match nix::errno::Errno::result(ret) {
            Ok(_) => return Ok(()),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(err) => return Err(err.into()),
        }
    }
}

/// Shared device memory, unmapped on drop.
#[derive(Debug)]
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl MappedRegion {
    pub fn new(fd: RawFd, offset: u64, len: usize) -> io::Result<Self> {
        let offset = libc::off_t::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "mmap offset overflow"))?;
        // SAFETY: a fresh shared mapping with no address hint; the result is
        // checked against MAP_FAILED before use.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned null"))?;
        Ok(Self { ptr, len })
    }
}

impl AsRef<[u8]> for MappedRegion {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: the region stays mapped for the lifetime of `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe a mapping created in `new`.
        let ret = unsafe { libc::munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) };
        if ret != 0 {
            log::warn!("munmap failed: {}", io::Error::last_os_error());
        }
    }
}

/// Read a NUL-terminated name field.
pub fn c_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(raw.get(..end).unwrap_or_default()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn test_v1_struct_sizes() {
        assert_eq!(mem::size_of::<VideoCapability>(), 60);
        assert_eq!(mem::size_of::<VideoChannel>(), 48);
        assert_eq!(mem::size_of::<VideoPicture>(), 14);
        assert_eq!(mem::size_of::<VideoMbuf>(), 136);
        assert_eq!(mem::size_of::<VideoMmap>(), 16);
    }

    #[test]
    fn test_c_name_stops_at_nul() {
        let mut raw = [0u8; 32];
        raw[..5].copy_from_slice(b"vivid");
        assert_eq!(c_name(&raw), "vivid");
        assert_eq!(c_name(b"full"), "full");
    }

    #[test]
    fn test_private_ioctl_rejects_wrong_length() {
        let request = PrivateRequest::read(b'v', 200, 4);
        let mut arg = [0u8; 2];
        let err = private_ioctl(-1, request, &mut arg).expect_err("length mismatch should fail");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
