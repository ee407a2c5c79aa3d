//! V2 requests the `v4l` crate only exposes as raw bindings: buffer
//! queueing, inputs and standards, issued on `v4l_sys` structs through
//! `v4l::v4l2::ioctl`.

use std::io;
use std::mem;
use std::os::raw::c_void;
use std::os::unix::io::RawFd;

use v4l::buffer::Type;
use v4l::memory::Memory;
use v4l::v4l2::{self, vidioc};
use v4l::v4l_sys::{v4l2_buffer, v4l2_input, v4l2_requestbuffers, v4l2_std_id};

use crate::traits::{BufferLocation, Dequeued, InputInfo};

const CAPTURE: u32 = Type::VideoCapture as u32;
const MMAP: u32 = Memory::Mmap as u32;

fn capture_buffer(index: u32) -> v4l2_buffer {
    v4l2_buffer {
        index,
        type_: CAPTURE,
        memory: MMAP,
        // SAFETY: the binding is plain old data; all-zero is a valid value.
        ..unsafe { mem::zeroed() }
    }
}

/// REQBUFS for memory-mapped capture buffers; returns the granted count.
pub fn request_buffers(fd: RawFd, count: u32) -> io::Result<u32> {
    let mut req = v4l2_requestbuffers {
        count,
        type_: CAPTURE,
        memory: MMAP,
        // SAFETY: as above.
        ..unsafe { mem::zeroed() }
    };
    // SAFETY: `req` is a live v4l2_requestbuffers, the type REQBUFS expects.
    unsafe {
        v4l2::ioctl(
            fd,
            vidioc::VIDIOC_REQBUFS,
            &mut req as *mut _ as *mut c_void,
        )?;
    }
    Ok(req.count)
}

pub fn query_buffer(fd: RawFd, index: u32) -> io::Result<BufferLocation> {
    let mut buf = capture_buffer(index);
    // SAFETY: `buf` is a live v4l2_buffer.
    unsafe {
        v4l2::ioctl(
            fd,
            vidioc::VIDIOC_QUERYBUF,
            &mut buf as *mut _ as *mut c_void,
        )?;
    }
    // SAFETY: MMAP buffers always carry the offset member.
    let offset = unsafe { buf.m.offset };
    Ok(BufferLocation {
        offset: u64::from(offset),
        length: buf.length as usize,
    })
}

pub fn queue_buffer(fd: RawFd, index: u32) -> io::Result<()> {
    let mut buf = capture_buffer(index);
    // SAFETY: `buf` is a live v4l2_buffer.
    unsafe { v4l2::ioctl(fd, vidioc::VIDIOC_QBUF, &mut buf as *mut _ as *mut c_void) }
}

/// One DQBUF attempt. Fails with `WouldBlock` on a non-blocking node with
/// nothing ready.
pub fn dequeue_buffer(fd: RawFd) -> io::Result<Dequeued> {
    let mut buf = capture_buffer(0);
    // SAFETY: `buf` is a live v4l2_buffer.
    unsafe {
        v4l2::ioctl(fd, vidioc::VIDIOC_DQBUF, &mut buf as *mut _ as *mut c_void)?;
    }
    Ok(Dequeued {
        index: buf.index as usize,
        bytes_used: buf.bytesused as usize,
        sequence: buf.sequence,
    })
}

pub fn stream_on(fd: RawFd) -> io::Result<()> {
    let mut typ = CAPTURE;
    // SAFETY: STREAMON reads a single buffer type.
    unsafe {
        v4l2::ioctl(
            fd,
            vidioc::VIDIOC_STREAMON,
            &mut typ as *mut _ as *mut c_void,
        )
    }
}

pub fn stream_off(fd: RawFd) -> io::Result<()> {
    let mut typ = CAPTURE;
    // SAFETY: STREAMOFF reads a single buffer type.
    unsafe {
        v4l2::ioctl(
            fd,
            vidioc::VIDIOC_STREAMOFF,
            &mut typ as *mut _ as *mut c_void,
        )
    }
}

/// ENUMINPUT for one index. EINVAL marks the end of the list.
pub fn enum_input(fd: RawFd, index: u32) -> io::Result<InputInfo> {
    let mut input = v4l2_input {
        index,
        // SAFETY: as above.
        ..unsafe { mem::zeroed() }
    };
    // SAFETY: `input` is a live v4l2_input.
    unsafe {
        v4l2::ioctl(
            fd,
            vidioc::VIDIOC_ENUMINPUT,
            &mut input as *mut _ as *mut c_void,
        )?;
    }
    let name: Vec<u8> = input.name.iter().map(|&c| c as u8).collect();
    Ok(InputInfo {
        index,
        name: super::c_name(&name),
        tuner: input.type_ == v4l::v4l_sys::V4L2_INPUT_TYPE_TUNER,
    })
}

pub fn set_input(fd: RawFd, index: u32) -> io::Result<()> {
    let mut index = libc::c_int::try_from(index)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "input index out of range"))?;
    // SAFETY: S_INPUT takes a single int.
    unsafe {
        v4l2::ioctl(
            fd,
            vidioc::VIDIOC_S_INPUT,
            &mut index as *mut _ as *mut c_void,
        )
    }
}

pub fn set_std(fd: RawFd, id: u64) -> io::Result<()> {
    let mut id: v4l2_std_id = id;
    // SAFETY: S_STD takes a single v4l2_std_id.
    unsafe { v4l2::ioctl(fd, vidioc::VIDIOC_S_STD, &mut id as *mut _ as *mut c_void) }
}
