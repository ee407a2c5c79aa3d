//! Kernel device file: the safe v4l API for caps, formats, controls and
//! stream parameters, v4l's raw bindings for buffer queueing, and
//! [`crate::sys`] for V1 and driver-private requests.

use std::io;
use std::os::unix::io::RawFd;
use std::panic::catch_unwind;
use std::path::Path;

use libc::c_int;
use v4l::capability::Flags;
use v4l::control::{Control, Type as ControlType, Value};
use v4l::parameters::{Capabilities, Parameters};
use v4l::video::Capture;
use v4l::Device;

use crate::sys::{self, MappedRegion};
use crate::traits::{
    BufferLocation, Dequeued, DeviceCapabilities, DeviceFile, FourCC, Format, Fraction, InputInfo,
    NativeControl, PrivateRequest, StreamParams, V1Capability, V1Channel, V1Mbuf, V1Ops,
    V1Picture, V2Ops,
};

/// An opened video device node.
pub struct KernelFile {
    device: Device,
    fd: RawFd,
}

impl KernelFile {
    /// Open a device node read-write (e.g., `/dev/video0`).
    pub fn open(path: &Path) -> io::Result<Self> {
        let device = Device::with_path(path)?;
        let fd = device.handle().fd();
        Ok(Self { device, fd })
    }
}

fn to_c_int(value: u32) -> io::Result<c_int> {
    c_int::try_from(value)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "value exceeds C int range"))
}

fn from_c_int(value: c_int) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn saturate(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}

impl From<sys::VideoPicture> for V1Picture {
    fn from(p: sys::VideoPicture) -> Self {
        Self {
            brightness: p.brightness,
            hue: p.hue,
            colour: p.colour,
            contrast: p.contrast,
            whiteness: p.whiteness,
            depth: p.depth,
            palette: p.palette,
        }
    }
}

impl From<&V1Picture> for sys::VideoPicture {
    fn from(p: &V1Picture) -> Self {
        Self {
            brightness: p.brightness,
            hue: p.hue,
            colour: p.colour,
            contrast: p.contrast,
            whiteness: p.whiteness,
            depth: p.depth,
            palette: p.palette,
        }
    }
}

impl V2Ops for KernelFile {
    fn query_caps(&self) -> io::Result<DeviceCapabilities> {
        let caps = self.device.query_caps()?;

        Ok(DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(Flags::STREAMING),
        })
    }

    fn enum_inputs(&self) -> io::Result<Vec<InputInfo>> {
        let mut inputs = Vec::new();
        let mut index = 0;
        loop {
            match sys::v2::enum_input(self.fd, index) {
                Ok(input) => inputs.push(input),
                Err(err) if err.raw_os_error() == Some(libc::EINVAL) => return Ok(inputs),
                Err(err) => return Err(err),
            }
            index += 1;
        }
    }

    fn set_input(&self, index: u32) -> io::Result<()> {
        sys::v2::set_input(self.fd, index)
    }

    fn set_std(&self, id: u64) -> io::Result<()> {
        sys::v2::set_std(self.fd, id)
    }

    fn enum_formats(&self) -> io::Result<Vec<FourCC>> {
        Ok(self
            .device
            .enum_formats()?
            .into_iter()
            .map(|desc| FourCC::from(desc.fourcc))
            .collect())
    }

    fn set_format(&self, width: u32, height: u32, fourcc: Option<FourCC>) -> io::Result<Format> {
        let mut fmt = self.device.format()?;

        fmt.width = width;
        fmt.height = height;
        if let Some(fourcc) = fourcc {
            fmt.fourcc = fourcc.into();
        }

        let fmt = self.device.set_format(&fmt)?;

        Ok(Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        })
    }

    fn request_buffers(&self, count: u32) -> io::Result<u32> {
        sys::v2::request_buffers(self.fd, count)
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferLocation> {
        sys::v2::query_buffer(self.fd, index)
    }

    fn queue_buffer(&self, index: u32) -> io::Result<()> {
        sys::v2::queue_buffer(self.fd, index)
    }

    fn dequeue_buffer(&self) -> io::Result<Dequeued> {
        loop {
            match sys::v2::dequeue_buffer(self.fd) {
                Ok(dequeued) => return Ok(dequeued),
                // v4l opens the node non-blocking
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    sys::wait_readable(self.fd)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn stream_on(&self) -> io::Result<()> {
        sys::v2::stream_on(self.fd)
    }

    fn stream_off(&self) -> io::Result<()> {
        sys::v2::stream_off(self.fd)
    }

    fn query_controls(&self) -> io::Result<Vec<NativeControl>> {
        // The v4l crate panics on control types it does not know about.
        let descriptions = catch_unwind(|| self.device.query_controls())
            .map_err(|_| io::Error::other("control enumeration hit an unsupported type"))??;

        Ok(descriptions
            .into_iter()
            .filter(|desc| {
                matches!(
                    desc.typ,
                    ControlType::Integer
                        | ControlType::Boolean
                        | ControlType::Menu
                        | ControlType::IntegerMenu
                ) && !desc.flags.contains(v4l::control::Flags::DISABLED)
            })
            .map(|desc| NativeControl {
                id: desc.id,
                name: desc.name,
                minimum: saturate(desc.minimum),
                maximum: saturate(desc.maximum),
                step: i32::try_from(desc.step).unwrap_or(1),
                default: saturate(desc.default),
            })
            .collect())
    }

    fn get_control(&self, id: u32) -> io::Result<i32> {
        match self.device.control(id)?.value {
            Value::Integer(value) => Ok(saturate(value)),
            Value::Boolean(value) => Ok(i32::from(value)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("control {id:#x} is not an integer control"),
            )),
        }
    }

    fn set_control(&self, id: u32, value: i32) -> io::Result<()> {
        self.device.set_control(Control {
            id,
            value: Value::Integer(i64::from(value)),
        })
    }

    fn get_parm(&self) -> io::Result<StreamParams> {
        Ok(stream_params(&self.device.params()?))
    }

    fn set_parm(&self, time_per_frame: Fraction) -> io::Result<StreamParams> {
        let mut params = self.device.params()?;
        params.interval =
            v4l::Fraction::new(time_per_frame.numerator, time_per_frame.denominator);

        let params = self.device.set_params(&params)?;
        Ok(stream_params(&params))
    }
}

fn stream_params(params: &Parameters) -> StreamParams {
    StreamParams {
        can_set_frame_interval: params.capabilities.contains(Capabilities::TIME_PER_FRAME),
        time_per_frame: Fraction {
            numerator: params.interval.numerator,
            denominator: params.interval.denominator,
        },
    }
}

impl V1Ops for KernelFile {
    fn get_capability(&self) -> io::Result<V1Capability> {
        let mut cap = sys::VideoCapability::default();
        sys::ioctl_mut(sys::vidiocgcap, self.fd, &mut cap)?;

        Ok(V1Capability {
            name: sys::c_name(&cap.name),
            channels: from_c_int(cap.channels),
            max_width: from_c_int(cap.maxwidth),
            max_height: from_c_int(cap.maxheight),
            min_width: from_c_int(cap.minwidth),
            min_height: from_c_int(cap.minheight),
            can_capture: cap.kind & sys::VID_TYPE_CAPTURE != 0,
        })
    }

    fn get_channel(&self, index: u32) -> io::Result<V1Channel> {
        let mut chan = sys::VideoChannel {
            channel: to_c_int(index)?,
            ..Default::default()
        };
        sys::ioctl_mut(sys::vidiocgchan, self.fd, &mut chan)?;

        Ok(V1Channel {
            index,
            name: sys::c_name(&chan.name),
            tuners: if chan.flags & sys::VIDEO_VC_TUNER != 0 {
                from_c_int(chan.tuners)
            } else {
                0
            },
            norm: chan.norm,
        })
    }

    fn set_channel(&self, index: u32, norm: u16) -> io::Result<()> {
        let mut chan = sys::VideoChannel {
            channel: to_c_int(index)?,
            ..Default::default()
        };
        sys::ioctl_mut(sys::vidiocgchan, self.fd, &mut chan)?;
        chan.norm = norm;
        sys::ioctl_ptr(sys::vidiocschan, self.fd, &chan)
    }

    fn get_picture(&self) -> io::Result<V1Picture> {
        let mut pict = sys::VideoPicture::default();
        sys::ioctl_mut(sys::vidiocgpict, self.fd, &mut pict)?;
        Ok(pict.into())
    }

    fn set_picture(&self, picture: &V1Picture) -> io::Result<()> {
        let pict = sys::VideoPicture::from(picture);
        sys::ioctl_ptr(sys::vidiocspict, self.fd, &pict)
    }

    fn set_window(&self, width: u32, height: u32) -> io::Result<(u32, u32)> {
        let win = sys::VideoWindow {
            width,
            height,
            ..Default::default()
        };
        sys::ioctl_ptr(sys::vidiocswin, self.fd, &win)?;

        let mut win = sys::VideoWindow::default();
        sys::ioctl_mut(sys::vidiocgwin, self.fd, &mut win)?;
        Ok((win.width, win.height))
    }

    fn get_mbuf(&self) -> io::Result<V1Mbuf> {
        let mut mbuf = sys::VideoMbuf::default();
        sys::ioctl_mut(sys::vidiocgmbuf, self.fd, &mut mbuf)?;

        let frames = (from_c_int(mbuf.frames) as usize).min(sys::VIDEO_MAX_FRAME);
        Ok(V1Mbuf {
            size: from_c_int(mbuf.size) as usize,
            offsets: mbuf
                .offsets
                .iter()
                .take(frames)
                .map(|&offset| from_c_int(offset) as usize)
                .collect(),
        })
    }

    fn mcapture(&self, frame: u32, width: u32, height: u32, palette: u16) -> io::Result<()> {
        let mmap = sys::VideoMmap {
            frame,
            height: to_c_int(height)?,
            width: to_c_int(width)?,
            format: u32::from(palette),
        };
        sys::ioctl_ptr(sys::vidiocmcapture, self.fd, &mmap)
    }

    fn sync(&self, frame: u32) -> io::Result<()> {
        let frame = to_c_int(frame)?;
        sys::ioctl_ptr(sys::vidiocsync, self.fd, &frame)
    }
}

impl DeviceFile for KernelFile {
    type Mapping = MappedRegion;

    fn map(&self, offset: u64, length: usize) -> io::Result<Self::Mapping> {
        MappedRegion::new(self.fd, offset, length)
    }

    fn private_ioctl(&self, request: PrivateRequest, arg: &mut [u8]) -> io::Result<()> {
        sys::private_ioctl(self.fd, request, arg)
    }
}
