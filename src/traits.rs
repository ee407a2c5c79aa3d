//! Core traits and types shared by the V1 and V2 protocol layers.
//!
//! Everything that talks to a device node goes through [`DeviceFile`], which
//! bundles the requests each protocol generation needs ([`V1Ops`] and
//! [`V2Ops`]) with memory mapping and driver-private requests. The kernel
//! implementation lives in [`crate::device`]; tests drive the same code
//! through a scripted fake.

use std::fmt;
use std::io;
use std::path::PathBuf;

use nix::sys::ioctl::ioctl_num_type;

use crate::capture::CaptureState;

/// Pixel format representation (e.g., YUYV, HM12, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// UYVY pixel format (4:2:2 packed).
    pub const UYVY: Self = Self::new(b"UYVY");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// BGR3 pixel format (24-bit BGR).
    pub const BGR3: Self = Self::new(b"BGR3");
    /// BGR4 pixel format (32-bit BGRX).
    pub const BGR4: Self = Self::new(b"BGR4");
    /// RGBP pixel format (16-bit RGB 5:6:5).
    pub const RGBP: Self = Self::new(b"RGBP");
    /// GREY pixel format (8-bit luma only).
    pub const GREY: Self = Self::new(b"GREY");
    /// YU12 pixel format (planar YUV 4:2:0).
    pub const YU12: Self = Self::new(b"YU12");
    /// YV12 pixel format (planar YVU 4:2:0).
    pub const YV12: Self = Self::new(b"YV12");
    /// 422P pixel format (planar YUV 4:2:2).
    pub const YUV422P: Self = Self::new(b"422P");
    /// 411P pixel format (planar YUV 4:1:1).
    pub const YUV411P: Self = Self::new(b"411P");
    /// HM12 pixel format (cx2341x 16x16 macroblock YUV 4:2:0).
    pub const HM12: Self = Self::new(b"HM12");

    /// The little-endian `u32` the kernel uses for this code.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Build a code from the kernel's little-endian `u32`.
    #[must_use]
    pub const fn from_u32(code: u32) -> Self {
        Self(code.to_le_bytes())
    }

    /// Average bits per pixel, `None` for compressed formats.
    #[must_use]
    pub const fn bits_per_pixel(self) -> Option<u32> {
        match &self.0 {
            b"GREY" => Some(8),
            b"YU12" | b"YV12" | b"411P" | b"HM12" => Some(12),
            b"YUYV" | b"UYVY" | b"RGBP" | b"422P" => Some(16),
            b"RGB3" | b"BGR3" => Some(24),
            b"BGR4" => Some(32),
            _ => None,
        }
    }

    /// Whether samples are stored in separate planes.
    #[must_use]
    pub const fn is_planar(self) -> bool {
        matches!(&self.0, b"YU12" | b"YV12" | b"422P" | b"411P" | b"HM12")
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride) of the first plane.
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new format specification, deriving stride and size from the
    /// pixel format. Compressed formats get zero for both.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let (stride, size) = match fourcc.0 {
            // HM12 lines are always 720 bytes regardless of the image width
            [b'H', b'M', b'1', b'2'] => (720, 720 * height * 3 / 2),
            _ => match fourcc.bits_per_pixel() {
                Some(bpp) if fourcc.is_planar() => (width, width * height * bpp / 8),
                Some(bpp) => (width * bpp / 8, width * bpp / 8 * height),
                None => (0, 0),
            },
        };
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }
}

/// Kernel protocol generation spoken by a device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// The original Video4Linux API.
    V1,
    /// Video4Linux2.
    V2,
    /// Not detected; never produced by a successful open.
    Unknown,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "V4L1"),
            Self::V2 => write!(f, "V4L2"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Analog video standard selected on the capture input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoStandard {
    /// No standard; leave the driver's selection untouched.
    #[default]
    Webcam,
    /// PAL (all variants).
    Pal,
    /// SECAM (all variants).
    Secam,
    /// NTSC (all variants).
    Ntsc,
}

impl VideoStandard {
    /// The V2 `v4l2_std_id` mask for this standard.
    #[must_use]
    pub const fn v2_id(self) -> Option<u64> {
        match self {
            Self::Webcam => None,
            Self::Pal => Some(0x0000_00ff),
            Self::Ntsc => Some(0x0000_b000),
            Self::Secam => Some(0x00ff_0000),
        }
    }

    /// The V1 channel norm for this standard.
    #[must_use]
    pub const fn v1_norm(self) -> Option<u16> {
        match self {
            Self::Webcam => None,
            Self::Pal => Some(0),
            Self::Ntsc => Some(1),
            Self::Secam => Some(2),
        }
    }
}

/// Capabilities reported by a V2 device.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Capabilities reported by a V1 device.
#[derive(Debug, Clone, Default)]
pub struct V1Capability {
    /// Device name.
    pub name: String,
    /// Number of video channels.
    pub channels: u32,
    /// Largest supported capture width.
    pub max_width: u32,
    /// Largest supported capture height.
    pub max_height: u32,
    /// Smallest supported capture width.
    pub min_width: u32,
    /// Smallest supported capture height.
    pub min_height: u32,
    /// Whether the device can capture to memory.
    pub can_capture: bool,
}

/// One V1 video channel.
#[derive(Debug, Clone, Default)]
pub struct V1Channel {
    /// Channel index.
    pub index: u32,
    /// Channel name.
    pub name: String,
    /// Number of tuners on this channel.
    pub tuners: u32,
    /// Selected norm.
    pub norm: u16,
}

/// V1 picture settings, which double as the V1 standard controls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct V1Picture {
    /// Picture brightness.
    pub brightness: u16,
    /// Picture hue.
    pub hue: u16,
    /// Picture colour saturation.
    pub colour: u16,
    /// Picture contrast.
    pub contrast: u16,
    /// Whiteness (greyscale devices only).
    pub whiteness: u16,
    /// Capture depth in bits.
    pub depth: u16,
    /// Palette code.
    pub palette: u16,
}

/// Layout of the V1 capture memory.
#[derive(Debug, Clone, Default)]
pub struct V1Mbuf {
    /// Size of the whole mapping.
    pub size: usize,
    /// Offset of each frame inside the mapping.
    pub offsets: Vec<usize>,
}

/// One video input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputInfo {
    /// Input index.
    pub index: u32,
    /// Input name.
    pub name: String,
    /// Whether the input is fed by a tuner.
    pub tuner: bool,
}

/// A control as the driver describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeControl {
    /// Control identifier.
    pub id: u32,
    /// Human-readable name.
    pub name: String,
    /// Smallest accepted value.
    pub minimum: i32,
    /// Largest accepted value.
    pub maximum: i32,
    /// Increment between valid values.
    pub step: i32,
    /// Value after reset.
    pub default: i32,
}

/// Where a V2 buffer lives in the device's mappable memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLocation {
    /// Offset to pass to `mmap`.
    pub offset: u64,
    /// Buffer length in bytes.
    pub length: usize,
}

/// A buffer handed back by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dequeued {
    /// Buffer index.
    pub index: usize,
    /// Bytes the driver wrote.
    pub bytes_used: usize,
    /// Frame sequence number.
    pub sequence: u32,
}

/// A rational frame interval (seconds per frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    /// Numerator.
    pub numerator: u32,
    /// Denominator.
    pub denominator: u32,
}

/// V2 streaming parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// Whether the driver honours `time_per_frame` changes.
    pub can_set_frame_interval: bool,
    /// Current frame interval.
    pub time_per_frame: Fraction,
}

/// A driver-private request code together with its argument size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrivateRequest {
    code: ioctl_num_type,
    len: usize,
}

impl PrivateRequest {
    /// A request without argument.
    #[must_use]
    pub const fn none(kind: u8, nr: u8) -> Self {
        Self {
            code: nix::request_code_none!(kind, nr),
            len: 0,
        }
    }

    /// A request the driver answers by filling `len` bytes.
    #[must_use]
    pub const fn read(kind: u8, nr: u8, len: usize) -> Self {
        Self {
            code: nix::request_code_read!(kind, nr, len),
            len,
        }
    }

    /// A request passing `len` bytes to the driver.
    #[must_use]
    pub const fn write(kind: u8, nr: u8, len: usize) -> Self {
        Self {
            code: nix::request_code_write!(kind, nr, len),
            len,
        }
    }

    /// A request passing `len` bytes that the driver overwrites.
    #[must_use]
    pub const fn read_write(kind: u8, nr: u8, len: usize) -> Self {
        Self {
            code: nix::request_code_readwrite!(kind, nr, len),
            len,
        }
    }

    /// The encoded request number.
    #[must_use]
    pub const fn code(self) -> ioctl_num_type {
        self.code
    }

    /// Size of the argument in bytes.
    #[must_use]
    pub const fn len(self) -> usize {
        self.len
    }

    /// Whether the request carries no argument.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len == 0
    }
}

/// Which dependent resource keeps a device handle from closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Device info is still held.
    Info,
    /// A capture interface is still attached.
    Capture,
    /// A control list is still attached.
    Control,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "device info"),
            Self::Capture => write!(f, "capture interface"),
            Self::Control => write!(f, "control list"),
        }
    }
}

/// Error type for device operations.
#[derive(Debug)]
pub enum Error {
    /// The device file could not be opened.
    OpenFailed {
        /// Device path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Neither the V2 nor the V1 capability query succeeded.
    VersionUndetected {
        /// Device path.
        path: PathBuf,
    },
    /// Close attempted while a dependent resource is still attached.
    ResourceInUse {
        /// Device path.
        path: PathBuf,
        /// The attached resource.
        resource: Resource,
    },
    /// Capture operation called out of sequence.
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// Capture state at the time, `None` when no interface exists.
        state: Option<CaptureState>,
    },
    /// Control value outside `[minimum, maximum]`.
    OutOfRange {
        /// Control name.
        control: String,
        /// Requested value.
        value: i32,
        /// Smallest accepted value.
        minimum: i32,
        /// Largest accepted value.
        maximum: i32,
    },
    /// A dispatch point was reached with an undetected protocol generation.
    WrongVersion {
        /// Device path.
        path: PathBuf,
    },
    /// The driver reported an I/O failure while capturing.
    CaptureFailed {
        /// Device path.
        path: PathBuf,
        /// The failing step.
        operation: &'static str,
        /// Underlying error.
        source: io::Error,
    },
    /// Buffer index out of range or not currently held by the caller.
    InvalidBuffer {
        /// Offending index.
        index: usize,
    },
    /// The driver rejected a control read or write.
    ControlFailed {
        /// Control name.
        control: String,
        /// Underlying error.
        source: io::Error,
    },
    /// Descriptor does not belong to this device's control list.
    UnknownControl {
        /// Control name.
        control: String,
    },
    /// The driver failed a query while building device info or controls.
    QueryFailed {
        /// Device path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Frame buffer too small or geometry unsupported by a converter.
    InvalidFrame(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenFailed { path, source } => {
                write!(f, "Failed to open {}: {source}", path.display())
            }
            Self::VersionUndetected { path } => {
                write!(f, "Unable to detect the V4L version of {}", path.display())
            }
            Self::ResourceInUse { path, resource } => {
                write!(f, "Cannot close {}: {resource} not released", path.display())
            }
            Self::InvalidState { operation, state } => match state {
                Some(state) => write!(f, "Cannot {operation} while capture is {state:?}"),
                None => write!(f, "Cannot {operation} without a capture interface"),
            },
            Self::OutOfRange {
                control,
                value,
                minimum,
                maximum,
            } => write!(
                f,
                "Value {value} out of range [{minimum}, {maximum}] for control {control}"
            ),
            Self::WrongVersion { path } => {
                write!(f, "Unsupported V4L version on {}", path.display())
            }
            Self::CaptureFailed {
                path,
                operation,
                source,
            } => write!(f, "Capture {operation} failed on {}: {source}", path.display()),
            Self::InvalidBuffer { index } => {
                write!(f, "Buffer {index} is not held by the caller")
            }
            Self::ControlFailed { control, source } => {
                write!(f, "Control {control} failed: {source}")
            }
            Self::UnknownControl { control } => {
                write!(f, "Control {control} is not known to this device")
            }
            Self::QueryFailed { path, source } => {
                write!(f, "Query failed on {}: {source}", path.display())
            }
            Self::InvalidFrame(msg) => write!(f, "Invalid frame: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::OpenFailed { source, .. }
            | Self::CaptureFailed { source, .. }
            | Self::ControlFailed { source, .. }
            | Self::QueryFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type for device operations.
pub type Result<T> = std::result::Result<T, Error>;

/// V2 requests issued against a device node.
pub trait V2Ops {
    /// `VIDIOC_QUERYCAP`.
    fn query_caps(&self) -> io::Result<DeviceCapabilities>;

    /// `VIDIOC_ENUMINPUT` over every input.
    fn enum_inputs(&self) -> io::Result<Vec<InputInfo>>;

    /// `VIDIOC_S_INPUT`.
    fn set_input(&self, index: u32) -> io::Result<()>;

    /// `VIDIOC_S_STD`.
    fn set_std(&self, id: u64) -> io::Result<()>;

    /// `VIDIOC_ENUM_FMT` over every capture format.
    fn enum_formats(&self) -> io::Result<Vec<FourCC>>;

    /// `VIDIOC_S_FMT`. Returns the format the driver settled on.
    fn set_format(&self, width: u32, height: u32, fourcc: Option<FourCC>) -> io::Result<Format>;

    /// `VIDIOC_REQBUFS` for memory-mapped buffers. Returns the granted count.
    fn request_buffers(&self, count: u32) -> io::Result<u32>;

    /// `VIDIOC_QUERYBUF`.
    fn query_buffer(&self, index: u32) -> io::Result<BufferLocation>;

    /// `VIDIOC_QBUF`.
    fn queue_buffer(&self, index: u32) -> io::Result<()>;

    /// `VIDIOC_DQBUF`, blocking until a buffer is ready.
    fn dequeue_buffer(&self) -> io::Result<Dequeued>;

    /// `VIDIOC_STREAMON`.
    fn stream_on(&self) -> io::Result<()>;

    /// `VIDIOC_STREAMOFF`.
    fn stream_off(&self) -> io::Result<()>;

    /// `VIDIOC_QUERYCTRL` over every enabled control.
    fn query_controls(&self) -> io::Result<Vec<NativeControl>>;

    /// `VIDIOC_G_CTRL`.
    fn get_control(&self, id: u32) -> io::Result<i32>;

    /// `VIDIOC_S_CTRL`.
    fn set_control(&self, id: u32, value: i32) -> io::Result<()>;

    /// `VIDIOC_G_PARM`.
    fn get_parm(&self) -> io::Result<StreamParams>;

    /// `VIDIOC_S_PARM`. Returns the parameters the driver settled on.
    fn set_parm(&self, time_per_frame: Fraction) -> io::Result<StreamParams>;
}

/// V1 requests issued against a device node.
pub trait V1Ops {
    /// `VIDIOCGCAP`.
    fn get_capability(&self) -> io::Result<V1Capability>;

    /// `VIDIOCGCHAN`.
    fn get_channel(&self, index: u32) -> io::Result<V1Channel>;

    /// `VIDIOCSCHAN`.
    fn set_channel(&self, index: u32, norm: u16) -> io::Result<()>;

    /// `VIDIOCGPICT`.
    fn get_picture(&self) -> io::Result<V1Picture>;

    /// `VIDIOCSPICT`.
    fn set_picture(&self, picture: &V1Picture) -> io::Result<()>;

    /// `VIDIOCSWIN` followed by `VIDIOCGWIN`. Returns the granted size.
    fn set_window(&self, width: u32, height: u32) -> io::Result<(u32, u32)>;

    /// `VIDIOCGMBUF`.
    fn get_mbuf(&self) -> io::Result<V1Mbuf>;

    /// `VIDIOCMCAPTURE`: hand `frame` to the driver.
    fn mcapture(&self, frame: u32, width: u32, height: u32, palette: u16) -> io::Result<()>;

    /// `VIDIOCSYNC`: wait for `frame` to be filled.
    fn sync(&self, frame: u32) -> io::Result<()>;
}

/// An opened device node.
pub trait DeviceFile: V1Ops + V2Ops {
    /// Shared memory returned by [`DeviceFile::map`]; unmapped on drop.
    type Mapping: AsRef<[u8]>;

    /// Map `length` bytes of device memory starting at `offset`.
    fn map(&self, offset: u64, length: usize) -> io::Result<Self::Mapping>;

    /// Issue a driver-private request with `arg` as its argument block.
    fn private_ioctl(&self, request: PrivateRequest, arg: &mut [u8]) -> io::Result<()>;
}
