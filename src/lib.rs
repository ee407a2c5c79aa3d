//! videodev: one capture handle over V4L1 and V4L2 video devices
//!
//! [`Device`] opens a node, detects which protocol generation it speaks and
//! dispatches capture, control and query requests to the matching layer.
//! Driver-specific controls are discovered by the probes in [`control`], and
//! [`convert`] turns the cx2341x HM12 macroblock format into packed RGB or
//! planar YUV.
//!
//! ```no_run
//! use videodev::{CaptureParams, Device};
//!
//! # fn main() -> videodev::Result<()> {
//! let mut device = Device::open("/dev/video0")?;
//! device.init_capture(CaptureParams::new(640, 480))?;
//! device.start_capture()?;
//! let index = device.dequeue_buffer()?.index;
//! device.enqueue_buffer(index)?;
//! device.stop_capture()?;
//! device.free_capture()?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod control;
pub mod convert;
pub mod device;
pub mod handle;
pub mod info;
mod sys;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use capture::{CaptureParams, CaptureState, CapturedBuffer, SlotState};
pub use control::{ControlDescriptor, ControlList, DriverProbe, ProbeRegistry, ProbeSession};
pub use convert::{
    convert_hm12, hm12_to_bgr24, hm12_to_rgb24, hm12_to_yuv420, hm12_to_yvu420, Hm12Target,
};
pub use device::KernelFile;
pub use handle::{CloseError, Device};
pub use info::DeviceInfo;
pub use traits::{
    DeviceFile, Error, FourCC, Format, InputInfo, NativeControl, Protocol, Resource, Result,
    VideoStandard,
};
