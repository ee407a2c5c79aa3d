//! The device handle: protocol detection plus ownership of the capture
//! interface, control list and device info hanging off one device node.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::capture::{Capture, CaptureParams, CaptureState, CapturedBuffer};
use crate::control::{ControlDescriptor, ControlList, ProbeRegistry};
use crate::device::KernelFile;
use crate::info::DeviceInfo;
use crate::traits::{DeviceFile, Error, Format, FourCC, Protocol, Resource, Result};

/// One opened device node.
///
/// The protocol generation is fixed at open time. Capture, controls and info
/// are created on demand and must each be released before [`Device::close`]
/// succeeds.
pub struct Device<F: DeviceFile + 'static = KernelFile> {
    file: F,
    path: PathBuf,
    protocol: Protocol,
    probes: ProbeRegistry<F>,
    info: Option<DeviceInfo>,
    capture: Option<Capture<F>>,
    controls: Option<ControlList<F>>,
}

impl Device<KernelFile> {
    /// Open a device node and detect its protocol generation.
    ///
    /// # Arguments
    ///
    /// * `path` - Device node (e.g., `/dev/video0`)
    ///
    /// # Errors
    ///
    /// [`Error::OpenFailed`] if the node cannot be opened,
    /// [`Error::VersionUndetected`] if it answers neither capability query.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = KernelFile::open(path).map_err(|source| Error::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_file(path, file)
    }
}

impl<F: DeviceFile + 'static> Device<F> {
    /// Detect the protocol spoken by an already opened `file`.
    ///
    /// V2 is tried first; V1 only when the V2 capability query fails or the
    /// device does not report capture support.
    pub fn from_file<P: Into<PathBuf>>(path: P, file: F) -> Result<Self> {
        let path = path.into();
        let protocol = detect(&file, &path)?;
        log::debug!("opened {} as {protocol}", path.display());

        Ok(Self {
            file,
            path,
            protocol,
            probes: ProbeRegistry::builtin(),
            info: None,
            capture: None,
            controls: None,
        })
    }

    /// Replace the probe registry consulted by [`Device::list_controls`].
    #[must_use]
    pub fn with_probes(mut self, probes: ProbeRegistry<F>) -> Self {
        self.probes = probes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// The underlying device file.
    pub const fn file(&self) -> &F {
        &self.file
    }

    // -----------------------------------------------------------------------
    // Info
    // -----------------------------------------------------------------------

    /// Device description, queried on first use and kept until
    /// [`Device::release_info`].
    pub fn info(&mut self) -> Result<&DeviceInfo> {
        let info = match self.info.take() {
            Some(info) => info,
            None => DeviceInfo::query(&self.file, &self.path, self.protocol)?,
        };
        Ok(self.info.insert(info))
    }

    pub fn release_info(&mut self) {
        self.info = None;
    }

    // -----------------------------------------------------------------------
    // Capture
    // -----------------------------------------------------------------------

    /// Create the capture interface. Nothing is negotiated until
    /// [`Device::start_capture`].
    pub fn init_capture(&mut self, params: CaptureParams) -> Result<()> {
        if let Some(capture) = &self.capture {
            return Err(Error::InvalidState {
                operation: "init capture",
                state: Some(capture.state()),
            });
        }
        self.capture = Some(Capture::new(&self.path, self.protocol, params)?);
        Ok(())
    }

    /// Current capture interface, if any.
    pub const fn capture(&self) -> Option<&Capture<F>> {
        self.capture.as_ref()
    }

    pub fn capture_state(&self) -> Option<CaptureState> {
        self.capture.as_ref().map(Capture::state)
    }

    /// Negotiate the format, map the buffers and start streaming.
    ///
    /// # Returns
    ///
    /// The format the driver settled on, which may differ from the request.
    pub fn start_capture(&mut self) -> Result<Format> {
        attached(&mut self.capture, "start")?.start(&self.file)
    }

    /// Block until the driver hands back a filled buffer.
    ///
    /// The buffer stays with the caller until [`Device::enqueue_buffer`].
    pub fn dequeue_buffer(&mut self) -> Result<CapturedBuffer<'_>> {
        attached(&mut self.capture, "dequeue")?.dequeue(&self.file)
    }

    /// Return buffer `index` to the driver.
    pub fn enqueue_buffer(&mut self, index: usize) -> Result<()> {
        attached(&mut self.capture, "enqueue")?.enqueue(&self.file, index)
    }

    /// Contents of buffer `index`, which the caller must hold.
    pub fn buffer(&self, index: usize) -> Result<&[u8]> {
        self.capture
            .as_ref()
            .ok_or(Error::InvalidBuffer { index })?
            .buffer(index)
    }

    pub fn stop_capture(&mut self) -> Result<()> {
        attached(&mut self.capture, "stop")?.stop(&self.file)
    }

    /// Unmap the buffers and drop the capture interface. Only legal once
    /// stopped. If releasing the driver buffers fails the interface stays
    /// attached, so `close` keeps refusing and `free_capture` can be retried.
    pub fn free_capture(&mut self) -> Result<()> {
        attached(&mut self.capture, "free")?.free(&self.file)?;
        self.capture = None;
        Ok(())
    }

    /// Pixel formats the capture interface can negotiate.
    pub fn list_formats(&mut self) -> Result<Vec<FourCC>> {
        attached(&mut self.capture, "list formats")?.list_formats(&self.file)
    }

    // -----------------------------------------------------------------------
    // Controls
    // -----------------------------------------------------------------------

    /// All controls of the device, scanned on first use and kept until
    /// [`Device::release_control_list`].
    pub fn list_controls(&mut self) -> Result<&ControlList<F>> {
        let list = match self.controls.take() {
            Some(list) => list,
            None => ControlList::scan(&self.file, &self.path, self.protocol, &self.probes)?,
        };
        Ok(self.controls.insert(list))
    }

    fn control_list(&self, descriptor: &ControlDescriptor) -> Result<&ControlList<F>> {
        self.controls.as_ref().ok_or_else(|| Error::UnknownControl {
            control: descriptor.name().to_owned(),
        })
    }

    /// Read the current value of a control from this device's list.
    pub fn get_control(&self, descriptor: &ControlDescriptor) -> Result<i32> {
        self.control_list(descriptor)?
            .get_value(&self.file, descriptor)
    }

    /// Write a control. Values outside `[minimum, maximum]` fail with
    /// [`Error::OutOfRange`] before anything reaches the device.
    pub fn set_control(&self, descriptor: &ControlDescriptor, value: i32) -> Result<()> {
        descriptor.check_range(value)?;
        self.control_list(descriptor)?
            .set_value(&self.file, descriptor, value)
    }

    pub fn release_control_list(&mut self) {
        if let Some(list) = self.controls.take() {
            list.release();
        }
    }

    // -----------------------------------------------------------------------
    // Close
    // -----------------------------------------------------------------------

    /// Close the device node.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceInUse`] while info, a capture interface or a control
    /// list is still attached; the handle is handed back inside the error.
    pub fn close(self) -> std::result::Result<(), CloseError<F>> {
        let attached = if self.info.is_some() {
            Some(Resource::Info)
        } else if self.capture.is_some() {
            Some(Resource::Capture)
        } else if self.controls.is_some() {
            Some(Resource::Control)
        } else {
            None
        };

        if let Some(resource) = attached {
            let error = Error::ResourceInUse {
                path: self.path.clone(),
                resource,
            };
            return Err(CloseError {
                device: self,
                error,
            });
        }

        log::debug!("closed {}", self.path.display());
        Ok(())
    }
}

fn attached<'a, F: DeviceFile>(
    capture: &'a mut Option<Capture<F>>,
    operation: &'static str,
) -> Result<&'a mut Capture<F>> {
    capture.as_mut().ok_or(Error::InvalidState {
        operation,
        state: None,
    })
}

fn detect<F: DeviceFile>(file: &F, path: &Path) -> Result<Protocol> {
    match file.query_caps() {
        Ok(caps) if caps.can_capture => {
            log::trace!("{}: V2 driver {} ({})", path.display(), caps.driver, caps.card);
            return Ok(Protocol::V2);
        }
        Ok(_) => log::trace!("{}: V2 device without capture", path.display()),
        Err(err) => log::trace!("{}: V2 capability query failed: {err}", path.display()),
    }

    match file.get_capability() {
        Ok(cap) if cap.can_capture => {
            log::trace!("{}: V1 device {}", path.display(), cap.name);
            Ok(Protocol::V1)
        }
        _ => Err(Error::VersionUndetected {
            path: path.to_path_buf(),
        }),
    }
}

impl<F: DeviceFile + 'static> fmt::Debug for Device<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("path", &self.path)
            .field("protocol", &self.protocol)
            .field("probes", &self.probes)
            .field("info", &self.info)
            .field("capture", &self.capture)
            .field("controls", &self.controls)
            .finish_non_exhaustive()
    }
}

/// A refused [`Device::close`], carrying the handle back to the caller.
pub struct CloseError<F: DeviceFile + 'static> {
    device: Device<F>,
    error: Error,
}

impl<F: DeviceFile + 'static> CloseError<F> {
    /// Recover the still-open handle.
    pub fn into_device(self) -> Device<F> {
        self.device
    }

    pub const fn error(&self) -> &Error {
        &self.error
    }
}

impl<F: DeviceFile + 'static> fmt::Debug for CloseError<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseError")
            .field("path", &self.device.path)
            .field("error", &self.error)
            .finish()
    }
}

impl<F: DeviceFile + 'static> fmt::Display for CloseError<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<F: DeviceFile + 'static> std::error::Error for CloseError<F> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<F: DeviceFile + 'static> From<CloseError<F>> for Error {
    fn from(err: CloseError<F>) -> Self {
        err.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FakeDevice;

    fn open(file: FakeDevice) -> Device<FakeDevice> {
        Device::from_file("/dev/fake", file).expect("detection should succeed")
    }

    #[test]
    fn test_v2_wins_over_v1() {
        let device = open(FakeDevice::dual());
        assert_eq!(device.protocol(), Protocol::V2);
        assert!(!device.file().calls().contains(&"get_capability"));
    }

    #[test]
    fn test_v1_only_device_detects_v1() {
        let device = open(FakeDevice::v1());
        assert_eq!(device.protocol(), Protocol::V1);
    }

    #[test]
    fn test_silent_device_is_undetected() {
        let result = Device::from_file("/dev/fake", FakeDevice::unresponsive());
        assert!(matches!(result, Err(Error::VersionUndetected { .. })));
    }

    #[test]
    fn test_missing_node_is_open_failed() {
        let result = Device::open("/dev/videodev-does-not-exist");
        assert!(matches!(result, Err(Error::OpenFailed { .. })));
    }

    #[test]
    fn test_capture_lifecycle_through_handle() {
        let mut device = open(FakeDevice::v2());

        assert!(matches!(
            device.start_capture(),
            Err(Error::InvalidState { state: None, .. })
        ));

        device
            .init_capture(CaptureParams::new(64, 32))
            .expect("init");
        assert!(matches!(
            device.init_capture(CaptureParams::new(64, 32)),
            Err(Error::InvalidState { .. })
        ));

        device.start_capture().expect("start");
        assert!(matches!(
            device.free_capture(),
            Err(Error::InvalidState {
                operation: "free",
                state: Some(CaptureState::Streaming)
            })
        ));

        let index = device.dequeue_buffer().expect("dequeue").index;
        device.enqueue_buffer(index).expect("enqueue");
        device.stop_capture().expect("stop");
        device.free_capture().expect("free");

        assert_eq!(device.capture_state(), None);
        assert_eq!(device.file().live_mappings(), 0);
        device.close().expect("close");
    }

    #[test]
    fn test_failed_free_keeps_capture_attached() {
        let mut device = open(FakeDevice::v2());
        device
            .init_capture(CaptureParams::new(64, 32))
            .expect("init");
        device.start_capture().expect("start");
        device.stop_capture().expect("stop");

        device.file().fail_buffer_release(true);
        assert!(matches!(
            device.free_capture(),
            Err(Error::CaptureFailed {
                operation: "free",
                ..
            })
        ));
        assert_eq!(device.capture_state(), Some(CaptureState::Stopped));

        let err = device.close().expect_err("capture still attached");
        assert!(matches!(
            err.error(),
            Error::ResourceInUse {
                resource: Resource::Capture,
                ..
            }
        ));

        let mut device = err.into_device();
        device.file().fail_buffer_release(false);
        device.free_capture().expect("retry");
        assert_eq!(device.capture_state(), None);
        device.close().expect("close");
    }

    #[test]
    fn test_close_refused_while_controls_attached() {
        let mut device = open(FakeDevice::v2());
        device.list_controls().expect("controls");

        let err = device.close().expect_err("close should be refused");
        assert!(matches!(
            err.error(),
            Error::ResourceInUse {
                resource: Resource::Control,
                ..
            }
        ));

        let mut device = err.into_device();
        device.release_control_list();
        device.close().expect("close after release");
    }

    #[test]
    fn test_close_checks_info_then_capture() {
        let mut device = open(FakeDevice::v2());
        device.info().expect("info");
        device
            .init_capture(CaptureParams::new(64, 32))
            .expect("init");

        let err = device.close().expect_err("info attached");
        assert!(matches!(
            err.error(),
            Error::ResourceInUse {
                resource: Resource::Info,
                ..
            }
        ));

        let mut device = err.into_device();
        device.release_info();
        let err = device.close().expect_err("capture attached");
        assert!(matches!(
            err.error(),
            Error::ResourceInUse {
                resource: Resource::Capture,
                ..
            }
        ));

        let mut device = err.into_device();
        device.stop_capture().expect("stop");
        device.free_capture().expect("free");
        device.close().expect("close");
    }

    #[test]
    fn test_set_control_checks_range_first() {
        let mut device = open(FakeDevice::v2());
        let brightness = device
            .list_controls()
            .expect("controls")
            .find("Brightness")
            .expect("brightness")
            .clone();

        let before = device.file().calls().len();
        assert!(matches!(
            device.set_control(&brightness, brightness.maximum() + 1),
            Err(Error::OutOfRange { .. })
        ));
        assert_eq!(device.file().calls().len(), before);

        device
            .set_control(&brightness, brightness.maximum())
            .expect("maximum accepted");
        assert_eq!(
            device.get_control(&brightness).expect("get"),
            brightness.maximum()
        );
        device.release_control_list();
    }
}
