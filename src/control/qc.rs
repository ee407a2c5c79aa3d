//! QuickCam (qc-usb) private requests: one `int` get/set pair per setting.

use std::io;

use super::probe::{
    get_int, list_table, local_index, set_int, DriverProbe, PrivateSpec, ProbeSession,
};
use crate::traits::{DeviceFile, NativeControl, PrivateRequest, Protocol};

const BASE: u8 = 192;

const fn get_request(offset: u8) -> PrivateRequest {
    PrivateRequest::read(b'v', BASE + offset, 4)
}

const fn set_request(offset: u8) -> PrivateRequest {
    PrivateRequest::read_write(b'v', BASE + offset, 4)
}

const COMPATIBLE: u8 = 11;

const CONTROLS: [(PrivateSpec, u8); 10] = [
    (PrivateSpec::new("Keep settings", 0, 1, 0), 1),
    (PrivateSpec::new("Settle", 0, 255, 0), 2),
    (PrivateSpec::new("Subsample", 0, 1, 0), 3),
    (PrivateSpec::new("Compress", 0, 1, 0), 4),
    (PrivateSpec::new("Frame skip", 0, 10, 0), 5),
    (PrivateSpec::new("Quality", 0, 5, 5), 6),
    (PrivateSpec::new("Adaptive", 0, 1, 1), 7),
    (PrivateSpec::new("Equalize", 0, 1, 0), 8),
    (PrivateSpec::new("Retry errors", 0, 1, 1), 10),
    (PrivateSpec::new("Compatibility", 0, 7, 0), COMPATIBLE),
];

fn offset_of(control: &NativeControl) -> io::Result<u8> {
    let local = local_index(control, CONTROLS.len())?;
    CONTROLS
        .get(local)
        .map(|(_, offset)| *offset)
        .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))
}

/// Detects qc-usb by reading its compatibility flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct QcProbe;

impl<F: DeviceFile> DriverProbe<F> for QcProbe {
    fn name(&self) -> &'static str {
        "qc-usb"
    }

    fn detect(&self, file: &F, _protocol: Protocol) -> Option<Box<dyn ProbeSession<F>>> {
        let compat = get_int(file, get_request(COMPATIBLE)).ok()?;
        log::debug!("qc-usb camera detected (compatibility {compat:#x})");
        Some(Box::new(QcSession))
    }
}

struct QcSession;

impl<F: DeviceFile> ProbeSession<F> for QcSession {
    fn control_count(&self) -> usize {
        CONTROLS.len()
    }

    fn list(&self, _file: &F) -> io::Result<Vec<NativeControl>> {
        Ok(list_table(CONTROLS.iter().map(|(spec, _)| spec)))
    }

    fn get(&self, file: &F, control: &NativeControl) -> io::Result<i32> {
        get_int(file, get_request(offset_of(control)?))
    }

    fn set(&self, file: &F, control: &NativeControl, value: i32) -> io::Result<()> {
        set_int(file, set_request(offset_of(control)?), value)
    }
}
