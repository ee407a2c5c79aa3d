//! Philips webcam (pwc) private requests.

use std::cell::Cell;
use std::io;

use super::probe::{
    get_int, list_table, local_index, read_i32, set_int, write_i32, DriverProbe, PrivateSpec,
    ProbeSession,
};
use crate::sys::c_name;
use crate::traits::{DeviceFile, NativeControl, PrivateRequest, Protocol};

const PROBE: PrivateRequest = PrivateRequest::read(b'v', 199, 36);
const WHITE_BALANCE_LEN: usize = 20;
const GET_WHITE_BALANCE: PrivateRequest = PrivateRequest::read(b'v', 202, WHITE_BALANCE_LEN);
const SET_WHITE_BALANCE: PrivateRequest = PrivateRequest::write(b'v', 202, WHITE_BALANCE_LEN);

#[derive(Debug, Clone, Copy)]
enum Access {
    /// Trigger-only: writing any non-zero value fires the request once.
    /// Reads always return 0 and writing 0 sends nothing.
    Action(PrivateRequest),
    Int {
        get: PrivateRequest,
        set: PrivateRequest,
    },
    /// No get request; reads return the last value written.
    WriteOnly(PrivateRequest),
    /// `mode` field of the white balance block.
    WhiteBalance,
}

const fn int(nr: u8) -> Access {
    Access::Int {
        get: PrivateRequest::read(b'v', nr, 4),
        set: PrivateRequest::write(b'v', nr, 4),
    }
}

const CONTROLS: [(PrivateSpec, Access); 11] = [
    (
        PrivateSpec::new("Restore user settings", 0, 1, 0),
        Access::Action(PrivateRequest::none(b'v', 192)),
    ),
    (
        PrivateSpec::new("Save user settings", 0, 1, 0),
        Access::Action(PrivateRequest::none(b'v', 193)),
    ),
    (
        PrivateSpec::new("Restore factory settings", 0, 1, 0),
        Access::Action(PrivateRequest::none(b'v', 194)),
    ),
    (PrivateSpec::new("Compression quality", 0, 3, 0), int(195)),
    (PrivateSpec::new("Automatic gain control", -1, 65535, -1), int(200)),
    (
        PrivateSpec::new("Shutter speed", -1, 65535, -1),
        Access::WriteOnly(PrivateRequest::write(b'v', 201, 4)),
    ),
    (PrivateSpec::new("White balance mode", 0, 4, 4), Access::WhiteBalance),
    (PrivateSpec::new("Contour", -1, 65535, -1), int(206)),
    (PrivateSpec::new("Backlight compensation", 0, 1, 0), int(207)),
    (PrivateSpec::new("Flicker reduction", 0, 1, 0), int(208)),
    (PrivateSpec::new("Dynamic noise reduction", 0, 3, 0), int(209)),
];

fn white_balance<F: DeviceFile>(file: &F) -> io::Result<[u8; WHITE_BALANCE_LEN]> {
    let mut block = [0u8; WHITE_BALANCE_LEN];
    file.private_ioctl(GET_WHITE_BALANCE, &mut block)?;
    Ok(block)
}

/// Detects pwc by its identification request.
#[derive(Debug, Clone, Copy, Default)]
pub struct PwcProbe;

impl<F: DeviceFile> DriverProbe<F> for PwcProbe {
    fn name(&self) -> &'static str {
        "pwc"
    }

    fn detect(&self, file: &F, _protocol: Protocol) -> Option<Box<dyn ProbeSession<F>>> {
        let mut ident = [0u8; 36];
        file.private_ioctl(PROBE, &mut ident).ok()?;
        log::debug!(
            "pwc camera detected: {} (type {})",
            c_name(ident.get(..32).unwrap_or_default()),
            read_i32(&ident, 32)
        );

        Some(Box::new(PwcSession {
            written: CONTROLS.iter().map(|(spec, _)| Cell::new(spec.default)).collect(),
        }))
    }
}

struct PwcSession {
    written: Vec<Cell<i32>>,
}

impl<F: DeviceFile> ProbeSession<F> for PwcSession {
    fn control_count(&self) -> usize {
        CONTROLS.len()
    }

    fn list(&self, _file: &F) -> io::Result<Vec<NativeControl>> {
        Ok(list_table(CONTROLS.iter().map(|(spec, _)| spec)))
    }

    fn get(&self, file: &F, control: &NativeControl) -> io::Result<i32> {
        let local = local_index(control, CONTROLS.len())?;
        match CONTROLS.get(local).map(|(_, access)| *access) {
            Some(Access::Int { get, .. }) => get_int(file, get),
            Some(Access::WhiteBalance) => Ok(read_i32(&white_balance(file)?, 0)),
            Some(Access::WriteOnly(_)) => Ok(self.written.get(local).map_or(0, Cell::get)),
            // triggers have no state to read
            Some(Access::Action(_)) | None => Ok(0),
        }
    }

    fn set(&self, file: &F, control: &NativeControl, value: i32) -> io::Result<()> {
        let local = local_index(control, CONTROLS.len())?;
        match CONTROLS.get(local).map(|(_, access)| *access) {
            Some(Access::Int { set, .. }) => set_int(file, set, value),
            Some(Access::WhiteBalance) => {
                let mut block = white_balance(file)?;
                write_i32(&mut block, 0, value);
                file.private_ioctl(SET_WHITE_BALANCE, &mut block)
            }
            Some(Access::WriteOnly(request)) => {
                set_int(file, request, value)?;
                if let Some(cell) = self.written.get(local) {
                    cell.set(value);
                }
                Ok(())
            }
            Some(Access::Action(request)) if value != 0 => file.private_ioctl(request, &mut []),
            // 0 leaves a trigger unfired
            Some(Access::Action(_)) | None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FakeDevice;

    fn session(file: &FakeDevice) -> Box<dyn ProbeSession<FakeDevice>> {
        PwcProbe
            .detect(file, Protocol::V1)
            .expect("pwc should be detected")
    }

    #[test]
    fn test_detect_requires_probe_request() {
        assert!(DriverProbe::<FakeDevice>::detect(&PwcProbe, &FakeDevice::v2(), Protocol::V2)
            .is_none());
        let file = FakeDevice::v1().with_private(PROBE, &[0; 36]);
        assert!(PwcProbe.detect(&file, Protocol::V1).is_some());
    }

    #[test]
    fn test_shutter_reads_back_last_write() {
        let file = FakeDevice::v1()
            .with_private(PROBE, &[0; 36])
            .with_private(PrivateRequest::write(b'v', 201, 4), &[0; 4]);
        let session = session(&file);
        let controls = session.list(&file).expect("list");
        let shutter = controls
            .iter()
            .find(|c| c.name == "Shutter speed")
            .expect("shutter control");

        assert_eq!(session.get(&file, shutter).expect("get"), -1);
        session.set(&file, shutter, 1200).expect("set");
        assert_eq!(session.get(&file, shutter).expect("get"), 1200);
    }

    #[test]
    fn test_action_controls_only_fire_on_non_zero() {
        let save = PrivateRequest::none(b'v', 193);
        let file = FakeDevice::v1()
            .with_private(PROBE, &[0; 36])
            .with_private(save, &[]);
        let session = session(&file);
        let controls = session.list(&file).expect("list");
        let save_settings = controls
            .iter()
            .find(|c| c.name == "Save user settings")
            .expect("save control");
        let before = file.calls().len();

        assert_eq!(session.get(&file, save_settings).expect("get"), 0);
        session.set(&file, save_settings, 0).expect("set 0");
        assert_eq!(file.calls().len(), before);
        assert_eq!(file.last_private(save), None);

        session.set(&file, save_settings, 1).expect("set 1");
        assert_eq!(file.last_private(save), Some(Vec::new()));
        assert_eq!(session.get(&file, save_settings).expect("get"), 0);
    }

    #[test]
    fn test_agc_round_trips_through_driver() {
        let file = FakeDevice::v1()
            .with_private(PROBE, &[0; 36])
            .with_private(PrivateRequest::read(b'v', 200, 4), &500i32.to_ne_bytes());
        let session = session(&file);
        let controls = session.list(&file).expect("list");
        let agc = controls
            .iter()
            .find(|c| c.name == "Automatic gain control")
            .expect("agc control");

        assert_eq!(session.get(&file, agc).expect("get"), 500);
        assert_eq!(controls.len(), session.control_count());
    }
}
