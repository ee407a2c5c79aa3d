//! gspca private video parameters.
//!
//! Every control lives in one `video_param` block; a set request names the
//! field it changes through `chg_para`.

use std::io;

use super::probe::{list_table, local_index, write_i32, DriverProbe, PrivateSpec, ProbeSession};
use crate::traits::{DeviceFile, NativeControl, PrivateRequest, Protocol};

const PARAM_LEN: usize = 12;
const GET_PARAM: PrivateRequest = PrivateRequest::read(b'v', 193, PARAM_LEN);
const SET_PARAM: PrivateRequest = PrivateRequest::write(b'v', 194, PARAM_LEN);

/// Fields of `video_param` past the leading `chg_para` int.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    AutoBright,
    Quality,
    TimeInterval,
    LightFreq,
}

impl Field {
    const fn change_code(self) -> i32 {
        match self {
            Self::AutoBright => 1,
            Self::Quality => 2,
            Self::LightFreq => 3,
            Self::TimeInterval => 4,
        }
    }

    const fn offset(self) -> usize {
        match self {
            Self::AutoBright => 4,
            Self::Quality => 5,
            Self::TimeInterval => 6,
            Self::LightFreq => 8,
        }
    }

    fn read(self, block: &[u8; PARAM_LEN]) -> i32 {
        let at = self.offset();
        if self == Self::TimeInterval {
            block
                .get(at..at + 2)
                .and_then(|b| b.try_into().ok())
                .map_or(0, |b| i32::from(u16::from_ne_bytes(b)))
        } else {
            block.get(at).copied().map_or(0, i32::from)
        }
    }

    fn write(self, block: &mut [u8; PARAM_LEN], value: i32) -> io::Result<()> {
        let too_wide = |_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{value} does not fit the gspca parameter"),
            )
        };
        let at = self.offset();
        if self == Self::TimeInterval {
            let bytes = u16::try_from(value).map_err(too_wide)?.to_ne_bytes();
            if let Some(dst) = block.get_mut(at..at + 2) {
                dst.copy_from_slice(&bytes);
            }
        } else if let Some(dst) = block.get_mut(at) {
            *dst = u8::try_from(value).map_err(too_wide)?;
        }
        Ok(())
    }
}

const CONTROLS: [(PrivateSpec, Field); 4] = [
    (PrivateSpec::new("Auto brightness", 0, 1, 1), Field::AutoBright),
    (PrivateSpec::new("JPEG quality", 0, 6, 3), Field::Quality),
    (PrivateSpec::new("Time interval", 0, 1000, 0), Field::TimeInterval),
    (
        PrivateSpec::new("Light frequency", 50, 60, 50).with_step(10),
        Field::LightFreq,
    ),
];

fn read_params<F: DeviceFile>(file: &F) -> io::Result<[u8; PARAM_LEN]> {
    let mut block = [0u8; PARAM_LEN];
    file.private_ioctl(GET_PARAM, &mut block)?;
    Ok(block)
}

fn field_of(control: &NativeControl) -> io::Result<Field> {
    let local = local_index(control, CONTROLS.len())?;
    CONTROLS
        .get(local)
        .map(|(_, field)| *field)
        .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))
}

/// Detects gspca by reading its parameter block.
#[derive(Debug, Clone, Copy, Default)]
pub struct GspcaProbe;

impl<F: DeviceFile> DriverProbe<F> for GspcaProbe {
    fn name(&self) -> &'static str {
        "gspca"
    }

    fn detect(&self, file: &F, _protocol: Protocol) -> Option<Box<dyn ProbeSession<F>>> {
        read_params(file).ok()?;
        log::debug!("gspca private parameters available");
        Some(Box::new(GspcaSession))
    }
}

struct GspcaSession;

impl<F: DeviceFile> ProbeSession<F> for GspcaSession {
    fn control_count(&self) -> usize {
        CONTROLS.len()
    }

    fn list(&self, _file: &F) -> io::Result<Vec<NativeControl>> {
        Ok(list_table(CONTROLS.iter().map(|(spec, _)| spec)))
    }

    fn get(&self, file: &F, control: &NativeControl) -> io::Result<i32> {
        let field = field_of(control)?;
        Ok(field.read(&read_params(file)?))
    }

    fn set(&self, file: &F, control: &NativeControl, value: i32) -> io::Result<()> {
        let field = field_of(control)?;
        let mut block = [0u8; PARAM_LEN];
        write_i32(&mut block, 0, field.change_code());
        field.write(&mut block, value)?;
        file.private_ioctl(SET_PARAM, &mut block)
    }
}
