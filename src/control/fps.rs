//! Frame rate exposed as a control through the V2 streaming parameters.

use std::io;

use super::probe::{list_table, DriverProbe, PrivateSpec, ProbeSession};
use crate::traits::{DeviceFile, Fraction, NativeControl, Protocol, StreamParams};

const MIN_RATE: i32 = 1;
const MAX_RATE: i32 = 60;

fn frames_per_second(params: &StreamParams) -> i32 {
    let Fraction {
        numerator,
        denominator,
    } = params.time_per_frame;
    if numerator == 0 {
        return 0;
    }
    i32::try_from(denominator / numerator).unwrap_or(i32::MAX)
}

/// Matches V2 devices whose frame interval can be changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameRateProbe;

impl<F: DeviceFile> DriverProbe<F> for FrameRateProbe {
    fn name(&self) -> &'static str {
        "frame-rate"
    }

    fn detect(&self, file: &F, protocol: Protocol) -> Option<Box<dyn ProbeSession<F>>> {
        if protocol != Protocol::V2 {
            return None;
        }
        let params = file.get_parm().ok()?;
        if !params.can_set_frame_interval {
            return None;
        }
        let reported = frames_per_second(&params);
        let current = reported.clamp(MIN_RATE, MAX_RATE);
        if current != reported {
            log::debug!(
                "driver rate {reported} fps outside {MIN_RATE}..={MAX_RATE}, using {current}"
            );
        }
        log::debug!("frame interval adjustable, currently {current} fps");
        Some(Box::new(FrameRateSession {
            spec: PrivateSpec::new("Frame rate", MIN_RATE, MAX_RATE, current),
        }))
    }
}

struct FrameRateSession {
    spec: PrivateSpec,
}

impl<F: DeviceFile> ProbeSession<F> for FrameRateSession {
    fn control_count(&self) -> usize {
        1
    }

    fn list(&self, _file: &F) -> io::Result<Vec<NativeControl>> {
        Ok(list_table([&self.spec]))
    }

    fn get(&self, file: &F, _control: &NativeControl) -> io::Result<i32> {
        Ok(frames_per_second(&file.get_parm()?))
    }

    fn set(&self, file: &F, _control: &NativeControl, value: i32) -> io::Result<()> {
        let rate = u32::try_from(value)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "negative frame rate"))?;
        let granted = file.set_parm(Fraction {
            numerator: 1,
            denominator: rate,
        })?;
        log::debug!("frame rate now {} fps", frames_per_second(&granted));
        Ok(())
    }
}
