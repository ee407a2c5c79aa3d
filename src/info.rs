//! Static description of an opened device.

use std::path::Path;

use crate::capture::v1_supported_formats;
use crate::traits::{DeviceFile, Error, FourCC, InputInfo, Protocol, Result};

/// What a device is and what it can capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Card or device name.
    pub name: String,
    /// Driver name (V2 only).
    pub driver: Option<String>,
    /// Bus location (V2 only).
    pub bus_info: Option<String>,
    /// Protocol generation the device speaks.
    pub protocol: Protocol,
    /// Video inputs.
    pub inputs: Vec<InputInfo>,
    /// Capture pixel formats.
    pub formats: Vec<FourCC>,
}

impl DeviceInfo {
    pub(crate) fn query<F: DeviceFile>(file: &F, path: &Path, protocol: Protocol) -> Result<Self> {
        let query_failed = |source| Error::QueryFailed {
            path: path.to_path_buf(),
            source,
        };

        let info = match protocol {
            Protocol::V2 => {
                let caps = file.query_caps().map_err(query_failed)?;
                Self {
                    name: caps.card,
                    driver: Some(caps.driver),
                    bus_info: Some(caps.bus_info),
                    protocol,
                    inputs: file.enum_inputs().map_err(query_failed)?,
                    formats: file.enum_formats().map_err(query_failed)?,
                }
            }
            Protocol::V1 => {
                let cap = file.get_capability().map_err(query_failed)?;
                let inputs = (0..cap.channels)
                    .map(|index| {
                        file.get_channel(index).map(|channel| InputInfo {
                            index,
                            name: channel.name,
                            tuner: channel.tuners > 0,
                        })
                    })
                    .collect::<std::io::Result<Vec<_>>>()
                    .map_err(query_failed)?;
                Self {
                    name: cap.name,
                    driver: None,
                    bus_info: None,
                    protocol,
                    inputs,
                    formats: v1_supported_formats(file).map_err(query_failed)?,
                }
            }
            Protocol::Unknown => {
                return Err(Error::WrongVersion {
                    path: path.to_path_buf(),
                })
            }
        };

        log::debug!(
            "{}: {} ({protocol}), {} inputs, {} formats",
            path.display(),
            info.name,
            info.inputs.len(),
            info.formats.len()
        );
        Ok(info)
    }

    /// Whether the device can capture `fourcc`.
    pub fn supports(&self, fourcc: FourCC) -> bool {
        self.formats.contains(&fourcc)
    }
}
