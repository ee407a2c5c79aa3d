//! Vendor probe traits and the ordered registry they live in.

use std::io;

use crate::traits::{DeviceFile, NativeControl, PrivateRequest, Protocol};

use super::fps::FrameRateProbe;
use super::gspca::GspcaProbe;
use super::pwc::PwcProbe;
use super::qc::QcProbe;

/// First id handed out to synthetic private controls.
pub const PRIVATE_ID_BASE: u32 = 0x0800_0000;

/// Id of the `local`-th private control of a probe.
#[must_use]
pub const fn private_id(local: u32) -> u32 {
    PRIVATE_ID_BASE + local
}

/// Per-device state of a probe that recognised the device.
///
/// Sessions are queried through shared references; any state they need to
/// update (cached values of write-only requests) lives in cells.
pub trait ProbeSession<F: DeviceFile> {
    /// Number of private controls this session exposes.
    fn control_count(&self) -> usize;

    /// Describe every private control.
    fn list(&self, file: &F) -> io::Result<Vec<NativeControl>>;

    /// Read the current value of `control`.
    fn get(&self, file: &F, control: &NativeControl) -> io::Result<i32>;

    /// Write `value`, already checked against the control's range.
    fn set(&self, file: &F, control: &NativeControl, value: i32) -> io::Result<()>;
}

/// A vendor-specific way of reaching controls outside the standard set.
pub trait DriverProbe<F: DeviceFile> {
    /// Short driver name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Return a session if the device behind `file` speaks this probe's
    /// private requests.
    fn detect(&self, file: &F, protocol: Protocol) -> Option<Box<dyn ProbeSession<F>>>;
}

/// Fixed, ordered table of probes. A probe's position is stored in every
/// private control it creates.
pub struct ProbeRegistry<F: DeviceFile> {
    probes: Vec<Box<dyn DriverProbe<F>>>,
}

impl<F: DeviceFile + 'static> ProbeRegistry<F> {
    /// The built-in probes: pwc, gspca, qc-usb, then the V2 frame rate.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(vec![
            Box::new(PwcProbe),
            Box::new(GspcaProbe),
            Box::new(QcProbe),
            Box::new(FrameRateProbe),
        ])
    }
}

impl<F: DeviceFile> ProbeRegistry<F> {
    /// A registry with exactly `probes`, in that order.
    #[must_use]
    pub fn new(probes: Vec<Box<dyn DriverProbe<F>>>) -> Self {
        Self { probes }
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&dyn DriverProbe<F>> {
        self.probes.get(index).map(Box::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn DriverProbe<F>> {
        self.probes.iter().map(Box::as_ref)
    }
}

impl<F: DeviceFile + 'static> Default for ProbeRegistry<F> {
    fn default() -> Self {
        Self::builtin()
    }
}

impl<F: DeviceFile> std::fmt::Debug for ProbeRegistry<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.probes.iter().map(|p| p.name()))
            .finish()
    }
}

/// Bounds and id of one private control, from a probe's static table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PrivateSpec {
    pub name: &'static str,
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
    pub default: i32,
}

impl PrivateSpec {
    pub(crate) const fn new(name: &'static str, minimum: i32, maximum: i32, default: i32) -> Self {
        Self {
            name,
            minimum,
            maximum,
            step: 1,
            default,
        }
    }

    pub(crate) const fn with_step(mut self, step: i32) -> Self {
        self.step = step;
        self
    }

    pub(crate) fn native(&self, local: u32) -> NativeControl {
        NativeControl {
            id: private_id(local),
            name: self.name.to_owned(),
            minimum: self.minimum,
            maximum: self.maximum,
            step: self.step,
            default: self.default,
        }
    }
}

/// Descriptors for a whole probe table, ids in table order.
pub(crate) fn list_table<'a, I>(specs: I) -> Vec<NativeControl>
where
    I: IntoIterator<Item = &'a PrivateSpec>,
{
    specs
        .into_iter()
        .zip(0..)
        .map(|(spec, local)| spec.native(local))
        .collect()
}

/// Position of `control` in a probe table built with [`PrivateSpec::native`].
pub(crate) fn local_index(control: &NativeControl, table_len: usize) -> io::Result<usize> {
    control
        .id
        .checked_sub(PRIVATE_ID_BASE)
        .map(|local| local as usize)
        .filter(|&local| local < table_len)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("control {} does not belong to this probe", control.name),
            )
        })
}

/// Read a native-endian `i32` from a private request argument block.
pub(crate) fn read_i32(block: &[u8], at: usize) -> i32 {
    block
        .get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map_or(0, i32::from_ne_bytes)
}

/// Write a native-endian `i32` into a private request argument block.
pub(crate) fn write_i32(block: &mut [u8], at: usize, value: i32) {
    if let Some(dst) = block.get_mut(at..at + 4) {
        dst.copy_from_slice(&value.to_ne_bytes());
    }
}

/// Issue an `int`-sized read request.
pub(crate) fn get_int<F: DeviceFile>(file: &F, request: PrivateRequest) -> io::Result<i32> {
    let mut block = [0u8; 4];
    file.private_ioctl(request, &mut block)?;
    Ok(i32::from_ne_bytes(block))
}

/// Issue an `int`-sized write (or write-read) request.
pub(crate) fn set_int<F: DeviceFile>(
    file: &F,
    request: PrivateRequest,
    value: i32,
) -> io::Result<()> {
    let mut block = value.to_ne_bytes();
    file.private_ioctl(request, &mut block)
}
