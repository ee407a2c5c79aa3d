//! Unified control list: standard controls first, then the private controls of
//! every probe that recognised the device, in registry order.

mod fps;
mod gspca;
mod probe;
mod pwc;
mod qc;

use std::io;
use std::path::{Path, PathBuf};

use crate::traits::{DeviceFile, Error, NativeControl, Protocol, Result, V1Picture};

pub use fps::FrameRateProbe;
pub use gspca::GspcaProbe;
pub use probe::{private_id, DriverProbe, ProbeRegistry, ProbeSession, PRIVATE_ID_BASE};
pub use pwc::PwcProbe;
pub use qc::QcProbe;

/// Standard control ids shared by both protocol generations.
pub mod ids {
    /// Picture brightness.
    pub const BRIGHTNESS: u32 = 0x0098_0900;
    /// Picture contrast.
    pub const CONTRAST: u32 = 0x0098_0901;
    /// Colour saturation.
    pub const SATURATION: u32 = 0x0098_0902;
    /// Picture hue.
    pub const HUE: u32 = 0x0098_0903;
}

/// One controllable parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlDescriptor {
    /// A control the protocol itself defines.
    Standard(NativeControl),
    /// A vendor control reached through the probe at `probe_index`.
    Private {
        /// Position of the owning probe in the registry.
        probe_index: usize,
        /// The synthetic descriptor the probe produced.
        native: NativeControl,
    },
}

impl ControlDescriptor {
    pub const fn native(&self) -> &NativeControl {
        match self {
            Self::Standard(native) | Self::Private { native, .. } => native,
        }
    }

    pub fn name(&self) -> &str {
        &self.native().name
    }

    pub const fn id(&self) -> u32 {
        self.native().id
    }

    pub const fn minimum(&self) -> i32 {
        self.native().minimum
    }

    pub const fn maximum(&self) -> i32 {
        self.native().maximum
    }

    pub const fn step(&self) -> i32 {
        self.native().step
    }

    pub const fn default_value(&self) -> i32 {
        self.native().default
    }

    pub const fn is_private(&self) -> bool {
        matches!(self, Self::Private { .. })
    }

    /// Registry position of the owning probe, for private controls.
    pub const fn probe_index(&self) -> Option<usize> {
        match self {
            Self::Standard(_) => None,
            Self::Private { probe_index, .. } => Some(*probe_index),
        }
    }

    /// Fail with [`Error::OutOfRange`] unless `minimum <= value <= maximum`.
    pub fn check_range(&self, value: i32) -> Result<()> {
        let native = self.native();
        if (native.minimum..=native.maximum).contains(&value) {
            Ok(())
        } else {
            Err(Error::OutOfRange {
                control: native.name.clone(),
                value,
                minimum: native.minimum,
                maximum: native.maximum,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Standard controls
// ---------------------------------------------------------------------------

const V1_CONTROLS: [(&str, u32); 4] = [
    ("Brightness", ids::BRIGHTNESS),
    ("Hue", ids::HUE),
    ("Color", ids::SATURATION),
    ("Contrast", ids::CONTRAST),
];

fn v1_field(picture: &mut V1Picture, id: u32) -> Option<&mut u16> {
    match id {
        ids::BRIGHTNESS => Some(&mut picture.brightness),
        ids::HUE => Some(&mut picture.hue),
        ids::SATURATION => Some(&mut picture.colour),
        ids::CONTRAST => Some(&mut picture.contrast),
        _ => None,
    }
}

fn unknown_id(id: u32) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("no picture setting for control {id:#x}"),
    )
}

fn count_standard<F: DeviceFile>(file: &F, protocol: Protocol) -> io::Result<usize> {
    match protocol {
        Protocol::V2 => file.query_controls().map(|controls| controls.len()),
        Protocol::V1 => file.get_picture().map(|_| V1_CONTROLS.len()),
        Protocol::Unknown => Ok(0),
    }
}

fn create_standard<F: DeviceFile>(file: &F, protocol: Protocol) -> io::Result<Vec<NativeControl>> {
    match protocol {
        Protocol::V2 => file.query_controls(),
        Protocol::V1 => {
            file.get_picture()?;
            Ok(V1_CONTROLS
                .iter()
                .map(|&(name, id)| NativeControl {
                    id,
                    name: name.to_owned(),
                    minimum: 0,
                    maximum: i32::from(u16::MAX),
                    step: 1,
                    default: 32768,
                })
                .collect())
        }
        Protocol::Unknown => Ok(Vec::new()),
    }
}

fn get_standard<F: DeviceFile>(file: &F, protocol: Protocol, id: u32) -> io::Result<i32> {
    match protocol {
        Protocol::V1 => {
            let mut picture = file.get_picture()?;
            v1_field(&mut picture, id)
                .map(|field| i32::from(*field))
                .ok_or_else(|| unknown_id(id))
        }
        _ => file.get_control(id),
    }
}

fn set_standard<F: DeviceFile>(file: &F, protocol: Protocol, id: u32, value: i32) -> io::Result<()> {
    match protocol {
        Protocol::V1 => {
            let mut picture = file.get_picture()?;
            let field = v1_field(&mut picture, id).ok_or_else(|| unknown_id(id))?;
            *field = u16::try_from(value)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "picture value overflow"))?;
            file.set_picture(&picture)
        }
        _ => file.set_control(id, value),
    }
}

// ---------------------------------------------------------------------------
// Control list
// ---------------------------------------------------------------------------

/// Every control of one device, owned by its handle.
pub struct ControlList<F: DeviceFile> {
    path: PathBuf,
    protocol: Protocol,
    controls: Vec<ControlDescriptor>,
    /// Registry indices of the probes that matched, in registry order.
    matched: Vec<usize>,
    /// Private state of each matched probe, indexed by registry position.
    sessions: Vec<Option<Box<dyn ProbeSession<F>>>>,
}

impl<F: DeviceFile> ControlList<F> {
    /// Count, probe, then fill: standard controls first, private after.
    pub(crate) fn scan(
        file: &F,
        path: &Path,
        protocol: Protocol,
        registry: &ProbeRegistry<F>,
    ) -> Result<Self> {
        if protocol == Protocol::Unknown {
            return Err(Error::WrongVersion {
                path: path.to_path_buf(),
            });
        }
        let query_failed = |source| Error::QueryFailed {
            path: path.to_path_buf(),
            source,
        };

        let standard_count = count_standard(file, protocol).map_err(query_failed)?;

        let mut matched = Vec::new();
        let mut sessions = Vec::with_capacity(registry.len());
        let mut private_count = 0;
        for (index, probe) in registry.iter().enumerate() {
            let session = probe.detect(file, protocol);
            if let Some(session) = &session {
                log::debug!(
                    "probe {} matched {} ({} controls)",
                    probe.name(),
                    path.display(),
                    session.control_count()
                );
                private_count += session.control_count();
                matched.push(index);
            }
            sessions.push(session);
        }

        let mut controls = Vec::with_capacity(standard_count + private_count);
        controls.extend(
            create_standard(file, protocol)
                .map_err(query_failed)?
                .into_iter()
                .map(ControlDescriptor::Standard),
        );
        for &probe_index in &matched {
            if let Some(Some(session)) = sessions.get(probe_index) {
                let natives = session.list(file).map_err(query_failed)?;
                controls.extend(
                    natives
                        .into_iter()
                        .map(|native| ControlDescriptor::Private { probe_index, native }),
                );
            }
        }
        log::debug!(
            "{} controls on {} ({} private)",
            controls.len(),
            path.display(),
            private_count
        );

        Ok(Self {
            path: path.to_path_buf(),
            protocol,
            controls,
            matched,
            sessions,
        })
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    pub fn controls(&self) -> &[ControlDescriptor] {
        &self.controls
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ControlDescriptor> {
        self.controls.iter()
    }

    /// First control called `name`.
    pub fn find(&self, name: &str) -> Option<&ControlDescriptor> {
        self.controls.iter().find(|c| c.name() == name)
    }

    /// Registry indices of the matched probes, in registry order.
    pub fn matched_probes(&self) -> &[usize] {
        &self.matched
    }

    fn session(&self, descriptor: &ControlDescriptor) -> Result<Option<&dyn ProbeSession<F>>> {
        let unknown = || Error::UnknownControl {
            control: descriptor.name().to_owned(),
        };
        if !self.controls.contains(descriptor) {
            return Err(unknown());
        }
        match descriptor.probe_index() {
            None => Ok(None),
            Some(index) => match self.sessions.get(index) {
                Some(Some(session)) => Ok(Some(session.as_ref())),
                _ => Err(unknown()),
            },
        }
    }

    fn failed(descriptor: &ControlDescriptor) -> impl FnOnce(io::Error) -> Error + '_ {
        move |source| Error::ControlFailed {
            control: descriptor.name().to_owned(),
            source,
        }
    }

    pub(crate) fn get_value(&self, file: &F, descriptor: &ControlDescriptor) -> Result<i32> {
        if self.protocol == Protocol::Unknown {
            return Err(Error::WrongVersion {
                path: self.path.clone(),
            });
        }
        let result = match self.session(descriptor)? {
            Some(session) => session.get(file, descriptor.native()),
            None => get_standard(file, self.protocol, descriptor.id()),
        };
        let value = result.map_err(Self::failed(descriptor))?;
        log::trace!("{} = {value}", descriptor.name());
        Ok(value)
    }

    pub(crate) fn set_value(
        &self,
        file: &F,
        descriptor: &ControlDescriptor,
        value: i32,
    ) -> Result<()> {
        descriptor.check_range(value)?;
        if self.protocol == Protocol::Unknown {
            return Err(Error::WrongVersion {
                path: self.path.clone(),
            });
        }
        let result = match self.session(descriptor)? {
            Some(session) => session.set(file, descriptor.native(), value),
            None => set_standard(file, self.protocol, descriptor.id(), value),
        };
        result.map_err(Self::failed(descriptor))?;
        log::trace!("{} <- {value}", descriptor.name());
        Ok(())
    }

    /// Drop probe state, then the matched list, then the descriptors.
    pub(crate) fn release(mut self) {
        for session in &mut self.sessions {
            drop(session.take());
        }
        self.matched.clear();
        self.controls.clear();
        log::debug!("control list released on {}", self.path.display());
    }
}

impl<F: DeviceFile> std::fmt::Debug for ControlList<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlList")
            .field("path", &self.path)
            .field("protocol", &self.protocol)
            .field("controls", &self.controls)
            .field("matched", &self.matched)
            .finish_non_exhaustive()
    }
}

impl<'a, F: DeviceFile> IntoIterator for &'a ControlList<F> {
    type Item = &'a ControlDescriptor;
    type IntoIter = std::slice::Iter<'a, ControlDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.controls.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::mock::FakeDevice;
    use crate::traits::{V1Ops, V2Ops};

    type SpyLog = Rc<RefCell<Vec<String>>>;

    /// Probe that matches or not on demand and records what reaches it.
    struct SpyProbe {
        name: &'static str,
        matches: bool,
        controls: Vec<NativeControl>,
        log: SpyLog,
    }

    impl SpyProbe {
        fn new(name: &'static str, matches: bool, control: &str, log: &SpyLog) -> Self {
            Self {
                name,
                matches,
                controls: vec![NativeControl {
                    id: private_id(0),
                    name: control.to_owned(),
                    minimum: -10,
                    maximum: 10,
                    step: 1,
                    default: 0,
                }],
                log: Rc::clone(log),
            }
        }
    }

    struct SpySession {
        controls: Vec<NativeControl>,
        log: SpyLog,
    }

    impl DriverProbe<FakeDevice> for SpyProbe {
        fn name(&self) -> &'static str {
            self.name
        }

        fn detect(
            &self,
            _file: &FakeDevice,
            _protocol: Protocol,
        ) -> Option<Box<dyn ProbeSession<FakeDevice>>> {
            self.log.borrow_mut().push(format!("detect {}", self.name));
            self.matches.then(|| {
                Box::new(SpySession {
                    controls: self.controls.clone(),
                    log: Rc::clone(&self.log),
                }) as Box<dyn ProbeSession<FakeDevice>>
            })
        }
    }

    impl ProbeSession<FakeDevice> for SpySession {
        fn control_count(&self) -> usize {
            self.controls.len()
        }

        fn list(&self, _file: &FakeDevice) -> io::Result<Vec<NativeControl>> {
            Ok(self.controls.clone())
        }

        fn get(&self, _file: &FakeDevice, control: &NativeControl) -> io::Result<i32> {
            self.log.borrow_mut().push(format!("get {}", control.name));
            Ok(7)
        }

        fn set(&self, _file: &FakeDevice, control: &NativeControl, value: i32) -> io::Result<()> {
            self.log
                .borrow_mut()
                .push(format!("set {} {value}", control.name));
            Ok(())
        }
    }

    fn spy_registry(log: &SpyLog) -> ProbeRegistry<FakeDevice> {
        ProbeRegistry::new(vec![
            Box::new(SpyProbe::new("first", true, "Alpha", log)),
            Box::new(SpyProbe::new("middle", false, "Unused", log)),
            Box::new(SpyProbe::new("last", true, "Omega", log)),
        ])
    }

    fn scan(file: &FakeDevice, protocol: Protocol, log: &SpyLog) -> ControlList<FakeDevice> {
        ControlList::scan(file, Path::new("/dev/fake"), protocol, &spy_registry(log))
            .expect("scan should succeed")
    }

    #[test]
    fn test_private_controls_follow_standard_in_registry_order() {
        let log = SpyLog::default();
        let file = FakeDevice::v2();
        let list = scan(&file, Protocol::V2, &log);

        let standard = file.query_controls().expect("controls").len();
        assert_eq!(list.len(), standard + 2);
        assert!(list.iter().take(standard).all(|c| !c.is_private()));

        let private: Vec<_> = list
            .iter()
            .filter_map(|c| c.probe_index().map(|i| (i, c.name())))
            .collect();
        assert_eq!(private, vec![(0, "Alpha"), (2, "Omega")]);
        assert_eq!(list.matched_probes(), &[0, 2]);
        assert_eq!(
            *log.borrow(),
            vec!["detect first", "detect middle", "detect last"]
        );
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        let log = SpyLog::default();
        let file = FakeDevice::v2();
        let list = scan(&file, Protocol::V2, &log);

        for descriptor in list.iter() {
            list.set_value(&file, descriptor, descriptor.minimum())
                .expect("minimum is accepted");
            list.set_value(&file, descriptor, descriptor.maximum())
                .expect("maximum is accepted");
        }
    }

    #[test]
    fn test_out_of_range_never_reaches_device() {
        let log = SpyLog::default();
        let file = FakeDevice::v2();
        let list = scan(&file, Protocol::V2, &log);
        log.borrow_mut().clear();
        let before = file.calls().len();

        for descriptor in list.iter() {
            for value in [descriptor.minimum() - 1, descriptor.maximum() + 1] {
                let err = list
                    .set_value(&file, descriptor, value)
                    .expect_err("out of range should fail");
                assert!(matches!(err, Error::OutOfRange { .. }));
            }
        }
        assert!(log.borrow().is_empty());
        assert_eq!(file.calls().len(), before);
    }

    #[test]
    fn test_private_dispatch_reaches_owning_probe() {
        let log = SpyLog::default();
        let file = FakeDevice::v2();
        let list = scan(&file, Protocol::V2, &log);
        let omega = list.find("Omega").expect("omega").clone();

        assert_eq!(list.get_value(&file, &omega).expect("get"), 7);
        list.set_value(&file, &omega, 3).expect("set");
        assert!(log.borrow().ends_with(&["get Omega".to_owned(), "set Omega 3".to_owned()]));
    }

    #[test]
    fn test_foreign_descriptor_is_unknown() {
        let log = SpyLog::default();
        let file = FakeDevice::v2();
        let list = scan(&file, Protocol::V2, &log);

        let stray = ControlDescriptor::Private {
            probe_index: 1,
            native: NativeControl {
                id: private_id(0),
                name: "Unused".to_owned(),
                minimum: -10,
                maximum: 10,
                step: 1,
                default: 0,
            },
        };
        assert!(matches!(
            list.get_value(&file, &stray),
            Err(Error::UnknownControl { .. })
        ));
    }

    #[test]
    fn test_v1_controls_map_to_picture() {
        let file = FakeDevice::v1();
        let list = ControlList::scan(
            &file,
            Path::new("/dev/fake"),
            Protocol::V1,
            &ProbeRegistry::new(Vec::new()),
        )
        .expect("scan");

        let names: Vec<_> = list.iter().map(ControlDescriptor::name).collect();
        assert_eq!(names, vec!["Brightness", "Hue", "Color", "Contrast"]);

        let color = list.find("Color").expect("color").clone();
        list.set_value(&file, &color, 1234).expect("set");
        assert_eq!(list.get_value(&file, &color).expect("get"), 1234);
        assert_eq!(file.get_picture().expect("picture").colour, 1234);
    }

    #[test]
    fn test_driver_error_is_control_failed() {
        let file = FakeDevice::v2();
        let list = ControlList::scan(
            &file,
            Path::new("/dev/fake"),
            Protocol::V2,
            &ProbeRegistry::new(Vec::new()),
        )
        .expect("scan");
        let first = list.controls().first().expect("a control").clone();

        file.fail_controls();
        assert!(matches!(
            list.get_value(&file, &first),
            Err(Error::ControlFailed { .. })
        ));
    }

    #[test]
    fn test_unknown_protocol_is_wrong_version() {
        let file = FakeDevice::v2();
        let result = ControlList::scan(
            &file,
            Path::new("/dev/fake"),
            Protocol::Unknown,
            &ProbeRegistry::new(Vec::new()),
        );
        assert!(matches!(result, Err(Error::WrongVersion { .. })));
    }
}
