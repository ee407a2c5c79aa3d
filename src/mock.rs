//! Scriptable fake device for testing without hardware.
//!
//! Every request that reaches the fake is appended to a call log so tests can
//! assert on what did, or did not, touch the device.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;

use crate::traits::{
    BufferLocation, Dequeued, DeviceCapabilities, DeviceFile, FourCC, Format, Fraction, InputInfo,
    NativeControl, PrivateRequest, StreamParams, V1Capability, V1Channel, V1Mbuf, V1Ops,
    V1Picture, V2Ops,
};

/// Size of each V1 frame in the fake capture memory.
pub const V1_FRAME_LEN: usize = 16384;
const V1_FRAMES: usize = 2;

fn unsupported() -> io::Error {
    io::Error::from_raw_os_error(libc::ENOTTY)
}

fn invalid() -> io::Error {
    io::Error::from_raw_os_error(libc::EINVAL)
}

/// Device memory handed out by [`FakeDevice::map`].
pub struct FakeMapping {
    data: Vec<u8>,
    live: Rc<Cell<usize>>,
}

impl AsRef<[u8]> for FakeMapping {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for FakeMapping {
    fn drop(&mut self) {
        self.live.set(self.live.get().saturating_sub(1));
    }
}

/// Fake device node answering V1 and/or V2 requests.
pub struct FakeDevice {
    v2: Option<DeviceCapabilities>,
    v1: Option<V1Capability>,
    calls: RefCell<Vec<&'static str>>,

    format: RefCell<Format>,
    buffer_limit: u32,
    granted: Cell<u32>,
    requested: Cell<Option<u32>>,
    release_fail: Cell<bool>,
    queued: RefCell<VecDeque<u32>>,
    sequence: Cell<u32>,
    live: Rc<Cell<usize>>,
    maps: Cell<usize>,
    map_failure: Option<usize>,
    std: Cell<Option<u64>>,

    controls: Vec<NativeControl>,
    values: RefCell<HashMap<u32, i32>>,
    controls_fail: Cell<bool>,
    interval: Cell<Fraction>,
    interval_settable: bool,

    channels: Vec<V1Channel>,
    picture: Cell<V1Picture>,
    palettes: Vec<u16>,
    sync_fail: Cell<bool>,

    private: HashMap<PrivateRequest, Vec<u8>>,
    private_sent: RefCell<HashMap<PrivateRequest, Vec<u8>>>,
}

impl FakeDevice {
    fn blank() -> Self {
        Self {
            v2: None,
            v1: None,
            calls: RefCell::new(Vec::new()),
            format: RefCell::new(Format::new(640, 480, FourCC::YUYV)),
            buffer_limit: 8,
            granted: Cell::new(0),
            requested: Cell::new(None),
            release_fail: Cell::new(false),
            queued: RefCell::new(VecDeque::new()),
            sequence: Cell::new(0),
            live: Rc::new(Cell::new(0)),
            maps: Cell::new(0),
            map_failure: None,
            std: Cell::new(None),
            controls: vec![
                NativeControl {
                    id: 0x0098_0900,
                    name: "Brightness".to_owned(),
                    minimum: 0,
                    maximum: 255,
                    step: 1,
                    default: 128,
                },
                NativeControl {
                    id: 0x0098_0901,
                    name: "Contrast".to_owned(),
                    minimum: 0,
                    maximum: 255,
                    step: 1,
                    default: 128,
                },
                NativeControl {
                    id: 0x0098_0918,
                    name: "Power Line Frequency".to_owned(),
                    minimum: 0,
                    maximum: 2,
                    step: 1,
                    default: 1,
                },
            ],
            values: RefCell::new(HashMap::new()),
            controls_fail: Cell::new(false),
            interval: Cell::new(Fraction {
                numerator: 1,
                denominator: 30,
            }),
            interval_settable: false,
            channels: Vec::new(),
            picture: Cell::new(V1Picture {
                brightness: 32768,
                hue: 32768,
                colour: 32768,
                contrast: 32768,
                whiteness: 32768,
                depth: 16,
                palette: 8,
            }),
            palettes: vec![8],
            sync_fail: Cell::new(false),
            private: HashMap::new(),
            private_sent: RefCell::new(HashMap::new()),
        }
    }

    fn with_v2(mut self) -> Self {
        self.v2 = Some(DeviceCapabilities {
            driver: "fake".to_owned(),
            card: "Fake Camera".to_owned(),
            bus_info: "fake:0".to_owned(),
            can_capture: true,
            can_stream: true,
        });
        self
    }

    fn with_v1(mut self) -> Self {
        self.v1 = Some(V1Capability {
            name: "Fake V1 Camera".to_owned(),
            channels: 2,
            max_width: 640,
            max_height: 480,
            min_width: 32,
            min_height: 32,
            can_capture: true,
        });
        self.channels = vec![
            V1Channel {
                index: 0,
                name: "Television".to_owned(),
                tuners: 1,
                norm: 0,
            },
            V1Channel {
                index: 1,
                name: "Composite".to_owned(),
                tuners: 0,
                norm: 0,
            },
        ];
        self
    }

    /// A device that only answers V2 requests.
    #[must_use]
    pub fn v2() -> Self {
        Self::blank().with_v2()
    }

    /// A device that only answers V1 requests.
    #[must_use]
    pub fn v1() -> Self {
        Self::blank().with_v1()
    }

    /// A device that answers both generations.
    #[must_use]
    pub fn dual() -> Self {
        Self::blank().with_v2().with_v1()
    }

    /// A device that answers nothing.
    #[must_use]
    pub fn unresponsive() -> Self {
        Self::blank()
    }

    /// Grant at most `limit` V2 buffers.
    #[must_use]
    pub const fn with_buffer_limit(mut self, limit: u32) -> Self {
        self.buffer_limit = limit;
        self
    }

    /// V1 palettes the device accepts.
    #[must_use]
    pub fn with_palettes(mut self, palettes: &[u16]) -> Self {
        self.palettes = palettes.to_vec();
        self
    }

    /// Answer `request` by filling its argument with `response`.
    #[must_use]
    pub fn with_private(mut self, request: PrivateRequest, response: &[u8]) -> Self {
        self.private.insert(request, response.to_vec());
        self
    }

    /// `Some(fps)` makes the frame interval adjustable, starting at `fps`.
    #[must_use]
    pub fn with_frame_interval(mut self, fps: Option<u32>) -> Self {
        self.interval_settable = fps.is_some();
        if let Some(fps) = fps {
            self.interval.set(Fraction {
                numerator: 1,
                denominator: fps,
            });
        }
        self
    }

    /// Fail the `nth` map request (counting from 0) with ENOMEM.
    #[must_use]
    pub const fn with_map_failure(mut self, nth: usize) -> Self {
        self.map_failure = Some(nth);
        self
    }

    /// Make every later V1 frame sync fail with EIO.
    pub fn fail_sync(&self) {
        self.sync_fail.set(true);
    }

    /// While `fail` is set, releasing V2 buffers (a zero-count request)
    /// fails with EBUSY.
    pub fn fail_buffer_release(&self, fail: bool) {
        self.release_fail.set(fail);
    }

    /// Make every later control read or write fail.
    pub fn fail_controls(&self) {
        self.controls_fail.set(true);
    }

    /// Requests received so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }

    /// Mappings handed out and not yet dropped.
    pub fn live_mappings(&self) -> usize {
        self.live.get()
    }

    /// Count passed to the last `request_buffers`.
    pub fn last_buffer_request(&self) -> Option<u32> {
        self.requested.get()
    }

    /// Last standard selected with `set_std`.
    pub fn last_std(&self) -> Option<u64> {
        self.std.get()
    }

    /// Argument block of the last `request` sent.
    pub fn last_private(&self, request: PrivateRequest) -> Option<Vec<u8>> {
        self.private_sent.borrow().get(&request).cloned()
    }

    fn record(&self, call: &'static str) {
        self.calls.borrow_mut().push(call);
    }

    fn control(&self, id: u32) -> io::Result<&NativeControl> {
        if self.controls_fail.get() {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        self.controls.iter().find(|c| c.id == id).ok_or_else(invalid)
    }

    fn buffer_len(&self) -> usize {
        self.format.borrow().size as usize
    }

    fn stream_params(&self) -> StreamParams {
        StreamParams {
            can_set_frame_interval: self.interval_settable,
            time_per_frame: self.interval.get(),
        }
    }
}

impl V2Ops for FakeDevice {
    fn query_caps(&self) -> io::Result<DeviceCapabilities> {
        self.record("query_caps");
        self.v2.clone().ok_or_else(unsupported)
    }

    fn enum_inputs(&self) -> io::Result<Vec<InputInfo>> {
        self.record("enum_inputs");
        Ok(vec![InputInfo {
            index: 0,
            name: "Camera 0".to_owned(),
            tuner: false,
        }])
    }

    fn set_input(&self, index: u32) -> io::Result<()> {
        self.record("set_input");
        if index == 0 {
            Ok(())
        } else {
            Err(invalid())
        }
    }

    fn set_std(&self, id: u64) -> io::Result<()> {
        self.record("set_std");
        self.std.set(Some(id));
        Ok(())
    }

    fn enum_formats(&self) -> io::Result<Vec<FourCC>> {
        self.record("enum_formats");
        Ok(vec![FourCC::YUYV, FourCC::MJPG])
    }

    fn set_format(&self, width: u32, height: u32, fourcc: Option<FourCC>) -> io::Result<Format> {
        self.record("set_format");
        let fourcc = fourcc.unwrap_or(self.format.borrow().fourcc);
        let format = Format::new(width, height, fourcc);
        *self.format.borrow_mut() = format.clone();
        Ok(format)
    }

    fn request_buffers(&self, count: u32) -> io::Result<u32> {
        self.record("request_buffers");
        self.requested.set(Some(count));
        if count == 0 && self.release_fail.get() {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        let granted = count.min(self.buffer_limit);
        self.granted.set(granted);
        self.queued.borrow_mut().clear();
        Ok(granted)
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferLocation> {
        self.record("query_buffer");
        if index >= self.granted.get() {
            return Err(invalid());
        }
        let length = self.buffer_len();
        Ok(BufferLocation {
            offset: u64::from(index) * length as u64,
            length,
        })
    }

    fn queue_buffer(&self, index: u32) -> io::Result<()> {
        self.record("queue_buffer");
        if index >= self.granted.get() {
            return Err(invalid());
        }
        self.queued.borrow_mut().push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&self) -> io::Result<Dequeued> {
        self.record("dequeue_buffer");
        let index = self
            .queued
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
        let sequence = self.sequence.get();
        self.sequence.set(sequence + 1);
        Ok(Dequeued {
            index: index as usize,
            bytes_used: self.buffer_len(),
            sequence,
        })
    }

    fn stream_on(&self) -> io::Result<()> {
        self.record("stream_on");
        Ok(())
    }

    fn stream_off(&self) -> io::Result<()> {
        self.record("stream_off");
        self.queued.borrow_mut().clear();
        Ok(())
    }

    fn query_controls(&self) -> io::Result<Vec<NativeControl>> {
        self.record("query_controls");
        Ok(self.controls.clone())
    }

    fn get_control(&self, id: u32) -> io::Result<i32> {
        self.record("get_control");
        let control = self.control(id)?;
        Ok(self
            .values
            .borrow()
            .get(&id)
            .copied()
            .unwrap_or(control.default))
    }

    fn set_control(&self, id: u32, value: i32) -> io::Result<()> {
        self.record("set_control");
        self.control(id)?;
        self.values.borrow_mut().insert(id, value);
        Ok(())
    }

    fn get_parm(&self) -> io::Result<StreamParams> {
        self.record("get_parm");
        if self.v2.is_none() {
            return Err(unsupported());
        }
        Ok(self.stream_params())
    }

    fn set_parm(&self, time_per_frame: Fraction) -> io::Result<StreamParams> {
        self.record("set_parm");
        if !self.interval_settable {
            return Err(invalid());
        }
        self.interval.set(time_per_frame);
        Ok(self.stream_params())
    }
}

impl V1Ops for FakeDevice {
    fn get_capability(&self) -> io::Result<V1Capability> {
        self.record("get_capability");
        self.v1.clone().ok_or_else(unsupported)
    }

    fn get_channel(&self, index: u32) -> io::Result<V1Channel> {
        self.record("get_channel");
        self.channels
            .get(index as usize)
            .cloned()
            .ok_or_else(invalid)
    }

    fn set_channel(&self, index: u32, _norm: u16) -> io::Result<()> {
        self.record("set_channel");
        self.channels
            .get(index as usize)
            .map(drop)
            .ok_or_else(invalid)
    }

    fn get_picture(&self) -> io::Result<V1Picture> {
        self.record("get_picture");
        self.v1.as_ref().ok_or_else(unsupported)?;
        Ok(self.picture.get())
    }

    fn set_picture(&self, picture: &V1Picture) -> io::Result<()> {
        self.record("set_picture");
        if !self.palettes.contains(&picture.palette) {
            return Err(invalid());
        }
        self.picture.set(*picture);
        Ok(())
    }

    fn set_window(&self, width: u32, height: u32) -> io::Result<(u32, u32)> {
        self.record("set_window");
        let cap = self.v1.as_ref().ok_or_else(unsupported)?;
        Ok((
            width.clamp(cap.min_width, cap.max_width),
            height.clamp(cap.min_height, cap.max_height),
        ))
    }

    fn get_mbuf(&self) -> io::Result<V1Mbuf> {
        self.record("get_mbuf");
        Ok(V1Mbuf {
            size: V1_FRAME_LEN * V1_FRAMES,
            offsets: (0..V1_FRAMES).map(|frame| frame * V1_FRAME_LEN).collect(),
        })
    }

    fn mcapture(&self, frame: u32, _width: u32, _height: u32, _palette: u16) -> io::Result<()> {
        self.record("mcapture");
        if frame as usize >= V1_FRAMES {
            return Err(invalid());
        }
        Ok(())
    }

    fn sync(&self, frame: u32) -> io::Result<()> {
        self.record("sync");
        if self.sync_fail.get() {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        if frame as usize >= V1_FRAMES {
            return Err(invalid());
        }
        Ok(())
    }
}

impl DeviceFile for FakeDevice {
    type Mapping = FakeMapping;

    fn map(&self, offset: u64, length: usize) -> io::Result<Self::Mapping> {
        self.record("map");
        let nth = self.maps.get();
        self.maps.set(nth + 1);
        if self.map_failure == Some(nth) {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        self.live.set(self.live.get() + 1);
        // Gradient seeded by the offset so buffers are distinguishable.
        let seed = usize::try_from(offset).unwrap_or(0);
        let data = (0..length)
            .map(|i| u8::try_from((seed / 256 + i) % 256).unwrap_or(0))
            .collect();
        Ok(FakeMapping {
            data,
            live: Rc::clone(&self.live),
        })
    }

    fn private_ioctl(&self, request: PrivateRequest, arg: &mut [u8]) -> io::Result<()> {
        self.record("private_ioctl");
        let response = self.private.get(&request).ok_or_else(unsupported)?;
        self.private_sent.borrow_mut().insert(request, arg.to_vec());
        if response.len() == arg.len() {
            arg.copy_from_slice(response);
        }
        Ok(())
    }
}
