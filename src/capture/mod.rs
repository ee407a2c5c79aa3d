//! Capture interface: parameters, state machine, and the per-protocol action
//! table behind it.
//!
//! ```text
//! init ──> Initialized ──start──> Streaming ──stop──> Stopped ──free──> (gone)
//!               └───────────────stop──────────────────────┘
//! ```
//!
//! The action table is chosen once from the device's protocol generation and
//! never changes for the lifetime of the interface.

mod pool;
mod v1;
mod v2;

use std::io;
use std::path::{Path, PathBuf};

use crate::traits::{
    DeviceFile, Dequeued, Error, Format, FourCC, Protocol, Result, VideoStandard,
};

pub use pool::{BufferPool, SlotState};
pub(crate) use v1::supported_formats as v1_supported_formats;

/// Requested capture settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureParams {
    /// Requested frame width in pixels.
    pub width: u32,
    /// Requested frame height in pixels.
    pub height: u32,
    /// Input channel index.
    pub channel: u32,
    /// Analog standard on the input.
    pub standard: VideoStandard,
    /// Number of buffers to request.
    pub buffer_count: u32,
    /// Pixel format; `None` keeps the driver's current one.
    pub fourcc: Option<FourCC>,
}

impl CaptureParams {
    /// Default buffer count.
    pub const DEFAULT_BUFFERS: u32 = 4;

    /// Capture `width` x `height` from channel 0 with no standard selected.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            channel: 0,
            standard: VideoStandard::Webcam,
            buffer_count: Self::DEFAULT_BUFFERS,
            fourcc: None,
        }
    }

    #[must_use]
    pub const fn with_channel(mut self, channel: u32) -> Self {
        self.channel = channel;
        self
    }

    #[must_use]
    pub const fn with_standard(mut self, standard: VideoStandard) -> Self {
        self.standard = standard;
        self
    }

    #[must_use]
    pub const fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    #[must_use]
    pub const fn with_fourcc(mut self, fourcc: FourCC) -> Self {
        self.fourcc = Some(fourcc);
        self
    }
}

/// Where a capture interface is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Created; nothing negotiated or mapped yet.
    Initialized,
    /// Buffers mapped and streaming.
    Streaming,
    /// Streaming halted; may be freed.
    Stopped,
}

/// A buffer the caller has dequeued.
#[derive(Debug)]
pub struct CapturedBuffer<'a> {
    /// Slot index, to hand back with `enqueue_buffer`.
    pub index: usize,
    /// Bytes the driver captured.
    pub bytes_used: usize,
    /// Frame sequence number.
    pub sequence: u32,
    /// The captured bytes.
    pub data: &'a [u8],
}

/// Protocol-specific capture operations.
pub(crate) trait CaptureActions<F: DeviceFile> {
    /// Select input and standard, negotiate format and size.
    fn set_params(&mut self, file: &F, params: &CaptureParams) -> io::Result<Format>;

    /// Request and map `count` buffers for `format`.
    fn init(&mut self, file: &F, format: &Format, count: u32)
        -> io::Result<BufferPool<F::Mapping>>;

    /// Queue all `buffers` and start streaming.
    fn start(&mut self, file: &F, buffers: usize) -> io::Result<()>;

    fn dequeue(&mut self, file: &F) -> io::Result<Dequeued>;

    fn enqueue(&mut self, file: &F, index: usize) -> io::Result<()>;

    fn stop(&mut self, file: &F) -> io::Result<()>;

    /// Release driver-side buffers. Called after the pool is unmapped.
    fn free(&mut self, file: &F) -> io::Result<()>;

    fn list_formats(&self, file: &F) -> io::Result<Vec<FourCC>>;
}

/// A capture interface owned by a device handle.
pub struct Capture<F: DeviceFile> {
    path: PathBuf,
    params: CaptureParams,
    state: CaptureState,
    actions: Box<dyn CaptureActions<F>>,
    pool: Option<BufferPool<F::Mapping>>,
    format: Option<Format>,
    /// The driver still holds buffers that `free` must release.
    driver_buffers: bool,
}

impl<F: DeviceFile + 'static> Capture<F> {
    pub(crate) fn new(path: &Path, protocol: Protocol, params: CaptureParams) -> Result<Self> {
        let actions: Box<dyn CaptureActions<F>> = match protocol {
            Protocol::V2 => Box::new(v2::V2Capture::default()),
            Protocol::V1 => Box::new(v1::V1Capture::default()),
            Protocol::Unknown => {
                return Err(Error::WrongVersion {
                    path: path.to_path_buf(),
                })
            }
        };
        log::debug!("capture initialized on {} ({protocol})", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            params,
            state: CaptureState::Initialized,
            actions,
            pool: None,
            format: None,
            driver_buffers: false,
        })
    }
}

impl<F: DeviceFile> Capture<F> {
    pub const fn state(&self) -> CaptureState {
        self.state
    }

    pub const fn params(&self) -> &CaptureParams {
        &self.params
    }

    /// Format the driver settled on; `None` before `start`.
    pub const fn format(&self) -> Option<&Format> {
        self.format.as_ref()
    }

    /// Number of mapped buffers.
    pub fn buffer_count(&self) -> usize {
        self.pool.as_ref().map_or(0, BufferPool::len)
    }

    /// Ownership of slot `index`, if mapped.
    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.pool.as_ref()?.state(index)
    }

    fn failed(&self, operation: &'static str) -> impl FnOnce(io::Error) -> Error + '_ {
        move |source| Error::CaptureFailed {
            path: self.path.clone(),
            operation,
            source,
        }
    }

    fn require(&self, operation: &'static str, state: CaptureState) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: Some(self.state),
            })
        }
    }

    pub(crate) fn list_formats(&self, file: &F) -> Result<Vec<FourCC>> {
        self.actions
            .list_formats(file)
            .map_err(self.failed("list formats"))
    }

    pub(crate) fn start(&mut self, file: &F) -> Result<Format> {
        self.require("start", CaptureState::Initialized)?;

        let format = self
            .actions
            .set_params(file, &self.params)
            .map_err(self.failed("set parameters"))?;
        let mut pool = match self.actions.init(file, &format, self.params.buffer_count) {
            Ok(pool) => pool,
            Err(err) => {
                self.release_after_failure(file, "map buffers");
                return Err(self.failed("map buffers")(err));
            }
        };

        if let Err(err) = self.actions.start(file, pool.len()) {
            drop(pool);
            self.release_after_failure(file, "start");
            return Err(self.failed("start")(err));
        }
        self.driver_buffers = true;
        pool.mark_all_queued();

        log::debug!(
            "streaming {}x{} {} with {} buffers",
            format.width,
            format.height,
            format.fourcc,
            pool.len()
        );
        self.pool = Some(pool);
        self.format = Some(format.clone());
        self.state = CaptureState::Streaming;
        Ok(format)
    }

    /// Give back whatever the driver granted before `operation` failed. If
    /// that fails too, a later `free` tries again.
    fn release_after_failure(&mut self, file: &F, operation: &str) {
        match self.actions.free(file) {
            Ok(()) => self.driver_buffers = false,
            Err(err) => {
                log::warn!("releasing buffers after failed {operation}: {err}");
                self.driver_buffers = true;
            }
        }
    }

    pub(crate) fn dequeue(&mut self, file: &F) -> Result<CapturedBuffer<'_>> {
        self.require("dequeue", CaptureState::Streaming)?;

        let done = self.actions.dequeue(file).map_err(self.failed("dequeue"))?;
        let pool = self.pool.as_mut().ok_or(Error::InvalidState {
            operation: "dequeue",
            state: Some(self.state),
        })?;
        pool.mark_dequeued(done.index)?;
        log::trace!("dequeued buffer {} ({} bytes)", done.index, done.bytes_used);

        let data = pool
            .data(done.index, done.bytes_used)
            .ok_or(Error::InvalidBuffer { index: done.index })?;
        Ok(CapturedBuffer {
            index: done.index,
            bytes_used: done.bytes_used,
            sequence: done.sequence,
            data,
        })
    }

    pub(crate) fn enqueue(&mut self, file: &F, index: usize) -> Result<()> {
        self.require("enqueue", CaptureState::Streaming)?;

        let pool = self.pool.as_ref().ok_or(Error::InvalidBuffer { index })?;
        pool.check_held(index)?;
        self.actions
            .enqueue(file, index)
            .map_err(self.failed("enqueue"))?;
        if let Some(pool) = self.pool.as_mut() {
            pool.mark_queued(index)?;
        }
        log::trace!("queued buffer {index}");
        Ok(())
    }

    /// Contents of a buffer the caller holds.
    pub(crate) fn buffer(&self, index: usize) -> Result<&[u8]> {
        let pool = self.pool.as_ref().ok_or(Error::InvalidBuffer { index })?;
        pool.check_held(index)?;
        pool.data(index, usize::MAX)
            .ok_or(Error::InvalidBuffer { index })
    }

    pub(crate) fn stop(&mut self, file: &F) -> Result<()> {
        match self.state {
            CaptureState::Streaming => {
                self.actions.stop(file).map_err(self.failed("stop"))?;
                log::debug!("capture stopped on {}", self.path.display());
            }
            CaptureState::Initialized => {}
            CaptureState::Stopped => {
                return Err(Error::InvalidState {
                    operation: "stop",
                    state: Some(self.state),
                })
            }
        }
        self.state = CaptureState::Stopped;
        Ok(())
    }

    /// Unmap the pool, then release driver buffers. Only legal when stopped.
    ///
    /// On failure the interface stays `Stopped` and `free` may be retried.
    pub(crate) fn free(&mut self, file: &F) -> Result<()> {
        self.require("free", CaptureState::Stopped)?;

        self.pool = None;
        if self.driver_buffers {
            self.actions.free(file).map_err(self.failed("free"))?;
            self.driver_buffers = false;
        }
        log::debug!("capture freed on {}", self.path.display());
        Ok(())
    }
}

impl<F: DeviceFile> std::fmt::Debug for Capture<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capture")
            .field("path", &self.path)
            .field("params", &self.params)
            .field("state", &self.state)
            .field("format", &self.format)
            .field("buffers", &self.buffer_count())
            .finish_non_exhaustive()
    }
}
