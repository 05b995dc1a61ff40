//! The native-codec engine seam.
//!
//! Everything that actually decodes or encodes sits behind [`Engine`]. The
//! pipeline only ever sees it through an [`EngineHandle`] handed out by the
//! [`EngineManager`], which keeps one loaded instance per session.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::asset::MediaInfo;
use crate::command::CommandArgs;
use crate::error::Result;

pub mod ffmpeg;
pub mod manager;

pub use ffmpeg::{FfmpegEngine, FfmpegLoader};
pub use manager::{EngineManager, EngineStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EncoderSupport {
    pub libx264: bool,
    pub libx265: bool,
    pub libvpx_vp9: bool,
    pub nvenc: bool,
    pub amf: bool,
    pub qsv: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    pub name: String,
    pub version: String,
    pub encoders: EncoderSupport,
}

/// One command plus the input bytes it reads.
pub struct Invocation {
    pub command: CommandArgs,
    pub input: Bytes,
}

/// Where an engine reports raw percentages while it works.
#[derive(Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<u8>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<u8>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn report(&self, percent: f64) {
        if !percent.is_finite() {
            return;
        }
        let _ = self.tx.send(percent.clamp(0.0, 100.0).floor() as u8);
    }
}

pub struct AbortController {
    tx: watch::Sender<bool>,
}

impl AbortController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal { rx: self.tx.subscribe() }
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once abort is requested. Never resolves if it can no longer be.
    pub async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[async_trait]
pub trait Engine: Send + Sync {
    fn info(&self) -> &EngineInfo;

    /// Whether `execute` stops early when its abort signal fires.
    fn supports_abort(&self) -> bool {
        false
    }

    async fn probe(&self, name: &str, input: Bytes) -> Result<MediaInfo>;

    async fn execute(&self, invocation: Invocation, progress: ProgressSink, abort: AbortSignal) -> Result<Bytes>;
}

#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Engine>>;
}

struct HandleInner {
    engine: Arc<dyn Engine>,
    busy: AtomicBool,
    generation: u64,
}

/// Shared reference to a loaded engine. Clones point at the same instance
/// and share its one-job-at-a-time flag.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<HandleInner>,
}

impl EngineHandle {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self::with_generation(engine, 0)
    }

    pub(crate) fn with_generation(engine: Arc<dyn Engine>, generation: u64) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                engine,
                busy: AtomicBool::new(false),
                generation,
            }),
        }
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.inner.engine
    }

    pub fn info(&self) -> &EngineInfo {
        self.inner.engine.info()
    }

    /// Increments each time the manager loads a fresh instance.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    pub fn same_instance(&self, other: &EngineHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn try_claim(&self) -> Option<BusyGuard> {
        self.inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard {
                inner: Arc::clone(&self.inner),
            })
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("engine", &self.info().name)
            .field("generation", &self.inner.generation)
            .field("busy", &self.is_busy())
            .finish()
    }
}

/// Held by the running job; clears the busy flag when dropped.
pub(crate) struct BusyGuard {
    inner: Arc<HandleInner>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.inner.busy.store(false, Ordering::Release);
    }
}
