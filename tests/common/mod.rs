#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use media_transform::asset::MediaInfo;
use media_transform::buffer::BufferStore;
use media_transform::config::EncodeDefaults;
use media_transform::engine::{AbortSignal, Engine, EngineInfo, EngineLoader, Invocation, ProgressSink};
use media_transform::error::{FailureKind, Result, TransformError};
use media_transform::geometry::{DisplaySize, Size};
use media_transform::{EngineManager, Session};

pub const ENCODED: &[u8] = b"encoded output";

/// Engine double that reports a fixed list of percentages, pausing between them.
pub struct ScriptedEngine {
    info: EngineInfo,
    pub steps: Vec<f64>,
    pub step_delay: Duration,
    pub abortable: bool,
    pub fail_with: Option<FailureKind>,
    pub panics: bool,
    pub probe_info: MediaInfo,
    pub executions: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            info: EngineInfo {
                name: "scripted".into(),
                version: "0.0".into(),
                ..EngineInfo::default()
            },
            steps: vec![10.0, 35.0, 60.0, 85.0],
            step_delay: Duration::from_millis(5),
            abortable: true,
            fail_with: None,
            panics: false,
            probe_info: MediaInfo {
                width: Some(1920),
                height: Some(1080),
                duration_seconds: Some(30.0),
                fps: Some(30.0),
            },
            executions: AtomicUsize::new(0),
        }
    }

    pub fn steps(mut self, steps: &[f64]) -> Self {
        self.steps = steps.to_vec();
        self
    }

    pub fn step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Ignores the abort signal and always runs to completion.
    pub fn stubborn(mut self) -> Self {
        self.abortable = false;
        self
    }

    pub fn failing(mut self, kind: FailureKind) -> Self {
        self.fail_with = Some(kind);
        self
    }

    /// Panics after reporting its progress steps.
    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    fn info(&self) -> &EngineInfo {
        &self.info
    }

    fn supports_abort(&self) -> bool {
        self.abortable
    }

    async fn probe(&self, _name: &str, _input: Bytes) -> Result<MediaInfo> {
        Ok(self.probe_info.clone())
    }

    async fn execute(&self, invocation: Invocation, progress: ProgressSink, abort: AbortSignal) -> Result<Bytes> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        assert!(!invocation.input.is_empty());
        for step in &self.steps {
            if self.abortable && abort.is_aborted() {
                return Err(TransformError::EncodeFailed {
                    kind: FailureKind::Crashed,
                    detail: "aborted".into(),
                });
            }
            progress.report(*step);
            tokio::time::sleep(self.step_delay).await;
        }
        if self.panics {
            panic!("scripted engine crashed");
        }
        match &self.fail_with {
            Some(kind) => Err(TransformError::EncodeFailed {
                kind: kind.clone(),
                detail: "Conversion failed!".into(),
            }),
            None => Ok(Bytes::from_static(ENCODED)),
        }
    }
}

/// Loader double that counts how often it is asked to load.
pub struct CountingLoader {
    engine: Arc<dyn Engine>,
    delay: Duration,
    failures_left: AtomicUsize,
    loads: AtomicUsize,
}

impl CountingLoader {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            delay: Duration::from_millis(20),
            failures_left: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
        }
    }

    /// Fail the first `n` loads as if the engine download dropped.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineLoader for CountingLoader {
    async fn load(&self) -> Result<Arc<dyn Engine>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransformError::EngineUnavailable("connection reset".into()));
        }
        Ok(Arc::clone(&self.engine))
    }
}

/// Small deterministic generator so randomized tests replay exactly.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    /// Uniform in `[0, 1)`.
    pub fn unit(&mut self) -> f64 {
        self.next_u32() as f64 / (1u64 << 31) as f64
    }

    pub fn range(&mut self, low: u32, high: u32) -> u32 {
        low + self.next_u32() % (high - low + 1)
    }
}

pub fn manager_for(engine: Arc<dyn Engine>) -> (Arc<EngineManager>, Arc<CountingLoader>) {
    let loader = Arc::new(CountingLoader::new(engine));
    let manager = Arc::new(EngineManager::new(Arc::clone(&loader) as Arc<dyn EngineLoader>));
    (manager, loader)
}

/// A session with `clip.mp4` open: 1920x1080, 30s, previewed at 640x360.
pub fn video_session(store: &BufferStore, engines: Arc<EngineManager>) -> Session {
    let mut session = Session::new(store.clone(), engines, EncodeDefaults::default());
    session
        .open("clip.mp4", None, vec![0u8; 4096])
        .expect("mp4 is a known type");
    session.set_natural(Size::new(1920, 1080)).unwrap();
    session.set_duration(30.0).unwrap();
    session.set_preview(DisplaySize::new(640.0, 360.0));
    session
}
