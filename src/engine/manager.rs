use log::{error, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use super::{EngineHandle, EngineLoader};
use crate::error::{Result, TransformError};

type LoadOutcome = std::result::Result<EngineHandle, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Unloaded,
    Loading,
    Ready,
    Failed(String),
}

enum Slot {
    Unloaded,
    Loading(watch::Receiver<Option<LoadOutcome>>),
    Ready(EngineHandle),
    Failed(String),
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the session's single engine instance.
///
/// The load runs on its own task so callers (and whatever renders the
/// loading indicator) are never blocked by it, and so a caller that stops
/// waiting does not abandon the load for everyone else.
pub struct EngineManager {
    loader: Arc<dyn EngineLoader>,
    slot: Arc<Mutex<Slot>>,
    loads: AtomicU64,
}

impl EngineManager {
    pub fn new(loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            loader,
            slot: Arc::new(Mutex::new(Slot::Unloaded)),
            loads: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> EngineStatus {
        match &*lock(&self.slot) {
            Slot::Unloaded => EngineStatus::Unloaded,
            Slot::Loading(_) => EngineStatus::Loading,
            Slot::Ready(_) => EngineStatus::Ready,
            Slot::Failed(reason) => EngineStatus::Failed(reason.clone()),
        }
    }

    /// Returns the ready engine, joins a load in flight, or starts one.
    pub async fn acquire(&self) -> Result<EngineHandle> {
        let mut rx = {
            let mut slot = lock(&self.slot);
            let pending = match &*slot {
                Slot::Ready(handle) => return Ok(handle.clone()),
                // A closed channel means the load task died; start over.
                Slot::Loading(rx) if rx.has_changed().is_ok() => Some(rx.clone()),
                _ => None,
            };
            match pending {
                Some(rx) => rx,
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Slot::Loading(rx.clone());
                    self.spawn_load(tx);
                    rx
                }
            }
        };

        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome.map_err(TransformError::EngineUnavailable);
            }
            if rx.changed().await.is_err() {
                return Err(TransformError::EngineUnavailable("engine load was interrupted".into()));
            }
        }
    }

    fn spawn_load(&self, tx: watch::Sender<Option<LoadOutcome>>) {
        let generation = self.loads.fetch_add(1, Ordering::Relaxed) + 1;
        let loader = Arc::clone(&self.loader);
        let slot = Arc::clone(&self.slot);

        tokio::spawn(async move {
            info!("loading engine (attempt {})", generation);
            let outcome = match loader.load().await {
                Ok(engine) => {
                    info!("engine ready: {} {}", engine.info().name, engine.info().version);
                    Ok(EngineHandle::with_generation(engine, generation))
                }
                Err(e) => {
                    error!("engine load failed: {}", e);
                    Err(match e {
                        TransformError::EngineUnavailable(reason) => reason,
                        other => other.to_string(),
                    })
                }
            };

            *lock(&slot) = match &outcome {
                Ok(handle) => Slot::Ready(handle.clone()),
                Err(reason) => Slot::Failed(reason.clone()),
            };
            let _ = tx.send(Some(outcome));
        });
    }
}
