//! Runs one command against the engine and reports on it.
//!
//! A job moves `Queued -> Running(0..=100) -> Succeeded | Failed | Cancelled`.
//! Progress only ever goes up, and the terminal event is always the last one.
//! Once `cancel()` has been acknowledged the job ends `Cancelled`, even if the
//! engine cannot abort and finishes the work anyway.

use bytes::Bytes;
use log::{error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::command::CommandArgs;
use crate::engine::{AbortController, EngineHandle, Invocation, ProgressSink};
use crate::error::{FailureKind, Result, TransformError};

#[derive(Debug, Clone)]
pub enum JobState {
    Queued,
    Running(u8),
    Succeeded,
    Failed(Arc<TransformError>),
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed(_) | JobState::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub enum JobEvent {
    Progress(u8),
    Finished(JobState),
}

#[derive(Debug)]
pub struct JobOutput {
    pub bytes: Bytes,
    pub extension: &'static str,
    pub mime: &'static str,
}

#[derive(Debug)]
pub enum JobOutcome {
    Succeeded(JobOutput),
    Failed(Arc<TransformError>),
    Cancelled,
}

#[derive(Default)]
struct ControlState {
    cancel_requested: bool,
    finished: bool,
}

struct Control {
    abort: AbortController,
    state: Mutex<ControlState>,
}

impl Control {
    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn request_cancel(&self) -> bool {
        let mut state = self.lock();
        if state.finished {
            return false;
        }
        state.cancel_requested = true;
        drop(state);
        self.abort.abort();
        true
    }

    fn cancel_requested(&self) -> bool {
        self.lock().cancel_requested
    }
}

pub struct Job {
    id: Uuid,
    state: watch::Receiver<JobState>,
    events: Option<mpsc::UnboundedReceiver<JobEvent>>,
    control: Arc<Control>,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl Job {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.clone()
    }

    /// Ordered progress and terminal events. Can be taken once.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<JobEvent>> {
        self.events.take()
    }

    /// Call `callback` with each progress value on a background task.
    pub fn on_progress<F>(&mut self, mut callback: F)
    where
        F: FnMut(u8) + Send + 'static,
    {
        let Some(mut events) = self.events.take() else {
            warn!("job {}: progress events already taken", self.id);
            return;
        };
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let JobEvent::Progress(percent) = event {
                    callback(percent);
                }
            }
        });
    }

    /// Returns false if the job had already finished.
    pub fn cancel(&self) -> bool {
        self.cancel_handle().cancel()
    }

    /// A cancel switch that outlives `wait(self)`.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            id: self.id,
            control: Arc::clone(&self.control),
        }
    }

    pub async fn wait(self) -> JobOutcome {
        settle(self.outcome.await)
    }

    /// Wait at most `limit`, then cancel and wait for the job to settle.
    pub async fn wait_timeout(self, limit: Duration) -> JobOutcome {
        let Job { id, control, mut outcome, .. } = self;
        match tokio::time::timeout(limit, &mut outcome).await {
            Ok(result) => settle(result),
            Err(_) => {
                warn!("job {}: no result after {:?}, cancelling", id, limit);
                control.request_cancel();
                settle(outcome.await)
            }
        }
    }
}

#[derive(Clone)]
pub struct CancelHandle {
    id: Uuid,
    control: Arc<Control>,
}

impl CancelHandle {
    pub fn cancel(&self) -> bool {
        let acknowledged = self.control.request_cancel();
        if acknowledged {
            info!("job {}: cancel requested", self.id);
        }
        acknowledged
    }
}

fn settle(result: std::result::Result<JobOutcome, oneshot::error::RecvError>) -> JobOutcome {
    result.unwrap_or_else(|_| {
        JobOutcome::Failed(Arc::new(TransformError::EngineUnavailable(
            "job ended without a result".into(),
        )))
    })
}

/// Start `command` on `engine`. Refuses with `EngineBusy` while another job
/// holds the engine; nothing is queued.
pub fn submit(command: CommandArgs, input: Bytes, engine: &EngineHandle) -> Result<Job> {
    let Some(guard) = engine.try_claim() else {
        warn!("submit refused: engine busy");
        return Err(TransformError::EngineBusy);
    };

    let id = Uuid::new_v4();
    info!("job {}: submitting {} -> {}", id, command.input_name(), command.output_name());

    let (state_tx, state_rx) = watch::channel(JobState::Queued);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let control = Arc::new(Control {
        abort: AbortController::new(),
        state: Mutex::new(ControlState::default()),
    });

    let engine = engine.clone();
    let task_control = Arc::clone(&control);
    tokio::spawn(async move {
        let control = task_control;
        let extension = command.output_extension();
        let mime = command.output_mime();
        let (sink, mut raw) = ProgressSink::channel();

        let mut last = 0u8;
        state_tx.send_replace(JobState::Running(0));
        let _ = event_tx.send(JobEvent::Progress(0));

        let mut relay = |percent: u8| {
            if percent > last && !control.cancel_requested() {
                last = percent;
                state_tx.send_replace(JobState::Running(percent));
                let _ = event_tx.send(JobEvent::Progress(percent));
            }
        };

        // On its own task so a panicking engine still ends the job.
        let signal = control.abort.signal();
        let runner = Arc::clone(engine.engine());
        let mut exec =
            tokio::spawn(async move { runner.execute(Invocation { command, input }, sink, signal).await });

        let result = loop {
            tokio::select! {
                biased;
                joined = &mut exec => break joined.unwrap_or_else(|e| {
                    Err(TransformError::EncodeFailed {
                        kind: FailureKind::Crashed,
                        detail: format!("engine task failed: {}", e),
                    })
                }),
                Some(percent) = raw.recv() => relay(percent),
            }
        };
        while let Ok(percent) = raw.try_recv() {
            relay(percent);
        }

        let outcome = {
            let mut ctl = control.lock();
            ctl.finished = true;
            if ctl.cancel_requested {
                JobOutcome::Cancelled
            } else {
                match result {
                    Ok(bytes) => JobOutcome::Succeeded(JobOutput { bytes, extension, mime }),
                    Err(e) => JobOutcome::Failed(Arc::new(e)),
                }
            }
        };
        drop(guard);

        let terminal = match &outcome {
            JobOutcome::Succeeded(output) => {
                info!("job {}: succeeded ({} bytes)", id, output.bytes.len());
                JobState::Succeeded
            }
            JobOutcome::Failed(e) => {
                error!("job {}: failed: {}", id, e);
                JobState::Failed(Arc::clone(e))
            }
            JobOutcome::Cancelled => {
                info!("job {}: cancelled", id);
                JobState::Cancelled
            }
        };
        state_tx.send_replace(terminal.clone());
        let _ = event_tx.send(JobEvent::Finished(terminal));
        let _ = outcome_tx.send(outcome);
    });

    Ok(Job {
        id,
        state: state_rx,
        events: Some(event_rx),
        control,
        outcome: outcome_rx,
    })
}
