// src/run_control.rs
//
// Running / Paused switch for ingestion. Owns the single ingestion task:
// pause retires it completely before returning, resume starts a fresh one.

use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};

use crate::ingest::{IngestOutcome, IngestionTask, IngestionWorker, WorkerState};
use crate::io::IoError;
use crate::session::SessionEvent;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Running,
    Paused,
}

pub struct RunControl {
    state: Arc<watch::Sender<RunState>>,
    worker: IngestionWorker,
    /// The current ingestion task. The lock also serialises pause/resume.
    task: Mutex<Option<IngestionTask>>,
    events: broadcast::Sender<SessionEvent>,
}

impl RunControl {
    pub fn new(worker: IngestionWorker, events: broadcast::Sender<SessionEvent>) -> Self {
        let (state, _rx) = watch::channel(RunState::Running);
        Self {
            state: Arc::new(state),
            worker,
            task: Mutex::new(None),
            events,
        }
    }

    /// Start ingesting if no task is running and the state is Running.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        if self.state() == RunState::Paused {
            return;
        }
        if let Some(old) = task.take() {
            Self::log_outcome(old.join().await);
        }
        *task = Some(self.worker.spawn(&self.state));
    }

    /// Running → Paused. Returns once the ingestion task has finished.
    /// Returns false if already paused.
    pub async fn pause(&self) -> bool {
        let mut task = self.task.lock().await;
        let changed = self.transition(RunState::Running, RunState::Paused);
        if let Some(current) = task.take() {
            Self::log_outcome(current.join().await);
        }
        if changed {
            tlog!("[monitor] Receive paused");
        }
        changed
    }

    /// Paused → Running with a fresh ingestion task.
    ///
    /// Reconnects the source first; if that fails the state stays Paused and
    /// the error is returned. Returns Ok(false) if already running.
    pub async fn resume(&self) -> Result<bool, IoError> {
        let mut task = self.task.lock().await;
        if self.state() == RunState::Running {
            return Ok(false);
        }

        // A task that stopped on its own (source failure) is reaped here.
        if let Some(old) = task.take() {
            Self::log_outcome(old.join().await);
        }

        if let Err(e) = self.worker.reconnect().await {
            tlog!("[monitor] Resume failed: {}", e);
            return Err(e);
        }

        self.transition(RunState::Paused, RunState::Running);
        *task = Some(self.worker.spawn(&self.state));
        tlog!("[monitor] Receive resumed");
        Ok(true)
    }

    /// Stop ingestion for good.
    pub async fn shutdown(&self) {
        self.pause().await;
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    #[cfg(test)]
    fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn worker_state(&self) -> WorkerState {
        self.worker.state()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.worker.dropped_frames()
    }

    /// Whether an ingestion task exists and has not finished.
    #[cfg(test)]
    async fn has_active_task(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            let _ = self.events.send(SessionEvent::RunStateChanged(to));
        }
        changed
    }

    fn log_outcome(outcome: IngestOutcome) {
        if let IngestOutcome::Failed(e) = outcome {
            tlog!("[monitor] Reaped failed ingestion task: {}", e);
        }
    }
}
