// src/ingest.rs
//
// Background receive loop: pull a frame from the bus source, stamp it,
// classify it against the filter and append it to the display log.
//
// The run-state channel is the cancellation signal. The loop waits on the
// source and on run-state changes together, preferring the source, so a
// frame that has already been delivered is always appended before the task
// stops. Frames not yet delivered stay queued in the source.
//
// The loop only holds a weak handle to the run-state sender. Dropping the
// owner closes the channel, which ends the loop and releases the source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::display_log::DisplayLog;
use crate::filter::FilterSet;
use crate::io::{BusSource, Frame, IoError, RawFrame, ReceivedFrame};
use crate::run_control::RunState;
use crate::session::SessionEvent;

/// Default pause between frames.
pub const DEFAULT_YIELD_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle of the receive loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WorkerState {
    #[default]
    Idle,
    Receiving,
    Stopping,
}

/// How a receive loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The run state went to Paused.
    Cancelled,
    /// The source failed; the run state was flipped to Paused.
    Failed(IoError),
}

#[derive(Clone, Copy, Debug)]
pub struct IngestConfig {
    /// Pause after each frame; cut short by cancellation.
    pub yield_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            yield_interval: DEFAULT_YIELD_INTERVAL,
        }
    }
}

/// Everything a receive loop needs. Cheap to clone; `spawn` starts one loop.
#[derive(Clone)]
pub struct IngestionWorker {
    source: Arc<Mutex<Box<dyn BusSource>>>,
    device: String,
    filter: FilterSet,
    log: DisplayLog,
    config: IngestConfig,
    state: Arc<watch::Sender<WorkerState>>,
    /// Last drop count reported by the source
    dropped: Arc<AtomicU64>,
    events: broadcast::Sender<SessionEvent>,
}

impl IngestionWorker {
    pub fn new(
        source: Box<dyn BusSource>,
        filter: FilterSet,
        log: DisplayLog,
        config: IngestConfig,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let device = source.device().to_string();
        let (state, _rx) = watch::channel(WorkerState::Idle);
        Self {
            source: Arc::new(Mutex::new(source)),
            device,
            filter,
            log,
            config,
            state: Arc::new(state),
            dropped: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    #[cfg(test)]
    fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Frames the source dropped on a full queue, as of the last frame ingested.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Ask the source to re-establish its link. Waits for any running loop
    /// to release the source first.
    pub async fn reconnect(&self) -> Result<(), IoError> {
        self.source.lock().await.reconnect().await
    }

    /// Start a receive loop governed by `run`. The loop does not keep `run`
    /// alive; it ends when the last strong handle is dropped.
    pub fn spawn(&self, run: &Arc<watch::Sender<RunState>>) -> IngestionTask {
        let worker = self.clone();
        let run_rx = run.subscribe();
        let run = Arc::downgrade(run);
        let handle = tokio::spawn(async move { worker.run(run, run_rx).await });
        IngestionTask {
            handle,
            device: self.device.clone(),
        }
    }

    async fn run(
        self,
        run: Weak<watch::Sender<RunState>>,
        mut run_rx: watch::Receiver<RunState>,
    ) -> IngestOutcome {
        // Holding the source for the whole loop keeps a second loop from reading.
        let mut source = self.source.lock().await;
        self.state.send_replace(WorkerState::Receiving);
        tlog!("[ingest] Receiving from {}", self.device);
        self.note_dropped(source.dropped());

        let mut ingested: u64 = 0;
        let outcome = loop {
            // Err means every sender is gone
            if run_rx.has_changed().is_err() {
                break IngestOutcome::Cancelled;
            }
            let paused = *run_rx.borrow_and_update() == RunState::Paused;
            if paused {
                break IngestOutcome::Cancelled;
            }

            let next = tokio::select! {
                biased;
                result = source.next_frame() => Step::Frame(result),
                changed = run_rx.changed() => match changed {
                    Ok(()) => Step::RunStateChanged,
                    Err(_) => Step::Closed,
                },
            };

            match next {
                Step::Frame(Ok(raw)) => {
                    // Delivered as the pause landed: finish it, then stop
                    let stopping = *run_rx.borrow() == RunState::Paused;
                    if stopping {
                        self.state.send_replace(WorkerState::Stopping);
                    }
                    self.ingest(raw);
                    ingested += 1;
                    self.note_dropped(source.dropped());
                    if stopping {
                        break IngestOutcome::Cancelled;
                    }
                }
                Step::Frame(Err(e)) => break IngestOutcome::Failed(e),
                Step::RunStateChanged => continue,
                Step::Closed => break IngestOutcome::Cancelled,
            }

            // Backpressure valve, cut short by a run-state change
            tokio::select! {
                biased;
                _ = run_rx.changed() => {}
                _ = tokio::time::sleep(self.config.yield_interval) => {}
            }
        };

        self.state.send_replace(WorkerState::Stopping);
        drop(source);

        match &outcome {
            IngestOutcome::Cancelled => {
                tlog!("[ingest] Stopped after {} frames", ingested);
            }
            IngestOutcome::Failed(e) => {
                tlog!("[ingest] Receive failed after {} frames: {}", ingested, e);
                let flipped = run.upgrade().is_some_and(|run| {
                    run.send_if_modified(|state| {
                        if *state == RunState::Running {
                            *state = RunState::Paused;
                            true
                        } else {
                            false
                        }
                    })
                });
                if flipped {
                    let _ = self.events.send(SessionEvent::RunStateChanged(RunState::Paused));
                }
                let _ = self.events.send(SessionEvent::IngestionFailed(e.clone()));
            }
        }

        self.state.send_replace(WorkerState::Idle);
        outcome
    }

    /// Stamp, classify and append one frame. Returns its visibility.
    fn ingest(&self, raw: RawFrame) -> bool {
        let received = ReceivedFrame::stamp(Frame::from_raw(&raw));
        self.log.append_classified(received, &self.filter)
    }

    fn note_dropped(&self, total: u64) {
        let before = self.dropped.swap(total, Ordering::Relaxed);
        if total > before {
            tlog!(
                "[ingest] {} lost {} frames on a full queue ({} total)",
                self.device,
                total - before,
                total
            );
        }
    }
}

enum Step {
    Frame(Result<RawFrame, IoError>),
    RunStateChanged,
    Closed,
}

/// Handle to one running receive loop.
pub struct IngestionTask {
    handle: JoinHandle<IngestOutcome>,
    device: String,
}

impl IngestionTask {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to end.
    pub async fn join(self) -> IngestOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => IngestOutcome::Failed(IoError::protocol(
                &self.device,
                format!("ingestion task ended abnormally: {}", e),
            )),
        }
    }
}
