// src/session.rs
//
// One operator session: filter, display log, run control and transmit path
// wired to a single bus. This is the only surface the front-end uses.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::display_log::{DisplayLog, RenderOptions};
use crate::filter::{FilterChange, FilterSet};
use crate::ingest::{IngestConfig, IngestionWorker, WorkerState};
use crate::io::{self, BusSender, BusSource, IoError};
use crate::run_control::{RunControl, RunState};
use crate::settings::AppSettings;
use crate::transmit::{SubmitError, TransmitPath, TransmitResult};
use crate::validate::{parse_id_field, InputError};

/// Capacity of the session event channel.
const EVENT_CAPACITY: usize = 256;

/// Notifications published to the front-end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    RunStateChanged(RunState),
    /// The bus source failed; ingestion is paused until resume.
    IngestionFailed(IoError),
    Transmitted(TransmitResult),
}

pub struct Monitor {
    filter: FilterSet,
    log: DisplayLog,
    run: RunControl,
    transmit: TransmitPath,
    events: broadcast::Sender<SessionEvent>,
    /// Re-filters the log on every filter change
    tracker: JoinHandle<()>,
}

impl Monitor {
    /// Build a session around an opened bus. Must be called within a tokio
    /// runtime. Ingestion does not begin until `start`.
    pub fn new(
        source: Box<dyn BusSource>,
        sender: Arc<dyn BusSender>,
        render: RenderOptions,
        config: IngestConfig,
    ) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        let filter = FilterSet::new();
        let log = DisplayLog::new(render);
        let tracker = log.track(filter.subscribe());
        let worker = IngestionWorker::new(source, filter.clone(), log.clone(), config, events.clone());

        Self {
            run: RunControl::new(worker, events.clone()),
            transmit: TransmitPath::new(sender, events.clone()),
            filter,
            log,
            events,
            tracker,
        }
    }

    /// Open the bus described by `settings` and build a session on it.
    pub fn open(settings: &AppSettings) -> Result<Self, IoError> {
        let link = io::open_bus(&settings.bus_config())?;
        tlog!(
            "[monitor] Opened {} ({:?} frames)",
            link.sender.device(),
            settings.frame_format
        );
        Ok(Self::new(
            link.source,
            link.sender,
            settings.render_options(),
            settings.ingest_config(),
        ))
    }

    /// Begin ingesting.
    pub async fn start(&self) {
        self.run.start().await;
    }

    // ------------------------------------------------------------------------
    // Filter
    // ------------------------------------------------------------------------

    /// Parse `text` as an identifier and add it to the filter.
    /// The log is re-filtered before this returns.
    pub fn add_filter(&self, text: &str) -> Result<FilterChange, InputError> {
        let id = parse_id_field(text)?;
        let change = self.filter.add_labelled(id, text.trim());
        if change == FilterChange::Changed {
            self.log.sync_to(&self.filter.snapshot());
        }
        Ok(change)
    }

    /// Enable or disable an existing filter entry.
    pub fn set_filter_enabled(&self, id: u32, enabled: bool) -> FilterChange {
        let change = self.filter.set_enabled(id, enabled);
        if change == FilterChange::Changed {
            self.log.sync_to(&self.filter.snapshot());
        }
        change
    }

    /// Forget every filter entry. All rows become visible.
    pub fn clear_filters(&self) -> FilterChange {
        let change = self.filter.clear_all();
        if change == FilterChange::Changed {
            self.log.sync_to(&self.filter.snapshot());
        }
        change
    }

    // ------------------------------------------------------------------------
    // Run control
    // ------------------------------------------------------------------------

    pub async fn pause(&self) -> bool {
        self.run.pause().await
    }

    pub async fn resume(&self) -> Result<bool, IoError> {
        self.run.resume().await
    }

    pub fn run_state(&self) -> RunState {
        self.run.state()
    }

    pub fn worker_state(&self) -> WorkerState {
        self.run.worker_state()
    }

    /// Frames lost on the bus queue before ingestion could take them.
    pub fn dropped_frames(&self) -> u64 {
        self.run.dropped_frames()
    }

    // ------------------------------------------------------------------------
    // Transmit
    // ------------------------------------------------------------------------

    /// Validate and send. Invalid input sends nothing; a send failure is in
    /// the returned result.
    pub fn transmit(&self, id_text: &str, data_text: &str) -> Result<TransmitResult, SubmitError> {
        self.transmit.submit_and_send(id_text, data_text)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn filter(&self) -> &FilterSet {
        &self.filter
    }

    pub fn log(&self) -> &DisplayLog {
        &self.log
    }

    pub fn device(&self) -> &str {
        self.transmit.device()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Stop ingestion and the filter tracker.
    pub async fn shutdown(&self) {
        self.run.shutdown().await;
        self.tracker.abort();
        tlog!("[monitor] Session closed ({} rows)", self.log.len());
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.tracker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FrameFormat, RawFrame, VirtualBus};
    use crate::validate::ParseError;
    use std::time::Duration;

    fn monitor(format: FrameFormat) -> (Arc<VirtualBus>, Monitor) {
        let bus = VirtualBus::new("session", 64, format);
        let monitor = Monitor::new(
            Box::new(bus.reader().unwrap()),
            bus.clone(),
            RenderOptions::default(),
            IngestConfig {
                yield_interval: Duration::from_millis(1),
            },
        );
        (bus, monitor)
    }

    async fn wait_for_rows(monitor: &Monitor, n: usize) {
        let mut count = monitor.log().subscribe();
        tokio::time::timeout(Duration::from_secs(2), count.wait_for(|len| *len >= n))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_filter_scenario() {
        let (bus, monitor) = monitor(FrameFormat::Standard);
        monitor.start().await;
        for id in [0x100, 0x200, 0x100] {
            bus.inject(RawFrame::new(id, vec![0x01]));
        }
        wait_for_rows(&monitor, 3).await;
        assert_eq!(monitor.log().identifiers(), vec![0x100, 0x200, 0x100]);
        assert_eq!(monitor.log().visibility(), vec![true, true, true]);

        assert_eq!(monitor.add_filter("0x200"), Ok(FilterChange::Changed));
        assert_eq!(monitor.log().visibility(), vec![false, true, false]);

        assert_eq!(monitor.clear_filters(), FilterChange::Changed);
        assert!(monitor.filter().snapshot().is_empty());
        assert_eq!(monitor.log().visibility(), vec![true, true, true]);
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_filter_validation() {
        let (_bus, monitor) = monitor(FrameFormat::Standard);
        let err = monitor.add_filter("1A").unwrap_err();
        assert_eq!(err.to_string(), "ID Invalid");
        assert!(monitor.filter().entries().is_empty());

        assert_eq!(monitor.add_filter("512"), Ok(FilterChange::Changed));
        assert_eq!(monitor.add_filter("0x200"), Ok(FilterChange::NoOp));
        let entries = monitor.filter().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].label, "512");
    }

    #[tokio::test]
    async fn test_toggle_filter_entry() {
        let (bus, monitor) = monitor(FrameFormat::Standard);
        monitor.start().await;
        for id in [1, 2, 3] {
            bus.inject(RawFrame::new(id, vec![]));
        }
        wait_for_rows(&monitor, 3).await;

        monitor.add_filter("2").unwrap();
        monitor.add_filter("3").unwrap();
        assert_eq!(monitor.log().visibility(), vec![false, true, true]);
        monitor.set_filter_enabled(3, false);
        assert_eq!(monitor.log().visibility(), vec![false, true, false]);
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_transmit_loops_back_into_log() {
        let (_bus, monitor) = monitor(FrameFormat::Standard);
        let mut events = monitor.subscribe();
        monitor.start().await;

        let result = monitor.transmit("0x1A", "1 2 0xFF").unwrap();
        assert!(result.is_success());
        wait_for_rows(&monitor, 1).await;
        let rows = monitor.log().rows();
        assert_eq!(rows[0].frame.frame.bytes(), &[1, 2, 255]);
        assert!(matches!(events.recv().await, Ok(SessionEvent::Transmitted(_))));

        let err = monitor.transmit("1A", "1 2 256").unwrap_err();
        assert_eq!(err, InputError::Data(ParseError::ByteOutOfRange));
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_failure_does_not_stop_ingestion() {
        let (bus, monitor) = monitor(FrameFormat::Standard);
        monitor.start().await;

        let result = monitor.transmit("0x800", "1").unwrap();
        assert!(!result.is_success());
        assert_eq!(monitor.run_state(), RunState::Running);

        bus.inject(RawFrame::new(0x10, vec![]));
        wait_for_rows(&monitor, 1).await;
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_overflow_is_counted() {
        let bus = VirtualBus::new("overflow", 2, FrameFormat::Standard);
        let monitor = Monitor::new(
            Box::new(bus.reader().unwrap()),
            bus.clone(),
            RenderOptions::default(),
            IngestConfig {
                yield_interval: Duration::from_millis(1),
            },
        );
        for id in 0..10 {
            bus.inject(RawFrame::new(0x100 + id, vec![]));
        }

        monitor.start().await;
        wait_for_rows(&monitor, 2).await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while monitor.dropped_frames() < 8 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(monitor.dropped_frames(), 8);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(monitor.log().identifiers(), vec![0x100, 0x101]);
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let (bus, monitor) = monitor(FrameFormat::Standard);
        monitor.start().await;
        assert!(monitor.pause().await);
        assert_eq!(monitor.worker_state(), WorkerState::Idle);

        bus.inject(RawFrame::new(0x42, vec![]));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(monitor.log().is_empty());

        assert!(monitor.resume().await.unwrap());
        wait_for_rows(&monitor, 1).await;
        assert_eq!(monitor.log().identifiers(), vec![0x42]);
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_bus_failure_is_reported_and_recoverable() {
        let (bus, monitor) = monitor(FrameFormat::Standard);
        let mut events = monitor.subscribe();
        monitor.start().await;
        bus.disconnect();

        let failed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(SessionEvent::IngestionFailed(e)) = events.recv().await {
                    break e;
                }
            }
        })
        .await
        .unwrap();
        assert!(failed.is_disconnect());
        assert_eq!(monitor.run_state(), RunState::Paused);

        assert!(monitor.resume().await.unwrap());
        bus.inject(RawFrame::new(0x55, vec![]));
        wait_for_rows(&monitor, 1).await;
        monitor.shutdown().await;
    }
}
