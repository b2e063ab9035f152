// src/io/notifier.rs
//
// Notification fan-out between a blocking driver and async consumers.
//
// A `Notifier` owns a reader thread that pulls frames from a `FrameReader`
// and dispatches each one to every registered listener queue. A
// `BufferedReader` wraps one listener queue as a cancel-safe `BusSource`.
// A transport failure is delivered to every listener and closes the fan-out
// until a new subscription reopens it.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{BusSource, IoError, RawFrame};

/// What a listener queue carries.
pub type FrameResult = Result<RawFrame, IoError>;

// ============================================================================
// Fan-out
// ============================================================================

/// Set of bounded per-listener queues fed by one driver.
pub struct Fanout {
    device: String,
    capacity: usize,
    listeners: Mutex<Vec<mpsc::Sender<FrameResult>>>,
    closed: AtomicBool,
    dropped: AtomicU64,
    /// Set while frames are being dropped, cleared by the next delivery.
    overflowing: AtomicBool,
}

impl Fanout {
    pub fn new(device: &str, capacity: usize) -> Self {
        Self {
            device: device.to_string(),
            capacity: capacity.max(1),
            listeners: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            overflowing: AtomicBool::new(false),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Add a listener queue.
    pub fn register(&self) -> mpsc::Receiver<FrameResult> {
        let (tx, rx) = mpsc::channel(self.capacity);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(tx);
        }
        rx
    }

    /// Deliver a frame to every listener.
    /// Full queues drop the frame (counted); closed queues are removed.
    pub fn dispatch(&self, frame: RawFrame) {
        let Ok(mut listeners) = self.listeners.lock() else {
            return;
        };
        listeners.retain(|tx| match tx.try_send(Ok(frame.clone())) {
            Ok(()) => {
                if self.overflowing.swap(false, Ordering::Relaxed) {
                    tlog!(
                        "[notifier] {} queue drained, {} frames dropped so far",
                        self.device,
                        self.dropped()
                    );
                }
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.overflowing.swap(true, Ordering::Relaxed) {
                    tlog!(
                        "[notifier] {} listener queue full ({} frames), dropping",
                        self.device,
                        self.capacity
                    );
                }
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// Deliver `error` to every listener and close the fan-out.
    pub fn fail(&self, error: IoError) {
        self.closed.store(true, Ordering::SeqCst);
        let listeners = match self.listeners.lock() {
            Ok(mut listeners) => std::mem::take(&mut *listeners),
            Err(_) => return,
        };
        for tx in listeners {
            // A full queue still ends with the sender dropped, which the
            // reader reports as a disconnect.
            let _ = tx.try_send(Err(error.clone()));
        }
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Frames dropped because a listener queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

// ============================================================================
// Notifier (blocking reader thread)
// ============================================================================

/// Blocking frame reader driven by a `Notifier` thread.
pub trait FrameReader: Send + 'static {
    /// Read one frame. `Ok(None)` means the read timed out with nothing to
    /// deliver; the thread uses it to poll its stop flag.
    fn read_frame(&mut self) -> Result<Option<RawFrame>, IoError>;
}

/// Reader thread pumping a `FrameReader` into a `Fanout`.
pub struct Notifier {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Notifier {
    pub fn spawn<R: FrameReader>(mut reader: R, fanout: Arc<Fanout>) -> Result<Self, IoError> {
        let device = fanout.device().to_string();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop = stop_flag.clone();
        let thread_device = device.clone();

        let handle = std::thread::Builder::new()
            .name(format!("notifier-{}", device))
            .spawn(move || {
                tlog!("[notifier] {} reader started", thread_device);
                while !stop.load(Ordering::Relaxed) {
                    match reader.read_frame() {
                        Ok(Some(frame)) => fanout.dispatch(frame),
                        Ok(None) => {}
                        Err(e) => {
                            tlog!("[notifier] {} read failed: {}", thread_device, e);
                            fanout.fail(e);
                            return;
                        }
                    }
                }
                tlog!("[notifier] {} reader stopped", thread_device);
            })
            .map_err(|e| IoError::connection(&device, format!("spawn reader thread: {}", e)))?;

        Ok(Self {
            stop_flag,
            handle: Some(handle),
        })
    }

    /// Make sure `slot` holds a reader thread feeding a live `fanout`.
    ///
    /// A thread that has failed the fan-out may still be winding down, so a
    /// closed fan-out always gets a fresh reader from `open`. Returns true when
    /// a new thread was started.
    pub fn ensure_running<R, F>(
        slot: &mut Option<Notifier>,
        fanout: &Arc<Fanout>,
        open: F,
    ) -> Result<bool, IoError>
    where
        R: FrameReader,
        F: FnOnce() -> Result<R, IoError>,
    {
        let healthy = slot.as_ref().is_some_and(|n| n.is_running());
        if healthy && !fanout.is_closed() {
            return Ok(false);
        }
        if let Some(mut old) = slot.take() {
            old.stop();
        }
        let reader = open()?;
        fanout.reopen();
        *slot = Some(Notifier::spawn(reader, fanout.clone())?);
        Ok(true)
    }

    /// True while the reader thread has not exited.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the reader thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Buffered Reader
// ============================================================================

/// Something a `BufferedReader` can (re)subscribe to.
pub trait Subscribe: Send + Sync {
    /// Register a new listener queue, reopening the link if it had failed.
    fn subscribe(&self) -> Result<mpsc::Receiver<FrameResult>, IoError>;

    /// Frames dropped on full listener queues since the link was created.
    fn dropped(&self) -> u64;
}

/// Async frame source backed by one fan-out listener queue.
pub struct BufferedReader {
    link: Arc<dyn Subscribe>,
    rx: Option<mpsc::Receiver<FrameResult>>,
    device: String,
}

impl BufferedReader {
    pub fn new(link: Arc<dyn Subscribe>, device: &str) -> Result<Self, IoError> {
        let rx = link.subscribe()?;
        Ok(Self {
            link,
            rx: Some(rx),
            device: device.to_string(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.rx.is_some()
    }
}

#[async_trait]
impl BusSource for BufferedReader {
    async fn next_frame(&mut self) -> Result<RawFrame, IoError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(IoError::disconnected(&self.device));
        };
        // mpsc::Receiver::recv is cancel-safe
        let next = rx.recv().await;
        match next {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => {
                self.rx = None;
                Err(e)
            }
            None => {
                self.rx = None;
                Err(IoError::disconnected(&self.device))
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), IoError> {
        if self.rx.is_some() {
            return Ok(());
        }
        self.rx = Some(self.link.subscribe()?);
        tlog!("[notifier] {} resubscribed", self.device);
        Ok(())
    }

    fn device(&self) -> &str {
        &self.device
    }

    fn dropped(&self) -> u64 {
        self.link.dropped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedReader {
        script: VecDeque<Result<Option<RawFrame>, IoError>>,
    }

    impl FrameReader for ScriptedReader {
        fn read_frame(&mut self) -> Result<Option<RawFrame>, IoError> {
            match self.script.pop_front() {
                Some(step) => step,
                None => {
                    std::thread::sleep(Duration::from_millis(5));
                    Ok(None)
                }
            }
        }
    }

    struct FanoutLink(Arc<Fanout>);

    impl Subscribe for FanoutLink {
        fn subscribe(&self) -> Result<mpsc::Receiver<FrameResult>, IoError> {
            self.0.reopen();
            Ok(self.0.register())
        }

        fn dropped(&self) -> u64 {
            self.0.dropped()
        }
    }

    #[test]
    fn test_dispatch_drops_when_full() {
        let fanout = Fanout::new("test", 2);
        let mut rx = fanout.register();
        for id in 0..3 {
            fanout.dispatch(RawFrame::new(id, vec![]));
        }
        assert_eq!(fanout.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap().unwrap().frame_id, 0);
        assert_eq!(rx.try_recv().unwrap().unwrap().frame_id, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_listeners_are_pruned() {
        let fanout = Fanout::new("test", 4);
        let rx = fanout.register();
        let _keep = fanout.register();
        drop(rx);
        fanout.dispatch(RawFrame::new(1, vec![]));
        assert_eq!(fanout.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_notifier_pumps_frames_then_fails() {
        let fanout = Arc::new(Fanout::new("scripted", 16));
        let link: Arc<dyn Subscribe> = Arc::new(FanoutLink(fanout.clone()));
        let mut reader = BufferedReader::new(link, "scripted").unwrap();

        let script = VecDeque::from(vec![
            Ok(Some(RawFrame::new(0x10, vec![1]))),
            Ok(None),
            Ok(Some(RawFrame::new(0x20, vec![2]))),
            Err(IoError::disconnected("scripted")),
        ]);
        let mut notifier = Notifier::spawn(ScriptedReader { script }, fanout.clone()).unwrap();

        let timeout = Duration::from_secs(2);
        let first = tokio::time::timeout(timeout, reader.next_frame()).await.unwrap();
        assert_eq!(first.unwrap().frame_id, 0x10);
        let second = tokio::time::timeout(timeout, reader.next_frame()).await.unwrap();
        assert_eq!(second.unwrap().frame_id, 0x20);
        let third = tokio::time::timeout(timeout, reader.next_frame()).await.unwrap();
        assert_eq!(third.unwrap_err(), IoError::disconnected("scripted"));

        assert!(fanout.is_closed());
        assert!(!reader.is_connected());
        notifier.stop();
        assert!(!notifier.is_running());

        reader.reconnect().await.unwrap();
        assert!(reader.is_connected());
        assert!(!fanout.is_closed());
    }

    #[tokio::test]
    async fn test_ensure_running_replaces_reader_of_failed_fanout() {
        let fanout = Arc::new(Fanout::new("restart", 8));
        let mut slot = None;
        let idle = || {
            Ok(ScriptedReader {
                script: VecDeque::new(),
            })
        };
        assert!(Notifier::ensure_running(&mut slot, &fanout, idle).unwrap());
        assert!(!Notifier::ensure_running(&mut slot, &fanout, idle).unwrap());

        // Failed but the old thread has not exited yet
        fanout.fail(IoError::disconnected("restart"));
        assert!(slot.as_ref().is_some_and(|n| n.is_running()));

        // Registered while closed, as a resubscribe does before restarting
        let mut rx = fanout.register();
        let restarted = Notifier::ensure_running(&mut slot, &fanout, || {
            Ok(ScriptedReader {
                script: VecDeque::from(vec![Ok(Some(RawFrame::new(0x33, vec![])))]),
            })
        })
        .unwrap();
        assert!(restarted);
        assert!(!fanout.is_closed());

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame.frame_id, 0x33);
    }

    #[test]
    fn test_drop_count_survives_drain() {
        let fanout = Fanout::new("test", 1);
        let mut rx = fanout.register();
        fanout.dispatch(RawFrame::new(1, vec![]));
        fanout.dispatch(RawFrame::new(2, vec![]));
        fanout.dispatch(RawFrame::new(3, vec![]));
        assert_eq!(fanout.dropped(), 2);

        assert_eq!(rx.try_recv().unwrap().unwrap().frame_id, 1);
        fanout.dispatch(RawFrame::new(4, vec![]));
        assert_eq!(rx.try_recv().unwrap().unwrap().frame_id, 4);
        assert_eq!(fanout.dropped(), 2);
    }

    #[tokio::test]
    async fn test_next_frame_is_cancel_safe() {
        let fanout = Arc::new(Fanout::new("test", 8));
        let link: Arc<dyn Subscribe> = Arc::new(FanoutLink(fanout.clone()));
        let mut reader = BufferedReader::new(link, "test").unwrap();

        // Abandon a pending receive, then deliver.
        let pending = tokio::time::timeout(Duration::from_millis(20), reader.next_frame()).await;
        assert!(pending.is_err());
        fanout.dispatch(RawFrame::new(0x42, vec![]));

        let frame = tokio::time::timeout(Duration::from_secs(1), reader.next_frame())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.frame_id, 0x42);
    }
}
