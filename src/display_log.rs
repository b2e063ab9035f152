// src/display_log.rs
//
// Append-only log of received frames with per-row visibility.
//
// Rows are rendered once, at ingestion, and never removed or reordered.
// Filtering only flips the `visible` flag. The log records which filter
// revision its flags reflect so a late or repeated change notification is
// harmless.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::filter::{FilterSet, FilterSnapshot};
use crate::io::{ReceivedFrame, MAX_DATA_LEN};

// ============================================================================
// Rendering
// ============================================================================

/// How identifiers and data bytes are printed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdFormat {
    #[default]
    Hex,
    Decimal,
}

/// Timezone used to print arrival times.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayTimezone {
    #[default]
    Local,
    Utc,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderOptions {
    pub id_format: IdFormat,
    pub timezone: DisplayTimezone,
}

/// Placeholder for data columns beyond the frame length.
pub const EMPTY_BYTE: &str = "--";

/// Column text for one row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedFrame {
    /// Arrival time at second resolution ("%H:%M:%S")
    pub timestamp: String,
    pub identifier: String,
    pub length: String,
    /// D0..D7, with `--` for absent bytes
    pub data: [String; MAX_DATA_LEN],
}

impl RenderedFrame {
    pub fn render(received: &ReceivedFrame, options: RenderOptions) -> Self {
        let timestamp = match DateTime::<Utc>::from_timestamp_micros(received.timestamp_us as i64) {
            Some(utc) => match options.timezone {
                DisplayTimezone::Utc => utc.format("%H:%M:%S").to_string(),
                DisplayTimezone::Local => utc.with_timezone(&Local).format("%H:%M:%S").to_string(),
            },
            None => "--:--:--".to_string(),
        };

        let frame = &received.frame;
        let identifier = match options.id_format {
            IdFormat::Hex => format!("0x{:03X}", frame.identifier()),
            IdFormat::Decimal => frame.identifier().to_string(),
        };

        let bytes = frame.bytes();
        let data = std::array::from_fn(|i| match bytes.get(i) {
            Some(b) => match options.id_format {
                IdFormat::Hex => format!("{:02X}", b),
                IdFormat::Decimal => b.to_string(),
            },
            None => EMPTY_BYTE.to_string(),
        });

        Self {
            timestamp,
            identifier,
            length: frame.len().to_string(),
            data,
        }
    }
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayRow {
    pub frame: ReceivedFrame,
    pub rendered: RenderedFrame,
    pub visible: bool,
}

impl DisplayRow {
    pub fn new(frame: ReceivedFrame, visible: bool, options: RenderOptions) -> Self {
        let rendered = RenderedFrame::render(&frame, options);
        Self {
            frame,
            rendered,
            visible,
        }
    }

    pub fn identifier(&self) -> u32 {
        self.frame.identifier()
    }
}

// ============================================================================
// Log
// ============================================================================

#[derive(Default)]
struct LogInner {
    rows: Vec<DisplayRow>,
    /// Filter revision the visibility flags reflect
    applied_revision: u64,
}

impl LogInner {
    fn apply(&mut self, snapshot: &FilterSnapshot) -> usize {
        let mut changed = 0;
        for row in &mut self.rows {
            let visible = snapshot.admits(row.identifier());
            if row.visible != visible {
                row.visible = visible;
                changed += 1;
            }
        }
        self.applied_revision = snapshot.revision();
        changed
    }
}

/// Shared handle to the display log. Cloning shares the same rows.
#[derive(Clone)]
pub struct DisplayLog {
    inner: Arc<RwLock<LogInner>>,
    options: RenderOptions,
    /// Row count, published after every append
    count: Arc<watch::Sender<usize>>,
}

impl DisplayLog {
    pub fn new(options: RenderOptions) -> Self {
        let (count, _rx) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(LogInner::default())),
            options,
            count: Arc::new(count),
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        self.options
    }

    fn read(&self) -> RwLockReadGuard<'_, LogInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LogInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Block appends for as long as the returned guard lives.
    #[cfg(test)]
    pub(crate) fn hold(&self) -> impl Sized + '_ {
        self.read()
    }

    /// Append a row as-is.
    pub fn append(&self, row: DisplayRow) {
        let len = {
            let mut inner = self.write();
            inner.rows.push(row);
            inner.rows.len()
        };
        self.count.send_replace(len);
    }

    /// Classify `frame` against the current filter and append it.
    ///
    /// The snapshot is taken under the log's write lock, and any filter change
    /// the log has not applied yet is applied first, so every flag in the log
    /// reflects the same revision afterwards. Returns the new row's visibility.
    pub fn append_classified(&self, frame: ReceivedFrame, filter: &FilterSet) -> bool {
        let (visible, len) = {
            let mut inner = self.write();
            let snapshot = filter.snapshot();
            if snapshot.revision() > inner.applied_revision {
                inner.apply(&snapshot);
            }
            let visible = snapshot.admits(frame.identifier());
            inner.rows.push(DisplayRow::new(frame, visible, self.options));
            (visible, inner.rows.len())
        };
        self.count.send_replace(len);
        visible
    }

    /// Reapply the visibility rule to every row.
    /// Returns how many rows changed visibility.
    pub fn recompute_visibility(&self, snapshot: &FilterSnapshot) -> usize {
        self.write().apply(snapshot)
    }

    /// Like `recompute_visibility`, but ignores snapshots that are not newer
    /// than the one already applied.
    pub fn sync_to(&self, snapshot: &FilterSnapshot) -> usize {
        let mut inner = self.write();
        if snapshot.revision() <= inner.applied_revision {
            return 0;
        }
        inner.apply(snapshot)
    }

    /// Follow filter changes until the filter is dropped or the task is aborted.
    pub fn track(&self, mut filter_rx: watch::Receiver<FilterSnapshot>) -> JoinHandle<()> {
        let log = self.clone();
        tokio::spawn(async move {
            while filter_rx.changed().await.is_ok() {
                let snapshot = filter_rx.borrow_and_update().clone();
                let changed = log.sync_to(&snapshot);
                if changed > 0 {
                    tlog!(
                        "[monitor] Filter revision {} changed visibility of {} rows",
                        snapshot.revision(),
                        changed
                    );
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().rows.is_empty()
    }

    pub fn visible_count(&self) -> usize {
        self.read().rows.iter().filter(|r| r.visible).count()
    }

    pub fn rows(&self) -> Vec<DisplayRow> {
        self.read().rows.clone()
    }

    /// The newest `limit` visible rows, oldest first.
    pub fn tail_visible(&self, limit: usize) -> Vec<DisplayRow> {
        let inner = self.read();
        let mut tail: Vec<DisplayRow> = inner
            .rows
            .iter()
            .rev()
            .filter(|r| r.visible)
            .take(limit)
            .cloned()
            .collect();
        tail.reverse();
        tail
    }

    pub fn visibility(&self) -> Vec<bool> {
        self.read().rows.iter().map(|r| r.visible).collect()
    }

    pub fn identifiers(&self) -> Vec<u32> {
        self.read().rows.iter().map(|r| r.identifier()).collect()
    }

    pub fn applied_revision(&self) -> u64 {
        self.read().applied_revision
    }

    /// Receiver notified with the row count after each append.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Frame;
    use std::time::Duration;

    fn received(id: u32, bytes: Vec<u8>) -> ReceivedFrame {
        ReceivedFrame::at(Frame::new(id, bytes).unwrap(), 3_661_000_000)
    }

    fn utc_hex() -> RenderOptions {
        RenderOptions {
            id_format: IdFormat::Hex,
            timezone: DisplayTimezone::Utc,
        }
    }

    #[test]
    fn test_render_pads_missing_bytes() {
        let rendered = RenderedFrame::render(&received(0x1A, vec![1, 0xFF]), utc_hex());
        assert_eq!(rendered.timestamp, "01:01:01");
        assert_eq!(rendered.identifier, "0x01A");
        assert_eq!(rendered.length, "2");
        assert_eq!(rendered.data[0], "01");
        assert_eq!(rendered.data[1], "FF");
        assert!(rendered.data[2..].iter().all(|d| d == EMPTY_BYTE));
    }

    #[test]
    fn test_render_decimal() {
        let options = RenderOptions {
            id_format: IdFormat::Decimal,
            timezone: DisplayTimezone::Utc,
        };
        let rendered = RenderedFrame::render(&received(0x100, vec![255]), options);
        assert_eq!(rendered.identifier, "256");
        assert_eq!(rendered.data[0], "255");
    }

    #[test]
    fn test_recompute_visibility() {
        let log = DisplayLog::new(utc_hex());
        for id in [1, 2, 3] {
            log.append(DisplayRow::new(received(id, vec![]), true, utc_hex()));
        }

        let filter = FilterSet::new();
        filter.add(2);
        assert_eq!(log.recompute_visibility(&filter.snapshot()), 2);
        assert_eq!(log.visibility(), vec![false, true, false]);

        // Idempotent
        assert_eq!(log.recompute_visibility(&filter.snapshot()), 0);
        assert_eq!(log.visibility(), vec![false, true, false]);

        filter.clear_all();
        assert_eq!(log.recompute_visibility(&filter.snapshot()), 2);
        assert_eq!(log.visibility(), vec![true, true, true]);
        assert_eq!(log.identifiers(), vec![1, 2, 3]);
    }

    #[test]
    fn test_append_classified_applies_pending_change() {
        let log = DisplayLog::new(utc_hex());
        let filter = FilterSet::new();
        assert!(log.append_classified(received(0x100, vec![]), &filter));

        filter.add(0x200);
        assert!(!log.append_classified(received(0x100, vec![]), &filter));
        assert!(log.append_classified(received(0x200, vec![]), &filter));
        assert_eq!(log.visibility(), vec![false, false, true]);
        assert_eq!(log.applied_revision(), filter.snapshot().revision());
    }

    #[test]
    fn test_sync_to_ignores_stale_snapshot() {
        let log = DisplayLog::new(utc_hex());
        let filter = FilterSet::new();
        log.append_classified(received(1, vec![]), &filter);

        let empty = filter.snapshot();
        filter.add(2);
        assert_eq!(log.sync_to(&filter.snapshot()), 1);
        assert_eq!(log.sync_to(&empty), 0);
        assert_eq!(log.visibility(), vec![false]);
    }

    #[test]
    fn test_tail_visible() {
        let log = DisplayLog::new(utc_hex());
        let filter = FilterSet::new();
        filter.add(1);
        for id in [1, 2, 1, 2, 1] {
            log.append_classified(received(id, vec![id as u8]), &filter);
        }
        let tail = log.tail_visible(2);
        assert_eq!(tail.len(), 2);
        assert!(tail.iter().all(|r| r.identifier() == 1));
        assert_eq!(log.visible_count(), 3);
        assert_eq!(log.tail_visible(usize::MAX).len(), 3);
    }

    #[tokio::test]
    async fn test_track_follows_filter() {
        let log = DisplayLog::new(utc_hex());
        let filter = FilterSet::new();
        for id in [1, 2, 3] {
            log.append_classified(received(id, vec![]), &filter);
        }
        let tracker = log.track(filter.subscribe());

        filter.add(2);
        let expected = filter.snapshot().revision();
        tokio::time::timeout(Duration::from_secs(1), async {
            while log.applied_revision() < expected {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(log.visibility(), vec![false, true, false]);
        tracker.abort();
    }
}
