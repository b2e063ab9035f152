// src/filter.rs
//
// Operator-controlled identifier filter.
//
// The current state lives in a `watch` channel as an immutable snapshot that
// is swapped atomically on every change, so readers never see a half-applied
// mutation and the display log can subscribe to changes.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

/// One identifier in the operator's filter list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterEntry {
    pub id: u32,
    /// Text as the operator typed it
    pub label: String,
    /// Disabled entries stay listed but do not filter.
    pub enabled: bool,
}

/// Result of a filter mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterChange {
    Changed,
    NoOp,
}

/// Immutable view of the filter at one revision.
#[derive(Clone, Debug, Default)]
pub struct FilterSnapshot {
    entries: Arc<Vec<FilterEntry>>,
    active: Arc<HashSet<u32>>,
    revision: u64,
}

impl FilterSnapshot {
    /// True when no identifier is active, meaning every frame is shown.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.active.contains(&id)
    }

    /// Visibility rule applied at ingestion and on recompute.
    pub fn admits(&self, id: u32) -> bool {
        self.is_empty() || self.contains(id)
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[FilterEntry] {
        &self.entries
    }

    pub fn active_ids(&self) -> &HashSet<u32> {
        &self.active
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// Shared handle to the operator's filter. Cloning shares the same state.
#[derive(Clone)]
pub struct FilterSet {
    state: Arc<watch::Sender<FilterSnapshot>>,
}

impl Default for FilterSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterSet {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(FilterSnapshot::default());
        Self {
            state: Arc::new(tx),
        }
    }

    /// Add an identifier, labelled in hex. Adding an existing identifier is a no-op.
    pub fn add(&self, id: u32) -> FilterChange {
        self.add_labelled(id, format!("0x{:03X}", id))
    }

    /// Add an identifier with the label the operator typed.
    pub fn add_labelled(&self, id: u32, label: impl Into<String>) -> FilterChange {
        let label = label.into();
        self.mutate(|entries| {
            if entries.iter().any(|e| e.id == id) {
                return false;
            }
            entries.push(FilterEntry {
                id,
                label,
                enabled: true,
            });
            true
        })
    }

    /// Enable or disable an entry without forgetting it.
    pub fn set_enabled(&self, id: u32, enabled: bool) -> FilterChange {
        self.mutate(|entries| match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) if entry.enabled != enabled => {
                entry.enabled = enabled;
                true
            }
            _ => false,
        })
    }

    /// Forget every entry.
    pub fn clear_all(&self) -> FilterChange {
        self.mutate(|entries| {
            if entries.is_empty() {
                return false;
            }
            entries.clear();
            true
        })
    }

    pub fn snapshot(&self) -> FilterSnapshot {
        self.state.borrow().clone()
    }

    /// Receiver that is notified with each new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<FilterSnapshot> {
        self.state.subscribe()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.state.borrow().contains(id)
    }

    pub fn entries(&self) -> Vec<FilterEntry> {
        self.state.borrow().entries().to_vec()
    }

    /// Apply `f` to a copy of the entry list and publish the result as the
    /// next revision when `f` reports a change.
    fn mutate(&self, f: impl FnOnce(&mut Vec<FilterEntry>) -> bool) -> FilterChange {
        let changed = self.state.send_if_modified(|snapshot| {
            let mut entries = snapshot.entries.as_ref().clone();
            if !f(&mut entries) {
                return false;
            }
            let active: HashSet<u32> = entries.iter().filter(|e| e.enabled).map(|e| e.id).collect();
            *snapshot = FilterSnapshot {
                entries: Arc::new(entries),
                active: Arc::new(active),
                revision: snapshot.revision + 1,
            };
            true
        });
        if changed {
            FilterChange::Changed
        } else {
            FilterChange::NoOp
        }
    }
}
