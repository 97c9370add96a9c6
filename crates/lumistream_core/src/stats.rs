//! Reader statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut reader = StreamerReader::open(config, registry)?;
//! while reader.check_next_event(&mut sink)? {}
//!
//! let stats = reader.stats().snapshot();
//! println!("files opened: {}", stats.files_opened);
//! println!("events delivered: {}", stats.events_delivered);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by a reader.
///
/// All counters are atomic so a monitoring thread holding an `Arc` can read
/// them while the reader runs. Values only increase.
#[derive(Debug, Default)]
pub struct ReaderStats {
    /// Data files opened successfully.
    files_opened: AtomicU64,
    /// Entries whose data file was absent.
    files_missing: AtomicU64,
    /// Data files removed after their header was read.
    files_deleted: AtomicU64,
    /// Events handed to the deserializer.
    events_delivered: AtomicU64,
    /// Events rejected by the event filter.
    events_filtered: AtomicU64,
    /// Events passed over by `skip`.
    events_skipped: AtomicU64,
    /// Headers merged into the registry, including mid-file updates.
    header_merges: AtomicU64,
    /// Bounded waits for new files.
    waits: AtomicU64,
}

impl ReaderStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_file_opened(&self) {
        self.files_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_file_missing(&self) {
        self.files_missing.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_file_deleted(&self) {
        self.files_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event_filtered(&self) {
        self.events_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event_skipped(&self) {
        self.events_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_header_merge(&self) {
        self.header_merges.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of data files opened.
    pub fn files_opened(&self) -> u64 {
        self.files_opened.load(Ordering::Relaxed)
    }

    /// Returns the number of entries skipped because their data file was absent.
    pub fn files_missing(&self) -> u64 {
        self.files_missing.load(Ordering::Relaxed)
    }

    /// Returns the number of data files deleted.
    pub fn files_deleted(&self) -> u64 {
        self.files_deleted.load(Ordering::Relaxed)
    }

    /// Returns the number of events delivered.
    pub fn events_delivered(&self) -> u64 {
        self.events_delivered.load(Ordering::Relaxed)
    }

    /// Returns the number of events rejected by the filter.
    pub fn events_filtered(&self) -> u64 {
        self.events_filtered.load(Ordering::Relaxed)
    }

    /// Returns the number of events skipped.
    pub fn events_skipped(&self) -> u64 {
        self.events_skipped.load(Ordering::Relaxed)
    }

    /// Returns the number of header merges.
    pub fn header_merges(&self) -> u64 {
        self.header_merges.load(Ordering::Relaxed)
    }

    /// Returns the number of waits.
    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files_opened: self.files_opened(),
            files_missing: self.files_missing(),
            files_deleted: self.files_deleted(),
            events_delivered: self.events_delivered(),
            events_filtered: self.events_filtered(),
            events_skipped: self.events_skipped(),
            header_merges: self.header_merges(),
            waits: self.waits(),
        }
    }
}

/// A point-in-time copy of [`ReaderStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Data files opened.
    pub files_opened: u64,
    /// Entries with an absent data file.
    pub files_missing: u64,
    /// Data files deleted.
    pub files_deleted: u64,
    /// Events delivered.
    pub events_delivered: u64,
    /// Events rejected by the filter.
    pub events_filtered: u64,
    /// Events skipped.
    pub events_skipped: u64,
    /// Header merges.
    pub header_merges: u64,
    /// Waits for new files.
    pub waits: u64,
}
