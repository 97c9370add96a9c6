//! File availability tracking for a live run.
//!
//! The [`FileTracker`] polls an [`IndexSource`] for published lumi-sections
//! and hands them out in strictly increasing lumi-section order. It also
//! reports the lifecycle of the run:
//!
//! ```text
//! Init ──initialize()──▶ Open ──end-of-run marker──▶ EndOfRun
//!   │                      │                            │
//!   └──────────────────────┴──── poll failure ─────────▶ Error
//! ```
//!
//! ## Invariants
//!
//! - Entries are delivered in strictly increasing lumi-section order
//! - An entry above the next expected lumi-section is held back until the
//!   missing ones are published, the gap timeout expires or the run ends
//! - No entry is delivered twice; an index arriving for a lumi-section that
//!   was already passed is dropped
//! - State only moves forward
//! - The source is scanned once more after the end-of-run marker is seen,
//!   then never again

mod entry;
mod index;
mod layout;

pub use entry::{EndOfRunEntry, LumiEntry};
pub use index::{DirectoryIndex, IndexSource, IndexUpdate, MemoryIndex};
pub use layout::{IndexFileKind, RunLayout};

use crate::error::{CoreError, CoreResult};
use crate::types::{LumiSection, RunNumber};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Default time a missing lumi-section is waited for.
pub const DEFAULT_GAP_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle of a run as seen by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// Created but not yet initialized.
    Init,
    /// More lumi-sections may appear.
    Open,
    /// The end-of-run marker was seen; only queued entries remain.
    EndOfRun,
    /// Discovery failed; nothing more will be delivered.
    Error,
}

impl TrackerState {
    const fn rank(self) -> u8 {
        match self {
            Self::Init => 0,
            Self::Open => 1,
            Self::EndOfRun => 2,
            Self::Error => 3,
        }
    }
}

impl fmt::Display for TrackerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("INIT"),
            Self::Open => f.write_str("OPEN"),
            Self::EndOfRun => f.write_str("EOR"),
            Self::Error => f.write_str("ERROR"),
        }
    }
}

/// Ordered queue of undelivered lumi-sections.
///
/// Only the entry for the next expected lumi-section is ready. Entries
/// behind a gap stay queued until the gap fills or is released.
#[derive(Debug)]
pub struct LumiQueue {
    pending: BTreeMap<LumiSection, LumiEntry>,
    next_expected: LumiSection,
    last_delivered: Option<LumiSection>,
}

impl Default for LumiQueue {
    fn default() -> Self {
        Self {
            pending: BTreeMap::new(),
            next_expected: LumiSection::new(1),
            last_delivered: None,
        }
    }
}

impl LumiQueue {
    /// Creates an empty queue expecting lumi-section 1 first.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry. Returns false if it was dropped.
    pub fn offer(&mut self, entry: LumiEntry) -> bool {
        if entry.lumi < self.next_expected {
            tracing::warn!(
                lumi = %entry.lumi,
                next_expected = %self.next_expected,
                "index arrived for a lumi-section already passed, dropping"
            );
            return false;
        }
        if self.pending.contains_key(&entry.lumi) {
            tracing::warn!(lumi = %entry.lumi, "duplicate index for lumi-section, dropping");
            return false;
        }
        self.pending.insert(entry.lumi, entry);
        true
    }

    /// Returns the first and last missing lumi-section before the lowest
    /// queued entry, if any are missing.
    #[must_use]
    pub fn gap(&self) -> Option<(LumiSection, LumiSection)> {
        let front = *self.pending.keys().next()?;
        (front > self.next_expected)
            .then(|| (self.next_expected, LumiSection::new(front.as_u32() - 1)))
    }

    /// Gives up on the current gap so the entry behind it becomes ready.
    /// Returns the released range.
    pub fn release_gap(&mut self) -> Option<(LumiSection, LumiSection)> {
        let gap = self.gap()?;
        self.next_expected = gap.1.next();
        Some(gap)
    }

    /// Returns the entry ready for delivery.
    #[must_use]
    pub fn front(&self) -> Option<&LumiEntry> {
        if self.gap().is_some() {
            return None;
        }
        self.pending.values().next()
    }

    /// Removes and returns the entry ready for delivery.
    pub fn pop(&mut self) -> Option<LumiEntry> {
        if self.gap().is_some() {
            return None;
        }
        let (lumi, entry) = self.pending.pop_first()?;
        self.last_delivered = Some(lumi);
        self.next_expected = lumi.next();
        Some(entry)
    }

    /// Returns the number of queued entries, ready or held back.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Returns the lowest lumi-section that can still be delivered.
    #[must_use]
    pub fn next_expected(&self) -> LumiSection {
        self.next_expected
    }

    /// Returns the last lumi-section popped.
    #[must_use]
    pub fn last_delivered(&self) -> Option<LumiSection> {
        self.last_delivered
    }
}

/// Tracks which lumi-sections of a run are available.
pub struct FileTracker<S: IndexSource = DirectoryIndex> {
    layout: RunLayout,
    source: S,
    state: TrackerState,
    queue: LumiQueue,
    end_of_run: Option<EndOfRunEntry>,
    delivered: u64,
    failure: Option<String>,
    totals_checked: bool,
    gap_timeout: Option<Duration>,
    /// First missing lumi-section and when waiting for it started.
    gap_since: Option<(LumiSection, Instant)>,
    lumis_given_up: u64,
}

impl FileTracker<DirectoryIndex> {
    /// Creates a tracker scanning `<input_dir>/run<NNNNNN>`.
    pub fn new(run: RunNumber, input_dir: impl Into<PathBuf>) -> Self {
        let layout = RunLayout::new(input_dir, run);
        Self::with_source(layout.clone(), DirectoryIndex::new(layout))
    }
}

impl<S: IndexSource> FileTracker<S> {
    /// Creates a tracker fed by a custom source.
    pub fn with_source(layout: RunLayout, source: S) -> Self {
        Self {
            layout,
            source,
            state: TrackerState::Init,
            queue: LumiQueue::new(),
            end_of_run: None,
            delivered: 0,
            failure: None,
            totals_checked: false,
            gap_timeout: Some(DEFAULT_GAP_TIMEOUT),
            gap_since: None,
            lumis_given_up: 0,
        }
    }

    /// Sets how long a missing lumi-section is waited for while later ones
    /// are queued. `None` waits until the end of run.
    #[must_use]
    pub fn with_gap_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.gap_timeout = timeout;
        self
    }

    /// Starts discovery.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the source cannot be established,
    /// or an invalid operation error if called twice.
    pub fn initialize(&mut self) -> CoreResult<()> {
        if self.state != TrackerState::Init {
            return Err(CoreError::invalid_operation(format!(
                "tracker already initialized (state {})",
                self.state
            )));
        }
        self.source.establish()?;
        self.transition(TrackerState::Open);
        tracing::info!(
            run = %self.layout.run(),
            path = %self.layout.run_path().display(),
            "tracking run directory"
        );
        self.refresh();
        Ok(())
    }

    /// Returns true if an entry is ready for delivery, polling the source
    /// first.
    pub fn has_next(&mut self) -> bool {
        self.refresh();
        self.settle_gap();
        self.queue.front().is_some()
    }

    /// Returns true if an entry is ready for delivery as of the last poll.
    #[must_use]
    pub fn has_ready(&self) -> bool {
        self.queue.front().is_some()
    }

    /// Returns the entry ready for delivery without removing it.
    #[must_use]
    pub fn front(&self) -> Option<&LumiEntry> {
        self.queue.front()
    }

    /// Removes the entry ready for delivery.
    pub fn pop(&mut self) -> Option<LumiEntry> {
        let entry = self.queue.pop()?;
        self.delivered += 1;
        self.source.forget_below(self.queue.next_expected());
        self.check_totals();
        Some(entry)
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Returns the reason of the error state.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Returns the end-of-run marker, once seen.
    #[must_use]
    pub fn end_of_run(&self) -> Option<&EndOfRunEntry> {
        self.end_of_run.as_ref()
    }

    /// Returns how many entries were popped.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Returns the number of entries waiting, including held-back ones.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Returns how many lumi-sections were given up on after a gap release.
    #[must_use]
    pub fn lumis_given_up(&self) -> u64 {
        self.lumis_given_up
    }

    /// Returns the run layout.
    #[must_use]
    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Returns the run directory.
    #[must_use]
    pub fn run_path(&self) -> PathBuf {
        self.layout.run_path()
    }

    /// Returns the path of an entry's data file. No I/O is performed.
    #[must_use]
    pub fn make_path_data(&self, entry: &LumiEntry) -> PathBuf {
        self.layout.file_path(&entry.data_file)
    }

    /// Returns true if `path` lies in the tracked run directory.
    #[must_use]
    pub fn owns_path(&self, path: &Path) -> bool {
        path.parent() == Some(self.layout.run_path().as_path())
    }

    fn refresh(&mut self) {
        if self.state != TrackerState::Open {
            return;
        }
        let update = match self.source.poll() {
            Ok(update) => update,
            Err(e) => return self.fail(&e),
        };
        self.enqueue(update.lumis);
        let Some(eor) = update.end_of_run else {
            return;
        };

        // The marker is published after every lumi index, so a second scan
        // sees any index the first one passed over.
        match self.source.poll() {
            Ok(last) => self.enqueue(last.lumis),
            Err(e) => return self.fail(&e),
        }
        tracing::info!(
            run = %self.layout.run(),
            events = ?eor.events,
            lumi_sections = ?eor.lumi_sections,
            queued = self.queue.len(),
            "end-of-run marker found"
        );
        self.end_of_run = Some(eor);
        self.transition(TrackerState::EndOfRun);
        self.check_totals();
    }

    fn enqueue(&mut self, lumis: Vec<LumiEntry>) {
        for entry in lumis {
            if entry.run != self.layout.run() {
                tracing::warn!(
                    expected = %self.layout.run(),
                    found = %entry.run,
                    "index of another run, ignoring"
                );
                continue;
            }
            self.queue.offer(entry);
        }
    }

    fn fail(&mut self, error: &CoreError) {
        tracing::error!(error = %error, "lumi-section discovery failed");
        self.failure = Some(error.to_string());
        self.transition(TrackerState::Error);
    }

    /// Releases the gap in front of the queue once the run ended or the
    /// gap timeout expired.
    fn settle_gap(&mut self) {
        let Some((first, last)) = self.queue.gap() else {
            self.gap_since = None;
            return;
        };
        let release = match self.state {
            TrackerState::EndOfRun => true,
            TrackerState::Error => false,
            TrackerState::Init | TrackerState::Open => {
                let since = match self.gap_since {
                    Some((lumi, since)) if lumi == first => since,
                    _ => {
                        tracing::debug!(first = %first, last = %last, "waiting for missing lumi-sections");
                        let now = Instant::now();
                        self.gap_since = Some((first, now));
                        now
                    }
                };
                self.gap_timeout
                    .is_some_and(|timeout| since.elapsed() >= timeout)
            }
        };
        if !release {
            return;
        }

        self.queue.release_gap();
        self.gap_since = None;
        self.lumis_given_up += u64::from(last.as_u32() - first.as_u32()) + 1;
        self.source.forget_below(self.queue.next_expected());
        tracing::warn!(
            first = %first,
            last = %last,
            state = %self.state,
            "lumi-sections never published, continuing without them"
        );
    }

    fn transition(&mut self, next: TrackerState) {
        if next.rank() <= self.state.rank() {
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "tracker state change");
        self.state = next;
    }

    /// Compares delivered lumi-sections with the marker once everything
    /// queued was handed out.
    fn check_totals(&mut self) {
        if self.totals_checked || self.state != TrackerState::EndOfRun || !self.queue.is_empty() {
            return;
        }
        self.totals_checked = true;
        if let Some(expected) = self.end_of_run.as_ref().and_then(|eor| eor.lumi_sections) {
            if expected != self.delivered {
                tracing::warn!(
                    expected,
                    delivered = self.delivered,
                    "end-of-run marker announces a different number of lumi-sections"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    fn entry(lumi: u32) -> LumiEntry {
        LumiEntry::new(RunNumber::new(1), LumiSection::new(lumi), format!("ls{lumi}.dat"))
    }

    fn memory_tracker() -> (MemoryIndex, FileTracker<MemoryIndex>) {
        let index = MemoryIndex::new();
        let tracker = FileTracker::with_source(RunLayout::new("/in", RunNumber::new(1)), index.clone());
        (index, tracker)
    }

    #[test]
    fn starts_in_init_and_opens() {
        let (_index, mut tracker) = memory_tracker();
        assert_eq!(tracker.state(), TrackerState::Init);
        tracker.initialize().unwrap();
        assert_eq!(tracker.state(), TrackerState::Open);
        assert!(!tracker.has_next());
        assert!(tracker.initialize().is_err());
    }

    #[test]
    fn initialize_fails_without_input_dir() {
        let temp = tempdir().unwrap();
        let mut tracker = FileTracker::new(RunNumber::new(1), temp.path().join("missing"));
        let err = tracker.initialize().unwrap_err();
        assert!(matches!(err, crate::CoreError::Configuration { .. }));
        assert_eq!(tracker.state(), TrackerState::Init);
    }

    #[test]
    fn front_and_pop_in_order() {
        let (index, mut tracker) = memory_tracker();
        tracker.initialize().unwrap();
        index.publish(entry(3));
        index.publish(entry(1));
        index.publish(entry(2));

        assert!(tracker.has_next());
        assert_eq!(tracker.front().unwrap().lumi, LumiSection::new(1));
        assert_eq!(tracker.front().unwrap().lumi, LumiSection::new(1));
        assert_eq!(tracker.pop().unwrap().lumi, LumiSection::new(1));
        assert_eq!(tracker.pop().unwrap().lumi, LumiSection::new(2));
        assert_eq!(tracker.pop().unwrap().lumi, LumiSection::new(3));
        assert!(!tracker.has_next());
        assert_eq!(tracker.delivered(), 3);
    }

    #[test]
    fn entries_behind_a_gap_wait_for_it() {
        let (index, mut tracker) = memory_tracker();
        tracker.initialize().unwrap();
        index.publish(entry(1));
        assert!(tracker.has_next());
        tracker.pop();

        index.publish(entry(3));
        assert!(!tracker.has_next());
        assert!(tracker.front().is_none());
        assert_eq!(tracker.queued(), 1);

        index.publish(entry(2));
        assert!(tracker.has_next());
        assert_eq!(tracker.pop().unwrap().lumi, LumiSection::new(2));
        assert_eq!(tracker.pop().unwrap().lumi, LumiSection::new(3));
        assert_eq!(tracker.lumis_given_up(), 0);
    }

    #[test]
    fn gap_released_after_timeout() {
        let (index, tracker) = memory_tracker();
        let mut tracker = tracker.with_gap_timeout(Some(Duration::ZERO));
        tracker.initialize().unwrap();
        index.publish(entry(1));
        assert!(tracker.has_next());
        tracker.pop();

        index.publish(entry(4));
        assert!(tracker.has_next());
        assert_eq!(tracker.pop().unwrap().lumi, LumiSection::new(4));
        assert_eq!(tracker.lumis_given_up(), 2);

        // Too late once the gap was given up on.
        index.publish(entry(2));
        index.publish(entry(4));
        assert!(!tracker.has_next());
        index.publish(entry(5));
        assert!(tracker.has_next());
        assert_eq!(tracker.front().unwrap().lumi, LumiSection::new(5));
    }

    #[test]
    fn gap_without_timeout_waits_for_end_of_run() {
        let (index, tracker) = memory_tracker();
        let mut tracker = tracker.with_gap_timeout(None);
        tracker.initialize().unwrap();
        index.publish(entry(2));
        index.publish(entry(4));
        assert!(!tracker.has_next());

        index.end_run(EndOfRunEntry::default());
        let mut delivered = Vec::new();
        while tracker.has_next() {
            delivered.push(tracker.pop().unwrap().lumi.as_u32());
        }
        assert_eq!(delivered, vec![2, 4]);
        assert_eq!(tracker.lumis_given_up(), 2);
        assert_eq!(tracker.state(), TrackerState::EndOfRun);
    }

    #[test]
    fn late_duplicates_are_dropped() {
        let (index, mut tracker) = memory_tracker();
        tracker.initialize().unwrap();
        index.publish(entry(1));
        assert!(tracker.has_next());
        tracker.pop();

        index.publish(entry(1));
        assert!(!tracker.has_next());
        assert_eq!(tracker.queued(), 0);
    }

    /// Reports the marker one poll before the last lumi-section, the way a
    /// directory scan can when an index is renamed in behind its cursor.
    struct ScriptedIndex {
        updates: VecDeque<IndexUpdate>,
        polls: usize,
    }

    impl IndexSource for ScriptedIndex {
        fn poll(&mut self) -> CoreResult<IndexUpdate> {
            self.polls += 1;
            Ok(self.updates.pop_front().unwrap_or_default())
        }
    }

    #[test]
    fn end_of_run_scan_is_confirmed() {
        let source = ScriptedIndex {
            updates: VecDeque::from([
                IndexUpdate {
                    lumis: vec![entry(1)],
                    end_of_run: None,
                },
                IndexUpdate {
                    lumis: Vec::new(),
                    end_of_run: Some(EndOfRunEntry::new(0, 2)),
                },
                IndexUpdate {
                    lumis: vec![entry(2)],
                    end_of_run: None,
                },
            ]),
            polls: 0,
        };
        let mut tracker = FileTracker::with_source(RunLayout::new("/in", RunNumber::new(1)), source)
            .with_gap_timeout(None);
        tracker.initialize().unwrap();

        let mut delivered = Vec::new();
        while tracker.has_next() {
            delivered.push(tracker.pop().unwrap().lumi.as_u32());
        }
        assert_eq!(delivered, vec![1, 2]);
        assert_eq!(tracker.state(), TrackerState::EndOfRun);
        assert_eq!(tracker.source.polls, 3);
    }

    #[test]
    fn other_runs_are_ignored() {
        let (index, mut tracker) = memory_tracker();
        tracker.initialize().unwrap();
        index.publish(LumiEntry::new(RunNumber::new(2), LumiSection::new(1), "x.dat"));
        assert!(!tracker.has_next());
    }

    #[test]
    fn end_of_run_keeps_queue_and_stops_polling() {
        let (index, mut tracker) = memory_tracker();
        tracker.initialize().unwrap();
        index.publish(entry(1));
        index.end_run(EndOfRunEntry::new(10, 1));

        assert!(tracker.has_next());
        assert_eq!(tracker.state(), TrackerState::EndOfRun);
        let polls = index.polls();

        index.publish(entry(2));
        assert!(tracker.has_next());
        assert_eq!(index.polls(), polls);
        tracker.pop();
        assert!(!tracker.has_next());
        assert_eq!(tracker.state(), TrackerState::EndOfRun);
    }

    #[test]
    fn poll_failure_enters_error() {
        let (index, mut tracker) = memory_tracker();
        tracker.initialize().unwrap();
        index.publish(entry(1));
        assert!(tracker.has_next());

        index.fail("disk gone");
        assert!(tracker.has_next());
        assert_eq!(tracker.state(), TrackerState::Error);
        assert!(tracker.failure().unwrap().contains("disk gone"));

        index.end_run(EndOfRunEntry::default());
        tracker.has_next();
        assert_eq!(tracker.state(), TrackerState::Error);
    }

    #[test]
    fn make_path_data_is_pure() {
        let temp = tempdir().unwrap();
        let tracker = FileTracker::new(RunNumber::new(12), temp.path());
        let path = tracker.make_path_data(&entry(1));
        assert_eq!(path, temp.path().join("run000012").join("ls1.dat"));
        assert!(tracker.owns_path(&path));
        assert!(!path.exists());
    }

    #[test]
    fn directory_tracker_sees_published_lumis() {
        let temp = tempdir().unwrap();
        let layout = RunLayout::new(temp.path(), RunNumber::new(1));
        let mut tracker = FileTracker::new(RunNumber::new(1), temp.path());
        tracker.initialize().unwrap();
        assert!(!tracker.has_next());

        layout.publish_lumi(&entry(1), "streamDQM").unwrap();
        assert!(tracker.has_next());
        layout.publish_end_of_run(&EndOfRunEntry::new(0, 1)).unwrap();
        tracker.pop();
        assert!(!tracker.has_next());
        assert_eq!(tracker.state(), TrackerState::EndOfRun);
    }

    proptest! {
        #[test]
        fn every_offered_lumi_is_delivered_in_order(
            batches in prop::collection::vec(prop::collection::vec(1u32..40, 0..8), 1..10),
            pops_per_batch in 0usize..4,
        ) {
            let mut queue = LumiQueue::new();
            let mut offered = std::collections::BTreeSet::new();
            let mut delivered = Vec::new();
            for batch in batches {
                for lumi in batch {
                    queue.offer(entry(lumi));
                    offered.insert(lumi);
                }
                for _ in 0..pops_per_batch {
                    if let Some(e) = queue.pop() {
                        delivered.push(e.lumi.as_u32());
                    }
                }
            }
            loop {
                if let Some(e) = queue.pop() {
                    delivered.push(e.lumi.as_u32());
                } else if queue.release_gap().is_none() {
                    break;
                }
            }
            prop_assert_eq!(delivered, offered.into_iter().collect::<Vec<_>>());
        }
    }
}
