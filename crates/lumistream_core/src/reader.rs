//! The streaming reader.
//!
//! [`StreamerReader`] pulls lumi-sections from a [`FileTracker`], opens
//! their data files one at a time and hands the contained events to the
//! consumer while the producer keeps publishing new files.
//!
//! ## Lifecycle
//!
//! ```text
//! open() ──▶ wait for first readable file ──▶ merge header ──▶ return
//!                                                            │
//! check_next_event() / skip()  ◀─────────────────────────────┘
//!      │
//!      ├─ file exhausted ──────▶ close, take next lumi-section
//!      ├─ enough events read ──▶ switch to a newer lumi-section
//!      ├─ nothing available ───▶ sleep `poll_interval`, poll again
//!      └─ end of run ──────────▶ END (Drained)
//! ```
//!
//! Only one data file is open at any time.

use crate::config::ReaderConfig;
use crate::error::{CoreError, CoreResult};
use crate::filter::EventFilter;
use crate::registry::SharedRegistry;
use crate::stats::ReaderStats;
use crate::streamer::{EventRecord, StreamerFile};
use crate::tracker::{DirectoryIndex, FileTracker, IndexSource, RunLayout, TrackerState};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Where the reader stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderPhase {
    /// No data file is open.
    NoFileOpen,
    /// A data file is open and being read.
    FileOpen,
    /// END was returned; the reader produces nothing more.
    Drained,
}

impl fmt::Display for ReaderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFileOpen => f.write_str("no-file-open"),
            Self::FileOpen => f.write_str("file-open"),
            Self::Drained => f.write_str("drained"),
        }
    }
}

/// Result of taking the next lumi-section from the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The data file was opened and its header merged.
    Opened,
    /// The index named a data file that does not exist; the entry was
    /// consumed and skipped.
    EntryMissing,
}

/// Consumer of delivered events.
///
/// The payload is never interpreted by the reader; turning it into the
/// consumer's event representation is up to the implementation.
pub trait EventDeserializer {
    /// Processes one event.
    fn deserialize_event(&mut self, event: &EventRecord) -> CoreResult<()>;
}

impl<F> EventDeserializer for F
where
    F: FnMut(&EventRecord) -> CoreResult<()>,
{
    fn deserialize_event(&mut self, event: &EventRecord) -> CoreResult<()> {
        self(event)
    }
}

/// Streaming reader over the data files of one run.
pub struct StreamerReader<S: IndexSource = DirectoryIndex> {
    config: ReaderConfig,
    tracker: FileTracker<S>,
    registry: SharedRegistry,
    filter: Option<Box<dyn EventFilter>>,
    /// The single open data file.
    session: Option<StreamerFile>,
    /// Events delivered from the current lumi-section.
    events_in_lumi: u64,
    phase: ReaderPhase,
    /// When the tracker was last polled from the read loop.
    last_poll: Option<Instant>,
    stats: Arc<ReaderStats>,
}

impl StreamerReader<DirectoryIndex> {
    /// Starts reading a run from its directory.
    ///
    /// Blocks until the first data file of the run has been opened and its
    /// header merged into `registry`, so the registry can be frozen once
    /// this returns.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Configuration`] if the configuration is invalid, the
    ///   input directory is missing, or the run ends before any data file
    ///   could be opened
    /// - [`CoreError::TrackerFailed`] if discovery fails during start-up
    /// - file, protocol and schema errors of the first data file
    pub fn open(config: ReaderConfig, registry: SharedRegistry) -> CoreResult<Self> {
        config.validate()?;
        let tracker = FileTracker::new(config.run(), config.run_input_dir.clone())
            .with_gap_timeout(config.lumi_gap_timeout);
        Self::start(config, tracker, registry)
    }
}

impl<S: IndexSource> StreamerReader<S> {
    /// Starts reading a run announced by a custom index source.
    ///
    /// Data file paths are still derived from the configured input
    /// directory. See [`StreamerReader::open`] for the start-up behavior.
    pub fn with_source(config: ReaderConfig, source: S, registry: SharedRegistry) -> CoreResult<Self> {
        config.validate()?;
        let layout = RunLayout::new(config.run_input_dir.clone(), config.run());
        let tracker =
            FileTracker::with_source(layout, source).with_gap_timeout(config.lumi_gap_timeout);
        Self::start(config, tracker, registry)
    }

    fn start(config: ReaderConfig, tracker: FileTracker<S>, registry: SharedRegistry) -> CoreResult<Self> {
        let mut reader = Self {
            config,
            tracker,
            registry,
            filter: None,
            session: None,
            events_in_lumi: 0,
            phase: ReaderPhase::NoFileOpen,
            last_poll: None,
            stats: Arc::new(ReaderStats::new()),
        };
        reader.tracker.initialize()?;

        // At least one header must be merged before the registry is handed
        // on, so wait for a readable file.
        loop {
            if reader.tracker.has_next() {
                if reader.open_next_file()? == OpenOutcome::Opened {
                    break;
                }
                continue;
            }
            match reader.tracker.state() {
                TrackerState::Error => return Err(reader.tracker_failure()),
                TrackerState::EndOfRun => {
                    return Err(CoreError::configuration(format!(
                        "{} ended before any data file could be opened",
                        reader.config.run()
                    )))
                }
                TrackerState::Init | TrackerState::Open => reader.delay(),
            }
        }

        if reader.config.skip_first_lumis {
            while reader.tracker.has_next() {
                reader.open_next_file()?;
            }
        }

        tracing::info!(
            run = %reader.config.run(),
            file = ?reader.current_file(),
            "streamer reader started"
        );
        Ok(reader)
    }

    /// Sets the filter deciding which events are passed over.
    #[must_use]
    pub fn with_filter(mut self, filter: impl EventFilter + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> ReaderPhase {
        self.phase
    }

    /// Returns the state of the file tracker.
    #[must_use]
    pub fn tracker_state(&self) -> TrackerState {
        self.tracker.state()
    }

    /// Returns the schema registry shared with the consumer.
    #[must_use]
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Returns the reader's counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<ReaderStats> {
        &self.stats
    }

    /// Returns the path of the open data file.
    #[must_use]
    pub fn current_file(&self) -> Option<&Path> {
        self.session.as_ref().map(StreamerFile::path)
    }

    /// Returns the number of events delivered from the current lumi-section.
    #[must_use]
    pub fn events_in_lumi(&self) -> u64 {
        self.events_in_lumi
    }

    /// Returns the next event record, or `None` once the run is over.
    ///
    /// Blocks with bounded sleeps while no data is available. After `None`
    /// was returned every further call returns `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TrackerFailed`] if discovery failed, and file,
    /// protocol and schema errors of the data files.
    pub fn prepare_next_event(&mut self) -> CoreResult<Option<EventRecord>> {
        if self.phase == ReaderPhase::Drained {
            return Ok(None);
        }

        loop {
            let has_next = self.poll_tracker();
            let state = self.tracker.state();

            if self.config.end_of_run_kills && state != TrackerState::Open {
                tracing::info!(state = %state, "end of run, stopping without draining");
                return Ok(self.drain());
            }

            if state == TrackerState::Error {
                self.close_file();
                return Err(self.tracker_failure());
            }

            if self.session.is_none() && !has_next && state == TrackerState::EndOfRun {
                tracing::info!(run = %self.config.run(), "all lumi-sections processed");
                return Ok(self.drain());
            }

            if self.session.is_none() && has_next {
                // Opening may hit a missing file; loop to try the next one.
                self.open_next_file()?;
                continue;
            }

            if has_next && self.events_in_lumi > self.config.min_events_per_lumi {
                tracing::debug!(
                    events = self.events_in_lumi,
                    "newer lumi-section available, switching files"
                );
                self.open_next_file()?;
                continue;
            }

            let Some(session) = self.session.as_mut() else {
                self.delay();
                continue;
            };

            if session.next()? {
                if let Some(record) = session.take_current() {
                    return Ok(Some(record));
                }
            }
            self.close_file();
        }
    }

    /// Delivers the next event to `deserializer`.
    ///
    /// Events rejected by the filter are passed over without being
    /// delivered or counted. A differing header met inside the open file is
    /// merged into the registry first.
    ///
    /// Returns `Ok(false)` once the run is over.
    ///
    /// # Errors
    ///
    /// Everything [`prepare_next_event`](Self::prepare_next_event) returns,
    /// schema errors of mid-file headers, and errors of the deserializer.
    pub fn check_next_event<D>(&mut self, deserializer: &mut D) -> CoreResult<bool>
    where
        D: EventDeserializer + ?Sized,
    {
        loop {
            let Some(record) = self.prepare_next_event()? else {
                return Ok(false);
            };
            self.merge_pending_header()?;

            if self.is_filtered(&record) {
                self.stats.record_event_filtered();
                continue;
            }

            self.events_in_lumi += 1;
            deserializer.deserialize_event(&record)?;
            self.stats.record_event_delivered();
            return Ok(true);
        }
    }

    /// Passes over up to `count` events without delivering them.
    ///
    /// Events the filter would have excluded anyway do not count. Returns
    /// the number of events actually skipped, which is less than `count`
    /// only if the run ended.
    pub fn skip(&mut self, count: u64) -> CoreResult<u64> {
        let mut skipped = 0;
        while skipped < count {
            let Some(record) = self.prepare_next_event()? else {
                break;
            };
            self.merge_pending_header()?;

            if self.is_filtered(&record) {
                self.stats.record_event_filtered();
                continue;
            }
            skipped += 1;
            self.stats.record_event_skipped();
        }
        if skipped < count {
            tracing::debug!(requested = count, skipped, "run ended while skipping");
        }
        Ok(skipped)
    }

    /// Closes the open file and takes the next lumi-section from the
    /// tracker.
    fn open_next_file(&mut self) -> CoreResult<OpenOutcome> {
        self.close_file();

        let Some(entry) = self.tracker.pop() else {
            return Err(CoreError::invalid_operation("no lumi-section available to open"));
        };
        let path = self.tracker.make_path_data(&entry);

        if !path.exists() {
            tracing::warn!(
                lumi = %entry.lumi,
                path = %path.display(),
                "data file named in index is missing, skipping"
            );
            self.stats.record_file_missing();
            return Ok(OpenOutcome::EntryMissing);
        }

        self.open_file(&path)?;
        tracing::info!(lumi = %entry.lumi, path = %path.display(), "opened data file");
        Ok(OpenOutcome::Opened)
    }

    fn open_file(&mut self, path: &Path) -> CoreResult<()> {
        self.events_in_lumi = 0;

        let mut session = StreamerFile::open(path)?;
        let header = session.first_record()?.clone();
        self.registry.write().merge_header(&header, false)?;
        self.stats.record_header_merge();

        self.session = Some(session);
        self.phase = ReaderPhase::FileOpen;
        self.stats.record_file_opened();

        if self.config.delete_dat_files {
            // The handle stays valid after the unlink.
            match fs::remove_file(path) {
                Ok(()) => {
                    self.stats.record_file_deleted();
                    tracing::debug!(path = %path.display(), "deleted data file");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot delete data file");
                }
            }
        }
        Ok(())
    }

    fn close_file(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        if self.phase == ReaderPhase::FileOpen {
            self.phase = ReaderPhase::NoFileOpen;
        }
    }

    fn merge_pending_header(&mut self) -> CoreResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        for header in session.take_new_headers() {
            self.registry.write().merge_header(&header, true)?;
            self.stats.record_header_merge();
        }
        Ok(())
    }

    /// Polls the tracker, or reuses the last poll while a file is open and
    /// less than `poll_interval` has passed. With `end_of_run_kills` every
    /// call polls, so the marker stops the reader on the next event.
    fn poll_tracker(&mut self) -> bool {
        let due = self.session.is_none()
            || self.config.end_of_run_kills
            || self
                .last_poll
                .map_or(true, |at| at.elapsed() >= self.config.poll_interval);
        if !due {
            return self.tracker.has_ready();
        }
        self.last_poll = Some(Instant::now());
        self.tracker.has_next()
    }

    fn is_filtered(&self, record: &EventRecord) -> bool {
        self.filter.as_ref().is_some_and(|filter| {
            filter.skip_it(record.run().as_u32(), record.lumi().as_u32(), record.event())
        })
    }

    fn drain(&mut self) -> Option<EventRecord> {
        self.close_file();
        self.phase = ReaderPhase::Drained;
        None
    }

    fn delay(&self) {
        tracing::debug!(
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "no events available, waiting for the next lumi-section"
        );
        self.stats.record_wait();
        thread::sleep(self.config.poll_interval);
    }

    fn tracker_failure(&self) -> CoreError {
        CoreError::tracker_failed(self.tracker.failure().unwrap_or("unknown failure"))
    }
}

impl<S: IndexSource> Drop for StreamerReader<S> {
    fn drop(&mut self) {
        self.close_file();
    }
}
