//! Sources of lumi-section availability.

use crate::error::{CoreError, CoreResult};
use crate::tracker::entry::{EndOfRunEntry, LumiEntry};
use crate::tracker::layout::{IndexFileKind, RunLayout};
use crate::types::LumiSection;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::sync::Arc;

/// Entries discovered by one poll.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexUpdate {
    /// Newly published lumi-sections, in no particular order.
    pub lumis: Vec<LumiEntry>,
    /// End-of-run marker, if it appeared in this poll.
    pub end_of_run: Option<EndOfRunEntry>,
}

impl IndexUpdate {
    /// Returns true if the poll found nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lumis.is_empty() && self.end_of_run.is_none()
    }
}

/// A per-run metadata feed announcing published lumi-sections.
///
/// Each entry and the end-of-run marker are returned by exactly one call to
/// [`poll`](Self::poll). Polling when nothing changed returns an empty
/// update.
pub trait IndexSource: Send {
    /// Checks that the source can be used. Called once by the tracker.
    fn establish(&mut self) -> CoreResult<()> {
        Ok(())
    }

    /// Returns what was published since the previous poll.
    fn poll(&mut self) -> CoreResult<IndexUpdate>;

    /// Tells the source that lumi-sections below `lumi` will never be
    /// delivered, so their bookkeeping can be dropped.
    fn forget_below(&mut self, _lumi: LumiSection) {}
}

/// Index source scanning a run directory for `.jsn` index files.
#[derive(Debug)]
pub struct DirectoryIndex {
    layout: RunLayout,
    /// Lumi-sections whose index was already reported, from `floor` up.
    seen: BTreeSet<LumiSection>,
    /// Indexes below this lumi-section are not read any more.
    floor: LumiSection,
    end_of_run_seen: bool,
    /// Whether the missing run directory was already logged.
    waiting_logged: bool,
}

impl DirectoryIndex {
    /// Creates a source for the given layout.
    #[must_use]
    pub fn new(layout: RunLayout) -> Self {
        Self {
            layout,
            seen: BTreeSet::new(),
            floor: LumiSection::new(1),
            end_of_run_seen: false,
            waiting_logged: false,
        }
    }

    /// Returns the layout scanned by this source.
    #[must_use]
    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }
}

impl IndexSource for DirectoryIndex {
    fn establish(&mut self) -> CoreResult<()> {
        let input_dir = self.layout.input_dir();
        if !input_dir.exists() {
            return Err(CoreError::configuration(format!(
                "run input directory does not exist: {}",
                input_dir.display()
            )));
        }
        if !input_dir.is_dir() {
            return Err(CoreError::configuration(format!(
                "run input path is not a directory: {}",
                input_dir.display()
            )));
        }
        Ok(())
    }

    fn poll(&mut self) -> CoreResult<IndexUpdate> {
        let run_path = self.layout.run_path();
        let dir = match fs::read_dir(&run_path) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !self.waiting_logged {
                    tracing::info!(path = %run_path.display(), "run directory does not exist yet");
                    self.waiting_logged = true;
                }
                return Ok(IndexUpdate::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut update = IndexUpdate::default();
        for item in dir {
            let item = item?;
            let Ok(name) = item.file_name().into_string() else {
                continue;
            };
            let Some(kind) = self.layout.classify(&name) else {
                continue;
            };
            let known = match kind {
                IndexFileKind::Lumi(lumi) => lumi < self.floor || self.seen.contains(&lumi),
                IndexFileKind::EndOfRun => self.end_of_run_seen,
            };
            if known {
                continue;
            }

            let path = item.path();
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                // Removed between listing and reading; it never counted.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            match kind {
                IndexFileKind::Lumi(lumi) => {
                    let entry = LumiEntry::from_index_json(self.layout.run(), lumi, &bytes, &path)?;
                    tracing::debug!(lumi = %lumi, data_file = %entry.data_file, "found lumi index");
                    update.lumis.push(entry);
                    self.seen.insert(lumi);
                }
                IndexFileKind::EndOfRun => {
                    let eor = EndOfRunEntry::from_json(&bytes, &path)?;
                    tracing::debug!(path = %path.display(), "found end-of-run marker");
                    update.end_of_run = Some(eor);
                    self.end_of_run_seen = true;
                }
            }
        }

        Ok(update)
    }

    fn forget_below(&mut self, lumi: LumiSection) {
        if lumi > self.floor {
            self.floor = lumi;
            self.seen = self.seen.split_off(&lumi);
        }
    }
}

#[derive(Debug, Default)]
struct MemoryIndexState {
    pending: Vec<LumiEntry>,
    end_of_run: Option<EndOfRunEntry>,
    failure: Option<String>,
    polls: u64,
}

/// In-memory index source for tests and embedding.
///
/// Clones share the same state, so a test can keep one handle to publish
/// entries while the tracker owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    state: Arc<Mutex<MemoryIndexState>>,
}

impl MemoryIndex {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a lumi-section.
    pub fn publish(&self, entry: LumiEntry) {
        self.state.lock().pending.push(entry);
    }

    /// Publishes the end-of-run marker.
    pub fn end_run(&self, eor: EndOfRunEntry) {
        self.state.lock().end_of_run = Some(eor);
    }

    /// Makes the next poll fail with the given message.
    pub fn fail(&self, message: impl Into<String>) {
        self.state.lock().failure = Some(message.into());
    }

    /// Returns how often the source was polled.
    #[must_use]
    pub fn polls(&self) -> u64 {
        self.state.lock().polls
    }
}

impl IndexSource for MemoryIndex {
    fn poll(&mut self) -> CoreResult<IndexUpdate> {
        let mut state = self.state.lock();
        state.polls += 1;
        if let Some(message) = state.failure.take() {
            return Err(CoreError::index_format("<memory>", message));
        }
        Ok(IndexUpdate {
            lumis: std::mem::take(&mut state.pending),
            end_of_run: state.end_of_run.take(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunNumber;
    use tempfile::tempdir;

    #[test]
    fn establish_requires_input_dir() {
        let temp = tempdir().unwrap();
        let mut missing = DirectoryIndex::new(RunLayout::new(temp.path().join("nope"), RunNumber::new(1)));
        assert!(matches!(
            missing.establish(),
            Err(CoreError::Configuration { .. })
        ));

        let file = temp.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let mut not_dir = DirectoryIndex::new(RunLayout::new(&file, RunNumber::new(1)));
        assert!(not_dir.establish().is_err());

        let mut ok = DirectoryIndex::new(RunLayout::new(temp.path(), RunNumber::new(1)));
        ok.establish().unwrap();
    }

    #[test]
    fn poll_without_run_dir_is_empty() {
        let temp = tempdir().unwrap();
        let mut index = DirectoryIndex::new(RunLayout::new(temp.path(), RunNumber::new(1)));
        assert!(index.poll().unwrap().is_empty());
        assert!(index.poll().unwrap().is_empty());
    }

    #[test]
    fn poll_reports_each_file_once() {
        let temp = tempdir().unwrap();
        let layout = RunLayout::new(temp.path(), RunNumber::new(7));
        let mut index = DirectoryIndex::new(layout.clone());

        for lumi in [2, 1] {
            let lumi = LumiSection::new(lumi);
            let entry = LumiEntry::new(
                RunNumber::new(7),
                lumi,
                layout.data_file_name(lumi, "streamDQM"),
            );
            layout.publish_lumi(&entry, "streamDQM").unwrap();
        }
        // Foreign and data files are ignored.
        std::fs::write(layout.file_path("run000008_ls0001_streamDQM.jsn"), b"{}").unwrap();
        std::fs::write(layout.file_path("run000007_ls0001_streamDQM.dat"), b"").unwrap();

        let mut first = index.poll().unwrap();
        first.lumis.sort_by_key(|e| e.lumi);
        assert_eq!(
            first.lumis.iter().map(|e| e.lumi.as_u32()).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(first.end_of_run.is_none());
        assert!(index.poll().unwrap().is_empty());

        layout.publish_end_of_run(&EndOfRunEntry::new(0, 2)).unwrap();
        let last = index.poll().unwrap();
        assert!(last.lumis.is_empty());
        assert_eq!(last.end_of_run, Some(EndOfRunEntry::new(0, 2)));
    }

    #[test]
    fn forgotten_lumis_are_pruned_and_not_reread() {
        let temp = tempdir().unwrap();
        let layout = RunLayout::new(temp.path(), RunNumber::new(7));
        let mut index = DirectoryIndex::new(layout.clone());
        let publish = |lumi: u32| {
            let lumi = LumiSection::new(lumi);
            let entry = LumiEntry::new(RunNumber::new(7), lumi, layout.data_file_name(lumi, "streamDQM"));
            layout.publish_lumi(&entry, "streamDQM").unwrap();
        };

        publish(1);
        publish(2);
        publish(3);
        assert_eq!(index.poll().unwrap().lumis.len(), 3);
        assert_eq!(index.seen.len(), 3);

        index.forget_below(LumiSection::new(3));
        assert_eq!(index.seen.iter().copied().collect::<Vec<_>>(), vec![LumiSection::new(3)]);
        // A stale index below the floor is not read again, even if rewritten
        // with garbage.
        std::fs::write(layout.file_path(&layout.index_file_name(LumiSection::new(1), "streamDQM")), b"junk")
            .unwrap();
        assert!(index.poll().unwrap().is_empty());

        // The floor never moves back.
        index.forget_below(LumiSection::new(2));
        publish(4);
        let update = index.poll().unwrap();
        assert_eq!(update.lumis.len(), 1);
        assert_eq!(update.lumis[0].lumi, LumiSection::new(4));
    }

    #[test]
    fn malformed_index_is_an_error() {
        let temp = tempdir().unwrap();
        let layout = RunLayout::new(temp.path(), RunNumber::new(7));
        layout.create_run_dir().unwrap();
        std::fs::write(layout.file_path("run000007_ls0001_streamDQM.jsn"), b"not json").unwrap();

        let mut index = DirectoryIndex::new(layout);
        assert!(matches!(index.poll(), Err(CoreError::IndexFormat { .. })));
    }

    #[test]
    fn memory_index_drains_once() {
        let index = MemoryIndex::new();
        let mut source = index.clone();
        index.publish(LumiEntry::new(RunNumber::new(1), LumiSection::new(1), "a.dat"));
        index.end_run(EndOfRunEntry::default());

        let update = source.poll().unwrap();
        assert_eq!(update.lumis.len(), 1);
        assert!(update.end_of_run.is_some());
        assert!(source.poll().unwrap().is_empty());
        assert_eq!(index.polls(), 2);

        index.fail("boom");
        assert!(source.poll().is_err());
    }
}
