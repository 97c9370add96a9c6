//! Run directory layout.
//!
//! ```text
//! <run_input_dir>/
//! └─ run000123/
//!    ├─ run000123_ls0001_streamDQM_host.dat   # streamer data
//!    ├─ run000123_ls0001_streamDQM_host.jsn   # lumi index, published last
//!    ├─ ...
//!    └─ run000123_ls0000_EoR.jsn              # end-of-run marker
//! ```
//!
//! The producer writes a data file completely before publishing its index.
//! Index files are written to a temporary name and renamed into place, so a
//! reader never sees a partial index.

use crate::error::CoreResult;
use crate::tracker::entry::{EndOfRunEntry, LumiEntry};
use crate::types::{LumiSection, RunNumber};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Extension of index files.
const INDEX_EXTENSION: &str = "jsn";
/// Extension of streamer data files.
const DATA_EXTENSION: &str = "dat";
/// Suffix of index files still being written.
const TEMP_SUFFIX: &str = ".tmp";

/// Kind of file recognized in a run directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFileKind {
    /// Index of a lumi-section.
    Lumi(LumiSection),
    /// End-of-run marker.
    EndOfRun,
}

/// File naming for one run.
#[derive(Debug, Clone)]
pub struct RunLayout {
    input_dir: PathBuf,
    run: RunNumber,
}

impl RunLayout {
    /// Creates the layout for a run under an input directory.
    pub fn new(input_dir: impl Into<PathBuf>, run: RunNumber) -> Self {
        Self {
            input_dir: input_dir.into(),
            run,
        }
    }

    /// Returns the run.
    #[must_use]
    pub fn run(&self) -> RunNumber {
        self.run
    }

    /// Returns the configured input directory.
    #[must_use]
    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Returns the directory of the run.
    #[must_use]
    pub fn run_path(&self) -> PathBuf {
        self.input_dir.join(self.run.to_string())
    }

    /// Returns the path of a file inside the run directory.
    #[must_use]
    pub fn file_path(&self, file_name: &str) -> PathBuf {
        self.run_path().join(file_name)
    }

    /// Returns the index file name of a lumi-section for a stream.
    #[must_use]
    pub fn index_file_name(&self, lumi: LumiSection, stream: &str) -> String {
        format!("{}_{}_{stream}.{INDEX_EXTENSION}", self.run, lumi)
    }

    /// Returns the data file name of a lumi-section for a stream.
    #[must_use]
    pub fn data_file_name(&self, lumi: LumiSection, stream: &str) -> String {
        format!("{}_{}_{stream}.{DATA_EXTENSION}", self.run, lumi)
    }

    /// Returns the name of the end-of-run marker.
    #[must_use]
    pub fn end_of_run_file_name(&self) -> String {
        format!("{}_{}_EoR.{INDEX_EXTENSION}", self.run, LumiSection::new(0))
    }

    /// Classifies a file name found in the run directory.
    ///
    /// Returns `None` for files of other runs, data files, temporary files
    /// and anything else that is not an index of this run.
    #[must_use]
    pub fn classify(&self, file_name: &str) -> Option<IndexFileKind> {
        if file_name == self.end_of_run_file_name() {
            return Some(IndexFileKind::EndOfRun);
        }

        let stem = file_name.strip_suffix(&format!(".{INDEX_EXTENSION}"))?;
        let rest = stem.strip_prefix(&format!("{}_ls", self.run))?;
        let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits_end == 0 || !rest[digits_end..].starts_with('_') {
            return None;
        }
        let lumi: u32 = rest[..digits_end].parse().ok()?;
        if lumi == 0 {
            return None;
        }
        Some(IndexFileKind::Lumi(LumiSection::new(lumi)))
    }

    /// Creates the run directory if needed.
    pub fn create_run_dir(&self) -> CoreResult<PathBuf> {
        let path = self.run_path();
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Publishes the index of a lumi-section whose data file is complete.
    pub fn publish_lumi(&self, entry: &LumiEntry, stream: &str) -> CoreResult<PathBuf> {
        let name = self.index_file_name(entry.lumi, stream);
        self.write_atomically(&name, &entry.to_index_json()?)
    }

    /// Publishes the end-of-run marker.
    pub fn publish_end_of_run(&self, eor: &EndOfRunEntry) -> CoreResult<PathBuf> {
        let name = self.end_of_run_file_name();
        self.write_atomically(&name, &eor.to_json()?)
    }

    /// Writes to a temporary file, syncs it, renames it into place and syncs
    /// the run directory.
    fn write_atomically(&self, name: &str, data: &[u8]) -> CoreResult<PathBuf> {
        let run_path = self.create_run_dir()?;
        let final_path = run_path.join(name);
        let temp_path = run_path.join(format!("{name}{TEMP_SUFFIX}"));

        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &final_path)?;
        sync_directory(&run_path)?;
        Ok(final_path)
    }
}

/// Syncs a directory so that created and renamed entries are durable.
#[cfg(unix)]
fn sync_directory(path: &Path) -> CoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> CoreResult<()> {
    // NTFS journals metadata; directory handles cannot be fsynced
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn layout() -> RunLayout {
        RunLayout::new("/data", RunNumber::new(123))
    }

    #[test]
    fn paths_are_correct() {
        let layout = layout();
        assert_eq!(layout.run_path(), PathBuf::from("/data/run000123"));
        assert_eq!(
            layout.index_file_name(LumiSection::new(4), "streamDQM_host"),
            "run000123_ls0004_streamDQM_host.jsn"
        );
        assert_eq!(
            layout.data_file_name(LumiSection::new(4), "streamDQM_host"),
            "run000123_ls0004_streamDQM_host.dat"
        );
        assert_eq!(layout.end_of_run_file_name(), "run000123_ls0000_EoR.jsn");
    }

    #[test]
    fn classify_names() {
        let layout = layout();
        assert_eq!(
            layout.classify("run000123_ls0004_streamDQM_host.jsn"),
            Some(IndexFileKind::Lumi(LumiSection::new(4)))
        );
        assert_eq!(
            layout.classify("run000123_ls12345_streamA.jsn"),
            Some(IndexFileKind::Lumi(LumiSection::new(12345)))
        );
        assert_eq!(
            layout.classify("run000123_ls0000_EoR.jsn"),
            Some(IndexFileKind::EndOfRun)
        );
        assert_eq!(layout.classify("run000123_ls0004_streamDQM_host.dat"), None);
        assert_eq!(layout.classify("run000123_ls0004_streamDQM_host.jsn.tmp"), None);
        assert_eq!(layout.classify("run000124_ls0004_streamDQM_host.jsn"), None);
        assert_eq!(layout.classify("run000123_ls0000_streamDQM.jsn"), None);
        assert_eq!(layout.classify("run000123_lsXX_streamDQM.jsn"), None);
    }

    #[test]
    fn publish_writes_index_and_marker() {
        let temp = tempdir().unwrap();
        let layout = RunLayout::new(temp.path(), RunNumber::new(5));
        let entry = LumiEntry::new(RunNumber::new(5), LumiSection::new(1), "data.dat");

        let index = layout.publish_lumi(&entry, "streamDQM").unwrap();
        assert!(index.exists());
        assert!(!index.with_file_name(format!(
            "{}{TEMP_SUFFIX}",
            index.file_name().unwrap().to_str().unwrap()
        ))
        .exists());

        let eor = layout.publish_end_of_run(&EndOfRunEntry::new(3, 1)).unwrap();
        assert_eq!(eor, layout.file_path("run000005_ls0000_EoR.jsn"));
        assert_eq!(
            layout.classify(eor.file_name().unwrap().to_str().unwrap()),
            Some(IndexFileKind::EndOfRun)
        );
    }
}
