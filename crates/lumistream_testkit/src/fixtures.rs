//! Run directory fixtures.
//!
//! A [`RunFixture`] owns a temporary input directory and plays the producer:
//! it writes streamer files into the run directory and publishes their
//! indexes, in any order and at any time the test chooses.

use lumistream_core::{
    CoreResult, EndOfRunEntry, EventDeserializer, EventId, EventRecord, IndexSource, InitHeader,
    LumiEntry, LumiSection, ProductDescriptor, ReaderConfig, RunLayout, RunNumber, SchemaRegistry,
    SharedRegistry, StreamerReader, StreamerWriter,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Stream name used for fixture files.
pub const FIXTURE_STREAM: &str = "streamDQM_fixture";

/// Poll interval used by fixture configurations.
pub const FIXTURE_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Returns the header written by default into fixture files.
pub fn default_header(run: u32) -> InitHeader {
    InitHeader::new("fixture", RunNumber::new(run))
        .with_product(ProductDescriptor::new("hits", "HitCollection", 1))
        .with_product(ProductDescriptor::new("triggerResults", "TriggerResults", 1))
}

/// A run directory in a temporary input directory.
pub struct RunFixture {
    layout: RunLayout,
    header: InitHeader,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl RunFixture {
    /// Creates an empty input directory for `run`.
    ///
    /// The run directory itself is only created by the first write.
    pub fn new(run: u32) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self {
            layout: RunLayout::new(temp_dir.path(), RunNumber::new(run)),
            header: default_header(run),
            _temp_dir: temp_dir,
        }
    }

    /// Replaces the header written into new data files.
    #[must_use]
    pub fn with_header(mut self, header: InitHeader) -> Self {
        self.header = header;
        self
    }

    /// Returns the run number.
    pub fn run(&self) -> u32 {
        self.layout.run().as_u32()
    }

    /// Returns the input directory.
    pub fn input_dir(&self) -> &Path {
        self.layout.input_dir()
    }

    /// Returns the run layout.
    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Returns a reader configuration for this run with a short poll interval.
    pub fn config(&self) -> ReaderConfig {
        ReaderConfig::new(self.run(), self.input_dir()).poll_interval(FIXTURE_POLL_INTERVAL)
    }

    /// Opens a directory reader with a fresh registry.
    pub fn open_reader(&self, config: ReaderConfig) -> CoreResult<StreamerReader> {
        StreamerReader::open(config, SchemaRegistry::shared())
    }

    /// Opens a directory reader sharing `registry`.
    pub fn open_reader_with(
        &self,
        config: ReaderConfig,
        registry: SharedRegistry,
    ) -> CoreResult<StreamerReader> {
        StreamerReader::open(config, registry)
    }

    /// Returns the data file path of a lumi-section.
    pub fn data_path(&self, lumi: u32) -> PathBuf {
        let name = self.layout.data_file_name(LumiSection::new(lumi), FIXTURE_STREAM);
        self.layout.file_path(&name)
    }

    /// Writes the data file of a lumi-section without publishing it.
    pub fn write_data(&self, lumi: u32, events: &[u64]) -> LumiEntry {
        self.write_data_with_header(lumi, events, &self.header)
    }

    /// Writes a data file with a specific header without publishing it.
    pub fn write_data_with_header(&self, lumi: u32, events: &[u64], header: &InitHeader) -> LumiEntry {
        self.layout.create_run_dir().expect("Failed to create run directory");
        let ls = LumiSection::new(lumi);
        let name = self.layout.data_file_name(ls, FIXTURE_STREAM);
        let mut writer = StreamerWriter::create(&self.layout.file_path(&name), header)
            .expect("Failed to create data file");
        for &event in events {
            let id = EventId::new(self.run(), lumi, event);
            writer
                .write_event(&EventRecord::new(id, event.to_le_bytes().to_vec()))
                .expect("Failed to write event");
        }
        let written = writer.finish().expect("Failed to finish data file");
        LumiEntry::new(self.layout.run(), ls, name).with_events(written, written)
    }

    /// Publishes the index of an entry.
    pub fn publish(&self, entry: &LumiEntry) -> PathBuf {
        self.layout
            .publish_lumi(entry, FIXTURE_STREAM)
            .expect("Failed to publish lumi index")
    }

    /// Writes and publishes a lumi-section with events numbered `1..=events`.
    pub fn add_lumi(&self, lumi: u32, events: u64) -> LumiEntry {
        let numbers: Vec<u64> = (1..=events).collect();
        self.add_lumi_events(lumi, &numbers)
    }

    /// Writes and publishes a lumi-section with the given event numbers.
    pub fn add_lumi_events(&self, lumi: u32, events: &[u64]) -> LumiEntry {
        let entry = self.write_data(lumi, events);
        self.publish(&entry);
        entry
    }

    /// Publishes an index whose data file does not exist.
    pub fn add_missing_lumi(&self, lumi: u32) -> LumiEntry {
        let ls = LumiSection::new(lumi);
        let entry = LumiEntry::new(
            self.layout.run(),
            ls,
            self.layout.data_file_name(ls, FIXTURE_STREAM),
        );
        self.publish(&entry);
        entry
    }

    /// Writes raw bytes as the data file of a lumi-section and publishes it.
    pub fn add_raw_lumi(&self, lumi: u32, bytes: &[u8]) -> LumiEntry {
        self.layout.create_run_dir().expect("Failed to create run directory");
        let ls = LumiSection::new(lumi);
        let name = self.layout.data_file_name(ls, FIXTURE_STREAM);
        std::fs::write(self.layout.file_path(&name), bytes).expect("Failed to write data file");
        let entry = LumiEntry::new(self.layout.run(), ls, name);
        self.publish(&entry);
        entry
    }

    /// Publishes the end-of-run marker with unknown totals.
    pub fn end_run(&self) -> PathBuf {
        self.end_run_with(&EndOfRunEntry::default())
    }

    /// Publishes a specific end-of-run marker.
    pub fn end_run_with(&self, eor: &EndOfRunEntry) -> PathBuf {
        self.layout
            .publish_end_of_run(eor)
            .expect("Failed to publish end-of-run marker")
    }
}

/// Reads a reader to the end and returns the ids of the delivered events.
pub fn collect_events<S: IndexSource>(reader: &mut StreamerReader<S>) -> Vec<EventId> {
    let mut sink = EventCollector::default();
    while reader
        .check_next_event(&mut sink)
        .expect("Failed to read next event")
    {}
    sink.ids
}

/// Deserializer that records event ids.
#[derive(Debug, Default)]
pub struct EventCollector {
    /// Ids in delivery order.
    pub ids: Vec<EventId>,
}

impl EventDeserializer for EventCollector {
    fn deserialize_event(&mut self, event: &EventRecord) -> CoreResult<()> {
        self.ids.push(event.id);
        Ok(())
    }
}

/// Runs a test with a temporary run directory.
///
/// # Example
///
/// ```rust,ignore
/// with_run(7, |fixture| {
///     fixture.add_lumi(1, 2);
///     // ...
/// });
/// ```
pub fn with_run<F, R>(run: u32, f: F) -> R
where
    F: FnOnce(&RunFixture) -> R,
{
    let fixture = RunFixture::new(run);
    f(&fixture)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_publishes_lumis() {
        let fixture = RunFixture::new(5);
        let entry = fixture.add_lumi(1, 3);
        assert_eq!(entry.events_accepted, 3);
        assert!(fixture.data_path(1).exists());
        assert!(fixture
            .layout()
            .file_path(&fixture.layout().index_file_name(LumiSection::new(1), FIXTURE_STREAM))
            .exists());
    }

    #[test]
    fn missing_lumi_has_no_data() {
        with_run(5, |fixture| {
            fixture.add_missing_lumi(2);
            assert!(!fixture.data_path(2).exists());
        });
    }

    #[test]
    fn collector_reads_everything() {
        let fixture = RunFixture::new(3);
        fixture.add_lumi(1, 2);
        fixture.add_lumi(2, 1);
        fixture.end_run();

        let mut reader = fixture
            .open_reader(fixture.config().min_events_per_lumi(100))
            .unwrap();
        assert_eq!(
            collect_events(&mut reader),
            vec![EventId::new(3, 1, 1), EventId::new(3, 1, 2), EventId::new(3, 2, 1)]
        );
    }
}
