//! Streamer file writer.

use crate::error::CoreResult;
use crate::streamer::record::{encode_envelope, EventRecord, InitHeader, RecordType};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes a streamer file: one INIT record followed by event records.
///
/// Used by producers and test fixtures. A file is only complete once
/// [`finish`](Self::finish) has returned; readers rely on the index file
/// being published after that point.
pub struct StreamerWriter {
    path: PathBuf,
    out: BufWriter<File>,
    events_written: u64,
}

impl StreamerWriter {
    /// Creates (or truncates) the file and writes its header.
    pub fn create(path: &Path, header: &InitHeader) -> CoreResult<Self> {
        let file = File::create(path)?;
        let mut writer = Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            events_written: 0,
        };
        writer.write_header(header)?;
        Ok(writer)
    }

    /// Returns the path being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends an INIT record.
    ///
    /// The first header is written by [`create`](Self::create); a later call
    /// starts a new schema section within the same file.
    pub fn write_header(&mut self, header: &InitHeader) -> CoreResult<()> {
        let data = encode_envelope(RecordType::Init, &header.encode_payload()?)?;
        self.out.write_all(&data)?;
        Ok(())
    }

    /// Appends an event record.
    pub fn write_event(&mut self, event: &EventRecord) -> CoreResult<()> {
        let data = encode_envelope(RecordType::Event, &event.encode_payload()?)?;
        self.out.write_all(&data)?;
        self.events_written += 1;
        Ok(())
    }

    /// Flushes and syncs the file, returning the number of events written.
    pub fn finish(mut self) -> CoreResult<u64> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(self.events_written)
    }
}
