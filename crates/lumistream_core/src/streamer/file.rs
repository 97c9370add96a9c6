//! A read session over one streamer file.

use crate::error::{CoreError, CoreResult};
use crate::streamer::record::{
    compute_crc32, EventRecord, InitHeader, RecordType, StreamerRecord, CRC_SIZE,
    ENVELOPE_HEADER_SIZE, MAX_PAYLOAD_SIZE, STREAMER_MAGIC, STREAMER_VERSION,
};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

/// Read buffer size for the underlying file.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// An open streamer file with a cursor over its records.
///
/// The session owns the only handle to its file. The leading INIT record is
/// read once, either explicitly through [`first_record`](Self::first_record)
/// or implicitly by the first call to [`next`](Self::next); every following
/// record is read on demand.
///
/// # Error Handling
///
/// - A record cut short at the end of the file is treated as end of file
/// - Invalid magic, unsupported version and unknown record types are
///   protocol errors
/// - CRC mismatches return [`CoreError::ChecksumMismatch`]
///
/// # Example
///
/// ```ignore
/// let mut session = StreamerFile::open(&path)?;
/// let header = session.first_record()?.clone();
/// while session.next()? {
///     let event = session.current_record().unwrap();
///     // ...
/// }
/// session.close();
/// ```
#[derive(Debug)]
pub struct StreamerFile {
    /// Path the session was opened on.
    path: PathBuf,
    /// Buffered file handle; `None` once closed.
    reader: Option<BufReader<File>>,
    /// Header currently in force.
    header: Option<InitHeader>,
    /// Record under the cursor.
    current: Option<EventRecord>,
    /// Differing INIT records met after the first one and not yet taken.
    new_headers: Vec<InitHeader>,
    /// Offset of the next record.
    offset: u64,
    /// Number of event records read so far.
    events_read: u64,
    /// End of file was reached.
    exhausted: bool,
}

impl StreamerFile {
    /// Opens a streamer file for reading.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FileOpen`] if the file cannot be opened.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let file = File::open(path).map_err(|e| CoreError::file_open(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(BufReader::with_capacity(READ_BUFFER_SIZE, file)),
            header: None,
            current: None,
            new_headers: Vec::new(),
            offset: 0,
            events_read: 0,
            exhausted: false,
        })
    }

    /// Returns the path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true while the file handle is held.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Returns the number of event records read so far.
    #[must_use]
    pub fn events_read(&self) -> u64 {
        self.events_read
    }

    /// Returns the header of the file, reading it on first use.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the first record of the file is not an
    /// INIT record, or if the file is empty.
    pub fn first_record(&mut self) -> CoreResult<&InitHeader> {
        if self.header.is_none() {
            let header = self.read_header()?;
            self.header = Some(header);
        }
        self.header
            .as_ref()
            .ok_or_else(|| CoreError::protocol("header missing after read"))
    }

    /// Advances to the next event record.
    ///
    /// Returns `Ok(false)` at end of file.
    pub fn next(&mut self) -> CoreResult<bool> {
        self.current = None;
        if self.reader.is_none() || self.exhausted {
            return Ok(false);
        }
        self.first_record()?;

        loop {
            match self.read_next_record()? {
                None => {
                    self.exhausted = true;
                    return Ok(false);
                }
                Some(StreamerRecord::Init(header)) => self.adopt_header(header),
                Some(StreamerRecord::Event(event)) => {
                    self.events_read += 1;
                    self.current = Some(event);
                    return Ok(true);
                }
            }
        }
    }

    /// Returns the record under the cursor.
    ///
    /// Only valid right after [`next`](Self::next) returned true.
    #[must_use]
    pub fn current_record(&self) -> Option<&EventRecord> {
        self.current.as_ref()
    }

    /// Moves the record under the cursor out of the session.
    pub fn take_current(&mut self) -> Option<EventRecord> {
        self.current.take()
    }

    /// Takes the headers with a different schema met since the last call,
    /// in file order.
    pub fn take_new_headers(&mut self) -> Vec<InitHeader> {
        std::mem::take(&mut self.new_headers)
    }

    /// Releases the file handle. Safe to call more than once.
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            tracing::debug!(
                path = %self.path.display(),
                events = self.events_read,
                "closed streamer file"
            );
        }
        self.current = None;
    }

    fn adopt_header(&mut self, header: InitHeader) {
        let changed = self
            .header
            .as_ref()
            .map_or(true, |current| current.fingerprint() != header.fingerprint());
        if changed {
            tracing::debug!(
                path = %self.path.display(),
                fingerprint = %header.fingerprint(),
                "new INIT record inside streamer file"
            );
            self.new_headers.push(header.clone());
            self.header = Some(header);
        }
    }

    fn read_header(&mut self) -> CoreResult<InitHeader> {
        match self.read_next_record()? {
            Some(StreamerRecord::Init(header)) => Ok(header),
            Some(other) => Err(CoreError::protocol(format!(
                "{}: received wrong message type: expected INIT, got {}",
                self.path.display(),
                other.record_type()
            ))),
            None => Err(CoreError::protocol(format!(
                "{}: file holds no INIT record",
                self.path.display()
            ))),
        }
    }

    /// Reads one record.
    ///
    /// Returns `Ok(None)` at end of file or on a truncated record.
    fn read_next_record(&mut self) -> CoreResult<Option<StreamerRecord>> {
        let record_start = self.offset;
        let path = &self.path;
        let Some(reader) = self.reader.as_mut() else {
            return Err(CoreError::invalid_operation("streamer file is closed"));
        };

        let mut header = [0u8; ENVELOPE_HEADER_SIZE];
        let got = read_up_to(reader, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < ENVELOPE_HEADER_SIZE {
            tracing::warn!(
                path = %path.display(),
                offset = record_start,
                "truncated record header, treating as end of file"
            );
            return Ok(None);
        }

        if header[0..4] != STREAMER_MAGIC {
            return Err(CoreError::protocol(format!(
                "{}: invalid magic at offset {record_start}",
                path.display()
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > STREAMER_VERSION {
            return Err(CoreError::protocol(format!(
                "{}: unsupported version {version} at offset {record_start}",
                path.display()
            )));
        }

        let type_byte = header[6];
        let record_type = RecordType::from_byte(type_byte).ok_or_else(|| {
            CoreError::protocol(format!(
                "{}: unknown record type {type_byte} at offset {record_start}",
                path.display()
            ))
        })?;

        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(CoreError::protocol(format!(
                "{}: record length {payload_len} at offset {record_start} exceeds limit",
                path.display()
            )));
        }

        let mut body = vec![0u8; payload_len + CRC_SIZE];
        let got = read_up_to(reader, &mut body)?;
        if got < body.len() {
            tracing::warn!(
                path = %path.display(),
                offset = record_start,
                "truncated record payload, treating as end of file"
            );
            return Ok(None);
        }

        let (payload, crc_bytes) = body.split_at(payload_len);
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let mut covered = Vec::with_capacity(ENVELOPE_HEADER_SIZE + payload_len);
        covered.extend_from_slice(&header);
        covered.extend_from_slice(payload);
        let computed_crc = compute_crc32(&covered);
        if stored_crc != computed_crc {
            return Err(CoreError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let record = StreamerRecord::decode_payload(record_type, payload)?;
        self.offset += (ENVELOPE_HEADER_SIZE + body.len()) as u64;
        Ok(Some(record))
    }
}

impl Drop for StreamerFile {
    fn drop(&mut self) {
        self.close();
    }
}

/// Fills `buf` as far as the file allows and returns the number of bytes read.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streamer::record::{encode_envelope, ProductDescriptor};
    use crate::streamer::writer::StreamerWriter;
    use crate::types::{EventId, RunNumber};
    use std::io::Write;
    use tempfile::tempdir;

    fn header() -> InitHeader {
        InitHeader::new("HLT", RunNumber::new(1))
            .with_product(ProductDescriptor::new("tracks", "TrackCollection", 1))
    }

    fn write_file(path: &Path, events: u64) {
        let mut writer = StreamerWriter::create(path, &header()).unwrap();
        for i in 1..=events {
            writer
                .write_event(&EventRecord::new(EventId::new(1, 1, i), vec![i as u8; 8]))
                .unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn open_missing_file_fails() {
        let temp = tempdir().unwrap();
        let err = StreamerFile::open(&temp.path().join("absent.dat")).unwrap_err();
        assert!(matches!(err, CoreError::FileOpen { .. }));
    }

    #[test]
    fn reads_header_then_events() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("f.dat");
        write_file(&path, 3);

        let mut session = StreamerFile::open(&path).unwrap();
        assert_eq!(session.first_record().unwrap(), &header());

        let mut seen = Vec::new();
        while session.next().unwrap() {
            seen.push(session.current_record().unwrap().event());
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(!session.next().unwrap());
        assert!(session.current_record().is_none());
        assert_eq!(session.events_read(), 3);
    }

    #[test]
    fn next_reads_header_implicitly() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("f.dat");
        write_file(&path, 1);

        let mut session = StreamerFile::open(&path).unwrap();
        assert!(session.next().unwrap());
        assert_eq!(session.first_record().unwrap().process_name, "HLT");
        assert!(session.take_new_headers().is_empty());
    }

    #[test]
    fn event_first_is_protocol_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bad.dat");
        let event = StreamerRecord::Event(EventRecord::new(EventId::new(1, 1, 1), vec![]));
        std::fs::write(&path, event.encode().unwrap()).unwrap();

        let mut session = StreamerFile::open(&path).unwrap();
        let err = session.first_record().unwrap_err();
        assert!(matches!(err, CoreError::Protocol { .. }));
        assert!(err.to_string().contains("expected INIT"));
    }

    #[test]
    fn empty_file_is_protocol_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("empty.dat");
        std::fs::write(&path, b"").unwrap();

        let mut session = StreamerFile::open(&path).unwrap();
        assert!(matches!(
            session.first_record(),
            Err(CoreError::Protocol { .. })
        ));
    }

    #[test]
    fn truncated_tail_is_end_of_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("f.dat");
        write_file(&path, 2);

        let partial = StreamerRecord::Event(EventRecord::new(EventId::new(1, 1, 3), vec![7; 32]))
            .encode()
            .unwrap();
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&partial[..partial.len() / 2]).unwrap();
        drop(file);

        let mut session = StreamerFile::open(&path).unwrap();
        assert!(session.next().unwrap());
        assert!(session.next().unwrap());
        assert!(!session.next().unwrap());
    }

    #[test]
    fn corrupted_crc_is_detected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("f.dat");
        write_file(&path, 1);

        let mut data = std::fs::read(&path).unwrap();
        let last = data.len() - CRC_SIZE - 1;
        data[last] ^= 0xFF;
        std::fs::write(&path, data).unwrap();

        let mut session = StreamerFile::open(&path).unwrap();
        assert!(matches!(
            session.next(),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn bad_magic_is_protocol_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("f.dat");
        let mut data = encode_envelope(RecordType::Init, &header().encode_payload().unwrap()).unwrap();
        data[0] = b'X';
        std::fs::write(&path, data).unwrap();

        let mut session = StreamerFile::open(&path).unwrap();
        assert!(matches!(
            session.first_record(),
            Err(CoreError::Protocol { .. })
        ));
    }

    #[test]
    fn new_header_flag_set_once_for_changed_schema() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("f.dat");
        let extended = header().with_product(ProductDescriptor::new("muons", "MuonCollection", 1));

        let mut writer = StreamerWriter::create(&path, &header()).unwrap();
        writer
            .write_event(&EventRecord::new(EventId::new(1, 1, 1), vec![]))
            .unwrap();
        // Same schema again: must not raise the flag.
        writer.write_header(&header()).unwrap();
        writer
            .write_event(&EventRecord::new(EventId::new(1, 1, 2), vec![]))
            .unwrap();
        writer.write_header(&extended).unwrap();
        writer
            .write_event(&EventRecord::new(EventId::new(1, 1, 3), vec![]))
            .unwrap();
        writer.finish().unwrap();

        let mut session = StreamerFile::open(&path).unwrap();
        assert!(session.next().unwrap());
        assert!(session.take_new_headers().is_empty());
        assert!(session.next().unwrap());
        assert!(session.take_new_headers().is_empty());
        assert!(session.next().unwrap());
        assert_eq!(session.take_new_headers(), vec![extended.clone()]);
        assert!(session.take_new_headers().is_empty());
        assert_eq!(session.first_record().unwrap(), &extended);
    }

    #[test]
    fn back_to_back_headers_are_all_kept() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("f.dat");
        let with_muons = header().with_product(ProductDescriptor::new("muons", "MuonCollection", 1));
        let with_jets = header().with_product(ProductDescriptor::new("jets", "JetCollection", 1));

        let mut writer = StreamerWriter::create(&path, &header()).unwrap();
        writer.write_header(&with_muons).unwrap();
        writer.write_header(&with_jets).unwrap();
        writer
            .write_event(&EventRecord::new(EventId::new(1, 1, 1), vec![]))
            .unwrap();
        writer.finish().unwrap();

        let mut session = StreamerFile::open(&path).unwrap();
        assert!(session.next().unwrap());
        assert_eq!(session.take_new_headers(), vec![with_muons, with_jets.clone()]);
        assert_eq!(session.first_record().unwrap(), &with_jets);
    }

    #[test]
    fn close_is_idempotent() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("f.dat");
        write_file(&path, 1);

        let mut session = StreamerFile::open(&path).unwrap();
        session.close();
        session.close();
        assert!(!session.is_open());
        assert!(!session.next().unwrap());
    }
}
