//! Streamer files: one INIT record followed by event records.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The INIT payload is a CBOR-encoded [`InitHeader`]; the event payload is
//! `run (4) | lumi (4) | event (8) | length (4) | data`, little-endian.
//!
//! ## Reading Policy
//!
//! - A record cut short at end of file ends the file (`Ok(false)` from
//!   [`StreamerFile::next`])
//! - A first record that is not INIT is a protocol error
//! - CRC mismatches, bad magic, unknown types and future versions are fatal

mod file;
mod record;
mod writer;

pub use file::StreamerFile;
pub use record::{
    compute_crc32, encode_envelope, EventRecord, InitHeader, ProductDescriptor, RecordType,
    SchemaFingerprint, StreamerRecord, STREAMER_MAGIC, STREAMER_VERSION,
};
pub use writer::StreamerWriter;
