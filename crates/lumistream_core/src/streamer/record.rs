//! Streamer record types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::types::{EventId, LumiSection, RunNumber};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Magic bytes identifying a streamer record.
pub const STREAMER_MAGIC: [u8; 4] = *b"LSTR";

/// Current streamer format version.
pub const STREAMER_VERSION: u16 = 1;

/// Envelope header size.
/// magic (4) + version (2) + type (1) + length (4) = 11 bytes
pub const ENVELOPE_HEADER_SIZE: usize = 11;

/// CRC size.
pub const CRC_SIZE: usize = 4;

/// Largest payload accepted when reading. Anything bigger is treated as a
/// corrupt length field.
pub const MAX_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

/// Type of streamer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Header describing the products stored in the following events.
    Init = 1,
    /// One event.
    Event = 2,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Init),
            2 => Some(Self::Event),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("INIT"),
            Self::Event => f.write_str("EVENT"),
        }
    }
}

/// Description of one product carried by the events of a file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProductDescriptor {
    /// Unique label of the product (module label and instance).
    pub label: String,
    /// Fully qualified type name of the product.
    pub type_name: String,
    /// Layout version of the type.
    pub version: u16,
}

impl ProductDescriptor {
    /// Creates a new product descriptor.
    pub fn new(label: impl Into<String>, type_name: impl Into<String>, version: u16) -> Self {
        Self {
            label: label.into(),
            type_name: type_name.into(),
            version,
        }
    }
}

/// SHA-256 fingerprint of a header's product schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaFingerprint(pub [u8; 32]);

impl fmt::Display for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// The INIT record at the start of every streamer file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitHeader {
    /// Protocol version of the producer.
    pub protocol_version: u16,
    /// Name of the process that wrote the file.
    pub process_name: String,
    /// Software release of the producer.
    pub release: String,
    /// Run the file belongs to.
    pub run: u32,
    /// Products stored in the events of this file.
    pub products: Vec<ProductDescriptor>,
}

impl InitHeader {
    /// Creates a header for the given process and run with no products.
    pub fn new(process_name: impl Into<String>, run: RunNumber) -> Self {
        Self {
            protocol_version: STREAMER_VERSION,
            process_name: process_name.into(),
            release: String::new(),
            run: run.as_u32(),
            products: Vec::new(),
        }
    }

    /// Adds a product to the header.
    #[must_use]
    pub fn with_product(mut self, product: ProductDescriptor) -> Self {
        self.products.push(product);
        self
    }

    /// Sets the release string.
    #[must_use]
    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = release.into();
        self
    }

    /// Computes the schema fingerprint.
    ///
    /// Only the product set takes part; product order, process name and
    /// release do not change the fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> SchemaFingerprint {
        let mut products: Vec<&ProductDescriptor> = self.products.iter().collect();
        products.sort();

        let mut hasher = Sha256::new();
        for product in products {
            hasher.update(product.label.as_bytes());
            hasher.update([0]);
            hasher.update(product.type_name.as_bytes());
            hasher.update([0]);
            hasher.update(product.version.to_le_bytes());
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        SchemaFingerprint(out)
    }

    /// Serializes the header payload as CBOR.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| CoreError::protocol(format!("cannot encode INIT header: {e}")))?;
        Ok(buf)
    }

    /// Deserializes a header payload.
    pub fn decode_payload(payload: &[u8]) -> CoreResult<Self> {
        ciborium::de::from_reader(payload)
            .map_err(|e| CoreError::protocol(format!("cannot decode INIT header: {e}")))
    }
}

/// One event record.
///
/// The payload is opaque to the reader; it is handed to the consumer's
/// deserializer unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Identity of the event.
    pub id: EventId,
    /// Serialized event data.
    pub payload: Vec<u8>,
}

impl EventRecord {
    /// Fixed part of the payload: run (4) + lumi (4) + event (8) + length (4).
    const FIXED_SIZE: usize = 20;

    /// Creates a new event record.
    pub fn new(id: EventId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// Returns the run number.
    #[must_use]
    pub fn run(&self) -> RunNumber {
        self.id.run
    }

    /// Returns the lumi-section.
    #[must_use]
    pub fn lumi(&self) -> LumiSection {
        self.id.lumi
    }

    /// Returns the raw event number.
    #[must_use]
    pub fn event(&self) -> u64 {
        self.id.event.as_u64()
    }

    /// Serializes the event payload.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let len = u32::try_from(self.payload.len())
            .map_err(|_| CoreError::invalid_operation("event payload too large"))?;

        let mut buf = Vec::with_capacity(Self::FIXED_SIZE + self.payload.len());
        buf.extend_from_slice(&self.id.run.as_u32().to_le_bytes());
        buf.extend_from_slice(&self.id.lumi.as_u32().to_le_bytes());
        buf.extend_from_slice(&self.id.event.as_u64().to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Deserializes an event payload.
    pub fn decode_payload(payload: &[u8]) -> CoreResult<Self> {
        if payload.len() < Self::FIXED_SIZE {
            return Err(CoreError::protocol(format!(
                "event record too short: {} bytes",
                payload.len()
            )));
        }

        let u32_at = |at: usize| u32::from_le_bytes([
            payload[at],
            payload[at + 1],
            payload[at + 2],
            payload[at + 3],
        ]);

        let run = u32_at(0);
        let lumi = u32_at(4);
        let mut event_bytes = [0u8; 8];
        event_bytes.copy_from_slice(&payload[8..16]);
        let event = u64::from_le_bytes(event_bytes);
        let len = u32_at(16) as usize;

        let data = &payload[Self::FIXED_SIZE..];
        if data.len() != len {
            return Err(CoreError::protocol(format!(
                "event {run}:{lumi}:{event} declares {len} data bytes, record holds {}",
                data.len()
            )));
        }

        Ok(Self {
            id: EventId::new(run, lumi, event),
            payload: data.to_vec(),
        })
    }
}

/// A decoded streamer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamerRecord {
    /// Header record.
    Init(InitHeader),
    /// Event record.
    Event(EventRecord),
}

impl StreamerRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Init(_) => RecordType::Init,
            Self::Event(_) => RecordType::Event,
        }
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: RecordType, payload: &[u8]) -> CoreResult<Self> {
        match record_type {
            RecordType::Init => InitHeader::decode_payload(payload).map(Self::Init),
            RecordType::Event => EventRecord::decode_payload(payload).map(Self::Event),
        }
    }

    /// Serializes the record with its envelope.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = match self {
            Self::Init(header) => header.encode_payload()?,
            Self::Event(event) => event.encode_payload()?,
        };
        encode_envelope(self.record_type(), &payload)
    }
}

/// Wraps a payload in the record envelope.
pub fn encode_envelope(record_type: RecordType, payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_operation("streamer record payload too large"))?;

    let mut data = Vec::with_capacity(ENVELOPE_HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&STREAMER_MAGIC);
    data.extend_from_slice(&STREAMER_VERSION.to_le_bytes());
    data.push(record_type.as_byte());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(payload);

    // CRC32 over everything before it
    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Computes CRC32 checksum for data (IEEE polynomial).
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> InitHeader {
        InitHeader::new("HLT", RunNumber::new(5))
            .with_release("CMSSW_7_1_0")
            .with_product(ProductDescriptor::new("hltTracks", "reco::TrackCollection", 3))
            .with_product(ProductDescriptor::new("hltMuons", "reco::MuonCollection", 1))
    }

    #[test]
    fn record_type_from_byte() {
        assert_eq!(RecordType::from_byte(1), Some(RecordType::Init));
        assert_eq!(RecordType::from_byte(2), Some(RecordType::Event));
        assert_eq!(RecordType::from_byte(9), None);
    }

    #[test]
    fn header_payload_roundtrip() {
        let header = sample_header();
        let payload = header.encode_payload().unwrap();
        assert_eq!(InitHeader::decode_payload(&payload).unwrap(), header);
    }

    #[test]
    fn fingerprint_ignores_product_order_and_process() {
        let a = sample_header();
        let mut b = sample_header();
        b.products.reverse();
        b.process_name = "DQM".into();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = sample_header().with_product(ProductDescriptor::new("x", "y", 1));
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn event_payload_rejects_length_mismatch() {
        let event = EventRecord::new(EventId::new(1, 2, 3), vec![1, 2, 3, 4]);
        let mut payload = event.encode_payload().unwrap();
        payload.pop();
        let err = EventRecord::decode_payload(&payload).unwrap_err();
        assert!(matches!(err, CoreError::Protocol { .. }));
    }

    #[test]
    fn event_payload_decodes_ids() {
        let event = EventRecord::new(EventId::new(9, 8, 77), b"data".to_vec());
        let payload = event.encode_payload().unwrap();
        let decoded = EventRecord::decode_payload(&payload).unwrap();
        assert_eq!(decoded.run(), RunNumber::new(9));
        assert_eq!(decoded.lumi(), LumiSection::new(8));
        assert_eq!(decoded.event(), 77);
        assert_eq!(decoded.payload, b"data");
    }

    #[test]
    fn envelope_layout() {
        let data = encode_envelope(RecordType::Event, &[0xAA; 3]).unwrap();
        assert_eq!(&data[0..4], &STREAMER_MAGIC);
        assert_eq!(data[6], RecordType::Event.as_byte());
        assert_eq!(data.len(), ENVELOPE_HEADER_SIZE + 3 + CRC_SIZE);
        let crc = u32::from_le_bytes(data[data.len() - 4..].try_into().unwrap());
        assert_eq!(crc, compute_crc32(&data[..data.len() - 4]));
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }
}
