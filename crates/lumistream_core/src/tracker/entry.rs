//! Lumi-section index entries and the end-of-run marker.

use crate::error::{CoreError, CoreResult};
use crate::types::{LumiSection, RunNumber};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Position of the accepted-events counter in a lumi index `data` array.
const LUMI_EVENTS_ACCEPTED: usize = 1;
/// Position of the data file name in a lumi index `data` array.
const LUMI_DATA_FILE: usize = 3;

/// Contents of an index file: `{"data": [...]}`.
#[derive(Debug, Serialize, Deserialize)]
struct IndexDocument {
    data: Vec<Value>,
}

/// One published lumi-section.
///
/// Built from an index file of the form
/// `{"data": [events_processed, events_accepted, errors, "<data file>"]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LumiEntry {
    /// Run the lumi-section belongs to.
    pub run: RunNumber,
    /// Lumi-section number.
    pub lumi: LumiSection,
    /// Events processed upstream for this lumi-section.
    pub events_processed: u64,
    /// Events written to the data file.
    pub events_accepted: u64,
    /// Name of the data file inside the run directory.
    pub data_file: String,
}

impl LumiEntry {
    /// Creates an entry for a data file.
    pub fn new(run: RunNumber, lumi: LumiSection, data_file: impl Into<String>) -> Self {
        Self {
            run,
            lumi,
            events_processed: 0,
            events_accepted: 0,
            data_file: data_file.into(),
        }
    }

    /// Sets the event counters.
    #[must_use]
    pub fn with_events(mut self, processed: u64, accepted: u64) -> Self {
        self.events_processed = processed;
        self.events_accepted = accepted;
        self
    }

    /// Parses the contents of a lumi index file.
    ///
    /// `path` is only used for error messages.
    pub fn from_index_json(
        run: RunNumber,
        lumi: LumiSection,
        bytes: &[u8],
        path: &Path,
    ) -> CoreResult<Self> {
        let doc: IndexDocument = serde_json::from_slice(bytes)
            .map_err(|e| CoreError::index_format(path, e.to_string()))?;

        if doc.data.len() <= LUMI_DATA_FILE {
            return Err(CoreError::index_format(
                path,
                format!("expected at least 4 data fields, found {}", doc.data.len()),
            ));
        }

        let data_file = match &doc.data[LUMI_DATA_FILE] {
            Value::String(name) => name.clone(),
            other => {
                return Err(CoreError::index_format(
                    path,
                    format!("data file name must be a string, found {other}"),
                ))
            }
        };
        let plain_name = Path::new(&data_file)
            .file_name()
            .is_some_and(|name| name == data_file.as_str());
        if !plain_name {
            return Err(CoreError::index_format(
                path,
                format!("data file '{data_file}' is not a plain file name"),
            ));
        }

        Ok(Self {
            run,
            lumi,
            events_processed: field_u64(&doc.data, 0, path)?,
            events_accepted: field_u64(&doc.data, LUMI_EVENTS_ACCEPTED, path)?,
            data_file,
        })
    }

    /// Serializes the entry as index file contents.
    pub fn to_index_json(&self) -> CoreResult<Vec<u8>> {
        let doc = IndexDocument {
            data: vec![
                Value::from(self.events_processed),
                Value::from(self.events_accepted),
                Value::from(0u64),
                Value::from(self.data_file.clone()),
            ],
        };
        serde_json::to_vec_pretty(&doc).map_err(|e| CoreError::invalid_operation(e.to_string()))
    }
}

/// The end-of-run marker: `{"data": [events, lumi_sections]}`.
///
/// An empty marker file is accepted; both totals are then unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndOfRunEntry {
    /// Total events of the run, if announced.
    pub events: Option<u64>,
    /// Total lumi-sections of the run, if announced.
    pub lumi_sections: Option<u64>,
}

impl EndOfRunEntry {
    /// Creates a marker with known totals.
    #[must_use]
    pub fn new(events: u64, lumi_sections: u64) -> Self {
        Self {
            events: Some(events),
            lumi_sections: Some(lumi_sections),
        }
    }

    /// Parses the contents of an end-of-run file.
    pub fn from_json(bytes: &[u8], path: &Path) -> CoreResult<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let doc: IndexDocument = serde_json::from_slice(bytes)
            .map_err(|e| CoreError::index_format(path, e.to_string()))?;
        let optional = |i: usize| -> CoreResult<Option<u64>> {
            if i < doc.data.len() {
                field_u64(&doc.data, i, path).map(Some)
            } else {
                Ok(None)
            }
        };
        Ok(Self {
            events: optional(0)?,
            lumi_sections: optional(1)?,
        })
    }

    /// Serializes the marker.
    pub fn to_json(&self) -> CoreResult<Vec<u8>> {
        let data = [self.events, self.lumi_sections]
            .into_iter()
            .map_while(|v| v.map(Value::from))
            .collect();
        serde_json::to_vec_pretty(&IndexDocument { data })
            .map_err(|e| CoreError::invalid_operation(e.to_string()))
    }
}

/// Reads a counter that may be a JSON number or a decimal string.
fn field_u64(data: &[Value], index: usize, path: &Path) -> CoreResult<u64> {
    let value = &data[index];
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        CoreError::index_format(path, format!("field {index} is not a counter: {value}"))
    })
}
