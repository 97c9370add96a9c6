//! # lumistream core
//!
//! Streaming input for the data files of a live data-taking run.
//!
//! A producer publishes one streamer file per lumi-section into a run
//! directory, followed by a small JSON index announcing it. This crate
//! provides:
//! - [`tracker`]: discovery of published lumi-sections, in order
//! - [`streamer`]: the streamer file format, a read session and a writer
//! - [`registry`]: the schema registry merged from file headers
//! - [`filter`]: event selection by run, lumi-section and event number
//! - [`reader`]: the reader tying these together for a downstream consumer
//!
//! ```rust,ignore
//! use lumistream_core::{ReaderConfig, SchemaRegistry, StreamerReader};
//!
//! let registry = SchemaRegistry::shared();
//! let mut reader = StreamerReader::open(ReaderConfig::new(123, "/data"), registry.clone())?;
//! registry.write().freeze()?;
//!
//! while reader.check_next_event(&mut |event: &EventRecord| {
//!     println!("{}", event.id);
//!     Ok(())
//! })? {}
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
pub mod filter;
pub mod reader;
pub mod registry;
mod stats;
pub mod streamer;
pub mod tracker;
mod types;

pub use config::ReaderConfig;
pub use error::{CoreError, CoreResult};
pub use filter::{EventFilter, EventRange, EventSkipper, LumiRange};
pub use reader::{EventDeserializer, OpenOutcome, ReaderPhase, StreamerReader};
pub use registry::{MergeOutcome, SchemaRegistry, SharedRegistry};
pub use stats::{ReaderStats, StatsSnapshot};
pub use streamer::{EventRecord, InitHeader, ProductDescriptor, StreamerFile, StreamerWriter};
pub use tracker::{
    DirectoryIndex, EndOfRunEntry, FileTracker, IndexSource, LumiEntry, MemoryIndex, RunLayout,
    TrackerState,
};
pub use types::{EventId, EventNumber, LumiSection, RunNumber};

/// Version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
