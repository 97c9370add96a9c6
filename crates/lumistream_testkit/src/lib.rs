//! # lumistream Testkit
//!
//! Test utilities for lumistream.
//!
//! This crate provides:
//! - Run directory fixtures in temporary directories
//! - Property-based test generators using proptest
//!
//! The cross-module scenarios live in this crate's `tests/` directory.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lumistream_testkit::prelude::*;
//!
//! #[test]
//! fn reads_published_lumis() {
//!     let fixture = RunFixture::new(1);
//!     fixture.add_lumi(1, 3);
//!     fixture.end_run();
//!
//!     let mut reader = fixture.open_reader(fixture.config()).unwrap();
//!     assert_eq!(collect_events(&mut reader).len(), 3);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
