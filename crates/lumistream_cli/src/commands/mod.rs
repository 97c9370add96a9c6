//! CLI command implementations.

pub mod inspect;
pub mod produce;
pub mod read;
