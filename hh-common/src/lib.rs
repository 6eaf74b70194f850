//! Common types for the highway hierarchies toolkit

pub mod error;

pub use error::{Error, Result};
