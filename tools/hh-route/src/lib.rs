//! Highway hierarchies shortest-path engine
//!
//! Serves point-to-point queries from a leveled road graph stored as a
//! paged, bit-packed artifact. Blocks are decoded on demand into a shared
//! cache; queries run a bidirectional, level-ascending search and unpack
//! shortcuts into level-0 routes.

pub mod build;
pub mod config;
pub mod engine;
pub mod formats;
pub mod geo;
pub mod graph;
pub mod logging;
pub mod query;
pub mod spatial;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::{BuildConfig, EngineConfig};
pub use engine::{Engine, RouteSegment};
pub use graph::{VertexId, INFINITY};
pub use hh_common::{Error, Result};
pub use query::{EdgeRef, Route};
