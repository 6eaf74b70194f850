//! Error taxonomy for the highway hierarchies query engine
//!
//! Every component reports failures through [`Error`]. Data corruption
//! (`CorruptBlock`, `GraphInconsistency`) is fatal for the artifact it came
//! from; `StorageTimeout` is the only variant a caller should retry.
//! An unreachable target is not an error and never appears here.

use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Main error type for engine operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// An id (vertex, block, level, table row) outside the artifact's range
    #[error("{kind} id {id} out of range (limit {limit})")]
    OutOfRange {
        kind: &'static str,
        id: u64,
        limit: u64,
    },

    /// A block that is truncated or whose fields do not decode
    #[error("corrupt block {block}: {reason}")]
    CorruptBlock { block: u32, reason: String },

    /// Decoded data that contradicts itself (missing reverse edge, broken shortcut)
    #[error("graph inconsistency: {0}")]
    GraphInconsistency(String),

    /// A block read did not complete in time
    #[error("storage read of block {block} timed out after {waited:?}")]
    StorageTimeout { block: u32, waited: Duration },

    /// A query vertex that cannot start a search
    #[error("vertex not found: {0}")]
    VertexNotFound(String),

    /// The query's cancellation signal fired
    #[error("query cancelled")]
    Cancelled,

    /// Artifact container problems: magic, version, checksum, segment bounds
    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),

    /// Invalid configuration or parameters
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl Error {
    pub fn corrupt(block: u32, reason: impl Into<String>) -> Self {
        Error::CorruptBlock {
            block,
            reason: reason.into(),
        }
    }

    pub fn out_of_range(kind: &'static str, id: impl Into<u64>, limit: impl Into<u64>) -> Self {
        Error::OutOfRange {
            kind,
            id: id.into(),
            limit: limit.into(),
        }
    }

    /// Data corruption: the artifact must not serve further queries.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::CorruptBlock { .. } | Error::GraphInconsistency(_)
        )
    }

    /// Transient failure a caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StorageTimeout { .. })
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

/// Convenience result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
