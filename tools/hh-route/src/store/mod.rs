//! Artifact storage: byte sources, bounded-wait reads and the block cache

pub mod cache;
pub mod reader;
pub mod source;

pub use cache::{BlockStore, CacheStats};
pub use reader::{BlockReader, ReaderPool};
pub use source::{ByteSource, FileSource, MemorySource};
