//! Binary artifact formats

pub mod artifact;
pub mod bits;
pub mod block;
pub mod crc;
pub mod distance_table;
pub mod header;
pub mod pointer_index;

pub use artifact::{encode_artifact, ArtifactFile, EncodedArtifact, OpenedArtifact};
pub use block::{Block, BlockEdge, BlockLayout, BlockVertex, EdgeSatellite};
pub use distance_table::DistanceTable;
pub use header::{ArtifactHeader, BoundingBox, LevelInfo};
pub use pointer_index::{BlockPointer, BlockPointerIndex};
