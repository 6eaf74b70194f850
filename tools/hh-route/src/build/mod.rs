//! Artifact production: road network input, leveled hierarchy
//! construction and the artifact writer

pub mod hierarchy;
pub mod network;
pub mod writer;

pub use hierarchy::{Hierarchy, HierarchyBuilder, HierarchyLevel, LevelEdge, LevelVertex};
pub use network::{GridSpec, NetworkEdge, NetworkVertex, RoadArc, RoadNetwork};
pub use writer::ArtifactWriter;
