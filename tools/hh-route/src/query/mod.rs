//! Query-time algorithms: leveled bidirectional search, shortcut expansion
//! and the reference Dijkstra used to check them

pub mod dijkstra;
pub mod expand;
pub mod reverser;
pub mod search;

use serde::Serialize;

use crate::formats::block::BlockEdge;
use crate::graph::VertexId;

pub use expand::ShortcutExpander;
pub use reverser::EdgeReverser;
pub use search::{LeveledSearch, SearchResult, SearchStats};

/// One concrete edge: the `hop`-th outbound edge of `source`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EdgeRef {
    pub source: VertexId,
    pub hop: u32,
    pub target: VertexId,
    pub weight: u32,
}

/// A contiguous level-0 walk from source to target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub distance: u32,
    pub edges: Vec<EdgeRef>,
}

impl Route {
    /// Vertices visited, endpoints included. Empty for an empty route.
    pub fn vertices(&self) -> Vec<VertexId> {
        let mut out: Vec<VertexId> = self.edges.iter().map(|e| e.source).collect();
        if let Some(last) = self.edges.last() {
            out.push(last.target);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn flip(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Direction::Forward => 0,
            Direction::Backward => 1,
        }
    }

    /// Whether a search in this direction may use `edge`.
    pub fn allows(self, edge: &BlockEdge) -> bool {
        match self {
            Direction::Forward => edge.forward,
            Direction::Backward => edge.backward,
        }
    }
}
