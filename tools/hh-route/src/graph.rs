//! Hierarchical graph model over the block store
//!
//! A vertex id names one per-level representative: the block it lives in
//! and its offset there. The same logical vertex has one id per level it
//! reaches, linked through `level_zero`, `subjacent` and `overlying`.

use std::fmt;
use std::sync::Arc;

use hh_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::formats::block::{Block, BlockEdge, BlockVertex, EdgeSatellite};
use crate::formats::ArtifactHeader;
use crate::geo::Coord;
use crate::store::BlockStore;

/// Neighborhood of a vertex with no finite radius, and an unreachable distance
pub const INFINITY: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexId(pub u32);

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Split of a 32-bit vertex id into block id and vertex offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdLayout {
    pub block_bits: u8,
    pub offset_bits: u8,
}

impl IdLayout {
    pub fn new(block_bits: u8, offset_bits: u8) -> Self {
        Self {
            block_bits,
            offset_bits,
        }
    }

    pub fn vertex_id(&self, block: u32, offset: u32) -> VertexId {
        VertexId((((block as u64) << self.offset_bits) | offset as u64) as u32)
    }

    pub fn block_of(&self, id: VertexId) -> u32 {
        ((id.0 as u64) >> self.offset_bits) as u32
    }

    pub fn offset_of(&self, id: VertexId) -> u32 {
        (id.0 as u64 & ((1u64 << self.offset_bits) - 1)) as u32
    }
}

/// Decoded per-level vertex, independent of the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vertex {
    pub id: VertexId,
    pub level: u8,
    pub neighborhood: u32,
    pub level_zero: VertexId,
    pub subjacent: Option<VertexId>,
    pub overlying: Option<VertexId>,
    pub coord: Option<Coord>,
    pub out_degree: u32,
}

/// Decoded outbound edge. `hop` is its position in the source's edge list,
/// the numbering hop indices refer to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub source: VertexId,
    pub hop: u32,
    pub target: VertexId,
    pub weight: u32,
    pub forward: bool,
    pub backward: bool,
    pub core: bool,
    pub min_level: u8,
    pub hop_indices: Option<Vec<u32>>,
    pub satellite: Option<Box<EdgeSatellite>>,
}

impl Edge {
    fn from_block(source: VertexId, hop: u32, e: &BlockEdge) -> Self {
        Self {
            source,
            hop,
            target: e.target,
            weight: e.weight,
            forward: e.forward,
            backward: e.backward,
            core: e.core,
            min_level: e.min_level,
            hop_indices: e.hop_indices.clone(),
            satellite: e.satellite.clone(),
        }
    }

    pub fn is_shortcut(&self) -> bool {
        self.min_level > 0
    }
}

/// A vertex inside its cached block. Holding one keeps the block alive
/// even if the cache evicts it.
#[derive(Clone)]
pub struct VertexRef {
    pub id: VertexId,
    block: Arc<Block>,
    offset: usize,
}

impl VertexRef {
    pub fn level(&self) -> u8 {
        self.block.level
    }

    pub fn record(&self) -> &BlockVertex {
        &self.block.vertices[self.offset]
    }

    pub fn edges(&self) -> &[BlockEdge] {
        self.block.edges_of(self.offset)
    }

    pub fn neighborhood(&self) -> u32 {
        self.record().neighborhood
    }

    pub fn overlying(&self) -> Option<VertexId> {
        self.record().overlying
    }

    pub fn subjacent(&self) -> Option<VertexId> {
        self.record().subjacent
    }

    /// Level-0 identity of this vertex.
    pub fn level_zero(&self) -> VertexId {
        self.record().level_zero.unwrap_or(self.id)
    }

    pub fn to_vertex(&self) -> Vertex {
        let r = self.record();
        Vertex {
            id: self.id,
            level: self.level(),
            neighborhood: r.neighborhood,
            level_zero: self.level_zero(),
            subjacent: r.subjacent,
            overlying: r.overlying,
            coord: r.coord,
            out_degree: r.num_edges,
        }
    }
}

pub struct HierarchicalGraph {
    store: BlockStore,
}

impl HierarchicalGraph {
    pub fn new(store: BlockStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn header(&self) -> &ArtifactHeader {
        &self.store.artifact().header
    }

    pub fn ids(&self) -> IdLayout {
        self.store.layout().ids
    }

    pub fn num_levels(&self) -> u8 {
        self.header().num_levels() as u8
    }

    pub fn top_level(&self) -> u8 {
        self.num_levels().saturating_sub(1)
    }

    /// Level a vertex id belongs to, without loading its block.
    pub fn level_of(&self, id: VertexId) -> Result<u8> {
        let block = self.ids().block_of(id);
        self.header()
            .level_of_block(block)
            .ok_or_else(|| Error::out_of_range("vertex", id.0, self.vertex_id_limit()))
    }

    fn vertex_id_limit(&self) -> u64 {
        (self.header().num_blocks as u64) << self.ids().offset_bits
    }

    pub fn vertex_ref(&self, id: VertexId) -> Result<VertexRef> {
        let ids = self.ids();
        let block_id = ids.block_of(id);
        if block_id >= self.header().num_blocks {
            return Err(Error::out_of_range("vertex", id.0, self.vertex_id_limit()));
        }
        let block = self.store.get_block(block_id)?;
        let offset = ids.offset_of(id) as usize;
        if offset >= block.num_vertices() {
            return Err(Error::out_of_range("vertex", id.0, self.vertex_id_limit()));
        }
        Ok(VertexRef { id, block, offset })
    }

    /// Resolve a pointer read from the artifact. One that misses its block
    /// is broken data, not a bad argument.
    pub fn follow(&self, id: VertexId) -> Result<VertexRef> {
        self.vertex_ref(id).map_err(|err| match err {
            Error::OutOfRange { .. } => {
                Error::GraphInconsistency(format!("dangling vertex pointer {id}: {err}"))
            }
            other => other,
        })
    }

    pub fn get_vertex(&self, id: VertexId) -> Result<Vertex> {
        Ok(self.vertex_ref(id)?.to_vertex())
    }

    /// Outbound edges of `id` that exist at `level`, in hop-index order.
    /// Edges filtered out leave gaps in the `hop` numbering.
    pub fn outbound_edges(&self, id: VertexId, level: u8) -> Result<Vec<Edge>> {
        let v = self.vertex_ref(id)?;
        Ok(v.edges()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.min_level <= level)
            .map(|(hop, e)| Edge::from_block(id, hop as u32, e))
            .collect())
    }

    /// Neighborhood radius of the logical vertex `id` at `level`.
    pub fn neighborhood(&self, id: VertexId, level: u8) -> Result<u32> {
        let mut v = self.vertex_ref(id)?;
        if level < v.level() {
            return Err(Error::out_of_range("level", level, v.level()));
        }
        while v.level() < level {
            let up = v
                .overlying()
                .ok_or_else(|| Error::out_of_range("level", level, v.level()))?;
            v = self.follow(up)?;
        }
        Ok(v.neighborhood())
    }

    /// Block ids holding level 0.
    pub fn level_zero_blocks(&self) -> std::ops::Range<u32> {
        let level = self.header().levels[0];
        level.first_block..level.first_block + level.num_blocks
    }
}
