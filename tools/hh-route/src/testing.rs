//! Small in-memory graphs for unit tests

use std::sync::Arc;

use crate::build::{ArtifactWriter, HierarchyBuilder, NetworkEdge, NetworkVertex, RoadNetwork};
use crate::config::BuildConfig;
use crate::formats::{EdgeSatellite, OpenedArtifact};
use crate::graph::{HierarchicalGraph, VertexId};
use crate::store::{BlockReader, BlockStore, ByteSource, MemorySource};

fn road(from: u32, to: u32, weight: u32) -> NetworkEdge {
    NetworkEdge {
        from,
        to,
        weight,
        oneway: false,
        satellite: EdgeSatellite::default(),
    }
}

/// a(0) reaches b(3) over x1(1), x2(2) for 8, over c(4) for 20 and over
/// d(5) for 24; e(6) hangs off c.
pub fn three_chains() -> RoadNetwork {
    RoadNetwork {
        vertices: (0..7)
            .map(|i| NetworkVertex {
                lat: 48.0 + i as f64 * 0.01,
                lon: 11.0 + i as f64 * 0.01,
            })
            .collect(),
        edges: vec![
            road(0, 1, 2),
            road(1, 2, 5),
            road(2, 3, 1),
            road(0, 4, 10),
            road(4, 3, 10),
            road(0, 5, 12),
            road(5, 3, 12),
            road(6, 4, 3),
        ],
    }
}

pub struct Fixture {
    pub graph: HierarchicalGraph,
    /// Level-0 id of every network vertex, by network index
    pub ids: Vec<VertexId>,
}

impl Fixture {
    pub fn new(network: &RoadNetwork, build: BuildConfig) -> Self {
        let hierarchy = HierarchyBuilder::new(build.clone()).build(network).unwrap();
        let bytes = ArtifactWriter::new(build).encode(&hierarchy).unwrap().bytes;
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(bytes));
        let artifact = Arc::new(OpenedArtifact::open(source.as_ref(), true).unwrap());
        let reader = BlockReader::new(source, None, 1).unwrap();
        let graph = HierarchicalGraph::new(BlockStore::new(artifact, reader, 1 << 20));

        let coords = network.coords();
        let mut ids = vec![VertexId(u32::MAX); coords.len()];
        for block_id in graph.level_zero_blocks() {
            let block = graph.store().get_block(block_id).unwrap();
            for (offset, v) in block.vertices.iter().enumerate() {
                let index = coords.iter().position(|c| Some(*c) == v.coord).unwrap();
                ids[index] = graph.ids().vertex_id(block_id, offset as u32);
            }
        }
        Self { graph, ids }
    }

    pub fn chains() -> Self {
        Self::new(&three_chains(), BuildConfig::default())
    }

    /// Id of `vertex` one level up.
    pub fn up(&self, vertex: VertexId) -> VertexId {
        self.graph.vertex_ref(vertex).unwrap().overlying().unwrap()
    }
}
