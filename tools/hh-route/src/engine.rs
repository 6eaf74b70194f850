//! Query engine over one opened artifact
//!
//! Opening builds the spatial index and the edge reverser from the level-0
//! blocks; both live as long as the engine. All query methods take `&self`
//! and may run concurrently. The first corrupt block or inconsistency any
//! query runs into is latched, and from then on every query fails with it.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use hh_common::{Error, Result};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::formats::{ArtifactHeader, DistanceTable, OpenedArtifact};
use crate::geo::{is_valid_lat_lon, polyline_length, Coord};
use crate::graph::{Edge, HierarchicalGraph, Vertex, VertexId};
use crate::query::{EdgeRef, EdgeReverser, LeveledSearch, Route, SearchStats, ShortcutExpander};
use crate::spatial::KdTree;
use crate::store::{BlockReader, BlockStore, ByteSource, CacheStats, FileSource, MemorySource};

/// One level-0 edge of a route with its display data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSegment {
    pub from: VertexId,
    pub to: VertexId,
    pub weight: u32,
    pub name: Option<String>,
    #[serde(rename = "ref")]
    pub reference: Option<String>,
    pub motorway_link: bool,
    pub roundabout: bool,
    /// `[lon, lat]` in degrees, endpoints included
    pub geometry: Vec<[f64; 2]>,
    pub length_m: f64,
}

pub struct Engine {
    graph: HierarchicalGraph,
    spatial: KdTree,
    reverser: EdgeReverser,
    config: EngineConfig,
    fatal: RwLock<Option<Error>>,
}

impl Engine {
    pub fn open<P: AsRef<Path>>(path: P, config: EngineConfig) -> Result<Self> {
        let source = FileSource::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "opening artifact");
        Self::from_source(Arc::new(source), config)
    }

    pub fn from_bytes(bytes: impl Into<Bytes>, config: EngineConfig) -> Result<Self> {
        Self::from_source(Arc::new(MemorySource::new(bytes)), config)
    }

    pub fn from_source(source: Arc<dyn ByteSource>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let started = Instant::now();
        let artifact = Arc::new(OpenedArtifact::open(source.as_ref(), config.verify_checksum)?);
        let reader = BlockReader::new(source, config.storage_timeout(), config.reader_threads)?;
        let graph = HierarchicalGraph::new(BlockStore::new(artifact, reader, config.cache_bytes));

        let mut points = Vec::with_capacity(graph.header().levels[0].num_vertices as usize);
        for block_id in graph.level_zero_blocks() {
            let block = graph.store().get_block(block_id)?;
            for (offset, v) in block.vertices.iter().enumerate() {
                let coord = v
                    .coord
                    .ok_or_else(|| Error::corrupt(block_id, format!("vertex {offset} has no coordinate")))?;
                points.push((graph.ids().vertex_id(block_id, offset as u32), coord));
            }
        }
        let spatial = KdTree::new(points);
        let reverser = EdgeReverser::build(&graph)?;
        if reverser.missing() > 0 {
            warn!(missing = reverser.missing(), "level-0 edges without a reverse counterpart");
        }

        debug!(
            levels = graph.num_levels(),
            blocks = graph.header().num_blocks,
            vertices = spatial.len(),
            distance_table = graph.store().artifact().distance_table.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "engine ready"
        );
        Ok(Self {
            graph,
            spatial,
            reverser,
            config,
            fatal: RwLock::new(None),
        })
    }

    pub fn header(&self) -> &ArtifactHeader {
        self.graph.header()
    }

    pub fn graph(&self) -> &HierarchicalGraph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn num_vertices(&self) -> usize {
        self.spatial.len()
    }

    /// Every level-0 vertex id, in block order.
    pub fn level_zero_vertices(&self) -> &[VertexId] {
        self.spatial.ids()
    }

    /// The fatal error this engine latched, if any.
    pub fn failure(&self) -> Option<Error> {
        self.fatal.read().clone()
    }

    fn check(&self) -> Result<()> {
        match &*self.fatal.read() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn latch<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                let mut fatal = self.fatal.write();
                if fatal.is_none() {
                    warn!(error = %err, "refusing further queries on this artifact");
                    *fatal = Some(err.clone());
                }
            }
        }
        result
    }

    fn distance_table(&self) -> Option<&DistanceTable> {
        if self.config.use_distance_table {
            self.graph.store().artifact().distance_table.as_ref()
        } else {
            None
        }
    }

    /// Closest level-0 vertex to a WGS84 position.
    pub fn nearest_vertex(&self, lat: f64, lon: f64) -> Result<Option<VertexId>> {
        self.check()?;
        if !is_valid_lat_lon(lat, lon) {
            return Err(Error::InvalidInput(format!("invalid coordinates ({lat}, {lon})")));
        }
        Ok(self.spatial.nearest(Coord::from_degrees(lat, lon)))
    }

    /// Level-0 vertices inside a rectangle, bounds inclusive, sorted by id.
    pub fn vertices_within(&self, min: Coord, max: Coord) -> Result<Vec<VertexId>> {
        self.check()?;
        Ok(self.spatial.points_within_rectangle(min, max))
    }

    pub fn get_vertex(&self, id: VertexId) -> Result<Vertex> {
        self.check()?;
        self.latch(self.graph.get_vertex(id))
    }

    pub fn outbound_edges(&self, id: VertexId, level: u8) -> Result<Vec<Edge>> {
        self.check()?;
        self.latch(self.graph.outbound_edges(id, level))
    }

    /// Shortest route between two level-0 vertices. `Ok(None)` when the
    /// target is unreachable.
    pub fn shortest_path(&self, s: VertexId, t: VertexId) -> Result<Option<Route>> {
        Ok(self.route(s, t, None)?.map(|(route, _)| route))
    }

    pub fn shortest_path_cancellable(
        &self,
        s: VertexId,
        t: VertexId,
        cancel: &CancellationToken,
    ) -> Result<Option<Route>> {
        Ok(self.route(s, t, Some(cancel))?.map(|(route, _)| route))
    }

    /// Shortest route plus the search counters.
    pub fn route(
        &self,
        s: VertexId,
        t: VertexId,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<(Route, SearchStats)>> {
        self.check()?;
        self.latch(self.route_unchecked(s, t, cancel))
    }

    fn route_unchecked(
        &self,
        s: VertexId,
        t: VertexId,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<(Route, SearchStats)>> {
        let mut search = LeveledSearch::new(&self.graph).with_distance_table(self.distance_table());
        if let Some(token) = cancel {
            search = search.with_cancellation(token);
        }
        let Some(result) = search.run(s, t)? else {
            return Ok(None);
        };
        let route = ShortcutExpander::new(&self.graph, &self.reverser).expand_result(&result)?;
        Ok(Some((route, result.stats)))
    }

    /// Unpack a forward path of hierarchy edges into level-0 edges. A path
    /// that is already level-0 comes back unchanged.
    ///
    /// The path comes from the caller, so a mismatch with the stored
    /// records is reported but not latched.
    pub fn expand_path(&self, path: &[EdgeRef]) -> Result<Vec<EdgeRef>> {
        self.check()?;
        ShortcutExpander::new(&self.graph, &self.reverser).expand_path(path)
    }

    /// Names, flags and geometry for every edge of a route.
    pub fn describe(&self, route: &Route) -> Result<Vec<RouteSegment>> {
        self.check()?;
        self.latch(self.describe_unchecked(route))
    }

    fn describe_unchecked(&self, route: &Route) -> Result<Vec<RouteSegment>> {
        let mut segments = Vec::with_capacity(route.edges.len());
        for e in &route.edges {
            let source = self.graph.vertex_ref(e.source)?;
            let target = self.graph.vertex_ref(e.target)?;
            let stored = source.edges().get(e.hop as usize).ok_or_else(|| {
                Error::GraphInconsistency(format!("{} has no edge with hop {}", e.source, e.hop))
            })?;
            let coord = |v: &crate::graph::VertexRef| {
                v.record().coord.ok_or_else(|| {
                    Error::GraphInconsistency(format!("route vertex {} has no coordinate", v.id))
                })
            };

            let mut points = vec![coord(&source)?];
            let satellite = stored.satellite.as_deref();
            if let Some(s) = satellite {
                points.extend_from_slice(&s.waypoints);
            }
            points.push(coord(&target)?);
            segments.push(RouteSegment {
                from: e.source,
                to: e.target,
                weight: e.weight,
                name: satellite.and_then(|s| s.name.clone()),
                reference: satellite.and_then(|s| s.reference.clone()),
                motorway_link: satellite.is_some_and(|s| s.motorway_link),
                roundabout: satellite.is_some_and(|s| s.roundabout),
                length_m: polyline_length(&points),
                geometry: points.iter().map(|c| [c.lon_deg(), c.lat_deg()]).collect(),
            });
        }
        Ok(segments)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.graph.store().sync();
        self.graph.store().stats()
    }
}
