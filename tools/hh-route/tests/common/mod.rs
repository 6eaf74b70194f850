//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use hh_route::build::{ArtifactWriter, GridSpec, HierarchyBuilder, NetworkEdge, NetworkVertex, RoadNetwork};
use hh_route::formats::EdgeSatellite;
use hh_route::geo::Coord;
use hh_route::{BuildConfig, Engine, EngineConfig, Route, VertexId};

pub fn road(from: u32, to: u32, weight: u32) -> NetworkEdge {
    NetworkEdge {
        from,
        to,
        weight,
        oneway: false,
        satellite: EdgeSatellite::default(),
    }
}

pub fn named(from: u32, to: u32, weight: u32, name: &str) -> NetworkEdge {
    let mut e = road(from, to, weight);
    e.satellite.name = Some(name.to_string());
    e
}

/// Vertices on a diagonal, ~1.1 km apart.
pub fn vertices(n: u32) -> Vec<NetworkVertex> {
    (0..n)
        .map(|i| NetworkVertex {
            lat: 48.0 + i as f64 * 0.01,
            lon: 11.0 + i as f64 * 0.01,
        })
        .collect()
}

/// Three ways from `a` (0) to `b` (3): through x1 (1) and x2 (2) with total
/// weight 8, through c (4) with 20, through d (5) with 24. `e` (6) is a
/// dead end hanging off c.
pub fn three_chains() -> RoadNetwork {
    let mut via_x1 = named(0, 1, 2, "Chain Road");
    via_x1.satellite.reference = Some("B 13".to_string());
    via_x1.satellite.waypoints = vec![Coord::from_degrees(48.004, 11.006)];
    RoadNetwork {
        vertices: vertices(7),
        edges: vec![
            via_x1,
            named(1, 2, 5, "Chain Road"),
            road(2, 3, 1),
            road(0, 4, 10),
            road(4, 3, 10),
            road(0, 5, 12),
            road(5, 3, 12),
            road(6, 4, 3),
        ],
    }
}

pub fn grid(rows: u32, cols: u32, seed: u64, oneway_ratio: f64) -> RoadNetwork {
    RoadNetwork::grid(GridSpec {
        rows,
        cols,
        seed,
        oneway_ratio,
        drop_ratio: 0.25,
    })
}

/// Engine config for in-memory tests: reads on the calling thread.
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        storage_timeout_ms: None,
        ..Default::default()
    }
}

pub fn encode(network: &RoadNetwork, build: &BuildConfig) -> Vec<u8> {
    let hierarchy = HierarchyBuilder::new(build.clone())
        .build(network)
        .expect("hierarchy");
    ArtifactWriter::new(build.clone())
        .encode(&hierarchy)
        .expect("encode")
        .bytes
}

pub fn engine_with(network: &RoadNetwork, build: &BuildConfig, config: EngineConfig) -> Engine {
    Engine::from_bytes(encode(network, build), config).expect("open engine")
}

pub fn engine(network: &RoadNetwork) -> Engine {
    engine_with(network, &BuildConfig::default(), engine_config())
}

/// Level-0 vertex id of every network vertex, matched by coordinate.
pub fn ids_by_index(engine: &Engine, network: &RoadNetwork) -> Vec<VertexId> {
    network
        .coords()
        .iter()
        .map(|c| {
            let id = engine
                .nearest_vertex(c.lat_deg(), c.lon_deg())
                .expect("nearest")
                .expect("non-empty");
            assert_eq!(engine.get_vertex(id).expect("vertex").coord, Some(*c));
            id
        })
        .collect()
}

/// Textbook Dijkstra over the network's arcs, independent of any artifact.
pub fn network_distances(network: &RoadNetwork, source: u32) -> Vec<Option<u32>> {
    let n = network.num_vertices();
    let mut adjacency = vec![Vec::new(); n];
    for arc in network.arcs() {
        adjacency[arc.from as usize].push((arc.to, arc.weight));
    }
    let mut dist = vec![None; n];
    let mut heap = BinaryHeap::new();
    heap.push(Reverse((0u32, source)));
    while let Some(Reverse((d, u))) = heap.pop() {
        if dist[u as usize].is_some() {
            continue;
        }
        dist[u as usize] = Some(d);
        for &(v, w) in &adjacency[u as usize] {
            if dist[v as usize].is_none() {
                heap.push(Reverse((d + w, v)));
            }
        }
    }
    dist
}

/// A route is a chain of stored level-0 edges from `s` to `t` whose
/// weights add up to its distance.
pub fn assert_valid_route(engine: &Engine, route: &Route, s: VertexId, t: VertexId) {
    if s == t {
        assert_eq!(route.distance, 0);
        assert!(route.edges.is_empty());
        return;
    }
    assert_eq!(route.edges.first().map(|e| e.source), Some(s));
    assert_eq!(route.edges.last().map(|e| e.target), Some(t));
    for pair in route.edges.windows(2) {
        assert_eq!(pair[0].target, pair[1].source, "route is not contiguous");
    }
    let mut total = 0u32;
    for e in &route.edges {
        let stored = engine.outbound_edges(e.source, 0).expect("edges");
        let edge = stored
            .iter()
            .find(|x| x.hop == e.hop)
            .unwrap_or_else(|| panic!("{} has no edge {}", e.source, e.hop));
        assert_eq!(edge.target, e.target);
        assert_eq!(edge.weight, e.weight);
        assert!(edge.forward, "route uses a backward-only edge");
        total += e.weight;
    }
    assert_eq!(total, route.distance);
}
