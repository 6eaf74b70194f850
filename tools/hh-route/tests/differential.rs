//! Hierarchy answers against plain Dijkstra on seeded grids

mod common;

use common::*;
use hh_route::build::{GridSpec, RoadNetwork};
use hh_route::query::dijkstra::reference_distance;
use hh_route::{BuildConfig, Engine, EngineConfig};

fn builds() -> Vec<BuildConfig> {
    vec![
        BuildConfig::default(),
        BuildConfig {
            block_vertices: 4,
            ..Default::default()
        },
        BuildConfig {
            neighborhood_radius: 150,
            hop_indices: false,
            block_vertices: 8,
            ..Default::default()
        },
        BuildConfig {
            neighborhood_radius: 5_000,
            ..Default::default()
        },
        BuildConfig {
            max_levels: 2,
            ..Default::default()
        },
    ]
}

/// Every pair of the network, checked against textbook Dijkstra.
fn check_all_pairs(engine: &Engine, network: &RoadNetwork, label: &str) {
    let ids = ids_by_index(engine, network);
    let n = network.num_vertices() as u32;
    for s in 0..n {
        let expected = network_distances(network, s);
        for t in 0..n {
            let got = engine
                .shortest_path(ids[s as usize], ids[t as usize])
                .unwrap_or_else(|e| panic!("{label}: {s} -> {t}: {e}"));
            assert_eq!(
                got.as_ref().map(|r| r.distance),
                expected[t as usize],
                "{label}: {s} -> {t}"
            );
            if let Some(route) = got {
                assert_valid_route(engine, &route, ids[s as usize], ids[t as usize]);
            }
        }
    }
}

#[test]
fn test_grids_match_dijkstra() {
    for seed in [1, 7, 42] {
        let network = grid(6, 6, seed, 0.15);
        for (i, build) in builds().into_iter().enumerate() {
            for use_distance_table in [true, false] {
                let config = EngineConfig {
                    use_distance_table,
                    ..engine_config()
                };
                let engine = engine_with(&network, &build, config);
                check_all_pairs(
                    &engine,
                    &network,
                    &format!("seed {seed} build {i} table {use_distance_table}"),
                );
            }
        }
    }
}

#[test]
fn test_sparse_grid_with_long_chains() {
    // many dropped roads leave long degree-2 chains and dead ends
    let network = RoadNetwork::grid(GridSpec {
        rows: 5,
        cols: 9,
        seed: 3,
        oneway_ratio: 0.1,
        drop_ratio: 0.45,
    });
    for build in builds() {
        let engine = engine_with(&network, &build, engine_config());
        check_all_pairs(&engine, &network, &format!("{build:?}"));
    }
}

#[test]
fn test_reference_dijkstra_agrees_with_network() {
    let network = grid(5, 5, 11, 0.2);
    let engine = engine(&network);
    let ids = ids_by_index(&engine, &network);
    for s in [0u32, 12, 24] {
        let expected = network_distances(&network, s);
        for t in 0..network.num_vertices() {
            let got = reference_distance(engine.graph(), ids[s as usize], ids[t]).unwrap();
            assert_eq!(got, expected[t], "{s} -> {t}");
        }
    }
}

#[test]
fn test_two_way_grid_is_symmetric() {
    let network = grid(6, 6, 5, 0.0);
    let engine = engine(&network);
    let ids = ids_by_index(&engine, &network);
    for &s in ids.iter().step_by(5) {
        for &t in &ids {
            let there = engine.shortest_path(s, t).unwrap().map(|r| r.distance);
            let back = engine.shortest_path(t, s).unwrap().map(|r| r.distance);
            assert_eq!(there, back, "{s} <-> {t}");
        }
    }
}

#[test]
fn test_expanded_routes_are_fixed_points() {
    let network = grid(6, 6, 9, 0.1);
    let engine = engine(&network);
    let ids = ids_by_index(&engine, &network);
    let mut checked = 0;
    for &s in ids.iter().step_by(7) {
        for &t in ids.iter().rev().step_by(3) {
            if let Some(route) = engine.shortest_path(s, t).unwrap() {
                assert_eq!(engine.expand_path(&route.edges).unwrap(), route.edges);
                checked += 1;
            }
        }
    }
    assert!(checked > 0);
}

#[test]
fn test_search_uses_the_hierarchy() {
    let network = RoadNetwork::grid(GridSpec {
        rows: 10,
        cols: 10,
        seed: 4,
        oneway_ratio: 0.0,
        drop_ratio: 0.0,
    });
    let engine = engine(&network);
    assert!(engine.header().num_levels() > 1);
    let ids = ids_by_index(&engine, &network);
    let (route, stats) = engine.route(ids[0], ids[99], None).unwrap().unwrap();
    assert_valid_route(&engine, &route, ids[0], ids[99]);
    assert!(stats.settled.iter().sum::<u64>() > 0);
    assert!(stats.ascents > 0, "{stats:?}");
}
