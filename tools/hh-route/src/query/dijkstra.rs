//! Single-level Dijkstra
//!
//! Used three ways: unpacking shortcuts inside one level's core, walking
//! the top level between two distance-table vertices, and as the reference
//! answer on the plain level-0 graph.

use std::cmp::Reverse;

use hh_common::Result;
use priority_queue::PriorityQueue;
use rustc_hash::{FxBuildHasher, FxHashMap};

use super::{Direction, EdgeRef};
use crate::graph::{HierarchicalGraph, VertexId, INFINITY};

#[derive(Debug, Clone, Copy)]
pub struct Scope {
    pub direction: Direction,
    pub core_only: bool,
    /// Distances above this are not explored.
    pub bound: u32,
}

impl Scope {
    pub fn unbounded(direction: Direction) -> Self {
        Self {
            direction,
            core_only: false,
            bound: INFINITY,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    dist: u32,
    parent: Option<EdgeRef>,
}

fn run(
    graph: &HierarchicalGraph,
    from: VertexId,
    to: Option<VertexId>,
    scope: Scope,
) -> Result<FxHashMap<VertexId, Entry>> {
    let mut entries: FxHashMap<VertexId, Entry> = FxHashMap::default();
    let mut queue: PriorityQueue<VertexId, Reverse<u32>, FxBuildHasher> =
        PriorityQueue::with_default_hasher();
    entries.insert(from, Entry { dist: 0, parent: None });
    queue.push(from, Reverse(0));

    while let Some((u, Reverse(dist))) = queue.pop() {
        if Some(u) == to {
            break;
        }
        let v = if u == from {
            graph.vertex_ref(u)?
        } else {
            graph.follow(u)?
        };
        for (hop, e) in v.edges().iter().enumerate() {
            if !scope.direction.allows(e) || (scope.core_only && !e.core) {
                continue;
            }
            let d = dist.saturating_add(e.weight);
            if d > scope.bound || d == INFINITY {
                continue;
            }
            let improves = entries.get(&e.target).map_or(true, |old| d < old.dist);
            if improves {
                entries.insert(
                    e.target,
                    Entry {
                        dist: d,
                        parent: Some(EdgeRef {
                            source: u,
                            hop: hop as u32,
                            target: e.target,
                            weight: e.weight,
                        }),
                    },
                );
                queue.push_increase(e.target, Reverse(d));
            }
        }
    }
    Ok(entries)
}

fn unwind(entries: &FxHashMap<VertexId, Entry>, to: VertexId) -> Vec<EdgeRef> {
    let mut path = Vec::new();
    let mut cur = to;
    while let Some(edge) = entries.get(&cur).and_then(|e| e.parent) {
        path.push(edge);
        cur = edge.source;
    }
    path.reverse();
    path
}

/// Shortest path from `from` to `to` on their common level within `scope`,
/// as edges stored along the search direction.
pub fn scoped_path(
    graph: &HierarchicalGraph,
    from: VertexId,
    to: VertexId,
    scope: Scope,
) -> Result<Option<(u32, Vec<EdgeRef>)>> {
    let entries = run(graph, from, Some(to), scope)?;
    Ok(entries
        .get(&to)
        .map(|e| e.dist)
        .map(|dist| (dist, unwind(&entries, to))))
}

/// Plain Dijkstra over forward level-0 edges.
pub fn reference_distance(graph: &HierarchicalGraph, s: VertexId, t: VertexId) -> Result<Option<u32>> {
    Ok(scoped_path(graph, s, t, Scope::unbounded(Direction::Forward))?.map(|(d, _)| d))
}

/// Forward level-0 distances from `s` to everything it reaches.
pub fn reference_distances(graph: &HierarchicalGraph, s: VertexId) -> Result<FxHashMap<VertexId, u32>> {
    Ok(run(graph, s, None, Scope::unbounded(Direction::Forward))?
        .into_iter()
        .map(|(v, e)| (v, e.dist))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[test]
    fn test_reference_distances_from_a() {
        let f = Fixture::chains();
        let dist = reference_distances(&f.graph, f.ids[0]).unwrap();
        let expected = [0, 2, 7, 8, 10, 12, 13];
        for (i, want) in expected.into_iter().enumerate() {
            assert_eq!(dist.get(&f.ids[i]), Some(&want), "vertex {i}");
        }
    }

    #[test]
    fn test_bound_cuts_the_search() {
        let f = Fixture::chains();
        let (a, b) = (f.ids[0], f.ids[3]);
        let tight = Scope {
            bound: 7,
            ..Scope::unbounded(Direction::Forward)
        };
        assert_eq!(scoped_path(&f.graph, a, b, tight).unwrap(), None);

        let exact = Scope { bound: 8, ..tight };
        let (d, path) = scoped_path(&f.graph, a, b, exact).unwrap().unwrap();
        assert_eq!(d, 8);
        let walk: Vec<_> = path.iter().map(|e| e.target).collect();
        assert_eq!(walk, vec![f.ids[1], f.ids[2], b]);
        assert_eq!(path[0].source, a);
    }

    #[test]
    fn test_core_only_takes_the_shortcut() {
        let f = Fixture::chains();
        let (a1, b1) = (f.up(f.ids[0]), f.up(f.ids[3]));
        let scope = Scope {
            core_only: true,
            ..Scope::unbounded(Direction::Forward)
        };
        let (d, path) = scoped_path(&f.graph, a1, b1, scope).unwrap().unwrap();
        assert_eq!(d, 8);
        assert_eq!(path.len(), 1);
        assert_eq!((path[0].source, path[0].target), (a1, b1));
    }

    #[test]
    fn test_backward_scope_follows_backward_flags() {
        let f = Fixture::chains();
        let (d, path) = scoped_path(&f.graph, f.ids[3], f.ids[0], Scope::unbounded(Direction::Backward))
            .unwrap()
            .unwrap();
        assert_eq!(d, 8);
        // stored at the vertex the backward search expanded
        assert_eq!(path[0].source, f.ids[3]);
        assert_eq!(path.last().unwrap().target, f.ids[0]);
    }

    #[test]
    fn test_source_is_distance_zero() {
        let f = Fixture::chains();
        assert_eq!(reference_distance(&f.graph, f.ids[5], f.ids[5]).unwrap(), Some(0));
    }
}
