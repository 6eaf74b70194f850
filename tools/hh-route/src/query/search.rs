//! Bidirectional, level-ascending highway hierarchies search
//!
//! Each direction keeps a queue ordered by `(distance, level, gap)` and a
//! label map keyed by level-0 identity, so the two frontiers meet no matter
//! which level's representative each one holds.
//!
//! Settling a vertex relaxes its edges at the label's level. While the
//! gap is finite only core edges are relaxed, and an edge that would drive
//! the gap negative is not relaxed at all; if any edge was held back that
//! way the vertex also relaxes at its next level up, with that level's
//! neighborhood as the new gap. A label reached with an infinite gap takes
//! the neighborhood of the vertex it lands on.
//!
//! With a distance table, vertices reaching the top level are recorded as
//! table entries instead of relaxing top-level edges; entry pairs bound the
//! answer through the table.

use std::cmp::Reverse;
use std::time::Instant;

use hh_common::{Error, Result};
use priority_queue::PriorityQueue;
use rustc_hash::{FxBuildHasher, FxHashMap};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::dijkstra::{scoped_path, Scope};
use super::{Direction, EdgeRef};
use crate::formats::DistanceTable;
use crate::graph::{HierarchicalGraph, VertexId, VertexRef, INFINITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    dist: u32,
    level: u8,
    gap: u32,
}

#[derive(Debug, Clone, Copy)]
struct Label {
    key: Key,
    rep: VertexId,
    settled: bool,
    /// Edge this label was reached over, and the tail's level-0 identity.
    parent: Option<(VertexId, EdgeRef)>,
}

#[derive(Debug, Clone, Copy)]
struct TableEntry {
    dist: u32,
    top: VertexId,
    level_zero: VertexId,
}

struct Frontier {
    queue: PriorityQueue<VertexId, Reverse<Key>, FxBuildHasher>,
    labels: FxHashMap<VertexId, Label>,
    entries: Vec<TableEntry>,
}

impl Frontier {
    fn new(start: VertexId, gap: u32) -> Self {
        let key = Key {
            dist: 0,
            level: 0,
            gap,
        };
        let mut queue = PriorityQueue::with_default_hasher();
        queue.push(start, Reverse(key));
        let mut labels = FxHashMap::default();
        labels.insert(
            start,
            Label {
                key,
                rep: start,
                settled: false,
                parent: None,
            },
        );
        Self {
            queue,
            labels,
            entries: Vec::new(),
        }
    }

    fn settled_dist(&self, v: VertexId) -> Option<u32> {
        self.labels
            .get(&v)
            .filter(|l| l.settled)
            .map(|l| l.key.dist)
    }

    fn offer(&mut self, v0: VertexId, key: Key, rep: VertexId, parent: (VertexId, EdgeRef)) {
        match self.labels.get_mut(&v0) {
            None => {
                self.labels.insert(
                    v0,
                    Label {
                        key,
                        rep,
                        settled: false,
                        parent: Some(parent),
                    },
                );
                self.queue.push(v0, Reverse(key));
            }
            Some(label) if !label.settled && key < label.key => {
                label.key = key;
                label.rep = rep;
                label.parent = Some(parent);
                self.queue.change_priority(&v0, Reverse(key));
            }
            Some(_) => {}
        }
    }

    /// Edges from the start to `v0`, in the order the search took them.
    fn chain(&self, v0: VertexId) -> Vec<EdgeRef> {
        let mut out = Vec::new();
        let mut cur = v0;
        while let Some((parent, edge)) = self.labels.get(&cur).and_then(|l| l.parent) {
            out.push(edge);
            cur = parent;
        }
        out.reverse();
        out
    }
}

#[derive(Debug, Clone, Copy)]
enum Meeting {
    Vertex(VertexId),
    Table {
        fwd: TableEntry,
        bwd: TableEntry,
        middle: u32,
    },
}

/// Counters for one query
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchStats {
    pub settled: [u64; 2],
    pub relaxed: [u64; 2],
    pub ascents: u64,
    pub table_entries: [u64; 2],
    pub micros: u64,
}

/// Hierarchy-level answer, before shortcut expansion
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub distance: u32,
    /// Edges from the source to the meeting point, in travel order.
    pub forward: Vec<EdgeRef>,
    /// Top-level edges between two table vertices, in travel order.
    pub middle: Vec<EdgeRef>,
    /// Edges found by the backward search, from the target toward the
    /// meeting point. Each is stored at its target-side end.
    pub backward: Vec<EdgeRef>,
    pub stats: SearchStats,
}

pub struct LeveledSearch<'a> {
    graph: &'a HierarchicalGraph,
    table: Option<&'a DistanceTable>,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> LeveledSearch<'a> {
    pub fn new(graph: &'a HierarchicalGraph) -> Self {
        Self {
            graph,
            table: None,
            cancel: None,
        }
    }

    pub fn with_distance_table(mut self, table: Option<&'a DistanceTable>) -> Self {
        self.table = table;
        self
    }

    pub fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn start_vertex(&self, id: VertexId) -> Result<VertexRef> {
        if self.graph.level_of(id)? != 0 {
            return Err(Error::VertexNotFound(format!(
                "{id} is a hierarchy vertex, queries start at level 0"
            )));
        }
        self.graph.vertex_ref(id)
    }

    /// Shortest distance and hierarchy-level path from `s` to `t`;
    /// `None` when `t` is unreachable.
    pub fn run(&self, s: VertexId, t: VertexId) -> Result<Option<SearchResult>> {
        let started = Instant::now();
        let s_ref = self.start_vertex(s)?;
        let t_ref = self.start_vertex(t)?;
        let mut stats = SearchStats::default();
        if s == t {
            return Ok(Some(SearchResult {
                distance: 0,
                forward: Vec::new(),
                middle: Vec::new(),
                backward: Vec::new(),
                stats,
            }));
        }

        let top = self.graph.top_level();
        let mut frontiers = [
            Frontier::new(s, s_ref.neighborhood()),
            Frontier::new(t, t_ref.neighborhood()),
        ];
        let mut best = INFINITY;
        let mut meeting = None;
        let mut dir = Direction::Forward;

        while !frontiers[0].queue.is_empty() || !frontiers[1].queue.is_empty() {
            if self.cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(Error::Cancelled);
            }
            if frontiers[dir.index()].queue.is_empty() {
                dir = dir.flip();
            }
            let (this, other) = split(&mut frontiers, dir);
            let Some((u0, Reverse(key))) = this.queue.pop() else {
                break;
            };
            stats.settled[dir.index()] += 1;
            let rep = match this.labels.get_mut(&u0) {
                Some(label) => {
                    label.settled = true;
                    label.rep
                }
                None => continue,
            };

            if key.dist > best {
                this.queue.clear();
                continue;
            }

            if let Some(d) = other.settled_dist(u0) {
                let total = key.dist as u64 + d as u64;
                if total < best as u64 {
                    best = total as u32;
                    meeting = Some(Meeting::Vertex(u0));
                }
            }

            let mut u = self.graph.follow(rep)?;
            let mut level = key.level;
            let mut gap = if key.gap == INFINITY {
                u.neighborhood()
            } else {
                key.gap
            };
            loop {
                if level == top {
                    if let Some(table) = self.table.filter(|t| t.contains(u.id)) {
                        let entry = TableEntry {
                            dist: key.dist,
                            top: u.id,
                            level_zero: u0,
                        };
                        stats.table_entries[dir.index()] += 1;
                        if let Some(m) = pair_entries(table, dir, entry, &other.entries, &mut best) {
                            meeting = Some(m);
                        }
                        this.entries.push(entry);
                        break;
                    }
                }
                if self.relax(this, dir, &u, u0, key.dist, level, gap, &mut stats)? {
                    break;
                }
                match u.overlying() {
                    Some(up) => {
                        u = self.graph.follow(up)?;
                        level += 1;
                        gap = u.neighborhood();
                        stats.ascents += 1;
                    }
                    None => break,
                }
            }
            dir = dir.flip();
        }

        stats.micros = started.elapsed().as_micros() as u64;
        let Some(meeting) = meeting else {
            debug!(%s, %t, settled = ?stats.settled, "no path");
            return Ok(None);
        };

        let [fwd, bwd] = &frontiers;
        let result = match meeting {
            Meeting::Vertex(m) => SearchResult {
                distance: best,
                forward: fwd.chain(m),
                middle: Vec::new(),
                backward: backward_chain(bwd, m),
                stats,
            },
            Meeting::Table {
                fwd: a,
                bwd: b,
                middle,
            } => {
                let scope = Scope {
                    direction: Direction::Forward,
                    core_only: false,
                    bound: middle,
                };
                let path = match scoped_path(self.graph, a.top, b.top, scope)? {
                    Some((d, path)) if d == middle => path,
                    _ => {
                        return Err(Error::GraphInconsistency(format!(
                            "table distance {middle} from {} to {} not realized on the top level",
                            a.top, b.top
                        )))
                    }
                };
                SearchResult {
                    distance: best,
                    forward: fwd.chain(a.level_zero),
                    middle: path,
                    backward: backward_chain(bwd, b.level_zero),
                    stats,
                }
            }
        };
        debug!(
            %s,
            %t,
            distance = result.distance,
            settled = ?result.stats.settled,
            ascents = result.stats.ascents,
            micros = result.stats.micros,
            "search finished"
        );
        Ok(Some(result))
    }

    /// Relax the edges of `u` at `level`. Returns false if an edge was held
    /// back because it would leave the neighborhood.
    #[allow(clippy::too_many_arguments)]
    fn relax(
        &self,
        frontier: &mut Frontier,
        dir: Direction,
        u: &VertexRef,
        u0: VertexId,
        dist: u32,
        level: u8,
        gap: u32,
        stats: &mut SearchStats,
    ) -> Result<bool> {
        let mut complete = true;
        for (hop, e) in u.edges().iter().enumerate() {
            if !dir.allows(e) {
                continue;
            }
            let mut next_gap = gap;
            if gap != INFINITY {
                if !e.core {
                    continue;
                }
                match gap.checked_sub(e.weight) {
                    Some(g) => next_gap = g,
                    None => {
                        complete = false;
                        continue;
                    }
                }
            }
            let target0 = if level == 0 {
                e.target
            } else {
                self.graph.follow(e.target)?.level_zero()
            };
            stats.relaxed[dir.index()] += 1;
            let key = Key {
                dist: dist.saturating_add(e.weight),
                level,
                gap: next_gap,
            };
            let edge = EdgeRef {
                source: u.id,
                hop: hop as u32,
                target: e.target,
                weight: e.weight,
            };
            frontier.offer(target0, key, e.target, (u0, edge));
        }
        Ok(complete)
    }
}

fn split(frontiers: &mut [Frontier; 2], dir: Direction) -> (&mut Frontier, &mut Frontier) {
    let [fwd, bwd] = frontiers;
    match dir {
        Direction::Forward => (fwd, bwd),
        Direction::Backward => (bwd, fwd),
    }
}

/// Backward labels from the target toward `m`.
fn backward_chain(bwd: &Frontier, m: VertexId) -> Vec<EdgeRef> {
    bwd.chain(m)
}

/// Combine a new table entry with the opposite direction's entries.
fn pair_entries(
    table: &DistanceTable,
    dir: Direction,
    entry: TableEntry,
    opposite: &[TableEntry],
    best: &mut u32,
) -> Option<Meeting> {
    let mut meeting = None;
    for o in opposite {
        let (a, b) = match dir {
            Direction::Forward => (entry, *o),
            Direction::Backward => (*o, entry),
        };
        let middle = table.get(a.top, b.top);
        if middle == INFINITY {
            continue;
        }
        let total = a.dist as u64 + middle as u64 + b.dist as u64;
        if total < *best as u64 {
            *best = total as u32;
            meeting = Some(Meeting::Table {
                fwd: a,
                bwd: b,
                middle,
            });
        }
    }
    meeting
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::testing::{three_chains, Fixture};

    fn table(f: &Fixture) -> Option<&DistanceTable> {
        f.graph.store().artifact().distance_table.as_ref()
    }

    #[test]
    fn test_table_meeting_walks_the_top_level() {
        let f = Fixture::chains();
        assert!(table(&f).is_some());
        let result = LeveledSearch::new(&f.graph)
            .with_distance_table(table(&f))
            .run(f.ids[0], f.ids[3])
            .unwrap()
            .unwrap();
        assert_eq!(result.distance, 8);
        assert!(result.forward.is_empty() && result.backward.is_empty());
        assert_eq!(result.middle.len(), 1);
        assert_eq!(result.stats.table_entries, [1, 1]);
        // both sides climb two levels before they reach the table
        assert_eq!(result.stats.ascents, 4);
    }

    #[test]
    fn test_vertex_meeting_without_table() {
        let f = Fixture::chains();
        let result = LeveledSearch::new(&f.graph).run(f.ids[0], f.ids[3]).unwrap().unwrap();
        assert_eq!(result.distance, 8);
        assert!(result.middle.is_empty());
        let edges: Vec<_> = result.forward.iter().chain(&result.backward).collect();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].weight, 8);
        assert_eq!(result.stats.table_entries, [0, 0]);
    }

    #[test]
    fn test_radius_keeps_short_hops_on_level_zero() {
        let build = BuildConfig {
            neighborhood_radius: 100,
            ..Default::default()
        };
        let f = Fixture::new(&three_chains(), build);
        // every level-0 core edge fits in the radius, nothing is held back
        let result = LeveledSearch::new(&f.graph).run(f.ids[0], f.ids[3]).unwrap().unwrap();
        assert_eq!(result.distance, 8);
        assert_eq!(result.stats.ascents, 0);
        let weights: Vec<_> = result
            .forward
            .iter()
            .chain(&result.backward)
            .map(|e| e.weight)
            .collect();
        assert_eq!(weights.iter().sum::<u32>(), 8);
    }

    #[test]
    fn test_start_vertices_must_be_level_zero() {
        let f = Fixture::chains();
        let a1 = f.up(f.ids[0]);
        let err = LeveledSearch::new(&f.graph).run(a1, f.ids[3]).unwrap_err();
        assert!(matches!(err, Error::VertexNotFound(_)));
        let err = LeveledSearch::new(&f.graph).run(f.ids[0], a1).unwrap_err();
        assert!(matches!(err, Error::VertexNotFound(_)));
    }

    #[test]
    fn test_cancelled_before_start() {
        let f = Fixture::chains();
        let token = CancellationToken::new();
        token.cancel();
        let err = LeveledSearch::new(&f.graph)
            .with_cancellation(&token)
            .run(f.ids[0], f.ids[3])
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        // a trivial query never looks at the token
        let same = LeveledSearch::new(&f.graph)
            .with_cancellation(&token)
            .run(f.ids[1], f.ids[1])
            .unwrap()
            .unwrap();
        assert_eq!(same.distance, 0);
    }

    #[test]
    fn test_key_order_prefers_distance_then_level() {
        let k = |dist, level, gap| Key { dist, level, gap };
        assert!(k(5, 3, 0) < k(6, 0, 0));
        assert!(k(5, 0, 9) < k(5, 1, 0));
        assert!(k(5, 1, 2) < k(5, 1, INFINITY));
    }
}
