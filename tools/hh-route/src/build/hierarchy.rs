//! Leveled hierarchy construction
//!
//! Each level starts from the survivors of the level below. Dead-end trees
//! are peeled off first (repeatedly removing vertices with at most one
//! distinct neighbor). From level 1 up, vertices with exactly two distinct
//! neighbors form chains, and each chain is bypassed by shortcuts between
//! its two end vertices. What remains is the level's core: its vertices get
//! the configured finite neighborhood radius, keep their core-to-core edges
//! and move on to the next level. Everything else is `INFINITY`.
//!
//! A shortcut direction is only kept when it is a shortest path between
//! its end vertices over the level's edges, so every level stays
//! distance-preserving among its survivors and a shortcut can always be
//! unpacked by a bounded search one level down.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use hh_common::Result;
use priority_queue::PriorityQueue;
use rustc_hash::{FxBuildHasher, FxHashMap};
use tracing::debug;

use super::network::{RoadArc, RoadNetwork};
use crate::config::BuildConfig;
use crate::formats::block::EdgeSatellite;
use crate::geo::Coord;
use crate::graph::INFINITY;

/// Longest hop list a block can store
const MAX_HOPS: usize = u16::MAX as usize;

/// A fully leveled graph over logical vertex ids `0..coords.len()`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hierarchy {
    /// Level-0 coordinates by logical id
    pub coords: Vec<Coord>,
    /// Level `l + 1` holds a subset of the vertices of level `l`.
    pub levels: Vec<HierarchyLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HierarchyLevel {
    /// Sorted by logical id
    pub vertices: Vec<LevelVertex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelVertex {
    pub vertex: u32,
    pub neighborhood: u32,
    /// Stored in this order; hop indices of the level above point into it.
    pub edges: Vec<LevelEdge>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelEdge {
    /// Logical id of the target, a vertex of the same level
    pub target: u32,
    pub weight: u32,
    pub forward: bool,
    pub backward: bool,
    pub core: bool,
    pub min_level: u8,
    pub hop_indices: Option<Vec<u32>>,
    pub satellite: Option<Box<EdgeSatellite>>,
}

impl Hierarchy {
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn top(&self) -> Option<&HierarchyLevel> {
        self.levels.last()
    }
}

impl HierarchyLevel {
    pub fn num_edges(&self) -> usize {
        self.vertices.iter().map(|v| v.edges.len()).sum()
    }

    pub fn position(&self, vertex: u32) -> Option<usize> {
        self.vertices.binary_search_by_key(&vertex, |v| v.vertex).ok()
    }
}

/// An edge under construction, remembering its position one level down
#[derive(Debug, Clone)]
struct WorkEdge {
    edge: LevelEdge,
    origin: u32,
}

/// Per logical vertex: `None` when the vertex is not on the level
type Adjacency = Vec<Option<Vec<WorkEdge>>>;

struct Contraction {
    core: Vec<bool>,
    /// `[a, x1, .., xk, b]` with `a`, `b` core and every `xi` a chain vertex
    chains: Vec<Vec<u32>>,
    trees: usize,
}

pub struct HierarchyBuilder {
    config: BuildConfig,
}

impl HierarchyBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn build(&self, network: &RoadNetwork) -> Result<Hierarchy> {
        self.config.validate()?;
        network.validate()?;

        let mut adj = level_zero(network.num_vertices(), network.arcs());
        let mut levels = Vec::new();
        let mut level = 0u8;
        loop {
            let last = level as usize + 1 >= self.config.max_levels as usize;
            let contraction = if last { None } else { contract(&adj, level) };
            let Some(contraction) = contraction else {
                levels.push(finish_top(adj));
                break;
            };

            let shortcuts = if level > 0 {
                self.add_shortcuts(&mut adj, &contraction.chains, level)
            } else {
                0
            };
            let core_size = contraction.core.iter().filter(|c| **c).count();
            debug!(
                level,
                trees = contraction.trees,
                chains = contraction.chains.len(),
                shortcuts,
                core = core_size,
                "contracted level"
            );
            let (finished, next) = finish_level(adj, &contraction.core, self.config.neighborhood_radius);
            levels.push(finished);
            adj = next;
            level += 1;
        }

        let hierarchy = Hierarchy {
            coords: network.coords(),
            levels,
        };
        debug!(
            levels = hierarchy.num_levels(),
            top_vertices = hierarchy.top().map_or(0, |t| t.vertices.len()),
            "hierarchy built"
        );
        Ok(hierarchy)
    }

    /// Append shortcut edges for `chains` to the chain ends. Returns how
    /// many edge records were added.
    fn add_shortcuts(&self, adj: &mut Adjacency, chains: &[Vec<u32>], level: u8) -> usize {
        // (holder, target, forward) -> (weight, hops)
        let mut best: BTreeMap<(u32, u32, bool), (u32, Option<Vec<u32>>)> = BTreeMap::new();
        let mut offer = |holder: u32, target: u32, forward: bool, weight: u32, hops: Option<Vec<u32>>| {
            let slot = best.entry((holder, target, forward)).or_insert((weight, hops.clone()));
            if weight < slot.0 {
                *slot = (weight, hops);
            }
        };

        for chain in chains {
            let (Some(&a), Some(&b)) = (chain.first(), chain.last()) else {
                continue;
            };
            if a == b {
                continue;
            }
            let reversed: Vec<u32> = chain.iter().rev().copied().collect();

            // a -> b, seen from a (forward flags) and from b (backward flags)
            if let (Some((w, hops_a)), Some((_, hops_b))) =
                (walk(adj, chain, true), walk(adj, &reversed, false))
            {
                if bounded_distance(adj, a, b, w) == Some(w) {
                    offer(a, b, true, w, self.hops(hops_a));
                    offer(b, a, false, w, self.hops(hops_b));
                }
            }
            // b -> a
            if let (Some((w, hops_b)), Some((_, hops_a))) =
                (walk(adj, &reversed, true), walk(adj, chain, false))
            {
                if bounded_distance(adj, b, a, w) == Some(w) {
                    offer(b, a, true, w, self.hops(hops_b));
                    offer(a, b, false, w, self.hops(hops_a));
                }
            }
        }

        let mut added = 0;
        let mut pending = best.into_iter().peekable();
        while let Some(((holder, target, forward), (weight, hops))) = pending.next() {
            let mut edge = LevelEdge {
                target,
                weight,
                forward,
                backward: !forward,
                core: false,
                min_level: level,
                hop_indices: hops,
                satellite: None,
            };
            // keys sort backward before forward for the same pair
            let twin = matches!(
                pending.peek(),
                Some(((h, t, true), (w, hops)))
                    if *h == holder && *t == target && *w == weight && *hops == edge.hop_indices
            );
            if twin {
                edge.forward = true;
                pending.next();
            }
            if let Some(Some(edges)) = adj.get_mut(holder as usize) {
                edges.push(WorkEdge {
                    edge,
                    origin: u32::MAX,
                });
                added += 1;
            }
        }
        added
    }

    fn hops(&self, hops: Vec<u32>) -> Option<Vec<u32>> {
        (self.config.hop_indices && hops.len() <= MAX_HOPS).then_some(hops)
    }
}

/// Level 0: one edge record at each end of every arc, records with the
/// same target and weight merged.
fn level_zero(n: usize, arcs: Vec<RoadArc>) -> Adjacency {
    let mut adj: Adjacency = vec![Some(Vec::new()); n];
    for arc in arcs {
        merge_edge(&mut adj, arc.from, arc.to, arc.weight, true, arc.satellite);
        merge_edge(&mut adj, arc.to, arc.from, arc.weight, false, None);
    }
    for edges in adj.iter_mut().flatten() {
        for (i, e) in edges.iter_mut().enumerate() {
            e.origin = i as u32;
        }
    }
    adj
}

fn merge_edge(
    adj: &mut Adjacency,
    at: u32,
    target: u32,
    weight: u32,
    forward: bool,
    satellite: Option<Box<EdgeSatellite>>,
) {
    let Some(Some(edges)) = adj.get_mut(at as usize) else {
        return;
    };
    if let Some(e) = edges
        .iter_mut()
        .find(|e| e.edge.target == target && e.edge.weight == weight)
    {
        if forward {
            e.edge.forward = true;
            if e.edge.satellite.is_none() {
                e.edge.satellite = satellite;
            }
        } else {
            e.edge.backward = true;
        }
        return;
    }
    edges.push(WorkEdge {
        edge: LevelEdge {
            target,
            weight,
            forward,
            backward: !forward,
            core: false,
            min_level: 0,
            hop_indices: None,
            satellite: if forward { satellite } else { None },
        },
        origin: 0,
    });
}

fn distinct_neighbors(edges: &[WorkEdge]) -> Vec<u32> {
    let mut targets: Vec<u32> = edges.iter().map(|e| e.edge.target).collect();
    targets.sort_unstable();
    targets.dedup();
    targets
}

/// Split one level into trees, chains and core. `None` when the level
/// should be the top one: nothing would survive, or nothing was removed
/// above level 0.
fn contract(adj: &Adjacency, level: u8) -> Option<Contraction> {
    let n = adj.len();
    let mut neighbors: Vec<Vec<u32>> = vec![Vec::new(); n];
    let mut alive = vec![false; n];
    let mut members = 0usize;
    for (v, edges) in adj.iter().enumerate() {
        if let Some(edges) = edges {
            neighbors[v] = distinct_neighbors(edges);
            alive[v] = true;
            members += 1;
        }
    }

    let mut degree: Vec<usize> = neighbors.iter().map(Vec::len).collect();
    let mut leaves: Vec<u32> = (0..n as u32)
        .filter(|&v| alive[v as usize] && degree[v as usize] <= 1)
        .collect();
    let mut trees = 0;
    while let Some(v) = leaves.pop() {
        if !alive[v as usize] {
            continue;
        }
        alive[v as usize] = false;
        trees += 1;
        for &w in &neighbors[v as usize] {
            let w = w as usize;
            if alive[w] {
                degree[w] -= 1;
                if degree[w] == 1 {
                    leaves.push(w as u32);
                }
            }
        }
    }

    let chain: Vec<bool> = (0..n).map(|v| level > 0 && alive[v] && degree[v] == 2).collect();
    let mut core: Vec<bool> = (0..n).map(|v| alive[v] && !chain[v]).collect();

    let mut visited = vec![false; n];
    let mut chains = Vec::new();
    for a in 0..n {
        if !core[a] {
            continue;
        }
        for &x in &neighbors[a] {
            if !chain[x as usize] || visited[x as usize] {
                continue;
            }
            let mut path = vec![a as u32];
            let (mut prev, mut cur) = (a as u32, x);
            while chain[cur as usize] {
                visited[cur as usize] = true;
                path.push(cur);
                let next = neighbors[cur as usize]
                    .iter()
                    .copied()
                    .find(|&w| alive[w as usize] && w != prev);
                let Some(next) = next else {
                    break;
                };
                prev = cur;
                cur = next;
            }
            if core[cur as usize] {
                path.push(cur);
                chains.push(path);
            }
        }
    }
    // cycles made only of chain vertices have no end to bypass them from
    for v in 0..n {
        if chain[v] && !visited[v] {
            core[v] = true;
        }
    }

    let survivors = core.iter().filter(|c| **c).count();
    if survivors == 0 || (level > 0 && survivors == members) {
        return None;
    }
    Some(Contraction {
        core,
        chains,
        trees,
    })
}

/// Minimum-weight walk along `path` using edges with the given flag.
/// Returns the total weight and the positions, one level down, of the
/// edges taken.
fn walk(adj: &Adjacency, path: &[u32], forward: bool) -> Option<(u32, Vec<u32>)> {
    let mut total = 0u64;
    let mut hops = Vec::with_capacity(path.len().saturating_sub(1));
    for pair in path.windows(2) {
        let edges = adj.get(pair[0] as usize)?.as_ref()?;
        let step = edges
            .iter()
            .filter(|e| e.edge.target == pair[1])
            .filter(|e| if forward { e.edge.forward } else { e.edge.backward })
            .min_by_key(|e| e.edge.weight)?;
        total += step.edge.weight as u64;
        hops.push(step.origin);
    }
    u32::try_from(total)
        .ok()
        .filter(|w| *w != INFINITY)
        .map(|w| (w, hops))
}

/// Forward distance `from -> to` over the level's edges, if at most `bound`.
fn bounded_distance(adj: &Adjacency, from: u32, to: u32, bound: u32) -> Option<u32> {
    let mut dist: FxHashMap<u32, u32> = FxHashMap::default();
    let mut queue: PriorityQueue<u32, Reverse<u32>, FxBuildHasher> = PriorityQueue::with_default_hasher();
    dist.insert(from, 0);
    queue.push(from, Reverse(0));
    while let Some((u, Reverse(d))) = queue.pop() {
        if u == to {
            return Some(d);
        }
        let Some(Some(edges)) = adj.get(u as usize) else {
            continue;
        };
        for e in edges.iter().filter(|e| e.edge.forward) {
            let nd = d.saturating_add(e.edge.weight);
            if nd > bound {
                continue;
            }
            if dist.get(&e.edge.target).map_or(true, |old| nd < *old) {
                dist.insert(e.edge.target, nd);
                queue.push_increase(e.edge.target, Reverse(nd));
            }
        }
    }
    None
}

/// Freeze one contracted level and carry its core up.
fn finish_level(adj: Adjacency, core: &[bool], radius: u32) -> (HierarchyLevel, Adjacency) {
    let mut next: Adjacency = vec![None; adj.len()];
    let mut vertices = Vec::new();
    for (v, edges) in adj.into_iter().enumerate() {
        let Some(mut edges) = edges else {
            continue;
        };
        let in_core = core[v];
        for e in &mut edges {
            e.edge.core = in_core && core[e.edge.target as usize];
        }
        if in_core {
            next[v] = Some(
                edges
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.edge.core)
                    .map(|(i, e)| WorkEdge {
                        edge: LevelEdge {
                            core: false,
                            satellite: None,
                            ..e.edge.clone()
                        },
                        origin: i as u32,
                    })
                    .collect(),
            );
        }
        vertices.push(LevelVertex {
            vertex: v as u32,
            neighborhood: if in_core { radius } else { INFINITY },
            edges: edges.into_iter().map(|e| e.edge).collect(),
        });
    }
    (HierarchyLevel { vertices }, next)
}

fn finish_top(adj: Adjacency) -> HierarchyLevel {
    let vertices = adj
        .into_iter()
        .enumerate()
        .filter_map(|(v, edges)| {
            let edges = edges?;
            Some(LevelVertex {
                vertex: v as u32,
                neighborhood: INFINITY,
                edges: edges
                    .into_iter()
                    .map(|e| LevelEdge { core: false, ..e.edge })
                    .collect(),
            })
        })
        .collect();
    HierarchyLevel { vertices }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::network::{NetworkEdge, NetworkVertex};

    fn network(n: usize, roads: &[(u32, u32, u32)]) -> RoadNetwork {
        RoadNetwork {
            vertices: (0..n)
                .map(|i| NetworkVertex {
                    lat: 48.0 + i as f64 * 0.001,
                    lon: 11.0,
                })
                .collect(),
            edges: roads
                .iter()
                .map(|&(from, to, weight)| NetworkEdge {
                    from,
                    to,
                    weight,
                    oneway: false,
                    satellite: EdgeSatellite::default(),
                })
                .collect(),
        }
    }

    /// a=0 x1=1 x2=2 b=3 c=4 d=5 e=6: three chains between a and b, the
    /// one through x1 and x2 being the shortest, and a spur at c.
    fn three_chains() -> RoadNetwork {
        network(
            7,
            &[
                (0, 1, 2),
                (1, 2, 5),
                (2, 3, 1),
                (0, 4, 10),
                (4, 3, 10),
                (0, 5, 12),
                (5, 3, 12),
                (6, 4, 3),
            ],
        )
    }

    fn vertex(level: &HierarchyLevel, v: u32) -> &LevelVertex {
        &level.vertices[level.position(v).unwrap()]
    }

    #[test]
    fn test_three_chains_contract_to_one_shortcut() {
        let h = HierarchyBuilder::new(BuildConfig::default())
            .build(&three_chains())
            .unwrap();
        assert_eq!(h.num_levels(), 3);

        // the spur is a tree on level 0
        assert_eq!(h.levels[0].vertices.len(), 7);
        assert_eq!(vertex(&h.levels[0], 6).neighborhood, INFINITY);
        assert_eq!(vertex(&h.levels[0], 0).neighborhood, 0);
        assert!(h.levels[1].position(6).is_none());

        // level 1 keeps the cheapest shortcut only
        let a = vertex(&h.levels[1], 0);
        let shortcuts: Vec<&LevelEdge> = a.edges.iter().filter(|e| e.min_level == 1).collect();
        assert_eq!(shortcuts.len(), 1);
        let s = shortcuts[0];
        assert_eq!((s.target, s.weight, s.forward, s.backward, s.core), (3, 8, true, true, true));
        assert_eq!(s.hop_indices.as_ref().map(Vec::len), Some(3));
        assert_eq!(vertex(&h.levels[1], 1).neighborhood, INFINITY);

        let top = h.top().unwrap();
        let ids: Vec<u32> = top.vertices.iter().map(|v| v.vertex).collect();
        assert_eq!(ids, vec![0, 3]);
        assert!(top.vertices.iter().all(|v| v.neighborhood == INFINITY));
        assert!(top.vertices.iter().flat_map(|v| &v.edges).all(|e| !e.core));
    }

    #[test]
    fn test_hops_follow_level_below() {
        let h = HierarchyBuilder::new(BuildConfig::default())
            .build(&three_chains())
            .unwrap();
        let a = vertex(&h.levels[1], 0);
        let shortcut = a.edges.iter().find(|e| e.min_level == 1).unwrap();
        let hops = shortcut.hop_indices.as_ref().unwrap();

        let below = &h.levels[0];
        let mut cur = 0;
        let mut total = 0;
        for &hop in hops {
            let e = &vertex(below, cur).edges[hop as usize];
            assert!(e.forward && e.core);
            total += e.weight;
            cur = e.target;
        }
        assert_eq!((cur, total), (3, 8));
    }

    #[test]
    fn test_one_way_chain_gets_one_direction() {
        let mut net = network(5, &[(0, 3, 50), (0, 4, 50), (4, 3, 50)]);
        // a one-way detour 0 -> 1 -> 2 -> 3
        for (from, to) in [(0, 1), (1, 2), (2, 3)] {
            net.edges.push(NetworkEdge {
                from,
                to,
                weight: 1,
                oneway: true,
                satellite: EdgeSatellite::default(),
            });
        }
        let h = HierarchyBuilder::new(BuildConfig::default()).build(&net).unwrap();
        let a = vertex(&h.levels[1], 0);
        let shortcut = a.edges.iter().find(|e| e.min_level == 1 && e.target == 3).unwrap();
        assert_eq!((shortcut.weight, shortcut.forward, shortcut.backward), (3, true, false));
        let b = vertex(&h.levels[1], 3);
        let mirror = b.edges.iter().find(|e| e.min_level == 1 && e.target == 0).unwrap();
        assert_eq!((mirror.weight, mirror.forward, mirror.backward), (3, false, true));
    }

    #[test]
    fn test_longer_parallel_chain_is_dropped() {
        // square 0-1-2-3-0 plus diagonal 0-2: chains 0-1-2 and 0-3-2
        let h = HierarchyBuilder::new(BuildConfig::default())
            .build(&network(4, &[(0, 1, 1), (1, 2, 1), (2, 3, 5), (3, 0, 5), (0, 2, 9)]))
            .unwrap();
        let a = vertex(&h.levels[1], 0);
        let to_two: Vec<&LevelEdge> = a.edges.iter().filter(|e| e.target == 2).collect();
        // the carried diagonal and the short chain shortcut
        assert_eq!(to_two.len(), 2);
        assert!(to_two.iter().any(|e| e.min_level == 1 && e.weight == 2));
        assert!(!to_two.iter().any(|e| e.weight == 10));
    }

    #[test]
    fn test_forest_is_single_level() {
        let h = HierarchyBuilder::new(BuildConfig::default())
            .build(&network(4, &[(0, 1, 1), (1, 2, 1), (1, 3, 1)]))
            .unwrap();
        assert_eq!(h.num_levels(), 1);
        assert!(h.levels[0].vertices.iter().all(|v| v.neighborhood == INFINITY));
    }

    #[test]
    fn test_pure_cycle_stays_in_core() {
        let ring = network(4, &[(0, 1, 1), (1, 2, 1), (2, 3, 1), (3, 0, 1)]);
        let h = HierarchyBuilder::new(BuildConfig::default()).build(&ring).unwrap();
        // nothing to remove on level 1, so level 1 is the top
        assert_eq!(h.num_levels(), 2);
        assert_eq!(h.levels[1].vertices.len(), 4);
    }

    #[test]
    fn test_parallel_arcs_merge() {
        let mut net = network(2, &[(0, 1, 4)]);
        net.edges.push(NetworkEdge {
            from: 1,
            to: 0,
            weight: 4,
            oneway: true,
            satellite: EdgeSatellite::default(),
        });
        let h = HierarchyBuilder::new(BuildConfig::default()).build(&net).unwrap();
        let v0 = vertex(&h.levels[0], 0);
        assert_eq!(v0.edges.len(), 1);
        assert!(v0.edges[0].forward && v0.edges[0].backward);
    }

    #[test]
    fn test_max_levels_caps_hierarchy() {
        let config = BuildConfig {
            max_levels: 2,
            ..Default::default()
        };
        let h = HierarchyBuilder::new(config).build(&three_chains()).unwrap();
        assert_eq!(h.num_levels(), 2);
        assert!(h.levels[1].vertices.iter().all(|v| v.neighborhood == INFINITY));
    }
}
