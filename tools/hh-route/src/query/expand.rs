//! Shortcut expansion
//!
//! Turns the hierarchy edges of a search result into a contiguous level-0
//! route. Edges the backward search found are expanded along the backward
//! flags, then reversed and reoriented through the [`EdgeReverser`].

use hh_common::{Error, Result};
use tracing::trace;

use super::dijkstra::{scoped_path, Scope};
use super::reverser::EdgeReverser;
use super::search::SearchResult;
use super::{Direction, EdgeRef, Route};
use crate::graph::{HierarchicalGraph, VertexId, VertexRef};

pub struct ShortcutExpander<'a> {
    graph: &'a HierarchicalGraph,
    reverser: &'a EdgeReverser,
}

impl<'a> ShortcutExpander<'a> {
    pub fn new(graph: &'a HierarchicalGraph, reverser: &'a EdgeReverser) -> Self {
        Self { graph, reverser }
    }

    pub fn expand_result(&self, result: &SearchResult) -> Result<Route> {
        let mut edges = Vec::new();
        for e in result.forward.iter().chain(&result.middle) {
            self.expand_edge(*e, Direction::Forward, &mut edges)?;
        }
        let mut stored = Vec::new();
        for e in &result.backward {
            self.expand_edge(*e, Direction::Backward, &mut stored)?;
        }
        for e in stored.iter().rev() {
            edges.push(self.reverser.reverse(self.graph, e)?);
        }

        let total: u64 = edges.iter().map(|e| e.weight as u64).sum();
        if total != result.distance as u64 {
            return Err(Error::GraphInconsistency(format!(
                "expanded route weighs {total}, search found {}",
                result.distance
            )));
        }
        Ok(Route {
            distance: result.distance,
            edges,
        })
    }

    /// Expand forward edges in travel order. A path of level-0 edges comes
    /// back unchanged.
    pub fn expand_path(&self, path: &[EdgeRef]) -> Result<Vec<EdgeRef>> {
        let mut out = Vec::with_capacity(path.len());
        for e in path {
            self.expand_edge(*e, Direction::Forward, &mut out)?;
        }
        Ok(out)
    }

    /// Append the level-0 edges `e` stands for, in storage order from
    /// `e.source` toward `e.target`.
    pub fn expand_edge(&self, e: EdgeRef, dir: Direction, out: &mut Vec<EdgeRef>) -> Result<()> {
        let source = self.graph.vertex_ref(e.source)?;
        let stored = source.edges().get(e.hop as usize).ok_or_else(|| {
            Error::GraphInconsistency(format!("{} has no edge with hop {}", e.source, e.hop))
        })?;
        if stored.target != e.target || stored.weight != e.weight || !dir.allows(stored) {
            return Err(Error::GraphInconsistency(format!(
                "edge {} -> {} (hop {}) does not match its stored record",
                e.source, e.target, e.hop
            )));
        }
        if source.level() == 0 {
            out.push(e);
            return Ok(());
        }

        let target = self.graph.follow(e.target)?;
        if stored.min_level == 0 {
            let edge = self.extract_edge(source.level_zero(), target.level_zero(), e.weight, dir)?;
            out.push(edge);
            return Ok(());
        }

        let below = stored.min_level - 1;
        let from = self.descend(source.clone(), below)?;
        let to = self.descend(target, below)?;
        trace!(
            source = %e.source,
            target = %e.target,
            level = below,
            weight = e.weight,
            hops = stored.hop_indices.as_ref().map(|h| h.len()),
            "expanding shortcut"
        );
        let pieces = match &stored.hop_indices {
            Some(hops) => self.follow_hops(&from, to.id, hops, e.weight, dir)?,
            None => {
                let scope = Scope {
                    direction: dir,
                    core_only: true,
                    bound: e.weight,
                };
                match scoped_path(self.graph, from.id, to.id, scope)? {
                    Some((d, path)) if d == e.weight => path,
                    _ => {
                        return Err(Error::GraphInconsistency(format!(
                            "shortcut {} -> {} of weight {} has no core path on level {below}",
                            e.source, e.target, e.weight
                        )))
                    }
                }
            }
        };
        for piece in pieces {
            self.expand_edge(piece, dir, out)?;
        }
        Ok(())
    }

    fn descend(&self, mut v: VertexRef, level: u8) -> Result<VertexRef> {
        while v.level() > level {
            let down = v.subjacent().ok_or_else(|| {
                Error::GraphInconsistency(format!("{} on level {} has no subjacent vertex", v.id, v.level()))
            })?;
            v = self.graph.follow(down)?;
        }
        Ok(v)
    }

    fn follow_hops(
        &self,
        from: &VertexRef,
        to: VertexId,
        hops: &[u32],
        weight: u32,
        dir: Direction,
    ) -> Result<Vec<EdgeRef>> {
        let broken = |why: String| {
            Error::GraphInconsistency(format!("hop indices from {}: {why}", from.id))
        };
        let mut pieces = Vec::with_capacity(hops.len());
        let mut cur = from.clone();
        let mut sum = 0u64;
        for &hop in hops {
            let e = cur
                .edges()
                .get(hop as usize)
                .ok_or_else(|| broken(format!("{} has no hop {hop}", cur.id)))?;
            if !dir.allows(e) {
                return Err(broken(format!("hop {hop} at {} points the wrong way", cur.id)));
            }
            pieces.push(EdgeRef {
                source: cur.id,
                hop,
                target: e.target,
                weight: e.weight,
            });
            sum += e.weight as u64;
            cur = self.graph.follow(e.target)?;
        }
        if cur.id != to || sum != weight as u64 {
            return Err(broken(format!(
                "walk ends at {} with weight {sum}, shortcut goes to {to} with weight {weight}",
                cur.id
            )));
        }
        Ok(pieces)
    }

    /// The level-0 edge `s0 -> t0` a carried edge of `weight` came from.
    fn extract_edge(&self, s0: VertexId, t0: VertexId, weight: u32, dir: Direction) -> Result<EdgeRef> {
        let s = self.graph.follow(s0)?;
        let mut best: Option<EdgeRef> = None;
        for (hop, e) in s.edges().iter().enumerate() {
            if e.target != t0 || !dir.allows(e) {
                continue;
            }
            let candidate = EdgeRef {
                source: s0,
                hop: hop as u32,
                target: t0,
                weight: e.weight,
            };
            if e.weight == weight {
                return Ok(candidate);
            }
            if best.map_or(true, |b| e.weight < b.weight) {
                best = Some(candidate);
            }
        }
        best.ok_or_else(|| Error::GraphInconsistency(format!("no level-0 edge {s0} -> {t0}")))
    }
}
