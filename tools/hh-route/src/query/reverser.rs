//! Reverse-edge lookup for level-0 edges
//!
//! For every level-0 edge `u -> v` the reverser stores the hop index of the
//! matching edge `v -> u` (same weight, complementary direction flags) in a
//! 4-bit slot; the escape value sends the lookup to an overflow map. Edges
//! are numbered globally by `edge_base[block] + index within block`.

use hh_common::{Error, Result};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use super::EdgeRef;
use crate::formats::block::BlockEdge;
use crate::graph::{HierarchicalGraph, VertexId};

const ESCAPE: u8 = 15;

pub struct EdgeReverser {
    first_block: u32,
    edge_base: Vec<u64>,
    nibbles: Vec<u8>,
    overflow: FxHashMap<u64, u32>,
    missing: u64,
}

fn is_reverse_of(rev: &BlockEdge, e: &BlockEdge, source: VertexId) -> bool {
    rev.target == source
        && rev.weight == e.weight
        && rev.forward == e.backward
        && rev.backward == e.forward
}

impl EdgeReverser {
    /// Scan every level-0 block once. Edges without a reverse are recorded
    /// as missing and fail only when looked up.
    pub fn build(graph: &HierarchicalGraph) -> Result<Self> {
        let blocks = graph.level_zero_blocks();
        let mut edge_base = Vec::with_capacity(blocks.len());
        let mut total = 0u64;
        for id in blocks.clone() {
            edge_base.push(total);
            total += graph.store().get_block(id)?.edges.len() as u64;
        }

        let mut reverser = Self {
            first_block: blocks.start,
            edge_base,
            nibbles: vec![0xFF; total.div_ceil(2) as usize],
            overflow: FxHashMap::default(),
            missing: 0,
        };
        let ids = graph.ids();
        for block_id in blocks {
            let block = graph.store().get_block(block_id)?;
            let base = reverser.edge_base[(block_id - reverser.first_block) as usize];
            for offset in 0..block.num_vertices() {
                let u = ids.vertex_id(block_id, offset as u32);
                let first = block.vertices[offset].first_edge as u64;
                for (i, e) in block.edges_of(offset).iter().enumerate() {
                    let target = graph.follow(e.target)?;
                    let hop = target
                        .edges()
                        .iter()
                        .position(|rev| is_reverse_of(rev, e, u));
                    let global = base + first + i as u64;
                    match hop {
                        Some(h) if h < ESCAPE as usize => reverser.set(global, h as u8),
                        Some(h) => {
                            reverser.set(global, ESCAPE);
                            reverser.overflow.insert(global, h as u32);
                        }
                        None => {
                            reverser.set(global, ESCAPE);
                            reverser.missing += 1;
                        }
                    }
                }
            }
        }
        if reverser.missing > 0 {
            warn!(missing = reverser.missing, "level-0 edges without a reverse edge");
        }
        debug!(
            edges = total,
            overflow = reverser.overflow.len(),
            "edge reverser built"
        );
        Ok(reverser)
    }

    fn set(&mut self, global: u64, value: u8) {
        let byte = &mut self.nibbles[(global / 2) as usize];
        if global % 2 == 0 {
            *byte = (*byte & 0xF0) | value;
        } else {
            *byte = (*byte & 0x0F) | (value << 4);
        }
    }

    fn get(&self, global: u64) -> Option<u8> {
        let byte = *self.nibbles.get((global / 2) as usize)?;
        Some(if global % 2 == 0 { byte & 0x0F } else { byte >> 4 })
    }

    /// Edges whose reverse was not found at build time.
    pub fn missing(&self) -> u64 {
        self.missing
    }

    /// The reverse of level-0 edge `e`: the edge at `e.target` back to
    /// `e.source`.
    pub fn reverse(&self, graph: &HierarchicalGraph, e: &EdgeRef) -> Result<EdgeRef> {
        let ids = graph.ids();
        let source = graph.vertex_ref(e.source)?;
        let block_id = ids.block_of(e.source);
        let base = block_id
            .checked_sub(self.first_block)
            .and_then(|i| self.edge_base.get(i as usize))
            .ok_or_else(|| {
                Error::GraphInconsistency(format!("edge at {} is not a level-0 edge", e.source))
            })?;
        let missing = || {
            Error::GraphInconsistency(format!(
                "no reverse for edge {} -> {} (hop {})",
                e.source, e.target, e.hop
            ))
        };
        if e.hop >= source.record().num_edges {
            return Err(missing());
        }
        let global = base + source.record().first_edge as u64 + e.hop as u64;
        let hop = match self.get(global).ok_or_else(missing)? {
            ESCAPE => *self.overflow.get(&global).ok_or_else(missing)?,
            h => h as u32,
        };
        Ok(EdgeRef {
            source: e.target,
            hop,
            target: e.source,
            weight: e.weight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[test]
    fn test_every_level_zero_edge_has_a_reverse() {
        let f = Fixture::chains();
        let reverser = EdgeReverser::build(&f.graph).unwrap();
        assert_eq!(reverser.missing(), 0);

        let mut checked = 0;
        for &u in &f.ids {
            for (hop, e) in f.graph.vertex_ref(u).unwrap().edges().iter().enumerate() {
                let edge = EdgeRef {
                    source: u,
                    hop: hop as u32,
                    target: e.target,
                    weight: e.weight,
                };
                let rev = reverser.reverse(&f.graph, &edge).unwrap();
                assert_eq!((rev.source, rev.target, rev.weight), (e.target, u, e.weight));
                let rev_source = f.graph.vertex_ref(rev.source).unwrap();
                let stored = &rev_source.edges()[rev.hop as usize];
                assert!(is_reverse_of(stored, e, u));
                assert_eq!(reverser.reverse(&f.graph, &rev).unwrap(), edge);
                checked += 1;
            }
        }
        // eight two-way roads, one merged record at each end
        assert_eq!(checked, 16);
    }

    #[test]
    fn test_hierarchy_edges_are_rejected() {
        let f = Fixture::chains();
        let reverser = EdgeReverser::build(&f.graph).unwrap();
        let a1 = f.up(f.ids[0]);
        let a1_ref = f.graph.vertex_ref(a1).unwrap();
        let e = &a1_ref.edges()[0];
        let edge = EdgeRef {
            source: a1,
            hop: 0,
            target: e.target,
            weight: e.weight,
        };
        assert!(matches!(
            reverser.reverse(&f.graph, &edge),
            Err(Error::GraphInconsistency(_))
        ));
    }

    #[test]
    fn test_unknown_hop_is_an_inconsistency() {
        let f = Fixture::chains();
        let reverser = EdgeReverser::build(&f.graph).unwrap();
        let edge = EdgeRef {
            source: f.ids[0],
            hop: 99,
            target: f.ids[1],
            weight: 2,
        };
        assert!(matches!(
            reverser.reverse(&f.graph, &edge),
            Err(Error::GraphInconsistency(_))
        ));
    }
}
