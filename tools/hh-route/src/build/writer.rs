//! Hierarchy to artifact encoding
//!
//! Every level gets a contiguous run of block ids. Within a level, vertices
//! with a finite neighborhood are laid out first so each block keeps them
//! ahead of its `INFINITY` vertices. Id widths are the smallest that fit
//! the block count and block size.

use std::cmp::Reverse;
use std::path::Path;

use hh_common::{Error, Result};
use priority_queue::PriorityQueue;
use rustc_hash::{FxBuildHasher, FxHashMap};
use tracing::debug;

use super::hierarchy::{Hierarchy, HierarchyLevel};
use crate::config::BuildConfig;
use crate::formats::bits::bits_for_count;
use crate::formats::block::{self, Block, BlockEdge, BlockLayout, BlockVertex};
use crate::formats::header::FLAG_HOP_INDICES;
use crate::formats::{encode_artifact, ArtifactFile, ArtifactHeader, BoundingBox, DistanceTable, EncodedArtifact, LevelInfo};
use crate::graph::{IdLayout, VertexId, INFINITY};

pub struct ArtifactWriter {
    config: BuildConfig,
}

/// Blocks and metadata ready to be laid out
struct Plan {
    header: ArtifactHeader,
    blocks: Vec<Vec<u8>>,
    table: Option<DistanceTable>,
}

impl ArtifactWriter {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    pub fn encode(&self, hierarchy: &Hierarchy) -> Result<EncodedArtifact> {
        let plan = self.plan(hierarchy)?;
        encode_artifact(plan.header, &plan.blocks, plan.table.as_ref())
    }

    pub fn write<P: AsRef<Path>>(&self, hierarchy: &Hierarchy, path: P) -> Result<ArtifactHeader> {
        let plan = self.plan(hierarchy)?;
        let header = ArtifactFile::write(path.as_ref(), plan.header, &plan.blocks, plan.table.as_ref())?;
        debug!(
            path = %path.as_ref().display(),
            blocks = header.num_blocks,
            levels = header.num_levels(),
            distance_table = header.has_distance_table(),
            "artifact written"
        );
        Ok(header)
    }

    fn plan(&self, hierarchy: &Hierarchy) -> Result<Plan> {
        self.config.validate()?;
        validate(hierarchy)?;
        let per_block = self.config.block_vertices as usize;

        // per level: layout order and logical id -> vertex id
        let mut first_block = 0u32;
        let mut orders: Vec<Vec<usize>> = Vec::with_capacity(hierarchy.num_levels());
        let mut levels = Vec::with_capacity(hierarchy.num_levels());
        for level in &hierarchy.levels {
            let mut order: Vec<usize> = (0..level.vertices.len()).collect();
            order.sort_by_key(|&i| (level.vertices[i].neighborhood == INFINITY, level.vertices[i].vertex));
            let num_blocks = order.len().div_ceil(per_block) as u32;
            levels.push(LevelInfo {
                first_block,
                num_blocks,
                num_vertices: order.len() as u32,
                num_edges: level.num_edges() as u32,
            });
            first_block = first_block
                .checked_add(num_blocks)
                .ok_or_else(|| Error::InvalidInput("too many blocks".into()))?;
            orders.push(order);
        }
        let num_blocks = first_block;

        let ids = IdLayout::new(bits_for_count(num_blocks as usize), bits_for_count(per_block));
        if ids.block_bits as u32 + ids.offset_bits as u32 > 32 {
            return Err(Error::InvalidInput(format!(
                "{num_blocks} blocks of {per_block} vertices need {} id bits",
                ids.block_bits + ids.offset_bits
            )));
        }
        let layout = BlockLayout {
            ids,
            hop_indices: self.config.hop_indices,
        };

        let id_maps: Vec<FxHashMap<u32, VertexId>> = hierarchy
            .levels
            .iter()
            .zip(&orders)
            .zip(&levels)
            .map(|((level, order), info)| {
                order
                    .iter()
                    .enumerate()
                    .map(|(pos, &i)| {
                        let block = info.first_block + (pos / per_block) as u32;
                        let offset = (pos % per_block) as u32;
                        (level.vertices[i].vertex, ids.vertex_id(block, offset))
                    })
                    .collect()
            })
            .collect();

        let mut blocks = Vec::with_capacity(num_blocks as usize);
        for (l, level) in hierarchy.levels.iter().enumerate() {
            for (chunk_no, chunk) in orders[l].chunks(per_block).enumerate() {
                let block = self.make_block(
                    hierarchy,
                    &id_maps,
                    l,
                    levels[l].first_block + chunk_no as u32,
                    chunk.iter().map(|&i| &level.vertices[i]),
                )?;
                blocks.push(block::encode(&block, &layout)?);
            }
        }

        let table = self.distance_table(hierarchy, &id_maps)?;
        let header = ArtifactHeader {
            flags: if self.config.hop_indices { FLAG_HOP_INDICES } else { 0 },
            bbox: bounding_box(hierarchy),
            bits_per_block_id: ids.block_bits,
            bits_per_vertex_offset: ids.offset_bits,
            num_blocks,
            created_unix: chrono::Utc::now().timestamp(),
            pointer_index_offset: 0,
            pointer_index_len: 0,
            block_data_offset: 0,
            block_data_len: 0,
            distance_table_offset: 0,
            distance_table_len: 0,
            levels,
        };
        Ok(Plan {
            header,
            blocks,
            table,
        })
    }

    fn make_block<'h>(
        &self,
        hierarchy: &Hierarchy,
        id_maps: &[FxHashMap<u32, VertexId>],
        level: usize,
        block_id: u32,
        vertices: impl Iterator<Item = &'h super::hierarchy::LevelVertex>,
    ) -> Result<Block> {
        let here = &id_maps[level];
        let lookup = |map: &FxHashMap<u32, VertexId>, v: u32, what: &str| {
            map.get(&v).copied().ok_or_else(|| {
                Error::InvalidInput(format!("vertex {v} has no {what} on level {level}"))
            })
        };

        let mut out = Block {
            id: block_id,
            level: level as u8,
            vertices: Vec::new(),
            edges: Vec::new(),
        };
        for v in vertices {
            let level_zero = match level {
                0 => None,
                _ => Some(lookup(&id_maps[0], v.vertex, "level-0 representative")?),
            };
            let subjacent = match level {
                0 => None,
                1 => level_zero,
                _ => Some(lookup(&id_maps[level - 1], v.vertex, "subjacent representative")?),
            };
            out.vertices.push(BlockVertex {
                neighborhood: v.neighborhood,
                level_zero,
                subjacent,
                overlying: id_maps.get(level + 1).and_then(|m| m.get(&v.vertex).copied()),
                coord: (level == 0).then(|| hierarchy.coords[v.vertex as usize]),
                first_edge: out.edges.len() as u32,
                num_edges: v.edges.len() as u32,
            });
            for e in &v.edges {
                out.edges.push(BlockEdge {
                    target: lookup(here, e.target, "edge target")?,
                    weight: e.weight,
                    forward: e.forward,
                    backward: e.backward,
                    core: e.core,
                    min_level: e.min_level,
                    hop_indices: e.hop_indices.clone(),
                    satellite: if level == 0 && e.forward {
                        e.satellite.clone()
                    } else {
                        None
                    },
                });
            }
        }
        Ok(out)
    }

    /// All-pairs forward distances over the top level, when it is small
    /// enough.
    fn distance_table(
        &self,
        hierarchy: &Hierarchy,
        id_maps: &[FxHashMap<u32, VertexId>],
    ) -> Result<Option<DistanceTable>> {
        let (Some(top), Some(top_ids)) = (hierarchy.top(), id_maps.last()) else {
            return Ok(None);
        };
        let max = self.config.distance_table_max_vertices as usize;
        if max == 0 || top.vertices.len() > max {
            return Ok(None);
        }

        let mut members: Vec<(VertexId, usize)> = top
            .vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (top_ids[&v.vertex], i))
            .collect();
        members.sort_unstable();
        let n = members.len();
        let mut column = vec![0usize; n];
        for (col, (_, i)) in members.iter().enumerate() {
            column[*i] = col;
        }

        let mut distances = vec![INFINITY; n * n];
        for (row, (_, source)) in members.iter().enumerate() {
            for (i, d) in top_level_distances(top, *source) {
                distances[row * n + column[i]] = d;
            }
        }
        let ids = members.into_iter().map(|(id, _)| id).collect();
        Ok(Some(DistanceTable::new(ids, distances)?))
    }
}

/// Forward Dijkstra over one level, by position in `level.vertices`.
fn top_level_distances(level: &HierarchyLevel, source: usize) -> Vec<(usize, u32)> {
    let mut dist: FxHashMap<usize, u32> = FxHashMap::default();
    let mut queue: PriorityQueue<usize, Reverse<u32>, FxBuildHasher> = PriorityQueue::with_default_hasher();
    let mut settled = Vec::new();
    dist.insert(source, 0);
    queue.push(source, Reverse(0));
    while let Some((u, Reverse(d))) = queue.pop() {
        settled.push((u, d));
        for e in level.vertices[u].edges.iter().filter(|e| e.forward) {
            let Some(t) = level.position(e.target) else {
                continue;
            };
            let nd = d.saturating_add(e.weight);
            if nd == INFINITY {
                continue;
            }
            if dist.get(&t).map_or(true, |old| nd < *old) {
                dist.insert(t, nd);
                queue.push_increase(t, Reverse(nd));
            }
        }
    }
    settled
}

fn bounding_box(hierarchy: &Hierarchy) -> BoundingBox {
    let mut coords = hierarchy.levels[0]
        .vertices
        .iter()
        .map(|v| hierarchy.coords[v.vertex as usize]);
    let Some(first) = coords.next() else {
        return BoundingBox::default();
    };
    coords.fold(
        BoundingBox {
            min_lon: first.lon,
            min_lat: first.lat,
            max_lon: first.lon,
            max_lat: first.lat,
        },
        |b, c| BoundingBox {
            min_lon: b.min_lon.min(c.lon),
            min_lat: b.min_lat.min(c.lat),
            max_lon: b.max_lon.max(c.lon),
            max_lat: b.max_lat.max(c.lat),
        },
    )
}

/// Structural checks the block codec cannot make on its own.
fn validate(hierarchy: &Hierarchy) -> Result<()> {
    let invalid = |msg: String| Err(Error::InvalidInput(msg));
    if hierarchy.levels.is_empty() {
        return invalid("hierarchy has no levels".into());
    }
    if hierarchy.levels.len() > u8::MAX as usize {
        return invalid(format!("{} levels exceed 255", hierarchy.levels.len()));
    }
    for (l, level) in hierarchy.levels.iter().enumerate() {
        if level.vertices.is_empty() {
            return invalid(format!("level {l} is empty"));
        }
        if level.vertices.windows(2).any(|w| w[0].vertex >= w[1].vertex) {
            return invalid(format!("level {l} vertices are not sorted and unique"));
        }
        for v in &level.vertices {
            if v.vertex as usize >= hierarchy.coords.len() {
                return invalid(format!("vertex {} has no coordinate", v.vertex));
            }
            if l > 0 && hierarchy.levels[l - 1].position(v.vertex).is_none() {
                return invalid(format!("vertex {} on level {l} is missing below", v.vertex));
            }
            for e in &v.edges {
                if e.min_level as usize > l {
                    return invalid(format!(
                        "edge {} -> {} on level {l} has min level {}",
                        v.vertex, e.target, e.min_level
                    ));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::hierarchy::{LevelEdge, LevelVertex};
    use crate::formats::OpenedArtifact;
    use crate::geo::Coord;
    use crate::store::MemorySource;

    fn edge(target: u32, weight: u32, forward: bool, backward: bool) -> LevelEdge {
        LevelEdge {
            target,
            weight,
            forward,
            backward,
            core: false,
            min_level: 0,
            hop_indices: None,
            satellite: None,
        }
    }

    /// 0 -> 1 -> 2 on one level, one-way
    fn line() -> Hierarchy {
        Hierarchy {
            coords: vec![Coord::new(0, 0), Coord::new(10, 5), Coord::new(20, -5)],
            levels: vec![HierarchyLevel {
                vertices: vec![
                    LevelVertex {
                        vertex: 0,
                        neighborhood: INFINITY,
                        edges: vec![edge(1, 3, true, false)],
                    },
                    LevelVertex {
                        vertex: 1,
                        neighborhood: 7,
                        edges: vec![edge(0, 3, false, true), edge(2, 4, true, false)],
                    },
                    LevelVertex {
                        vertex: 2,
                        neighborhood: INFINITY,
                        edges: vec![edge(1, 4, false, true)],
                    },
                ],
            }],
        }
    }

    fn small_blocks() -> BuildConfig {
        BuildConfig {
            block_vertices: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_header_describes_layout() {
        let encoded = ArtifactWriter::new(small_blocks()).encode(&line()).unwrap();
        let header = &encoded.header;
        assert_eq!(header.num_blocks, 2);
        assert_eq!((header.bits_per_block_id, header.bits_per_vertex_offset), (1, 1));
        assert_eq!(header.levels[0].num_vertices, 3);
        assert_eq!(header.levels[0].num_edges, 4);
        assert_eq!(
            header.bbox,
            BoundingBox {
                min_lon: 0,
                min_lat: -5,
                max_lon: 20,
                max_lat: 5
            }
        );
        assert!(header.has_distance_table());
    }

    #[test]
    fn test_distance_table_over_top_level() {
        let encoded = ArtifactWriter::new(small_blocks()).encode(&line()).unwrap();
        let opened = OpenedArtifact::open(&MemorySource::new(encoded.bytes), true).unwrap();
        let table = opened.distance_table.unwrap();
        assert_eq!(table.len(), 3);

        // vertex 1 has the finite neighborhood, so it is laid out first
        let ids = IdLayout::new(1, 1);
        let (v1, v0, v2) = (ids.vertex_id(0, 0), ids.vertex_id(0, 1), ids.vertex_id(1, 0));
        assert_eq!(table.get(v0, v2), 7);
        assert_eq!(table.get(v1, v2), 4);
        assert_eq!(table.get(v2, v0), INFINITY);
        assert_eq!(table.get(v0, v0), 0);
    }

    #[test]
    fn test_table_skipped_above_limit() {
        let config = BuildConfig {
            distance_table_max_vertices: 2,
            ..small_blocks()
        };
        let encoded = ArtifactWriter::new(config).encode(&line()).unwrap();
        assert!(!encoded.header.has_distance_table());
    }

    #[test]
    fn test_rejects_dangling_target() {
        let mut h = line();
        h.levels[0].vertices[0].edges.push(edge(9, 1, true, false));
        assert!(matches!(
            ArtifactWriter::new(small_blocks()).encode(&h),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejects_level_not_nested() {
        let mut h = line();
        h.levels.push(HierarchyLevel {
            vertices: vec![LevelVertex {
                vertex: 5,
                neighborhood: INFINITY,
                edges: vec![],
            }],
        });
        assert!(ArtifactWriter::new(small_blocks()).encode(&h).is_err());
    }
}
