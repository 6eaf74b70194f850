//! Bit-packed block codec
//!
//! A block is one cluster of vertices of a single level, together with
//! their outbound edges. Every field width is recorded in the block header,
//! so a block decodes on its own given only the artifact-wide id widths.
//!
//! ```text
//! header      level:8 n_nbh:32 n_no_nbh:32 n_edges:32
//!             w_weight:6 w_lon:6 w_lat:6 w_nbh:6 min_lon:32 min_lat:32
//! ref arrays  adjacent, subjacent, overlying, level-zero
//!             (count:32, then count block ids of w_block bits)
//! vertices    [level>0] level-zero ptr  [level>1] subjacent ptr
//!             overlying:1 [+ptr]  [i < n_nbh] nbh:w_nbh
//!             [level=0] dlon:w_lon dlat:w_lat   n_out:4/24
//! edges       weight:w_weight target ptr fwd:1 bwd:1 core:1
//!             [level=0 & fwd] satellite  [level>0] min_level:8
//!             [min_level>0 & hop flag] hops:5/16 x hop:4/24
//! ```
//!
//! A pointer is `(index into one ref array, vertex offset in that block)`;
//! the index width is the bits needed for `[0, array_len - 1]`.
//! Vertices with a finite neighborhood come first; the rest are INFINITY.

use std::collections::BTreeMap;

use hh_common::{Error, Result};
use serde::{Deserialize, Serialize};

use super::bits::{bits_for, bits_for_count, BitReader, BitWriter, Truncated};
use crate::geo::Coord;
use crate::graph::{IdLayout, VertexId, INFINITY};

/// Artifact-wide parameters needed to encode or decode any block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub ids: IdLayout,
    pub hop_indices: bool,
}

/// Satellite data of a level-0 forward edge, used only for route output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSatellite {
    #[serde(default)]
    pub motorway_link: bool,
    #[serde(default)]
    pub roundabout: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    #[serde(default)]
    pub waypoints: Vec<Coord>,
}

impl EdgeSatellite {
    pub fn is_empty(&self) -> bool {
        !self.motorway_link
            && !self.roundabout
            && self.name.is_none()
            && self.reference.is_none()
            && self.waypoints.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockVertex {
    pub neighborhood: u32,
    pub level_zero: Option<VertexId>,
    pub subjacent: Option<VertexId>,
    pub overlying: Option<VertexId>,
    pub coord: Option<Coord>,
    pub first_edge: u32,
    pub num_edges: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEdge {
    pub target: VertexId,
    pub weight: u32,
    pub forward: bool,
    pub backward: bool,
    pub core: bool,
    pub min_level: u8,
    pub hop_indices: Option<Vec<u32>>,
    pub satellite: Option<Box<EdgeSatellite>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: u32,
    pub level: u8,
    pub vertices: Vec<BlockVertex>,
    pub edges: Vec<BlockEdge>,
}

impl Block {
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn edges_of(&self, offset: usize) -> &[BlockEdge] {
        let v = &self.vertices[offset];
        let start = v.first_edge as usize;
        &self.edges[start..start + v.num_edges as usize]
    }

    /// Approximate heap footprint, used as the cache weight.
    pub fn size_bytes(&self) -> usize {
        let satellite: usize = self
            .edges
            .iter()
            .map(|e| {
                let hops = e.hop_indices.as_ref().map_or(0, |h| h.len() * 4);
                let sat = e.satellite.as_ref().map_or(0, |s| {
                    std::mem::size_of::<EdgeSatellite>()
                        + s.name.as_ref().map_or(0, |n| n.len())
                        + s.reference.as_ref().map_or(0, |r| r.len())
                        + s.waypoints.len() * std::mem::size_of::<Coord>()
                });
                hops + sat
            })
            .sum();
        std::mem::size_of::<Block>()
            + self.vertices.len() * std::mem::size_of::<BlockVertex>()
            + self.edges.len() * std::mem::size_of::<BlockEdge>()
            + satellite
    }
}

/// The four cross-block reference arrays of one block
#[derive(Default)]
struct RefArrays {
    adjacent: RefArray,
    subjacent: RefArray,
    overlying: RefArray,
    level_zero: RefArray,
}

#[derive(Default)]
struct RefArray {
    ids: Vec<u32>,
    index: BTreeMap<u32, u32>,
}

impl RefArray {
    fn insert(&mut self, block: u32) {
        self.index.entry(block).or_insert(0);
    }

    fn finish(&mut self) {
        self.ids = self.index.keys().copied().collect();
        for (i, id) in self.ids.iter().enumerate() {
            self.index.insert(*id, i as u32);
        }
    }

    fn idx_bits(&self) -> u8 {
        bits_for_count(self.ids.len())
    }
}

/// Encode one block. Vertices with a finite neighborhood must come first.
pub fn encode(block: &Block, layout: &BlockLayout) -> Result<Vec<u8>> {
    let invalid = |msg: String| Error::InvalidInput(format!("block {}: {msg}", block.id));
    let level = block.level;

    let num_with_nbh = block
        .vertices
        .iter()
        .take_while(|v| v.neighborhood != INFINITY)
        .count();
    if block.vertices[num_with_nbh..]
        .iter()
        .any(|v| v.neighborhood != INFINITY)
    {
        return Err(invalid("finite neighborhoods must precede INFINITY ones".into()));
    }

    let mut refs = RefArrays::default();
    let mut coords: Vec<Coord> = Vec::new();
    for (i, v) in block.vertices.iter().enumerate() {
        if level > 0 {
            let lz = v
                .level_zero
                .ok_or_else(|| invalid(format!("vertex {i} lacks a level-0 pointer")))?;
            refs.level_zero.insert(layout.ids.block_of(lz));
        }
        if level > 1 {
            let sub = v
                .subjacent
                .ok_or_else(|| invalid(format!("vertex {i} lacks a subjacent pointer")))?;
            refs.subjacent.insert(layout.ids.block_of(sub));
        }
        if let Some(over) = v.overlying {
            refs.overlying.insert(layout.ids.block_of(over));
        }
        if level == 0 {
            coords.push(
                v.coord
                    .ok_or_else(|| invalid(format!("level-0 vertex {i} lacks a coordinate")))?,
            );
        }
        let end = v.first_edge as usize + v.num_edges as usize;
        if end > block.edges.len() {
            return Err(invalid(format!("vertex {i} edge range past edge list")));
        }
    }

    let mut max_weight = 0u32;
    let mut max_nbh = 0u32;
    for e in &block.edges {
        refs.adjacent.insert(layout.ids.block_of(e.target));
        max_weight = max_weight.max(e.weight);
        if e.min_level > level {
            return Err(invalid(format!(
                "edge min level {} above block level {level}",
                e.min_level
            )));
        }
        if let Some(sat) = &e.satellite {
            coords.extend(sat.waypoints.iter().copied());
        }
    }
    for v in &block.vertices[..num_with_nbh] {
        max_nbh = max_nbh.max(v.neighborhood);
    }
    refs.adjacent.finish();
    refs.subjacent.finish();
    refs.overlying.finish();
    refs.level_zero.finish();

    let min_lon = coords.iter().map(|c| c.lon).min().unwrap_or(0);
    let min_lat = coords.iter().map(|c| c.lat).min().unwrap_or(0);
    let max_lon = coords.iter().map(|c| c.lon).max().unwrap_or(0);
    let max_lat = coords.iter().map(|c| c.lat).max().unwrap_or(0);
    let bits_lon = bits_for((max_lon as i64 - min_lon as i64) as u64);
    let bits_lat = bits_for((max_lat as i64 - min_lat as i64) as u64);
    let bits_weight = bits_for(max_weight as u64);
    let bits_nbh = bits_for(max_nbh as u64);

    let mut w = BitWriter::new();
    w.write(level as u64, 8);
    w.write(num_with_nbh as u64, 32);
    w.write((block.vertices.len() - num_with_nbh) as u64, 32);
    w.write(block.edges.len() as u64, 32);
    w.write(bits_weight as u64, 6);
    w.write(bits_lon as u64, 6);
    w.write(bits_lat as u64, 6);
    w.write(bits_nbh as u64, 6);
    w.write(min_lon as u32 as u64, 32);
    w.write(min_lat as u32 as u64, 32);
    for array in [&refs.adjacent, &refs.subjacent, &refs.overlying, &refs.level_zero] {
        w.write(array.ids.len() as u64, 32);
        for id in &array.ids {
            w.write(*id as u64, layout.ids.block_bits);
        }
    }

    let write_ptr = |w: &mut BitWriter, array: &RefArray, id: VertexId| {
        let idx = array.index[&layout.ids.block_of(id)];
        w.write(idx as u64, array.idx_bits());
        w.write(layout.ids.offset_of(id) as u64, layout.ids.offset_bits);
    };

    for (i, v) in block.vertices.iter().enumerate() {
        if let (true, Some(lz)) = (level > 0, v.level_zero) {
            write_ptr(&mut w, &refs.level_zero, lz);
        }
        if let (true, Some(sub)) = (level > 1, v.subjacent) {
            write_ptr(&mut w, &refs.subjacent, sub);
        }
        w.write_bit(v.overlying.is_some());
        if let Some(over) = v.overlying {
            write_ptr(&mut w, &refs.overlying, over);
        }
        if i < num_with_nbh {
            w.write(v.neighborhood as u64, bits_nbh);
        }
        if let (0, Some(c)) = (level, v.coord) {
            w.write((c.lon as i64 - min_lon as i64) as u64, bits_lon);
            w.write((c.lat as i64 - min_lat as i64) as u64, bits_lat);
        }
        if !w.write_escaped(v.num_edges as u64, 4, 24) {
            return Err(invalid(format!(
                "vertex {i} has {} edges, more than 24 bits hold",
                v.num_edges
            )));
        }
    }

    for e in &block.edges {
        w.write(e.weight as u64, bits_weight);
        write_ptr(&mut w, &refs.adjacent, e.target);
        w.write_bit(e.forward);
        w.write_bit(e.backward);
        w.write_bit(e.core);
        if level == 0 && e.forward {
            let empty = EdgeSatellite::default();
            let sat = e.satellite.as_deref().unwrap_or(&empty);
            w.write_bit(sat.motorway_link);
            w.write_bit(sat.roundabout);
            for text in [&sat.name, &sat.reference] {
                let bytes = text.as_deref().unwrap_or("").as_bytes();
                if bytes.len() > u8::MAX as usize {
                    return Err(invalid(format!("edge text of {} bytes exceeds 255", bytes.len())));
                }
                w.write(bytes.len() as u64, 8);
                w.write_bytes(bytes);
            }
            if !w.write_escaped(sat.waypoints.len() as u64, 4, 16) {
                return Err(invalid(format!("{} waypoints exceed 65535", sat.waypoints.len())));
            }
            for c in &sat.waypoints {
                w.write((c.lon as i64 - min_lon as i64) as u64, bits_lon);
                w.write((c.lat as i64 - min_lat as i64) as u64, bits_lat);
            }
        }
        if level > 0 {
            w.write(e.min_level as u64, 8);
        }
        if e.min_level > 0 && layout.hop_indices {
            let hops = e.hop_indices.as_deref().unwrap_or(&[]);
            if !w.write_escaped(hops.len() as u64, 5, 16) {
                return Err(invalid(format!("{} hop indices exceed 65535", hops.len())));
            }
            for &h in hops {
                if !w.write_escaped(h as u64, 4, 24) {
                    return Err(invalid(format!("hop index {h} exceeds 24 bits")));
                }
            }
        }
    }

    Ok(w.into_bytes())
}

/// Decode one block. `expected_level` comes from the artifact's level table.
pub fn decode(block_id: u32, expected_level: u8, data: &[u8], layout: &BlockLayout) -> Result<Block> {
    let mut r = BlockReader {
        inner: BitReader::new(data),
        block_id,
    };

    let level = r.read(8, "level")? as u8;
    if level != expected_level {
        return Err(Error::corrupt(
            block_id,
            format!("header says level {level}, block belongs to level {expected_level}"),
        ));
    }
    let num_with_nbh = r.read(32, "neighborhood count")? as usize;
    let num_without_nbh = r.read(32, "vertex count")? as usize;
    let num_edges = r.read(32, "edge count")? as usize;
    let num_vertices = num_with_nbh + num_without_nbh;
    // every vertex record takes at least 5 bits and every edge at least 3
    if (num_vertices as u64) * 5 + (num_edges as u64) * 3 > r.inner.remaining() {
        return Err(Error::corrupt(block_id, "counts exceed block length"));
    }
    let bits_weight = r.width("weight width")?;
    let bits_lon = r.width("longitude width")?;
    let bits_lat = r.width("latitude width")?;
    let bits_nbh = r.width("neighborhood width")?;
    let min_lon = r.read(32, "min longitude")? as u32 as i32;
    let min_lat = r.read(32, "min latitude")? as u32 as i32;

    let mut arrays: [Vec<u32>; 4] = Default::default();
    for (slot, name) in arrays
        .iter_mut()
        .zip(["adjacent", "subjacent", "overlying", "level-zero"])
    {
        let len = r.read(32, name)? as usize;
        if len as u64 * layout.ids.block_bits as u64 > r.inner.remaining() {
            return Err(Error::corrupt(block_id, format!("{name} array exceeds block length")));
        }
        *slot = (0..len)
            .map(|_| r.read(layout.ids.block_bits, name).map(|v| v as u32))
            .collect::<Result<_>>()?;
    }
    let [adjacent, subjacent, overlying, level_zero] = arrays;

    let mut vertices = Vec::with_capacity(num_vertices);
    let mut first_edge = 0u32;
    for i in 0..num_vertices {
        let level_zero_ptr = if level > 0 {
            Some(r.pointer(&level_zero, layout, "level-zero")?)
        } else {
            None
        };
        let subjacent_ptr = if level > 1 {
            Some(r.pointer(&subjacent, layout, "subjacent")?)
        } else {
            level_zero_ptr
        };
        let overlying_ptr = if r.bit("overlying flag")? {
            Some(r.pointer(&overlying, layout, "overlying")?)
        } else {
            None
        };
        let neighborhood = if i < num_with_nbh {
            r.read(bits_nbh, "neighborhood")? as u32
        } else {
            INFINITY
        };
        let coord = if level == 0 {
            Some(r.coord(min_lon, min_lat, bits_lon, bits_lat)?)
        } else {
            None
        };
        let num_out = r.escaped(4, 24, "out degree")? as u32;
        vertices.push(BlockVertex {
            neighborhood,
            level_zero: level_zero_ptr,
            subjacent: subjacent_ptr,
            overlying: overlying_ptr,
            coord,
            first_edge,
            num_edges: num_out,
        });
        first_edge = first_edge
            .checked_add(num_out)
            .ok_or_else(|| Error::corrupt(block_id, "out degrees overflow"))?;
    }
    if first_edge as usize != num_edges {
        return Err(Error::corrupt(
            block_id,
            format!("out degrees sum to {first_edge}, header declares {num_edges} edges"),
        ));
    }

    let mut edges = Vec::with_capacity(num_edges);
    for _ in 0..num_edges {
        let weight = r.read(bits_weight, "edge weight")? as u32;
        let target = r.pointer(&adjacent, layout, "adjacent")?;
        let forward = r.bit("forward flag")?;
        let backward = r.bit("backward flag")?;
        let core = r.bit("core flag")?;

        let mut satellite = None;
        if level == 0 && forward {
            let sat = EdgeSatellite {
                motorway_link: r.bit("motorway flag")?,
                roundabout: r.bit("roundabout flag")?,
                name: r.text("edge name")?,
                reference: r.text("edge ref")?,
                waypoints: {
                    let n = r.escaped(4, 16, "waypoint count")? as usize;
                    (0..n)
                        .map(|_| r.coord(min_lon, min_lat, bits_lon, bits_lat))
                        .collect::<Result<_>>()?
                },
            };
            if !sat.is_empty() {
                satellite = Some(Box::new(sat));
            }
        }

        let min_level = if level > 0 {
            r.read(8, "min level")? as u8
        } else {
            0
        };
        if min_level > level {
            return Err(Error::corrupt(
                block_id,
                format!("edge min level {min_level} above block level {level}"),
            ));
        }

        let mut hop_indices = None;
        if min_level > 0 && layout.hop_indices {
            let n = r.escaped(5, 16, "hop count")? as usize;
            if n > 0 {
                hop_indices = Some(
                    (0..n)
                        .map(|_| r.escaped(4, 24, "hop index").map(|v| v as u32))
                        .collect::<Result<_>>()?,
                );
            }
        }

        edges.push(BlockEdge {
            target,
            weight,
            forward,
            backward,
            core,
            min_level,
            hop_indices,
            satellite,
        });
    }

    if r.inner.remaining() >= 8 {
        return Err(Error::corrupt(
            block_id,
            format!("{} trailing bits after last edge", r.inner.remaining()),
        ));
    }

    Ok(Block {
        id: block_id,
        level,
        vertices,
        edges,
    })
}

/// Bit reader that turns truncation into `CorruptBlock`
struct BlockReader<'a> {
    inner: BitReader<'a>,
    block_id: u32,
}

impl BlockReader<'_> {
    fn truncated(&self, t: Truncated, field: &str) -> Error {
        Error::corrupt(
            self.block_id,
            format!("truncated reading {field} ({} bits at bit {})", t.wanted, t.at_bit),
        )
    }

    fn read(&mut self, bits: u8, field: &str) -> Result<u64> {
        self.inner.read(bits).map_err(|t| self.truncated(t, field))
    }

    fn bit(&mut self, field: &str) -> Result<bool> {
        Ok(self.read(1, field)? == 1)
    }

    fn width(&mut self, field: &str) -> Result<u8> {
        let w = self.read(6, field)? as u8;
        if w > 32 {
            return Err(Error::corrupt(self.block_id, format!("{field} of {w} bits")));
        }
        Ok(w)
    }

    fn escaped(&mut self, short: u8, long: u8, field: &str) -> Result<u64> {
        self.inner
            .read_escaped(short, long)
            .map_err(|t| self.truncated(t, field))
    }

    fn pointer(&mut self, array: &[u32], layout: &BlockLayout, field: &str) -> Result<VertexId> {
        let idx = self.read(bits_for_count(array.len()), field)? as usize;
        let offset = self.read(layout.ids.offset_bits, field)? as u32;
        let block = *array.get(idx).ok_or_else(|| {
            Error::corrupt(
                self.block_id,
                format!("{field} pointer index {idx} past array of {}", array.len()),
            )
        })?;
        Ok(layout.ids.vertex_id(block, offset))
    }

    fn coord(&mut self, min_lon: i32, min_lat: i32, bits_lon: u8, bits_lat: u8) -> Result<Coord> {
        let lon = min_lon as i64 + self.read(bits_lon, "longitude")? as i64;
        let lat = min_lat as i64 + self.read(bits_lat, "latitude")? as i64;
        match (i32::try_from(lon), i32::try_from(lat)) {
            (Ok(lon), Ok(lat)) => Ok(Coord::new(lon, lat)),
            _ => Err(Error::corrupt(self.block_id, "coordinate out of range")),
        }
    }

    fn text(&mut self, field: &str) -> Result<Option<String>> {
        let len = self.read(8, field)? as usize;
        if len == 0 {
            return Ok(None);
        }
        let bytes = self
            .inner
            .read_bytes(len)
            .map_err(|t| self.truncated(t, field))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| Error::corrupt(self.block_id, format!("{field} is not UTF-8")))
    }
}
