//! Artifact container header and per-level metadata
//!
//! Layout of an artifact file (all integers little-endian):
//!
//! ```text
//! [header: 96 bytes][level info: 16 bytes x num_levels]
//! [block pointer index][block data][distance table (optional)]
//! [footer: crc64 x 2]
//! ```
//!
//! Segment offsets are absolute file offsets recorded in the header. Block
//! addresses in the pointer index are relative to `block_data_offset`.

use hh_common::{Error, Result};

pub const MAGIC: u32 = 0x41474848; // "HHGA"
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 96;
pub const LEVEL_INFO_LEN: usize = 16;
pub const FOOTER_LEN: usize = 16;

/// Flag bit: shortcut edges carry hop indices
pub const FLAG_HOP_INDICES: u16 = 0x0001;

/// Bounding box of all level-0 vertices, in microdegrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundingBox {
    pub min_lon: i32,
    pub min_lat: i32,
    pub max_lon: i32,
    pub max_lat: i32,
}

/// Per-level metadata: which block ids hold the level, and its size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LevelInfo {
    pub first_block: u32,
    pub num_blocks: u32,
    pub num_vertices: u32,
    pub num_edges: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHeader {
    pub flags: u16,
    pub bbox: BoundingBox,
    pub bits_per_block_id: u8,
    pub bits_per_vertex_offset: u8,
    pub num_blocks: u32,
    pub created_unix: i64,
    pub pointer_index_offset: u64,
    pub pointer_index_len: u64,
    pub block_data_offset: u64,
    pub block_data_len: u64,
    pub distance_table_offset: u64,
    pub distance_table_len: u64,
    pub levels: Vec<LevelInfo>,
}

impl ArtifactHeader {
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn has_hop_indices(&self) -> bool {
        self.flags & FLAG_HOP_INDICES != 0
    }

    pub fn has_distance_table(&self) -> bool {
        self.distance_table_len > 0
    }

    /// Total bytes of header plus level metadata.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + LEVEL_INFO_LEN * self.levels.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.bbox.min_lon.to_le_bytes());
        out.extend_from_slice(&self.bbox.min_lat.to_le_bytes());
        out.extend_from_slice(&self.bbox.max_lon.to_le_bytes());
        out.extend_from_slice(&self.bbox.max_lat.to_le_bytes());
        out.push(self.levels.len() as u8);
        out.push(self.bits_per_block_id);
        out.push(self.bits_per_vertex_offset);
        out.push(0); // reserved
        out.extend_from_slice(&self.num_blocks.to_le_bytes());
        out.extend_from_slice(&self.created_unix.to_le_bytes());
        for v in [
            self.pointer_index_offset,
            self.pointer_index_len,
            self.block_data_offset,
            self.block_data_len,
            self.distance_table_offset,
            self.distance_table_len,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.resize(HEADER_LEN, 0);
        for level in &self.levels {
            out.extend_from_slice(&level.first_block.to_le_bytes());
            out.extend_from_slice(&level.num_blocks.to_le_bytes());
            out.extend_from_slice(&level.num_vertices.to_le_bytes());
            out.extend_from_slice(&level.num_edges.to_le_bytes());
        }
        out
    }

    /// Decode the fixed header. Returns the header with an empty level list
    /// and the number of levels still to be read.
    pub fn decode_fixed(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < HEADER_LEN {
            return Err(Error::InvalidArtifact(format!(
                "header needs {HEADER_LEN} bytes, file has {}",
                buf.len()
            )));
        }
        let magic = u32_at(buf, 0);
        if magic != MAGIC {
            return Err(Error::InvalidArtifact(format!(
                "invalid magic: expected 0x{MAGIC:08X}, got 0x{magic:08X}"
            )));
        }
        let version = u16_at(buf, 4);
        if version != VERSION {
            return Err(Error::InvalidArtifact(format!(
                "unsupported version: expected {VERSION}, got {version}"
            )));
        }
        let num_levels = buf[24] as usize;
        if num_levels == 0 {
            return Err(Error::InvalidArtifact("artifact has no levels".into()));
        }
        let header = Self {
            flags: u16_at(buf, 6),
            bbox: BoundingBox {
                min_lon: u32_at(buf, 8) as i32,
                min_lat: u32_at(buf, 12) as i32,
                max_lon: u32_at(buf, 16) as i32,
                max_lat: u32_at(buf, 20) as i32,
            },
            bits_per_block_id: buf[25],
            bits_per_vertex_offset: buf[26],
            num_blocks: u32_at(buf, 28),
            created_unix: u64_at(buf, 32) as i64,
            pointer_index_offset: u64_at(buf, 40),
            pointer_index_len: u64_at(buf, 48),
            block_data_offset: u64_at(buf, 56),
            block_data_len: u64_at(buf, 64),
            distance_table_offset: u64_at(buf, 72),
            distance_table_len: u64_at(buf, 80),
            levels: Vec::with_capacity(num_levels),
        };
        if header.bits_per_block_id > 32 || header.bits_per_vertex_offset > 32 {
            return Err(Error::InvalidArtifact(format!(
                "id widths {}+{} bits exceed 32",
                header.bits_per_block_id, header.bits_per_vertex_offset
            )));
        }
        if header.bits_per_block_id as u32 + header.bits_per_vertex_offset as u32 > 32 {
            return Err(Error::InvalidArtifact(
                "block id and vertex offset do not fit a 32-bit vertex id".into(),
            ));
        }
        Ok((header, num_levels))
    }

    pub fn decode_levels(&mut self, buf: &[u8], num_levels: usize) -> Result<()> {
        if buf.len() < num_levels * LEVEL_INFO_LEN {
            return Err(Error::InvalidArtifact("truncated level metadata".into()));
        }
        self.levels = (0..num_levels)
            .map(|i| {
                let o = i * LEVEL_INFO_LEN;
                LevelInfo {
                    first_block: u32_at(buf, o),
                    num_blocks: u32_at(buf, o + 4),
                    num_vertices: u32_at(buf, o + 8),
                    num_edges: u32_at(buf, o + 12),
                }
            })
            .collect();

        let mut next = 0u32;
        for (lvl, info) in self.levels.iter().enumerate() {
            if info.first_block != next {
                return Err(Error::InvalidArtifact(format!(
                    "level {lvl} starts at block {}, expected {next}",
                    info.first_block
                )));
            }
            next = next.checked_add(info.num_blocks).ok_or_else(|| {
                Error::InvalidArtifact("level block counts overflow".into())
            })?;
        }
        if next != self.num_blocks {
            return Err(Error::InvalidArtifact(format!(
                "levels cover {next} blocks, header declares {}",
                self.num_blocks
            )));
        }
        Ok(())
    }

    /// Level owning `block_id`.
    pub fn level_of_block(&self, block_id: u32) -> Option<u8> {
        self.levels
            .iter()
            .position(|l| block_id >= l.first_block && block_id < l.first_block + l.num_blocks)
            .map(|l| l as u8)
    }
}

fn u16_at(buf: &[u8], o: usize) -> u16 {
    u16::from_le_bytes([buf[o], buf[o + 1]])
}

fn u32_at(buf: &[u8], o: usize) -> u32 {
    u32::from_le_bytes([buf[o], buf[o + 1], buf[o + 2], buf[o + 3]])
}

fn u64_at(buf: &[u8], o: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[o..o + 8]);
    u64::from_le_bytes(b)
}
