//! Grouped, delta-encoded index from block id to `(start, size)`
//!
//! Blocks are split into groups of `group_size`. Each group stores the
//! absolute start address and size of its first block; every later block
//! in the group stores only the change in size from its predecessor, in a
//! bit width sized to the group's largest change. Changes are offset by the
//! group's minimum so shrinking sizes encode as well as growing ones.
//!
//! Lookup walks at most `group_size - 1` deltas.

use hh_common::{Error, Result};

use super::bits::{bits_for, BitReader, BitWriter};

pub const MIN_GROUP_SIZE: u32 = 5;
const MAX_GROUP_SIZE: u32 = 1024;
const GROUP_RECORD_LEN: usize = 8 + 4 + 8 + 1;
const FIXED_LEN: usize = 12 + 4;

/// Location of one encoded block, relative to the block data segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPointer {
    pub start: u64,
    pub len: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Group {
    start: u64,
    first_size: u32,
    min_delta: i64,
    enc_bits: u8,
    enc_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPointerIndex {
    group_size: u32,
    num_blocks: u32,
    groups: Vec<Group>,
    enc: Vec<u8>,
}

impl BlockPointerIndex {
    /// Build with a fixed group size.
    pub fn build(sizes: &[u32], group_size: u32) -> Self {
        let group_size = group_size.max(1);
        let mut groups = Vec::with_capacity(sizes.len().div_ceil(group_size as usize));
        let mut writer = BitWriter::new();
        let mut addr = 0u64;

        for chunk in sizes.chunks(group_size as usize) {
            let deltas: Vec<i64> = chunk
                .windows(2)
                .map(|w| w[1] as i64 - w[0] as i64)
                .collect();
            let min_delta = deltas.iter().copied().min().unwrap_or(0);
            let max_enc = deltas.iter().map(|d| (d - min_delta) as u64).max().unwrap_or(0);
            let enc_bits = bits_for(max_enc);

            groups.push(Group {
                start: addr,
                first_size: chunk[0],
                min_delta,
                enc_bits,
                enc_offset: writer.bit_len(),
            });
            for d in &deltas {
                writer.write((d - min_delta) as u64, enc_bits);
            }
            addr += chunk.iter().map(|&s| s as u64).sum::<u64>();
        }

        Self {
            group_size,
            num_blocks: sizes.len() as u32,
            groups,
            enc: writer.into_bytes(),
        }
    }

    /// Build with the group size that minimizes the serialized index.
    pub fn build_space_optimal(sizes: &[u32]) -> Self {
        let upper = (sizes.len() as u32).clamp(MIN_GROUP_SIZE, MAX_GROUP_SIZE);
        let mut best = Self::build(sizes, MIN_GROUP_SIZE);
        for g in MIN_GROUP_SIZE + 1..=upper {
            let candidate = Self::build(sizes, g);
            if candidate.encoded_len() < best.encoded_len() {
                best = candidate;
            }
        }
        best
    }

    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    pub fn group_size(&self) -> u32 {
        self.group_size
    }

    pub fn get(&self, block_id: u32) -> Result<BlockPointer> {
        if block_id >= self.num_blocks {
            return Err(Error::out_of_range("block", block_id, self.num_blocks));
        }
        let group = &self.groups[(block_id / self.group_size) as usize];
        let steps = block_id % self.group_size;

        let mut start = group.start;
        let mut size = group.first_size as i64;
        let mut reader = BitReader::at(&self.enc, group.enc_offset);
        for _ in 0..steps {
            start += size as u64;
            let enc = reader.read(group.enc_bits).map_err(|_| {
                Error::InvalidArtifact(format!("pointer index truncated at block {block_id}"))
            })?;
            size += enc as i64 + group.min_delta;
        }
        if !(0..=u32::MAX as i64).contains(&size) {
            return Err(Error::InvalidArtifact(format!(
                "pointer index yields size {size} for block {block_id}"
            )));
        }
        Ok(BlockPointer {
            start,
            len: size as u32,
        })
    }

    pub fn encoded_len(&self) -> usize {
        FIXED_LEN + self.groups.len() * GROUP_RECORD_LEN + self.enc.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.group_size.to_le_bytes());
        out.extend_from_slice(&self.num_blocks.to_le_bytes());
        out.extend_from_slice(&(self.groups.len() as u32).to_le_bytes());
        for g in &self.groups {
            out.extend_from_slice(&g.start.to_le_bytes());
            out.extend_from_slice(&g.first_size.to_le_bytes());
            out.extend_from_slice(&g.min_delta.to_le_bytes());
            out.push(g.enc_bits);
        }
        out.extend_from_slice(&(self.enc.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.enc);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let truncated = || Error::InvalidArtifact("truncated block pointer index".into());
        let mut cur = Cursor { buf, pos: 0 };

        let group_size = cur.u32().ok_or_else(truncated)?;
        let num_blocks = cur.u32().ok_or_else(truncated)?;
        let num_groups = cur.u32().ok_or_else(truncated)?;
        if group_size == 0 {
            return Err(Error::InvalidArtifact("pointer index group size is 0".into()));
        }
        if num_groups as u64 != (num_blocks as u64).div_ceil(group_size as u64) {
            return Err(Error::InvalidArtifact(format!(
                "pointer index has {num_groups} groups for {num_blocks} blocks of group size {group_size}"
            )));
        }

        let mut groups = Vec::with_capacity(num_groups as usize);
        let mut enc_offset = 0u64;
        for g in 0..num_groups {
            let start = cur.u64().ok_or_else(truncated)?;
            let first_size = cur.u32().ok_or_else(truncated)?;
            let min_delta = cur.u64().ok_or_else(truncated)? as i64;
            let enc_bits = cur.u8().ok_or_else(truncated)?;
            if enc_bits > 33 {
                return Err(Error::InvalidArtifact(format!(
                    "pointer index group {g} uses {enc_bits}-bit deltas"
                )));
            }
            let members = (num_blocks - g * group_size).min(group_size);
            groups.push(Group {
                start,
                first_size,
                min_delta,
                enc_bits,
                enc_offset,
            });
            enc_offset += (members as u64 - 1) * enc_bits as u64;
        }

        let enc_len = cur.u32().ok_or_else(truncated)? as usize;
        let enc = cur.bytes(enc_len).ok_or_else(truncated)?.to_vec();
        if enc_offset > enc.len() as u64 * 8 {
            return Err(truncated());
        }

        Ok(Self {
            group_size,
            num_blocks,
            groups,
            enc,
        })
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let out = self.buf.get(self.pos..self.pos.checked_add(n)?)?;
        self.pos += n;
        Some(out)
    }

    fn u8(&mut self) -> Option<u8> {
        self.bytes(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        self.bytes(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Option<u64> {
        let b = self.bytes(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Some(u64::from_le_bytes(a))
    }
}
