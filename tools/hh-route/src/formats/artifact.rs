//! Artifact container: assembles and opens the on-disk hierarchy
//!
//! The writer lays out header, level table, pointer index, block data and
//! the optional distance table, then appends two CRC-64 words: one over
//! header plus level table, one over everything between them and the
//! footer. Opening always checks the first; the second is optional because
//! it means reading the whole file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use hh_common::{Error, Result};

use super::crc::{checksum, Digest};
use super::distance_table::DistanceTable;
use super::header::{ArtifactHeader, FOOTER_LEN, HEADER_LEN, LEVEL_INFO_LEN};
use super::pointer_index::BlockPointerIndex;
use crate::store::ByteSource;

const VERIFY_CHUNK: usize = 1 << 20;

/// Finished artifact bytes plus the header describing them
pub struct EncodedArtifact {
    pub header: ArtifactHeader,
    pub bytes: Vec<u8>,
}

/// Lay out an artifact. Offsets and lengths in `header` are overwritten;
/// everything else (levels, id widths, flags, bbox) must already be set.
pub fn encode_artifact(
    mut header: ArtifactHeader,
    blocks: &[Vec<u8>],
    distance_table: Option<&DistanceTable>,
) -> Result<EncodedArtifact> {
    if blocks.len() != header.num_blocks as usize {
        return Err(Error::InvalidInput(format!(
            "header declares {} blocks, {} encoded",
            header.num_blocks,
            blocks.len()
        )));
    }
    let sizes = blocks
        .iter()
        .map(|b| {
            u32::try_from(b.len())
                .map_err(|_| Error::InvalidInput(format!("block of {} bytes", b.len())))
        })
        .collect::<Result<Vec<u32>>>()?;
    let pointers = BlockPointerIndex::build_space_optimal(&sizes).encode();
    let table = distance_table.map(|t| t.encode()).unwrap_or_default();
    let block_data_len: u64 = sizes.iter().map(|s| *s as u64).sum();

    header.pointer_index_offset = header.encoded_len() as u64;
    header.pointer_index_len = pointers.len() as u64;
    header.block_data_offset = header.pointer_index_offset + header.pointer_index_len;
    header.block_data_len = block_data_len;
    header.distance_table_offset = header.block_data_offset + block_data_len;
    header.distance_table_len = table.len() as u64;

    let head = header.encode();
    let total = head.len() + pointers.len() + block_data_len as usize + table.len() + FOOTER_LEN;
    let mut bytes = Vec::with_capacity(total);
    bytes.extend_from_slice(&head);
    bytes.extend_from_slice(&pointers);
    for b in blocks {
        bytes.extend_from_slice(b);
    }
    bytes.extend_from_slice(&table);

    let head_crc = checksum(&bytes[..head.len()]);
    let body_crc = checksum(&bytes[head.len()..]);
    bytes.extend_from_slice(&head_crc.to_le_bytes());
    bytes.extend_from_slice(&body_crc.to_le_bytes());

    Ok(EncodedArtifact { header, bytes })
}

pub struct ArtifactFile;

impl ArtifactFile {
    /// Write an artifact to `path`.
    pub fn write<P: AsRef<Path>>(
        path: P,
        header: ArtifactHeader,
        blocks: &[Vec<u8>],
        distance_table: Option<&DistanceTable>,
    ) -> Result<ArtifactHeader> {
        let encoded = encode_artifact(header, blocks, distance_table)?;
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        writer.write_all(&encoded.bytes)?;
        writer.flush()?;
        Ok(encoded.header)
    }
}

/// Everything needed to serve block reads, loaded once at open
#[derive(Debug)]
pub struct OpenedArtifact {
    pub header: ArtifactHeader,
    pub pointers: BlockPointerIndex,
    pub distance_table: Option<DistanceTable>,
}

impl OpenedArtifact {
    pub fn open(source: &dyn ByteSource, verify_checksum: bool) -> Result<Self> {
        let file_len = source.len();
        if file_len < (HEADER_LEN + FOOTER_LEN) as u64 {
            return Err(Error::InvalidArtifact(format!(
                "{file_len} bytes is too short for an artifact"
            )));
        }
        let fixed = read_vec(source, 0, HEADER_LEN)?;
        let (mut header, num_levels) = ArtifactHeader::decode_fixed(&fixed)?;
        let levels_len = num_levels * LEVEL_INFO_LEN;
        if (HEADER_LEN + levels_len + FOOTER_LEN) as u64 > file_len {
            return Err(Error::InvalidArtifact("truncated level metadata".into()));
        }
        let levels = read_vec(source, HEADER_LEN as u64, levels_len)?;
        header.decode_levels(&levels, num_levels)?;

        let footer = read_vec(source, file_len - FOOTER_LEN as u64, FOOTER_LEN)?;
        let head_crc = u64::from_le_bytes(footer[..8].try_into().unwrap_or_default());
        let body_crc = u64::from_le_bytes(footer[8..].try_into().unwrap_or_default());
        let mut head_digest = Digest::new();
        head_digest.update(&fixed);
        head_digest.update(&levels);
        if head_digest.finalize() != head_crc {
            return Err(Error::InvalidArtifact("header checksum mismatch".into()));
        }

        check_segments(&header, file_len)?;
        if verify_checksum {
            let body_start = header.encoded_len() as u64;
            let body_end = file_len - FOOTER_LEN as u64;
            if digest_range(source, body_start, body_end)? != body_crc {
                return Err(Error::InvalidArtifact("body checksum mismatch".into()));
            }
        }

        let pointer_bytes = read_vec(
            source,
            header.pointer_index_offset,
            header.pointer_index_len as usize,
        )?;
        let pointers = BlockPointerIndex::decode(&pointer_bytes)?;
        if pointers.num_blocks() != header.num_blocks {
            return Err(Error::InvalidArtifact(format!(
                "pointer index covers {} blocks, header declares {}",
                pointers.num_blocks(),
                header.num_blocks
            )));
        }
        for id in 0..header.num_blocks {
            let p = pointers.get(id)?;
            if p.start + p.len as u64 > header.block_data_len {
                return Err(Error::InvalidArtifact(format!(
                    "block {id} extends past the block data segment"
                )));
            }
        }

        let distance_table = if header.has_distance_table() {
            let bytes = read_vec(
                source,
                header.distance_table_offset,
                header.distance_table_len as usize,
            )?;
            Some(DistanceTable::decode(&bytes)?)
        } else {
            None
        };

        Ok(Self {
            header,
            pointers,
            distance_table,
        })
    }

    /// Absolute file range of one block.
    pub fn block_range(&self, block_id: u32) -> Result<(u64, usize)> {
        let p = self.pointers.get(block_id)?;
        Ok((self.header.block_data_offset + p.start, p.len as usize))
    }
}

fn check_segments(h: &ArtifactHeader, file_len: u64) -> Result<()> {
    let segments = [
        ("pointer index", h.pointer_index_offset, h.pointer_index_len),
        ("block data", h.block_data_offset, h.block_data_len),
        ("distance table", h.distance_table_offset, h.distance_table_len),
    ];
    let mut expected = h.encoded_len() as u64;
    for (name, offset, len) in segments {
        if offset != expected {
            return Err(Error::InvalidArtifact(format!(
                "{name} at offset {offset}, expected {expected}"
            )));
        }
        expected = offset
            .checked_add(len)
            .ok_or_else(|| Error::InvalidArtifact(format!("{name} length overflows")))?;
    }
    if expected + FOOTER_LEN as u64 != file_len {
        return Err(Error::InvalidArtifact(format!(
            "segments end at {expected}, file holds {file_len} bytes"
        )));
    }
    Ok(())
}

fn read_vec(source: &dyn ByteSource, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    source.read_at(offset, &mut buf)?;
    Ok(buf)
}

fn digest_range(source: &dyn ByteSource, start: u64, end: u64) -> Result<u64> {
    let mut digest = Digest::new();
    let mut buf = vec![0u8; VERIFY_CHUNK];
    let mut pos = start;
    while pos < end {
        let n = ((end - pos) as usize).min(VERIFY_CHUNK);
        source.read_at(pos, &mut buf[..n])?;
        digest.update(&buf[..n]);
        pos += n as u64;
    }
    Ok(digest.finalize())
}
