//! Top-level distance table
//!
//! Dense n x n matrix of shortest-path distances between the vertices of the
//! top level, keyed by their top-level vertex ids. Stored as
//! `n:u32 | ids:u32 x n | distances:u32 x n*n` (little-endian, row-major).

use hh_common::{Error, Result};
use rustc_hash::FxHashMap;

use crate::graph::{VertexId, INFINITY};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistanceTable {
    ids: Vec<VertexId>,
    index: FxHashMap<VertexId, u32>,
    distances: Vec<u32>,
}

impl DistanceTable {
    /// `distances` is row-major over `ids`.
    pub fn new(ids: Vec<VertexId>, distances: Vec<u32>) -> Result<Self> {
        let n = ids.len();
        if distances.len() != n * n {
            return Err(Error::InvalidInput(format!(
                "distance table of {n} vertices needs {} entries, got {}",
                n * n,
                distances.len()
            )));
        }
        let index: FxHashMap<VertexId, u32> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i as u32))
            .collect();
        if index.len() != n {
            return Err(Error::InvalidInput("duplicate vertex in distance table".into()));
        }
        Ok(Self {
            ids,
            index,
            distances,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[VertexId] {
        &self.ids
    }

    /// Row/column of a top-level vertex, if the table covers it.
    pub fn row_col_index(&self, v: VertexId) -> Option<u32> {
        self.index.get(&v).copied()
    }

    pub fn contains(&self, v: VertexId) -> bool {
        self.index.contains_key(&v)
    }

    /// Distance from `a` to `b`; INFINITY if either is absent or unreachable.
    pub fn get(&self, a: VertexId, b: VertexId) -> u32 {
        match (self.row_col_index(a), self.row_col_index(b)) {
            (Some(i), Some(j)) => self.distances[i as usize * self.ids.len() + j as usize],
            _ => INFINITY,
        }
    }

    pub fn encoded_len(&self) -> usize {
        4 + 4 * self.ids.len() + 4 * self.distances.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&(self.ids.len() as u32).to_le_bytes());
        for id in &self.ids {
            out.extend_from_slice(&id.0.to_le_bytes());
        }
        for d in &self.distances {
            out.extend_from_slice(&d.to_le_bytes());
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let word = |i: usize| -> Result<u32> {
            buf.get(i * 4..i * 4 + 4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .ok_or_else(|| Error::InvalidArtifact("truncated distance table".into()))
        };
        let n = word(0)? as usize;
        let expected = 4u64 * (1 + n as u64 + n as u64 * n as u64);
        if expected != buf.len() as u64 {
            return Err(Error::InvalidArtifact(format!(
                "distance table of {n} vertices needs {expected} bytes, segment has {}",
                buf.len()
            )));
        }
        let ids = (0..n).map(|i| word(1 + i).map(VertexId)).collect::<Result<_>>()?;
        let distances = (0..n * n).map(|i| word(1 + n + i)).collect::<Result<_>>()?;
        Self::new(ids, distances).map_err(|e| Error::InvalidArtifact(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> DistanceTable {
        DistanceTable::new(
            vec![VertexId(40), VertexId(7), VertexId(130)],
            vec![0, 5, 9, 5, 0, INFINITY, 9, 4, 0],
        )
        .unwrap()
    }

    #[test]
    fn test_lookup() {
        let t = table();
        assert_eq!(t.get(VertexId(40), VertexId(130)), 9);
        assert_eq!(t.get(VertexId(7), VertexId(130)), INFINITY);
        assert_eq!(t.get(VertexId(130), VertexId(7)), 4);
        assert_eq!(t.get(VertexId(1), VertexId(7)), INFINITY);
        assert_eq!(t.row_col_index(VertexId(7)), Some(1));
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        let mut bytes = table().encode();
        assert_eq!(DistanceTable::decode(&bytes).unwrap(), table());
        bytes.pop();
        assert!(matches!(
            DistanceTable::decode(&bytes),
            Err(Error::InvalidArtifact(_))
        ));
    }

    #[test]
    fn test_mismatched_matrix_rejected() {
        assert!(DistanceTable::new(vec![VertexId(1)], vec![0, 1]).is_err());
        assert!(DistanceTable::new(vec![VertexId(1), VertexId(1)], vec![0; 4]).is_err());
    }
}
