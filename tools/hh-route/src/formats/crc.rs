//! CRC-64-ISO checksum for the artifact footer

use crc::{Crc, CRC_64_GO_ISO};

/// CRC-64-ISO algorithm
pub const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

/// Compute CRC-64 checksum for a byte slice
pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// Incremental CRC-64 digest, fed segment by segment when an artifact is
/// streamed from storage
pub struct Digest {
    digest: crc::Digest<'static, u64>,
}

impl Digest {
    pub fn new() -> Self {
        Self {
            digest: CRC64.digest(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub fn finalize(self) -> u64 {
        self.digest.finalize()
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc64_incremental_matches_oneshot() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
        let mut digest = Digest::new();
        for chunk in data.chunks(1000) {
            digest.update(chunk);
        }
        assert_eq!(digest.finalize(), checksum(&data));
    }

    #[test]
    fn test_crc64_detects_single_bit_flip() {
        let mut data = vec![0x5Au8; 512];
        let before = checksum(&data);
        data[200] ^= 0x08;
        assert_ne!(before, checksum(&data));
    }
}
