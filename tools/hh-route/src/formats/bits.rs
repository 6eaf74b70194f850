//! Bit-granular reader and writer used by the block codec
//!
//! Values are packed least-significant bit first. A field width of zero
//! is legal and always reads back as 0.

/// Read past the end of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncated {
    pub at_bit: u64,
    pub wanted: u8,
}

/// Bits needed to encode every value in `[0, max]`.
pub fn bits_for(max: u64) -> u8 {
    (64 - max.leading_zeros()) as u8
}

/// Bits needed to encode every value in `[0, count - 1]`.
pub fn bits_for_count(count: usize) -> u8 {
    if count <= 1 {
        0
    } else {
        bits_for(count as u64 - 1)
    }
}

pub struct BitReader<'a> {
    data: &'a [u8],
    pos: u64,
    len_bits: u64,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            len_bits: data.len() as u64 * 8,
        }
    }

    /// Reader starting at an absolute bit offset.
    pub fn at(data: &'a [u8], bit: u64) -> Self {
        let len_bits = data.len() as u64 * 8;
        Self {
            data,
            pos: bit.min(len_bits),
            len_bits,
        }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn remaining(&self) -> u64 {
        self.len_bits - self.pos
    }

    pub fn read(&mut self, bits: u8) -> Result<u64, Truncated> {
        debug_assert!(bits <= 64);
        if bits == 0 {
            return Ok(0);
        }
        if self.pos + bits as u64 > self.len_bits {
            return Err(Truncated {
                at_bit: self.pos,
                wanted: bits,
            });
        }
        let mut value = 0u64;
        let mut written = 0u32;
        while written < bits as u32 {
            let byte = self.data[(self.pos / 8) as usize];
            let shift = (self.pos % 8) as u32;
            let take = (8 - shift).min(bits as u32 - written);
            let chunk = ((byte >> shift) as u64) & ((1u64 << take) - 1);
            value |= chunk << written;
            written += take;
            self.pos += take as u64;
        }
        Ok(value)
    }

    pub fn read_bit(&mut self) -> Result<bool, Truncated> {
        Ok(self.read(1)? == 1)
    }

    /// A short field whose all-ones value escapes to a long field.
    pub fn read_escaped(&mut self, short: u8, long: u8) -> Result<u64, Truncated> {
        let v = self.read(short)?;
        if v == (1u64 << short) - 1 {
            self.read(long)
        } else {
            Ok(v)
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, Truncated> {
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.read(8)? as u8);
        }
        Ok(out)
    }
}

#[derive(Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    pos: u64,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> u64 {
        self.pos
    }

    /// Write the low `bits` bits of `value`. Higher bits must be zero.
    pub fn write(&mut self, value: u64, bits: u8) {
        debug_assert!(bits <= 64);
        debug_assert!(bits == 64 || value >> bits == 0, "{value} does not fit {bits} bits");
        let mut written = 0u32;
        while written < bits as u32 {
            let byte_idx = (self.pos / 8) as usize;
            if byte_idx == self.buf.len() {
                self.buf.push(0);
            }
            let shift = (self.pos % 8) as u32;
            let take = (8 - shift).min(bits as u32 - written);
            let chunk = ((value >> written) & ((1u64 << take) - 1)) as u8;
            self.buf[byte_idx] |= chunk << shift;
            written += take;
            self.pos += take as u64;
        }
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.write(bit as u64, 1);
    }

    /// Counterpart of [`BitReader::read_escaped`]. Returns false if `value`
    /// does not fit the long field.
    pub fn write_escaped(&mut self, value: u64, short: u8, long: u8) -> bool {
        let escape = (1u64 << short) - 1;
        if value < escape {
            self.write(value, short);
            true
        } else if long == 64 || value >> long == 0 {
            self.write(escape, short);
            self.write(value, long);
            true
        } else {
            false
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.write(*b as u64, 8);
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
