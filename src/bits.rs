//! Bit-level cursor and writer over octet buffers (MSB first within each octet).
//!
//! [`BitCursor`] never reads past its bit length: every consuming call checks
//! the remaining bits first and fails with [`PerError::OutOfData`].

use crate::per::{PerError, PerResult};
use bitvec::prelude::*;

/// Read position into a borrowed byte buffer.
#[derive(Debug, Clone)]
pub struct BitCursor<'a> {
    bytes: &'a [u8],
    bits: &'a BitSlice<u8, Msb0>,
    offset: usize,
}

impl<'a> BitCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            bits: BitSlice::from_slice(bytes),
            offset: 0,
        }
    }

    /// Cursor over the first `bit_len` bits of `bytes` (clamped to the buffer).
    pub fn with_bit_len(bytes: &'a [u8], bit_len: usize) -> Self {
        let all = BitSlice::<u8, Msb0>::from_slice(bytes);
        Self {
            bytes,
            bits: &all[..bit_len.min(all.len())],
            offset: 0,
        }
    }

    /// Current bit offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }

    pub fn bits_remaining(&self) -> usize {
        self.bits.len() - self.offset
    }

    pub fn is_aligned(&self) -> bool {
        self.offset % 8 == 0
    }

    /// Octets touched so far, counting a partially consumed last octet.
    pub fn consumed_octets(&self) -> usize {
        (self.offset + 7) >> 3
    }

    fn ensure(&self, needed: usize) -> PerResult<()> {
        let available = self.bits_remaining();
        if needed > available {
            return Err(PerError::OutOfData {
                needed,
                available,
                offset: self.offset,
            });
        }
        Ok(())
    }

    pub fn read_bit(&mut self) -> PerResult<bool> {
        self.ensure(1)?;
        let bit = self.bits[self.offset];
        self.offset += 1;
        Ok(bit)
    }

    /// Read `n` bits (0..=64) as an unsigned big-endian value.
    pub fn read_bits(&mut self, n: usize) -> PerResult<u64> {
        if n > 64 {
            return Err(PerError::OutOfData {
                needed: n,
                available: 64,
                offset: self.offset,
            });
        }
        self.ensure(n)?;
        let value = self.bits[self.offset..self.offset + n]
            .iter()
            .by_vals()
            .fold(0u64, |acc, bit| (acc << 1) | bit as u64);
        self.offset += n;
        Ok(value)
    }

    /// Borrow the next `n` bits without copying.
    pub fn read_slice(&mut self, n: usize) -> PerResult<&'a BitSlice<u8, Msb0>> {
        self.ensure(n)?;
        let bits: &'a BitSlice<u8, Msb0> = self.bits;
        let slice = &bits[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    /// Append the next `n` octets to `out`.
    pub fn read_octets_into(&mut self, n: usize, out: &mut Vec<u8>) -> PerResult<()> {
        let needed = n.checked_mul(8).ok_or(PerError::OutOfData {
            needed: usize::MAX,
            available: self.bits_remaining(),
            offset: self.offset,
        })?;
        self.ensure(needed)?;
        if self.is_aligned() {
            let start = self.offset / 8;
            out.extend_from_slice(&self.bytes[start..start + n]);
            self.offset += needed;
            return Ok(());
        }
        out.reserve(n);
        for _ in 0..n {
            out.push(self.read_bits(8)? as u8);
        }
        Ok(())
    }

    pub fn read_octets(&mut self, n: usize) -> PerResult<Vec<u8>> {
        let mut out = Vec::new();
        self.read_octets_into(n, &mut out)?;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> PerResult<()> {
        self.ensure(n)?;
        self.offset += n;
        Ok(())
    }

    /// Advance to the next octet boundary (`offset += 7; offset >>= 3`).
    pub fn align_to_byte(&mut self) {
        let aligned = ((self.offset + 7) >> 3) << 3;
        self.offset = aligned.min(self.bits.len());
    }
}

/// Growable bit buffer, the encode-side mirror of [`BitCursor`].
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    bits: BitVec<u8, Msb0>,
}

impl BitWriter {
    pub fn new() -> Self {
        Self { bits: BitVec::new() }
    }

    pub fn with_capacity(bits: usize) -> Self {
        Self {
            bits: BitVec::with_capacity(bits),
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn is_aligned(&self) -> bool {
        self.bits.len() % 8 == 0
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    /// Write the low `n` bits (0..=64) of `value`, most significant first.
    pub fn write_bits(&mut self, value: u64, n: usize) {
        debug_assert!(n <= 64, "write_bits supports at most 64 bits");
        for i in (0..n.min(64)).rev() {
            self.bits.push((value >> i) & 1 == 1);
        }
    }

    pub fn write_slice(&mut self, bits: &BitSlice<u8, Msb0>) {
        self.bits.extend_from_bitslice(bits);
    }

    pub fn write_octets(&mut self, bytes: &[u8]) {
        if self.is_aligned() {
            self.bits.extend_from_raw_slice(bytes);
        } else {
            for byte in bytes {
                self.write_bits(*byte as u64, 8);
            }
        }
    }

    /// Pad with zero bits up to the next octet boundary.
    pub fn align_to_byte(&mut self) {
        let rem = self.bits.len() % 8;
        if rem != 0 {
            let len = self.bits.len();
            self.bits.resize(len + 8 - rem, false);
        }
    }

    pub fn as_bitslice(&self) -> &BitSlice<u8, Msb0> {
        &self.bits
    }

    /// Octets holding the written bits; bits past the end of the last octet are zero.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.bits.set_uninitialized(false);
        self.bits.into_vec()
    }
}
