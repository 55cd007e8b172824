//! PER (Packed Encoding Rules) primitives
//!
//! ITU-T X.691 building blocks shared by the schema-driven codec: constrained,
//! semi-constrained and unconstrained whole numbers, length determinants with
//! 16K fragmentation, bit/octet strings, enumerated and choice indices,
//! sequence preambles, extension bitmaps and open types.
//!
//! Both variants are supported. UNALIGNED never pads; ALIGNED octet-aligns
//! length determinants, wide constrained numbers and string contents.

use crate::bits::{BitCursor, BitWriter};
use bitvec::prelude::*;
use byteorder::{BigEndian, ByteOrder};
use std::ops::Range;
use thiserror::Error;

/// Items carried by one fragment multiplier step (X.691 §11.9.3.8).
pub const FRAGMENT_UNIT: usize = 16384;
const MAX_FRAGMENT_MULTIPLIER: usize = 4;
const SIXTY_FOUR_K: u64 = 65536;

/// PER codec errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PerError {
    #[error("out of data at bit {offset}: need {needed} bits, {available} remaining")]
    OutOfData {
        needed: usize,
        available: usize,
        offset: usize,
    },
    #[error("value {value} outside {}", range_text(.lower, .upper))]
    BoundsViolation {
        value: i128,
        lower: Option<i128>,
        upper: Option<i128>,
    },
    #[error("unsupported extension index {index}")]
    UnsupportedExtension { index: usize },
    #[error("malformed length determinant at bit {offset}: {reason}")]
    MalformedLengthDeterminant { offset: usize, reason: &'static str },
    #[error("integer of {octets} octets does not fit in 128 bits")]
    IntegerOverflow { octets: usize },
    #[error("constraint {lower}..{upper} cannot be PER-encoded")]
    ConstraintTooWide { lower: i128, upper: i128 },
}

fn range_text(lower: &Option<i128>, upper: &Option<i128>) -> String {
    let bound = |b: &Option<i128>, open: &str| b.map_or_else(|| open.to_string(), |v| v.to_string());
    format!("{}..{}", bound(lower, "MIN"), bound(upper, "MAX"))
}

pub type PerResult<T> = Result<T, PerError>;

/// PER variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variant {
    #[default]
    Unaligned,
    Aligned,
}

/// Value constraint of an INTEGER. A missing lower bound makes the integer
/// unconstrained whatever the upper bound is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Constraint {
    pub lower: Option<i128>,
    pub upper: Option<i128>,
    pub extensible: bool,
}

impl Constraint {
    pub const fn new(lower: i128, upper: i128) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
            extensible: false,
        }
    }

    pub const fn extensible(lower: i128, upper: i128) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
            extensible: true,
        }
    }

    pub const fn semi(lower: i128) -> Self {
        Self {
            lower: Some(lower),
            upper: None,
            extensible: false,
        }
    }

    pub const fn unconstrained() -> Self {
        Self {
            lower: None,
            upper: None,
            extensible: false,
        }
    }

    /// Number of values in the root range, when both bounds are finite.
    pub fn range(&self) -> Option<u128> {
        let span = self.upper?.checked_sub(self.lower?)?;
        if span < 0 {
            return None;
        }
        Some(span as u128 + 1)
    }

    /// Bits needed to encode values in this range (UNALIGNED bit-field width)
    pub fn bits_needed(&self) -> usize {
        self.range().map_or(0, bits_for_range)
    }

    pub fn contains(&self, value: i128) -> bool {
        self.lower.map_or(true, |l| value >= l) && self.upper.map_or(true, |u| value <= u)
    }
}

/// SIZE constraint of a string or SEQUENCE OF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub lower: u64,
    pub upper: Option<u64>,
    pub extensible: bool,
}

impl Default for Size {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Size {
    pub const fn fixed(n: u64) -> Self {
        Self {
            lower: n,
            upper: Some(n),
            extensible: false,
        }
    }

    pub const fn range(lower: u64, upper: u64) -> Self {
        Self {
            lower,
            upper: Some(upper),
            extensible: false,
        }
    }

    pub const fn unbounded() -> Self {
        Self {
            lower: 0,
            upper: None,
            extensible: false,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.upper == Some(self.lower)
    }

    pub fn contains(&self, n: u64) -> bool {
        n >= self.lower && self.upper.map_or(true, |u| n <= u)
    }
}

/// What a size-constrained count is counting; decides ALIGNED padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Bits,
    Octets,
    Components,
}

/// Root or extension index of an ENUMERATED or CHOICE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Root(usize),
    Extension(usize),
}

/// SEQUENCE header: extension bit and OPTIONAL/DEFAULT presence bitmap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preamble {
    pub extended: bool,
    pub presence: BitVec<u8, Msb0>,
}

fn bits_for_range(range: u128) -> usize {
    if range <= 1 {
        0
    } else {
        (128 - (range - 1).leading_zeros()) as usize
    }
}

fn constrained_range(lower: i128, upper: i128) -> PerResult<u128> {
    match upper.checked_sub(lower) {
        Some(span) if span >= 0 && (span as u128) < (1u128 << 64) => Ok(span as u128 + 1),
        _ => Err(PerError::ConstraintTooWide { lower, upper }),
    }
}

fn octets_needed(value: u64) -> usize {
    (((64 - value.leading_zeros()) as usize + 7) / 8).max(1)
}

/// ALIGNED pads before string contents unless the size is a small fixed one
/// (X.691 §16.9, §17.7); SEQUENCE OF components are never padded.
fn content_aligned(variant: Variant, size: &Size, unit: Unit, count: usize) -> bool {
    if variant != Variant::Aligned || count == 0 {
        return false;
    }
    match unit {
        Unit::Components => false,
        Unit::Bits => !(size.is_fixed() && count <= 16),
        Unit::Octets => !(size.is_fixed() && count <= 2),
    }
}

fn unsigned_from_octets(octets: &[u8]) -> PerResult<u128> {
    let significant = &octets[octets.iter().take_while(|b| **b == 0).count()..];
    if significant.len() > 16 {
        return Err(PerError::IntegerOverflow {
            octets: octets.len(),
        });
    }
    let mut buf = [0u8; 16];
    buf[16 - significant.len()..].copy_from_slice(significant);
    Ok(BigEndian::read_u128(&buf))
}

fn signed_from_octets(octets: &[u8]) -> PerResult<i128> {
    if octets.len() > 16 {
        return Err(PerError::IntegerOverflow {
            octets: octets.len(),
        });
    }
    let negative = octets.first().map_or(false, |b| b & 0x80 != 0);
    let mut buf = if negative { [0xFFu8; 16] } else { [0u8; 16] };
    buf[16 - octets.len()..].copy_from_slice(octets);
    Ok(BigEndian::read_i128(&buf))
}

fn unsigned_octets(value: u128) -> Vec<u8> {
    let mut buf = [0u8; 16];
    BigEndian::write_u128(&mut buf, value);
    let skip = buf[..15].iter().take_while(|b| **b == 0).count();
    buf[skip..].to_vec()
}

fn signed_octets(value: i128) -> Vec<u8> {
    let mut buf = [0u8; 16];
    BigEndian::write_i128(&mut buf, value);
    let mut start = 0;
    while start < 15 {
        let next_negative = buf[start + 1] & 0x80 != 0;
        match buf[start] {
            0x00 if !next_negative => start += 1,
            0xFF if next_negative => start += 1,
            _ => break,
        }
    }
    buf[start..].to_vec()
}

/// PER decoder over a borrowed buffer
#[derive(Debug, Clone)]
pub struct PerDecoder<'a> {
    cursor: BitCursor<'a>,
    variant: Variant,
}

impl<'a> PerDecoder<'a> {
    pub fn new(data: &'a [u8], variant: Variant) -> Self {
        Self::from_cursor(BitCursor::new(data), variant)
    }

    pub fn from_cursor(cursor: BitCursor<'a>, variant: Variant) -> Self {
        Self { cursor, variant }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn cursor(&self) -> &BitCursor<'a> {
        &self.cursor
    }

    pub fn position(&self) -> usize {
        self.cursor.position()
    }

    pub fn remaining_bits(&self) -> usize {
        self.cursor.bits_remaining()
    }

    /// Unconditional alignment, used at the end of a top-level PDU.
    pub fn align_to_byte(&mut self) {
        self.cursor.align_to_byte();
    }

    fn octet_align(&mut self) {
        if self.variant == Variant::Aligned {
            self.cursor.align_to_byte();
        }
    }

    pub fn read_bit(&mut self) -> PerResult<bool> {
        self.cursor.read_bit()
    }

    pub fn read_bits(&mut self, n: usize) -> PerResult<u64> {
        self.cursor.read_bits(n)
    }

    /// Decode a constrained whole number (X.691 §11.5)
    pub fn decode_constrained_whole_number(&mut self, lower: i128, upper: i128) -> PerResult<i128> {
        let range = constrained_range(lower, upper)?;
        if range == 1 {
            return Ok(lower);
        }
        let bits = bits_for_range(range);
        let offset = match self.variant {
            Variant::Unaligned => self.read_bits(bits)?,
            Variant::Aligned => self.read_aligned_offset(range, bits)?,
        };
        if offset as u128 >= range {
            return Err(PerError::BoundsViolation {
                value: lower.saturating_add(offset as i128),
                lower: Some(lower),
                upper: Some(upper),
            });
        }
        Ok(lower + offset as i128)
    }

    fn read_aligned_offset(&mut self, range: u128, bits: usize) -> PerResult<u64> {
        if range <= 255 {
            self.read_bits(bits)
        } else if range == 256 {
            self.octet_align();
            self.read_bits(8)
        } else if range <= SIXTY_FOUR_K as u128 {
            self.octet_align();
            self.read_bits(16)
        } else {
            let max_octets = (bits + 7) / 8;
            let at = self.position();
            let octets = self.read_bits(bits_for_range(max_octets as u128))? as usize + 1;
            if octets > max_octets {
                return Err(PerError::MalformedLengthDeterminant {
                    offset: at,
                    reason: "integer length exceeds its range",
                });
            }
            self.octet_align();
            self.read_bits(octets * 8)
        }
    }

    /// Decode a semi-constrained whole number (X.691 §11.7)
    pub fn decode_semi_constrained_whole_number(&mut self, lower: i128) -> PerResult<i128> {
        let octets = self.decode_open_type()?;
        let offset = unsigned_from_octets(&octets)?;
        i128::try_from(offset)
            .ok()
            .and_then(|o| lower.checked_add(o))
            .ok_or(PerError::IntegerOverflow {
                octets: octets.len(),
            })
    }

    /// Decode an unconstrained whole number (X.691 §11.8)
    pub fn decode_unconstrained_whole_number(&mut self) -> PerResult<i128> {
        let octets = self.decode_open_type()?;
        signed_from_octets(&octets)
    }

    /// Decode an INTEGER under its constraint, extension bit included
    pub fn decode_integer(&mut self, constraint: &Constraint) -> PerResult<i128> {
        if constraint.extensible && self.read_bit()? {
            return self.decode_unconstrained_whole_number();
        }
        match (constraint.lower, constraint.upper) {
            (Some(lower), Some(upper)) => self.decode_constrained_whole_number(lower, upper),
            (Some(lower), None) => self.decode_semi_constrained_whole_number(lower),
            (None, _) => self.decode_unconstrained_whole_number(),
        }
    }

    /// Decode a normally small non-negative whole number (X.691 §11.6)
    pub fn decode_normally_small_non_negative(&mut self) -> PerResult<u64> {
        if !self.read_bit()? {
            return self.read_bits(6);
        }
        let value = self.decode_semi_constrained_whole_number(0)?;
        u64::try_from(value).map_err(|_| PerError::IntegerOverflow { octets: 16 })
    }

    /// Read a general length determinant and hand each chunk of items to
    /// `items` before the next length is read (X.691 §11.9.3.8). Returns the
    /// total item count.
    pub fn decode_fragmented<E, F>(&mut self, mut items: F) -> Result<usize, E>
    where
        E: From<PerError>,
        F: FnMut(&mut Self, usize) -> Result<(), E>,
    {
        let mut total = 0usize;
        loop {
            self.octet_align();
            let at = self.position();
            let first = self.read_bits(8)? as usize;
            if first & 0x80 == 0 {
                items(self, first)?;
                return Ok(total + first);
            }
            if first & 0x40 == 0 {
                let n = ((first & 0x3F) << 8) | self.read_bits(8)? as usize;
                items(self, n)?;
                return Ok(total + n);
            }
            let m = first & 0x3F;
            if m == 0 || m > MAX_FRAGMENT_MULTIPLIER {
                return Err(PerError::MalformedLengthDeterminant {
                    offset: at,
                    reason: "fragment multiplier must be 1..=4",
                }
                .into());
            }
            let n = m * FRAGMENT_UNIT;
            items(self, n)?;
            total += n;
        }
    }

    /// Decode a count under a SIZE constraint and hand the items to `items`
    pub fn decode_sized<E, F>(&mut self, size: &Size, unit: Unit, mut items: F) -> Result<usize, E>
    where
        E: From<PerError>,
        F: FnMut(&mut Self, usize) -> Result<(), E>,
    {
        if size.extensible && self.read_bit()? {
            return self.decode_fragmented(items);
        }
        match size.upper {
            Some(upper) if upper < SIXTY_FOUR_K => {
                let count = if size.is_fixed() {
                    upper as usize
                } else {
                    self.decode_constrained_whole_number(size.lower as i128, upper as i128)? as usize
                };
                if content_aligned(self.variant, size, unit, count) {
                    self.octet_align();
                }
                items(self, count)?;
                Ok(count)
            }
            _ => {
                let count = self.decode_fragmented(&mut items)?;
                if !size.contains(count as u64) {
                    return Err(PerError::BoundsViolation {
                        value: count as i128,
                        lower: Some(size.lower as i128),
                        upper: size.upper.map(i128::from),
                    }
                    .into());
                }
                Ok(count)
            }
        }
    }

    /// Decode a BIT STRING
    pub fn decode_bit_string(&mut self, size: &Size) -> PerResult<BitVec<u8, Msb0>> {
        let mut bits = BitVec::new();
        self.decode_sized(size, Unit::Bits, |dec: &mut Self, n| -> PerResult<()> {
            bits.extend_from_bitslice(dec.cursor.read_slice(n)?);
            Ok(())
        })?;
        Ok(bits)
    }

    /// Decode an OCTET STRING
    pub fn decode_octet_string(&mut self, size: &Size) -> PerResult<Vec<u8>> {
        let mut octets = Vec::new();
        self.decode_sized(size, Unit::Octets, |dec: &mut Self, n| {
            dec.cursor.read_octets_into(n, &mut octets)
        })?;
        Ok(octets)
    }

    /// Decode an open type: general length, then that many octets
    pub fn decode_open_type(&mut self) -> PerResult<Vec<u8>> {
        let mut octets = Vec::new();
        self.decode_fragmented(|dec: &mut Self, n| dec.cursor.read_octets_into(n, &mut octets))?;
        Ok(octets)
    }

    /// Decode an ENUMERATED index
    pub fn decode_enumerated(&mut self, root_count: usize, extensible: bool) -> PerResult<Selection> {
        self.decode_selection(root_count, extensible)
    }

    /// Decode a CHOICE index
    pub fn decode_choice_index(&mut self, root_count: usize, extensible: bool) -> PerResult<Selection> {
        self.decode_selection(root_count, extensible)
    }

    fn decode_selection(&mut self, root_count: usize, extensible: bool) -> PerResult<Selection> {
        if extensible && self.read_bit()? {
            let index = self.decode_normally_small_non_negative()?;
            return Ok(Selection::Extension(index as usize));
        }
        let index = self.decode_constrained_whole_number(0, root_count as i128 - 1)?;
        Ok(Selection::Root(index as usize))
    }

    /// Decode the extension bit and presence bitmap of a SEQUENCE
    pub fn decode_sequence_preamble(&mut self, extensible: bool, optional_count: usize) -> PerResult<Preamble> {
        let extended = extensible && self.read_bit()?;
        let presence = self.cursor.read_slice(optional_count)?.to_bitvec();
        Ok(Preamble { extended, presence })
    }

    /// Decode the extension-addition presence bitmap (normally small length,
    /// X.691 §11.9.3.4 and §19.8)
    pub fn decode_extension_bitmap(&mut self) -> PerResult<BitVec<u8, Msb0>> {
        let at = self.position();
        let mut bitmap = BitVec::new();
        if !self.read_bit()? {
            let count = self.read_bits(6)? as usize + 1;
            bitmap.extend_from_bitslice(self.cursor.read_slice(count)?);
            return Ok(bitmap);
        }
        self.decode_fragmented(|dec: &mut Self, n| -> PerResult<()> {
            bitmap.extend_from_bitslice(dec.cursor.read_slice(n)?);
            Ok(())
        })?;
        if bitmap.is_empty() {
            return Err(PerError::MalformedLengthDeterminant {
                offset: at,
                reason: "empty extension bitmap",
            });
        }
        Ok(bitmap)
    }
}

/// PER encoder
#[derive(Debug, Clone, Default)]
pub struct PerEncoder {
    writer: BitWriter,
    variant: Variant,
}

impl PerEncoder {
    pub fn new(variant: Variant) -> Self {
        Self {
            writer: BitWriter::new(),
            variant,
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Bits written so far
    pub fn bit_len(&self) -> usize {
        self.writer.len()
    }

    pub fn as_bitslice(&self) -> &BitSlice<u8, Msb0> {
        self.writer.as_bitslice()
    }

    /// Written bits, zero padded to an octet boundary
    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.into_bytes()
    }

    /// Complete encoding: padded, and a single zero octet when empty (X.691 §11.1)
    pub fn into_pdu_bytes(self) -> Vec<u8> {
        let mut bytes = self.writer.into_bytes();
        if bytes.is_empty() {
            bytes.push(0);
        }
        bytes
    }

    pub fn align_to_byte(&mut self) {
        self.writer.align_to_byte();
    }

    fn octet_align(&mut self) {
        if self.variant == Variant::Aligned {
            self.writer.align_to_byte();
        }
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.writer.write_bit(bit);
    }

    pub fn write_bits(&mut self, value: u64, n: usize) {
        self.writer.write_bits(value, n);
    }

    /// Encode a constrained whole number (X.691 §11.5)
    pub fn encode_constrained_whole_number(&mut self, value: i128, lower: i128, upper: i128) -> PerResult<()> {
        let range = constrained_range(lower, upper)?;
        if value < lower || value > upper {
            return Err(PerError::BoundsViolation {
                value,
                lower: Some(lower),
                upper: Some(upper),
            });
        }
        if range == 1 {
            return Ok(());
        }
        let offset = (value - lower) as u64;
        let bits = bits_for_range(range);
        match self.variant {
            Variant::Unaligned => self.write_bits(offset, bits),
            Variant::Aligned if range <= 255 => self.write_bits(offset, bits),
            Variant::Aligned if range == 256 => {
                self.octet_align();
                self.write_bits(offset, 8);
            }
            Variant::Aligned if range <= SIXTY_FOUR_K as u128 => {
                self.octet_align();
                self.write_bits(offset, 16);
            }
            Variant::Aligned => {
                let max_octets = (bits + 7) / 8;
                let octets = octets_needed(offset);
                self.write_bits((octets - 1) as u64, bits_for_range(max_octets as u128));
                self.octet_align();
                self.write_bits(offset, octets * 8);
            }
        }
        Ok(())
    }

    /// Encode a semi-constrained whole number (X.691 §11.7)
    pub fn encode_semi_constrained_whole_number(&mut self, value: i128, lower: i128) -> PerResult<()> {
        if value < lower {
            return Err(PerError::BoundsViolation {
                value,
                lower: Some(lower),
                upper: None,
            });
        }
        let offset = (value as u128).wrapping_sub(lower as u128);
        self.encode_open_type(&unsigned_octets(offset))
    }

    /// Encode an unconstrained whole number (X.691 §11.8)
    pub fn encode_unconstrained_whole_number(&mut self, value: i128) -> PerResult<()> {
        self.encode_open_type(&signed_octets(value))
    }

    /// Encode an INTEGER under its constraint, extension bit included
    pub fn encode_integer(&mut self, value: i128, constraint: &Constraint) -> PerResult<()> {
        if constraint.extensible {
            let in_root = constraint.contains(value);
            self.write_bit(!in_root);
            if !in_root {
                return self.encode_unconstrained_whole_number(value);
            }
        }
        match (constraint.lower, constraint.upper) {
            (Some(lower), Some(upper)) => self.encode_constrained_whole_number(value, lower, upper),
            (Some(lower), None) => self.encode_semi_constrained_whole_number(value, lower),
            (None, _) => self.encode_unconstrained_whole_number(value),
        }
    }

    /// Encode a normally small non-negative whole number (X.691 §11.6)
    pub fn encode_normally_small_non_negative(&mut self, value: u64) -> PerResult<()> {
        if value <= 63 {
            self.write_bit(false);
            self.write_bits(value, 6);
            Ok(())
        } else {
            self.write_bit(true);
            self.encode_semi_constrained_whole_number(value as i128, 0)
        }
    }

    /// Write `count` items behind general length determinants, fragmenting at
    /// 16K units. `items` receives the index range of each chunk right after
    /// its header.
    pub fn encode_fragmented<E, F>(&mut self, count: usize, mut items: F) -> Result<(), E>
    where
        E: From<PerError>,
        F: FnMut(&mut Self, Range<usize>) -> Result<(), E>,
    {
        let mut start = 0usize;
        while count - start >= FRAGMENT_UNIT {
            let m = ((count - start) / FRAGMENT_UNIT).min(MAX_FRAGMENT_MULTIPLIER);
            self.octet_align();
            self.write_bits(0xC0 | m as u64, 8);
            let end = start + m * FRAGMENT_UNIT;
            items(self, start..end)?;
            start = end;
        }
        let remainder = count - start;
        self.octet_align();
        if remainder < 128 {
            self.write_bits(remainder as u64, 8);
        } else {
            self.write_bits(0x8000 | remainder as u64, 16);
        }
        items(self, start..count)
    }

    /// Encode a count under a SIZE constraint, then the items
    pub fn encode_sized<E, F>(&mut self, size: &Size, unit: Unit, count: usize, mut items: F) -> Result<(), E>
    where
        E: From<PerError>,
        F: FnMut(&mut Self, Range<usize>) -> Result<(), E>,
    {
        let in_root = size.contains(count as u64);
        if size.extensible {
            self.write_bit(!in_root);
            if !in_root {
                return self.encode_fragmented(count, items);
            }
        } else if !in_root {
            return Err(PerError::BoundsViolation {
                value: count as i128,
                lower: Some(size.lower as i128),
                upper: size.upper.map(i128::from),
            }
            .into());
        }
        match size.upper {
            Some(upper) if upper < SIXTY_FOUR_K => {
                if !size.is_fixed() {
                    self.encode_constrained_whole_number(count as i128, size.lower as i128, upper as i128)?;
                }
                if content_aligned(self.variant, size, unit, count) {
                    self.octet_align();
                }
                items(self, 0..count)
            }
            _ => self.encode_fragmented(count, &mut items),
        }
    }

    /// Encode a BIT STRING
    pub fn encode_bit_string(&mut self, bits: &BitSlice<u8, Msb0>, size: &Size) -> PerResult<()> {
        self.encode_sized(size, Unit::Bits, bits.len(), |enc: &mut Self, r| -> PerResult<()> {
            enc.writer.write_slice(&bits[r]);
            Ok(())
        })
    }

    /// Encode an OCTET STRING
    pub fn encode_octet_string(&mut self, octets: &[u8], size: &Size) -> PerResult<()> {
        self.encode_sized(size, Unit::Octets, octets.len(), |enc: &mut Self, r| -> PerResult<()> {
            enc.writer.write_octets(&octets[r]);
            Ok(())
        })
    }

    /// Encode an open type from an already complete inner encoding
    pub fn encode_open_type(&mut self, octets: &[u8]) -> PerResult<()> {
        self.encode_fragmented(octets.len(), |enc: &mut Self, r| -> PerResult<()> {
            enc.writer.write_octets(&octets[r]);
            Ok(())
        })
    }

    /// Encode an ENUMERATED index
    pub fn encode_enumerated(&mut self, selection: Selection, root_count: usize, extensible: bool) -> PerResult<()> {
        self.encode_selection(selection, root_count, extensible)
    }

    /// Encode a CHOICE index
    pub fn encode_choice_index(&mut self, selection: Selection, root_count: usize, extensible: bool) -> PerResult<()> {
        self.encode_selection(selection, root_count, extensible)
    }

    fn encode_selection(&mut self, selection: Selection, root_count: usize, extensible: bool) -> PerResult<()> {
        match selection {
            Selection::Root(index) => {
                if extensible {
                    self.write_bit(false);
                }
                self.encode_constrained_whole_number(index as i128, 0, root_count as i128 - 1)
            }
            Selection::Extension(index) if extensible => {
                self.write_bit(true);
                self.encode_normally_small_non_negative(index as u64)
            }
            Selection::Extension(index) => Err(PerError::UnsupportedExtension { index }),
        }
    }

    /// Encode the extension bit and presence bitmap of a SEQUENCE
    pub fn encode_sequence_preamble(&mut self, extensible: bool, extended: bool, presence: &BitSlice<u8, Msb0>) {
        if extensible {
            self.write_bit(extended);
        }
        self.writer.write_slice(presence);
    }

    /// Encode the extension-addition presence bitmap
    pub fn encode_extension_bitmap(&mut self, bitmap: &BitSlice<u8, Msb0>) -> PerResult<()> {
        let count = bitmap.len();
        if count == 0 {
            return Err(PerError::MalformedLengthDeterminant {
                offset: self.bit_len(),
                reason: "empty extension bitmap",
            });
        }
        if count <= 64 {
            self.write_bit(false);
            self.write_bits((count - 1) as u64, 6);
            self.writer.write_slice(bitmap);
            return Ok(());
        }
        self.write_bit(true);
        self.encode_fragmented(count, |enc: &mut Self, r| -> PerResult<()> {
            enc.writer.write_slice(&bitmap[r]);
            Ok(())
        })
    }
}
