//! Length determinant fragmentation (X.691 §11.9.3.8) checked against a
//! straightforward reference encoder built on a plain bit vector.

use bitvec::prelude::*;
use std::ops::Range;
use uperdsl::per::{PerDecoder, PerEncoder, Size, Variant, FRAGMENT_UNIT};
use uperdsl::{parse, Codec, CodecOptions, ResolvedModule, Value};

const SCHEMA: &str = r#"
Octets ::= OCTET STRING
Bits ::= BIT STRING
Bytes ::= SEQUENCE OF INTEGER (0..255)
Flagged ::= SEQUENCE { flag BOOLEAN, data OCTET STRING }
"#;

const SIZES: [usize; 6] = [16384, 16385, 32768, 49152, 81920, 70000];

fn codec(options: CodecOptions) -> Codec {
    Codec::new(
        ResolvedModule::resolve(parse(SCHEMA).expect("parse")).expect("resolve"),
        options,
    )
}

fn push_octet(out: &mut BitVec<u8, Msb0>, b: u8) {
    out.extend_from_bitslice([b].view_bits::<Msb0>());
}

/// Headers `0xC0 | m` for each 16K block (m at most 4), then a final short or
/// long form header, which is `0x00` after an exact multiple.
fn reference<F>(count: usize, mut items: F) -> BitVec<u8, Msb0>
where
    F: FnMut(&mut BitVec<u8, Msb0>, Range<usize>),
{
    let mut out = BitVec::new();
    let mut start = 0;
    loop {
        let rem = count - start;
        if rem >= FRAGMENT_UNIT {
            let m = (rem / FRAGMENT_UNIT).min(4);
            push_octet(&mut out, 0xC0 | m as u8);
            items(&mut out, start..start + m * FRAGMENT_UNIT);
            start += m * FRAGMENT_UNIT;
            continue;
        }
        if rem < 128 {
            push_octet(&mut out, rem as u8);
        } else {
            push_octet(&mut out, 0x80 | (rem >> 8) as u8);
            push_octet(&mut out, rem as u8);
        }
        items(&mut out, start..count);
        return out;
    }
}

fn octets(mut bits: BitVec<u8, Msb0>) -> Vec<u8> {
    bits.set_uninitialized(false);
    bits.into_vec()
}

fn pattern(n: usize) -> Vec<u8> {
    (0..n).map(|i| (i * 7 + i / 256) as u8).collect()
}

#[test]
fn octet_string_matches_reference() {
    let codec = codec(CodecOptions::default());
    for n in SIZES {
        let data = pattern(n);
        let expected = reference(n, |out, r| {
            for &b in &data[r] {
                push_octet(out, b);
            }
        });
        let value = Value::OctetString(data.clone());
        let encoded = codec.encode("Octets", &value).expect("encode");
        assert_eq!(encoded.bits, expected.len(), "size {}", n);
        assert_eq!(encoded.bytes, octets(expected), "size {}", n);

        let decoded = codec.decode("Octets", &encoded.bytes).expect("decode");
        assert_eq!(decoded.value, value, "size {}", n);
        assert_eq!(decoded.bits_consumed, encoded.bits);
    }
}

#[test]
fn bit_string_matches_reference() {
    let codec = codec(CodecOptions::default());
    for n in SIZES {
        let bits: BitVec<u8, Msb0> = (0..n).map(|i| i % 3 == 0).collect();
        let expected = reference(n, |out, r| out.extend_from_bitslice(&bits[r]));
        let value = Value::BitString(bits.clone());
        let encoded = codec.encode("Bits", &value).expect("encode");
        assert_eq!(encoded.bits, expected.len(), "size {}", n);
        assert_eq!(encoded.bytes, octets(expected), "size {}", n);
        assert_eq!(codec.decode("Bits", &encoded.bytes).expect("decode").value, value);
    }
}

#[test]
fn sequence_of_matches_reference() {
    let codec = codec(CodecOptions::default());
    for n in [16384usize, 16385, 49152] {
        let data = pattern(n);
        let expected = reference(n, |out, r| {
            for &b in &data[r] {
                push_octet(out, b);
            }
        });
        let value = Value::List(data.iter().map(|&b| Value::integer(b)).collect());
        let encoded = codec.encode("Bytes", &value).expect("encode");
        assert_eq!(encoded.bytes, octets(expected), "size {}", n);
        assert_eq!(codec.decode("Bytes", &encoded.bytes).expect("decode").value, value);
    }
}

#[test]
fn header_positions() {
    let mut enc = PerEncoder::new(Variant::Unaligned);
    enc.encode_octet_string(&pattern(16385), &Size::unbounded()).expect("encode");
    let bytes = enc.into_bytes();
    assert_eq!(bytes.len(), 1 + 16384 + 1 + 1);
    assert_eq!(bytes[0], 0xC1);
    assert_eq!(bytes[16385], 0x01);

    let mut enc = PerEncoder::new(Variant::Unaligned);
    enc.encode_octet_string(&pattern(32768), &Size::unbounded()).expect("encode");
    let bytes = enc.into_bytes();
    assert_eq!(bytes[0], 0xC2);
    assert_eq!(*bytes.last().expect("terminator"), 0x00);
    assert_eq!(bytes.len(), 32768 + 2);

    let mut dec = PerDecoder::new(&bytes, Variant::Unaligned);
    assert_eq!(dec.decode_octet_string(&Size::unbounded()).expect("decode"), pattern(32768));
    assert_eq!(dec.position(), bytes.len() * 8);
}

#[test]
fn unaligned_header_follows_previous_bits() {
    let codec = codec(CodecOptions::default());
    let value = Value::sequence([
        ("flag", Value::Boolean(true)),
        ("data", Value::OctetString(vec![0; 16384])),
    ]);
    let encoded = codec.encode("Flagged", &value).expect("encode");
    // `1` then 0xC1 straddling the first two octets
    assert_eq!(&encoded.bytes[..2], &[0xE0, 0x80]);
    assert_eq!(encoded.bits, 1 + 8 + 16384 * 8 + 8);
    assert_eq!(codec.decode("Flagged", &encoded.bytes).expect("decode").value, value);
}

#[test]
fn aligned_header_is_octet_aligned() {
    let codec = codec(CodecOptions::aligned());
    let value = Value::sequence([
        ("flag", Value::Boolean(true)),
        ("data", Value::OctetString(vec![0; 16384])),
    ]);
    let encoded = codec.encode("Flagged", &value).expect("encode");
    assert_eq!(&encoded.bytes[..2], &[0x80, 0xC1]);
    assert_eq!(encoded.bytes.len(), 2 + 16384 + 1);
    assert_eq!(*encoded.bytes.last().expect("terminator"), 0x00);
    assert_eq!(codec.decode("Flagged", &encoded.bytes).expect("decode").value, value);
}

#[test]
fn malformed_fragments_are_rejected() {
    let codec = codec(CodecOptions::default());
    // multiplier 5
    assert!(codec.decode("Octets", &[0xC5]).is_err());
    // multiplier 0
    assert!(codec.decode("Octets", &[0xC0]).is_err());
    // block announced but missing
    assert!(codec.decode("Octets", &[0xC1, 0x00, 0x00]).is_err());
    // block present, final header missing
    let mut truncated = vec![0xC1];
    truncated.extend(std::iter::repeat(0u8).take(16384));
    assert!(codec.decode("Octets", &truncated).is_err());
}
