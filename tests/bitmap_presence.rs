//! # SEQUENCE presence bitmaps: unit tests and behaviour specification
//!
//! ## Wire format
//!
//! - **Extension bit**: an extensible SEQUENCE starts with one bit, set when
//!   extension additions follow the root components.
//! - **Root presence bitmap**: one bit per OPTIONAL or DEFAULT root component,
//!   in declaration order, MSB first, no length. Mandatory components have no bit.
//! - **Components** follow the bitmap; absent ones occupy nothing.
//! - **Extension bitmap** (only when the extension bit is set): a normally small
//!   length (`0` + 6 bits of n-1 for n <= 64, otherwise `1` + length determinant)
//!   then one bit per addition, then one open type per present addition.
//!
//! ## Examples (three OPTIONAL INTEGER (0..15) components)
//!
//! | Bytes | Presence | Components |
//! |-------|----------|------------|
//! | `B4 A0` | `101` | f1 = 10, f3 = 5 (11 bits) |
//! | `5E` | `010` | f2 = 15 (7 bits) |
//! | `00` | `000` | none (3 bits) |

use uperdsl::per::{PerDecoder, Variant};
use uperdsl::{parse, Codec, CodecOptions, ResolvedModule, Value};

const THREE_OPTIONALS: &str = r#"
T3 ::= SEQUENCE {
    f1  INTEGER (0..15) OPTIONAL,
    f2  INTEGER (0..15) OPTIONAL,
    f3  INTEGER (0..15) OPTIONAL
}
"#;

fn codec(src: &str) -> Codec {
    Codec::new(
        ResolvedModule::resolve(parse(src).expect("parse")).expect("resolve"),
        CodecOptions::default(),
    )
}

fn names(v: &Value) -> Vec<&str> {
    v.as_sequence()
        .expect("sequence")
        .fields
        .iter()
        .map(|(n, _)| n.as_str())
        .collect()
}

#[test]
fn bitmap_101_first_and_third_present() {
    let codec = codec(THREE_OPTIONALS);
    let decoded = codec.decode("T3", &[0xB4, 0xA0]).expect("decode");
    assert_eq!(decoded.bits_consumed, 11);
    assert_eq!(names(&decoded.value), vec!["f1", "f3"]);
    assert_eq!(decoded.value.field("f1"), Some(&Value::integer(10)));
    assert_eq!(decoded.value.field("f2"), None);
    assert_eq!(decoded.value.field("f3"), Some(&Value::integer(5)));
}

#[test]
fn bitmap_010_middle_present() {
    let codec = codec(THREE_OPTIONALS);
    let decoded = codec.decode("T3", &[0x5E]).expect("decode");
    assert_eq!(decoded.bits_consumed, 7);
    assert_eq!(names(&decoded.value), vec!["f2"]);
    assert_eq!(decoded.value.field("f2"), Some(&Value::integer(15)));
}

#[test]
fn bitmap_000_all_absent() {
    let codec = codec(THREE_OPTIONALS);
    let decoded = codec.decode("T3", &[0x00]).expect("decode");
    assert_eq!(decoded.bits_consumed, 3);
    assert!(names(&decoded.value).is_empty());
}

#[test]
fn encode_bitmap_order() {
    let codec = codec(THREE_OPTIONALS);
    let value = Value::sequence([("f1", Value::integer(10)), ("f3", Value::integer(5))]);
    let encoded = codec.encode("T3", &value).expect("encode");
    assert_eq!(encoded.bytes, vec![0xB4, 0xA0]);
    assert_eq!(encoded.bits, 11);

    let value = Value::sequence([("f2", Value::integer(15))]);
    assert_eq!(codec.encode("T3", &value).expect("encode").bytes, vec![0x5E]);
}

#[test]
fn preamble_primitive() {
    let mut dec = PerDecoder::new(&[0b1010_0000], Variant::Unaligned);
    let preamble = dec.decode_sequence_preamble(false, 3).expect("preamble");
    assert!(!preamble.extended);
    let bits: Vec<bool> = preamble.presence.iter().by_vals().collect();
    assert_eq!(bits, vec![true, false, true]);
    assert_eq!(dec.position(), 3);

    let mut dec = PerDecoder::new(&[0b1010_0000], Variant::Unaligned);
    let preamble = dec.decode_sequence_preamble(true, 2).expect("preamble");
    assert!(preamble.extended);
    let bits: Vec<bool> = preamble.presence.iter().by_vals().collect();
    assert_eq!(bits, vec![false, true]);
}

#[test]
fn extension_bit_precedes_bitmap() {
    let codec = codec("E ::= SEQUENCE { a BOOLEAN OPTIONAL, b BOOLEAN, ... }");
    let value = Value::sequence([("a", Value::Boolean(true)), ("b", Value::Boolean(false))]);
    let encoded = codec.encode("E", &value).expect("encode");
    assert_eq!(encoded.bytes, vec![0x60]);
    assert_eq!(encoded.bits, 4);
    assert_eq!(codec.decode("E", &[0x60]).expect("decode").value, value);
}

#[test]
fn bitmap_spanning_octets() {
    let fields: Vec<String> = (0..10).map(|i| format!("o{} BOOLEAN OPTIONAL", i)).collect();
    let codec = codec(&format!("M ::= SEQUENCE {{ {} }}", fields.join(", ")));

    let all: Vec<(String, Value)> = (0..10).map(|i| (format!("o{}", i), Value::Boolean(true))).collect();
    let value = Value::sequence(all.iter().map(|(n, v)| (n.as_str(), v.clone())));
    let encoded = codec.encode("M", &value).expect("encode");
    assert_eq!(encoded.bytes, vec![0xFF, 0xFF, 0xF0]);
    assert_eq!(encoded.bits, 20);

    let last = Value::sequence([("o9", Value::Boolean(true))]);
    let encoded = codec.encode("M", &last).expect("encode");
    assert_eq!(encoded.bytes, vec![0x00, 0x60]);
    assert_eq!(encoded.bits, 11);
    assert_eq!(codec.decode("M", &encoded.bytes).expect("decode").value, last);
}

#[test]
fn default_components_share_the_bitmap() {
    let codec = codec("D ::= SEQUENCE { a BOOLEAN DEFAULT TRUE, b INTEGER (0..3) OPTIONAL, c BOOLEAN DEFAULT FALSE }");
    // a = FALSE differs from its default, b absent, c equals its default
    let value = Value::sequence([("a", Value::Boolean(false)), ("c", Value::Boolean(false))]);
    let encoded = codec.encode("D", &value).expect("encode");
    assert_eq!(encoded.bits, 4);
    assert_eq!(encoded.bytes, vec![0x80]);
    let decoded = codec.decode("D", &encoded.bytes).expect("decode");
    assert_eq!(decoded.value, value);
}

#[test]
fn short_extension_bitmap() {
    let codec = codec("X ::= SEQUENCE { ..., x0 BOOLEAN, x1 BOOLEAN, x2 BOOLEAN }");
    let value = Value::sequence([("x2", Value::Boolean(true))]);
    let bytes = codec.encode_pdu("X", &value).expect("encode");
    // extension bit, `0` + 000010 (three additions), then bits 001
    assert_eq!(bytes[0], 0x82);
    assert_eq!(bytes[1] & 0xE0, 0x20);
    assert_eq!(codec.decode("X", &bytes).expect("decode").value, value);
}

#[test]
fn long_extension_bitmap() {
    let additions: Vec<String> = (0..70).map(|i| format!("x{} BOOLEAN", i)).collect();
    let codec = codec(&format!("L ::= SEQUENCE {{ ..., {} }}", additions.join(", ")));
    let value = Value::sequence([("x69", Value::Boolean(true))]);
    let bytes = codec.encode_pdu("L", &value).expect("encode");
    // extension bit, `1`, length 70 (0x46), then the 70-bit bitmap
    assert_eq!(&bytes[..2], &[0xD1, 0x80]);
    let decoded = codec.decode("L", &bytes).expect("decode");
    assert_eq!(decoded.value, value);
    assert!(decoded.skipped_extensions.is_empty());
}
