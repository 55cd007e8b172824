//! Property-based tests for the PER primitives and the schema-driven codec.
//!
//! Round-trips hold in both variants, constrained whole numbers occupy
//! exactly ceil(log2(range)) bits in UNALIGNED, and arbitrary input never
//! panics the decoder.

use proptest::prelude::*;
use uperdsl::per::{Constraint, PerDecoder, PerEncoder, Size, Variant};
use uperdsl::{parse_file, Codec, CodecOptions, ResolvedModule};

fn arb_variant() -> impl Strategy<Value = Variant> {
    prop_oneof![Just(Variant::Unaligned), Just(Variant::Aligned)]
}

// Bounds with a span up to 2^40 and a value inside them
fn arb_constrained() -> impl Strategy<Value = (i128, i128, i128)> {
    (-1_000_000_000i64..1_000_000_000, 0u64..(1 << 40))
        .prop_flat_map(|(lower, span)| {
            let lower = lower as i128;
            let upper = lower + span as i128;
            (Just(lower), Just(upper), lower..=upper)
        })
}

fn width(lower: i128, upper: i128) -> usize {
    let range = (upper - lower + 1) as u128;
    if range <= 1 {
        0
    } else {
        (128 - (range - 1).leading_zeros()) as usize
    }
}

proptest! {
    #[test]
    fn constrained_whole_number_round_trip((lower, upper, value) in arb_constrained(), variant in arb_variant()) {
        let mut enc = PerEncoder::new(variant);
        enc.encode_constrained_whole_number(value, lower, upper).unwrap();
        let bytes = enc.into_bytes();
        let mut dec = PerDecoder::new(&bytes, variant);
        prop_assert_eq!(dec.decode_constrained_whole_number(lower, upper).unwrap(), value);
    }

    #[test]
    fn unaligned_width_law((lower, upper, value) in arb_constrained()) {
        let mut enc = PerEncoder::new(Variant::Unaligned);
        enc.encode_constrained_whole_number(value, lower, upper).unwrap();
        prop_assert_eq!(enc.bit_len(), width(lower, upper));
    }

    #[test]
    fn endpoints_round_trip((lower, upper, _) in arb_constrained(), variant in arb_variant()) {
        for value in [lower, upper] {
            let mut enc = PerEncoder::new(variant);
            enc.encode_constrained_whole_number(value, lower, upper).unwrap();
            let bytes = enc.into_bytes();
            let mut dec = PerDecoder::new(&bytes, variant);
            prop_assert_eq!(dec.decode_constrained_whole_number(lower, upper).unwrap(), value);
        }
    }

    #[test]
    fn out_of_range_is_rejected((lower, upper, _) in arb_constrained(), above in 1i128..1000) {
        let mut enc = PerEncoder::new(Variant::Unaligned);
        prop_assert!(enc.encode_constrained_whole_number(upper + above, lower, upper).is_err());
        prop_assert!(enc.encode_constrained_whole_number(lower - above, lower, upper).is_err());
    }

    #[test]
    fn semi_constrained_round_trip(lower in -1000i64..1000, delta in any::<u64>(), variant in arb_variant()) {
        let lower = lower as i128;
        let value = lower + delta as i128;
        let mut enc = PerEncoder::new(variant);
        enc.encode_semi_constrained_whole_number(value, lower).unwrap();
        let bytes = enc.into_bytes();
        let mut dec = PerDecoder::new(&bytes, variant);
        prop_assert_eq!(dec.decode_semi_constrained_whole_number(lower).unwrap(), value);
    }

    #[test]
    fn unconstrained_round_trip(value in any::<i64>(), variant in arb_variant()) {
        let mut enc = PerEncoder::new(variant);
        enc.encode_integer(value as i128, &Constraint::unconstrained()).unwrap();
        let bytes = enc.into_bytes();
        let mut dec = PerDecoder::new(&bytes, variant);
        prop_assert_eq!(dec.decode_integer(&Constraint::unconstrained()).unwrap(), value as i128);
    }

    #[test]
    fn extensible_integer_round_trip(value in -500i128..500, variant in arb_variant()) {
        let constraint = Constraint::extensible(0, 100);
        let mut enc = PerEncoder::new(variant);
        enc.encode_integer(value, &constraint).unwrap();
        let bytes = enc.into_bytes();
        let mut dec = PerDecoder::new(&bytes, variant);
        prop_assert_eq!(dec.decode_integer(&constraint).unwrap(), value);
    }

    #[test]
    fn normally_small_round_trip(value in any::<u32>(), variant in arb_variant()) {
        let mut enc = PerEncoder::new(variant);
        enc.encode_normally_small_non_negative(value as u64).unwrap();
        if value <= 63 {
            prop_assert_eq!(enc.bit_len(), 7);
        }
        let bytes = enc.into_bytes();
        let mut dec = PerDecoder::new(&bytes, variant);
        prop_assert_eq!(dec.decode_normally_small_non_negative().unwrap(), value as u64);
    }

    #[test]
    fn octet_string_round_trip(
        data in prop::collection::vec(any::<u8>(), 0..300),
        lead in 0usize..8,
        variant in arb_variant(),
    ) {
        for size in [Size::unbounded(), Size::range(0, 300)] {
            let mut enc = PerEncoder::new(variant);
            enc.write_bits(0, lead);
            enc.encode_octet_string(&data, &size).unwrap();
            let bytes = enc.into_bytes();
            let mut dec = PerDecoder::new(&bytes, variant);
            dec.read_bits(lead).unwrap();
            prop_assert_eq!(dec.decode_octet_string(&size).unwrap(), data.clone());
        }
    }

    #[test]
    fn arbitrary_input_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64), aligned in any::<bool>()) {
        let options = if aligned { CodecOptions::aligned() } else { CodecOptions::default() };
        let resolved = ResolvedModule::resolve(
            parse_file(concat!(env!("CARGO_MANIFEST_DIR"), "/schemas/lpp-subset.asn")).unwrap(),
        )
        .unwrap();
        let codec = Codec::new(resolved, options);
        let _ = codec.decode("LPP-Message", &bytes);
    }
}
