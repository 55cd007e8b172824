//! PDU decode fuzz target: decode arbitrary bytes as LPP-Message with the
//! bundled schema, in the variant picked by the first byte. Decoding must
//! return Ok or Err without panicking, and whatever decodes must re-encode.
//! Build with: cargo fuzz run decode_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;
#[cfg(fuzzing)]
use std::sync::OnceLock;
#[cfg(fuzzing)]
use uperdsl::{parse, Codec, CodecOptions, ResolvedModule};

#[cfg(fuzzing)]
const SCHEMA: &str = include_str!("../../schemas/lpp-subset.asn");

#[cfg(fuzzing)]
fn codecs() -> &'static (Codec, Codec) {
    static CODECS: OnceLock<(Codec, Codec)> = OnceLock::new();
    CODECS.get_or_init(|| {
        let load = |options| {
            let module = parse(SCHEMA).expect("bundled schema parses");
            Codec::new(ResolvedModule::resolve(module).expect("bundled schema resolves"), options)
        };
        (load(CodecOptions::default()), load(CodecOptions::aligned()))
    })
}

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let Some((&selector, pdu)) = data.split_first() else {
        return;
    };
    let (uper, aper) = codecs();
    let codec = if selector & 1 == 0 { uper } else { aper };
    if let Ok(decoded) = codec.decode("LPP-Message", pdu) {
        codec.encode("LPP-Message", &decoded.value).expect("decoded value re-encodes");
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run decode_fuzz");
}
