//! # uperdsl: ASN.1 schema DSL and Packed Encoding Rules codec
//!
//! An ASN.1 subset parsed with a PEST grammar into type descriptors, plus one
//! generic codec that walks those descriptors to decode and encode ITU-T X.691
//! PER bit streams (UNALIGNED by default, ALIGNED on request).
//!
//! ## Layers
//!
//! - [`bits`]: MSB-first bit cursor and writer.
//! - [`per`]: PER primitives (constrained whole numbers, length determinants
//!   with 16K fragmentation, strings, open types, CHOICE/ENUMERATED indices,
//!   SEQUENCE preambles and extension bitmaps).
//! - [`parser`] / [`ast`]: schema source to resolved descriptors.
//! - [`codec`]: the descriptor-driven dispatcher, with extension skipping and
//!   embedded-protocol dispatch on OCTET STRING fields.
//! - [`dump`]: text rendering with per-field unit formatters.
//! - [`lint`]: schema style rules.
//!
//! ## Example schema
//!
//! ```text
//! LPP-TransactionID ::= SEQUENCE {
//!     initiator          Initiator,
//!     transactionNumber  TransactionNumber,
//!     ...
//! }
//!
//! Initiator ::= ENUMERATED { locationServer, targetDevice, ... }
//! TransactionNumber ::= INTEGER (0..255)
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use uperdsl::{parse, Codec, CodecOptions, ResolvedModule};
//!
//! let module = parse("T ::= SEQUENCE { a BOOLEAN, b INTEGER (0..255) }").unwrap();
//! let codec = Codec::new(ResolvedModule::resolve(module).unwrap(), CodecOptions::default());
//! let decoded = codec.decode("T", &[0x95, 0x00]).unwrap();
//! assert_eq!(decoded.value.field("b").and_then(|v| v.as_i128()), Some(42));
//! ```

pub mod ast;
pub mod bits;
pub mod codec;
pub mod dump;
pub mod lint;
pub mod parser;
pub mod per;
pub mod value;

pub use ast::{Module, ResolvedModule, TypeSpec};
pub use codec::{
    Codec, CodecError, CodecOptions, Decoded, EmbeddedDecoder, Encoded, ExtensionPolicy, NestedPdu, SkippedExtension,
};
pub use parser::{parse, parse_file};
pub use per::{PerDecoder, PerEncoder, PerError, Variant};
pub use value::Value;
