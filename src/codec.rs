//! Encode/decode PER bit streams from resolved ASN.1 descriptors.
//!
//! One generic engine walks the descriptor tree and drives the primitives in
//! [`crate::per`]: SEQUENCE presence bitmaps and extension additions, CHOICE
//! and ENUMERATED indices, SEQUENCE OF counts, DEFAULT values, unknown
//! extension skipping and embedded-protocol dispatch on OCTET STRING fields.

use crate::ast::*;
use crate::per::{PerDecoder, PerEncoder, PerError, Selection, Unit, Variant};
use crate::value::*;
use bitvec::prelude::*;
use log::{debug, trace, warn};
use std::fmt;

/// Largest count a single length determinant carries.
const MAX_UNFRAGMENTED_COUNT: usize = 16383;

/// What to do with an extension index the schema does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtensionPolicy {
    /// Skip it by its open-type length, keep decoding and report it.
    #[default]
    Skip,
    /// Fail with [`PerError::UnsupportedExtension`].
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    pub variant: Variant,
    pub extensions: ExtensionPolicy,
    /// Maximum number of nested type references followed in one message.
    pub max_depth: usize,
}

impl Default for CodecOptions {
    fn default() -> Self {
        CodecOptions {
            variant: Variant::Unaligned,
            extensions: ExtensionPolicy::Skip,
            max_depth: 64,
        }
    }
}

impl CodecOptions {
    pub fn aligned() -> Self {
        CodecOptions {
            variant: Variant::Aligned,
            ..Self::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("{path}: {source} (byte {}, bit {})", .offset / 8, .offset % 8)]
    Decode {
        path: String,
        offset: usize,
        source: PerError,
    },
    #[error("{path}: {source}")]
    Encode { path: String, source: PerError },
    #[error("Unknown type: {0}")]
    UnknownType(String),
    #[error("Validation: {0}")]
    Validation(String),
    #[error("Nesting deeper than {0} type references")]
    DepthLimit(usize),
}

/// Unlocated primitive failure; the dispatcher fills in path and offset.
impl From<PerError> for CodecError {
    fn from(source: PerError) -> Self {
        CodecError::Decode {
            path: String::new(),
            offset: 0,
            source,
        }
    }
}

impl CodecError {
    pub fn per_error(&self) -> Option<&PerError> {
        match self {
            CodecError::Decode { source, .. } | CodecError::Encode { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Decoder for the contents of an OCTET STRING that carries another protocol.
pub trait EmbeddedDecoder: Send + Sync {
    fn decode_embedded(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

impl<F> EmbeddedDecoder for F
where
    F: Fn(&[u8]) -> Result<Value, CodecError> + Send + Sync,
{
    fn decode_embedded(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        self(bytes)
    }
}

/// Embedded payload that is itself a PER PDU of a named type.
#[derive(Debug)]
pub struct NestedPdu {
    codec: Codec,
    type_name: String,
}

impl NestedPdu {
    pub fn new(codec: Codec, type_name: &str) -> Self {
        NestedPdu {
            codec,
            type_name: type_name.to_string(),
        }
    }
}

impl EmbeddedDecoder for NestedPdu {
    fn decode_embedded(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        self.codec.decode_pdu(&self.type_name, bytes).map(|(_, v)| v)
    }
}

struct EmbeddedBinding {
    field: String,
    selector: String,
    selector_value: i128,
    decoder: Box<dyn EmbeddedDecoder>,
}

impl fmt::Debug for EmbeddedBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedBinding")
            .field("field", &self.field)
            .field("selector", &self.selector)
            .field("selector_value", &self.selector_value)
            .finish_non_exhaustive()
    }
}

/// Unknown extension skipped during a decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedExtension {
    pub path: String,
    pub index: usize,
    /// Open-type length; 0 for an ENUMERATED item, which has no contents.
    pub octets: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub value: Value,
    pub bits_consumed: usize,
    pub skipped_extensions: Vec<SkippedExtension>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub bits: usize,
}

#[derive(Debug)]
pub struct Codec {
    resolved: ResolvedModule,
    options: CodecOptions,
    embedded: Vec<EmbeddedBinding>,
}

impl Codec {
    pub fn new(resolved: ResolvedModule, options: CodecOptions) -> Self {
        Codec {
            resolved,
            options,
            embedded: Vec::new(),
        }
    }

    /// Hand the contents of OCTET STRING component `field` to `decoder` when
    /// the already decoded component `selector` (dotted path, looked up in the
    /// enclosing sequences) equals `selector_value`.
    pub fn with_embedded(
        mut self,
        field: &str,
        selector: &str,
        selector_value: i128,
        decoder: impl EmbeddedDecoder + 'static,
    ) -> Self {
        self.embedded.push(EmbeddedBinding {
            field: field.to_string(),
            selector: selector.to_string(),
            selector_value,
            decoder: Box::new(decoder),
        });
        self
    }

    pub fn resolved(&self) -> &ResolvedModule {
        &self.resolved
    }

    pub fn options(&self) -> CodecOptions {
        self.options
    }

    /// Decode one value of `type_name` from the start of `bytes`.
    pub fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<Decoded, CodecError> {
        let mut dec = PerDecoder::new(bytes, self.options.variant);
        let mut ctx = DecodeContext::new(self.options.max_depth);
        let value = self.decode_type(type_name, &mut dec, &mut ctx)?;
        Ok(Decoded {
            value,
            bits_consumed: dec.position(),
            skipped_extensions: ctx.skipped,
        })
    }

    /// Decode a complete PDU; returns (octets consumed, value). The encoding
    /// is padded to an octet boundary and occupies at least one octet.
    pub fn decode_pdu(&self, type_name: &str, bytes: &[u8]) -> Result<(usize, Value), CodecError> {
        let mut dec = PerDecoder::new(bytes, self.options.variant);
        let mut ctx = DecodeContext::new(self.options.max_depth);
        let value = self.decode_type(type_name, &mut dec, &mut ctx)?;
        dec.align_to_byte();
        let consumed = (dec.position() / 8).max(1).min(bytes.len());
        Ok((consumed, value))
    }

    /// Encode `value` as `type_name`; bits past `Encoded::bits` are zero padding.
    pub fn encode(&self, type_name: &str, value: &Value) -> Result<Encoded, CodecError> {
        let mut enc = PerEncoder::new(self.options.variant);
        let mut ctx = EncodeContext::new(self.options.max_depth);
        self.encode_type(type_name, value, &mut enc, &mut ctx)?;
        let bits = enc.bit_len();
        Ok(Encoded {
            bytes: enc.into_bytes(),
            bits,
        })
    }

    /// Encode a complete PDU (octet aligned, at least one octet).
    pub fn encode_pdu(&self, type_name: &str, value: &Value) -> Result<Vec<u8>, CodecError> {
        let mut enc = PerEncoder::new(self.options.variant);
        let mut ctx = EncodeContext::new(self.options.max_depth);
        self.encode_type(type_name, value, &mut enc, &mut ctx)?;
        Ok(enc.into_pdu_bytes())
    }

    fn decode_type(&self, type_name: &str, dec: &mut PerDecoder<'_>, ctx: &mut DecodeContext) -> Result<Value, CodecError> {
        let spec = self
            .resolved
            .get_type(type_name)
            .ok_or_else(|| CodecError::UnknownType(type_name.to_string()))?;
        ctx.enter(type_name);
        ctx.enter_type()?;
        trace!("{}: decode at bit {}", type_name, dec.position());
        let value = self.decode_spec(spec, dec, ctx)?;
        ctx.leave_type();
        ctx.leave();
        Ok(value)
    }

    fn encode_type(&self, type_name: &str, value: &Value, enc: &mut PerEncoder, ctx: &mut EncodeContext) -> Result<(), CodecError> {
        let spec = self
            .resolved
            .get_type(type_name)
            .ok_or_else(|| CodecError::UnknownType(type_name.to_string()))?;
        ctx.enter(type_name);
        ctx.enter_type()?;
        self.encode_spec(spec, value, enc, ctx)?;
        ctx.leave_type();
        ctx.leave();
        Ok(())
    }

    fn decode_spec(&self, spec: &TypeSpec, dec: &mut PerDecoder<'_>, ctx: &mut DecodeContext) -> Result<Value, CodecError> {
        let at = dec.position();
        match spec {
            TypeSpec::Null => Ok(Value::Null),
            TypeSpec::Boolean => dec.read_bit().map(Value::Boolean).map_err(|e| ctx.error(e, at)),
            TypeSpec::Integer(int) => dec
                .decode_integer(&int.constraint())
                .map(Value::Integer)
                .map_err(|e| ctx.error(e, at)),
            TypeSpec::Enumerated(e) => self.decode_enumerated(e, dec, ctx),
            TypeSpec::BitString(b) => dec
                .decode_bit_string(&b.size.size())
                .map(Value::BitString)
                .map_err(|e| ctx.error(e, at)),
            TypeSpec::OctetString(size) => dec
                .decode_octet_string(&size.size())
                .map(Value::OctetString)
                .map_err(|e| ctx.error(e, at)),
            TypeSpec::SequenceOf(s) => self.decode_sequence_of(s, dec, ctx),
            TypeSpec::Sequence(s) => self.decode_sequence(s, dec, ctx),
            TypeSpec::Choice(c) => self.decode_choice(c, dec, ctx),
            TypeSpec::TypeRef(name) => {
                let target = self
                    .resolved
                    .get_type(name)
                    .ok_or_else(|| CodecError::UnknownType(name.clone()))?;
                ctx.enter_type()?;
                trace!("{}: {} at bit {}", ctx.path(), name, at);
                let value = self.decode_spec(target, dec, ctx)?;
                ctx.leave_type();
                Ok(value)
            }
        }
    }

    fn decode_enumerated(&self, e: &EnumeratedType, dec: &mut PerDecoder<'_>, ctx: &mut DecodeContext) -> Result<Value, CodecError> {
        let at = dec.position();
        let selection = dec
            .decode_enumerated(e.root.len(), e.extensible)
            .map_err(|err| ctx.error(err, at))?;
        let value = match selection {
            Selection::Root(index) => EnumValue {
                index,
                extension: false,
                name: e.root.get(index).map(|i| i.name.clone()),
                number: e.root.get(index).and_then(|i| i.number),
            },
            Selection::Extension(index) => {
                let item = e.additions.get(index);
                if item.is_none() {
                    self.unknown_extension(ctx, index, 0, at)?;
                }
                EnumValue {
                    index,
                    extension: true,
                    name: item.map(|i| i.name.clone()),
                    number: item.and_then(|i| i.number),
                }
            }
        };
        Ok(Value::Enumerated(value))
    }

    fn decode_choice(&self, c: &ChoiceType, dec: &mut PerDecoder<'_>, ctx: &mut DecodeContext) -> Result<Value, CodecError> {
        let at = dec.position();
        let selection = dec
            .decode_choice_index(c.root.len(), c.extensible)
            .map_err(|e| ctx.error(e, at))?;
        let (index, extension, name, value) = match selection {
            Selection::Root(index) => {
                let alt = c.root.get(index).ok_or_else(|| {
                    ctx.error(
                        PerError::BoundsViolation {
                            value: index as i128,
                            lower: Some(0),
                            upper: Some(c.root.len() as i128 - 1),
                        },
                        at,
                    )
                })?;
                ctx.enter(&alt.name);
                let value = self.decode_spec(&alt.type_spec, dec, ctx)?;
                ctx.leave();
                (index, false, Some(alt.name.clone()), value)
            }
            Selection::Extension(index) => {
                let open_at = dec.position();
                let bytes = dec.decode_open_type().map_err(|e| ctx.error(e, open_at))?;
                let content_at = dec.position() - bytes.len() * 8;
                match c.additions.get(index) {
                    Some(alt) => {
                        ctx.enter(&alt.name);
                        let value = self.decode_open(&bytes, content_at, ctx, |codec, inner, ctx| {
                            codec.decode_spec(&alt.type_spec, inner, ctx)
                        })?;
                        ctx.leave();
                        (index, true, Some(alt.name.clone()), value)
                    }
                    None => {
                        self.unknown_extension(ctx, index, bytes.len(), at)?;
                        (index, true, None, Value::Open(bytes))
                    }
                }
            }
        };
        Ok(Value::Choice(ChoiceValue {
            index,
            extension,
            name,
            value: Box::new(value),
        }))
    }

    fn decode_sequence(&self, seq: &SequenceType, dec: &mut PerDecoder<'_>, ctx: &mut DecodeContext) -> Result<Value, CodecError> {
        let at = dec.position();
        let optional_count = seq.root.iter().filter(|f| f.is_optional()).count();
        let preamble = dec
            .decode_sequence_preamble(seq.extensible, optional_count)
            .map_err(|e| ctx.error(e, at))?;
        ctx.scopes.push(Vec::with_capacity(seq.root.len()));
        let unknown = self.decode_sequence_body(seq, &preamble.presence, preamble.extended, dec, ctx);
        let fields = ctx.scopes.pop().unwrap_or_default();
        Ok(Value::Sequence(SequenceValue {
            fields,
            unknown_extensions: unknown?,
        }))
    }

    fn decode_sequence_body(
        &self,
        seq: &SequenceType,
        presence: &BitSlice<u8, Msb0>,
        extended: bool,
        dec: &mut PerDecoder<'_>,
        ctx: &mut DecodeContext,
    ) -> Result<Vec<UnknownExtension>, CodecError> {
        self.decode_components(&seq.root, presence, dec, ctx)?;
        let mut unknown = Vec::new();
        let bitmap = if extended {
            let at = dec.position();
            dec.decode_extension_bitmap().map_err(|e| ctx.error(e, at))?
        } else {
            BitVec::new()
        };
        for index in 0..seq.additions.len().max(bitmap.len()) {
            if !bitmap.get(index).map_or(false, |bit| *bit) {
                if let Some(addition) = seq.additions.get(index) {
                    for field in addition.fields() {
                        self.push_default(field, ctx)?;
                    }
                }
                continue;
            }
            let at = dec.position();
            let bytes = dec.decode_open_type().map_err(|e| ctx.error(e, at))?;
            let content_at = dec.position() - bytes.len() * 8;
            match seq.additions.get(index) {
                Some(ExtensionAddition::Field(field)) => {
                    let value = self.decode_open(&bytes, content_at, ctx, |codec, inner, ctx| {
                        codec.decode_field(field, inner, ctx)
                    })?;
                    ctx.push_component(&field.name, value);
                }
                Some(ExtensionAddition::Group { fields, .. }) => {
                    self.decode_open(&bytes, content_at, ctx, |codec, inner, ctx| {
                        let count = fields.iter().filter(|f| f.is_optional()).count();
                        let preamble = inner
                            .decode_sequence_preamble(false, count)
                            .map_err(|e| ctx.error(e, 0))?;
                        codec.decode_components(fields, &preamble.presence, inner, ctx)
                    })?;
                }
                None => {
                    self.unknown_extension(ctx, index, bytes.len(), at)?;
                    unknown.push(UnknownExtension { index, bytes });
                }
            }
        }
        Ok(unknown)
    }

    /// Decode `fields` into the innermost scope; absent DEFAULT fields get their default.
    fn decode_components(
        &self,
        fields: &[Field],
        presence: &BitSlice<u8, Msb0>,
        dec: &mut PerDecoder<'_>,
        ctx: &mut DecodeContext,
    ) -> Result<(), CodecError> {
        let mut bits = presence.iter().by_vals();
        for field in fields {
            let present = !field.is_optional() || bits.next().unwrap_or(false);
            if present {
                let value = self.decode_field(field, dec, ctx)?;
                ctx.push_component(&field.name, value);
            } else {
                self.push_default(field, ctx)?;
            }
        }
        Ok(())
    }

    /// Insert the default of an absent DEFAULT component.
    fn push_default(&self, field: &Field, ctx: &mut DecodeContext) -> Result<(), CodecError> {
        if let Presence::Default(literal) = &field.presence {
            let value = self
                .resolved
                .default_value(&field.type_spec, literal)
                .map_err(|e| CodecError::Validation(format!("{}.{}: {}", ctx.path(), field.name, e)))?;
            ctx.push_component(&field.name, value);
        }
        Ok(())
    }

    fn decode_field(&self, field: &Field, dec: &mut PerDecoder<'_>, ctx: &mut DecodeContext) -> Result<Value, CodecError> {
        ctx.enter(&field.name);
        let value = self.decode_spec(&field.type_spec, dec, ctx)?;
        let value = match value {
            Value::OctetString(bytes) => self.decode_embedded(&field.name, bytes, ctx),
            other => other,
        };
        ctx.leave();
        Ok(value)
    }

    fn decode_embedded(&self, field: &str, bytes: Vec<u8>, ctx: &DecodeContext) -> Value {
        let mut bound = self.embedded.iter().filter(|b| b.field == field).peekable();
        if bound.peek().is_none() {
            return Value::OctetString(bytes);
        }
        for binding in bound {
            let selector = match ctx.lookup(&binding.selector).and_then(Value::as_i128) {
                Some(s) => s,
                None => continue,
            };
            if selector != binding.selector_value {
                continue;
            }
            return match binding.decoder.decode_embedded(&bytes) {
                Ok(inner) => {
                    trace!("{}: embedded payload for {} = {}", ctx.path(), binding.selector, selector);
                    Value::Embedded(EmbeddedValue {
                        bytes,
                        selector,
                        inner: Box::new(inner),
                    })
                }
                Err(e) => {
                    warn!(
                        "{}: embedded decoder for {} = {} failed, keeping raw bytes: {}",
                        ctx.path(),
                        binding.selector,
                        selector,
                        e
                    );
                    Value::OctetString(bytes)
                }
            };
        }
        Value::OctetString(bytes)
    }

    fn decode_sequence_of(&self, s: &SequenceOfType, dec: &mut PerDecoder<'_>, ctx: &mut DecodeContext) -> Result<Value, CodecError> {
        let at = dec.position();
        let size = s.size.size();
        // Elements of at least one bit never exceed the remaining input. Past a
        // single length determinant, zero-width elements are held to the same rule.
        let limit = dec.remaining_bits().max(MAX_UNFRAGMENTED_COUNT);
        let mut items = Vec::new();
        let result = dec.decode_sized(&size, Unit::Components, |dec, n| {
            if items.len().saturating_add(n) > limit {
                return Err(PerError::MalformedLengthDeterminant {
                    offset: dec.position(),
                    reason: "count exceeds the remaining input",
                }
                .into());
            }
            items.reserve(n.min(dec.remaining_bits()));
            for _ in 0..n {
                ctx.enter(format!("[{}]", items.len()));
                let item = self.decode_spec(&s.element, dec, ctx)?;
                ctx.leave();
                items.push(item);
            }
            Ok::<(), CodecError>(())
        });
        result.map_err(|e| ctx.locate(e, at))?;
        Ok(Value::List(items))
    }

    /// Decode open-type contents with a fresh decoder; error offsets stay absolute.
    fn decode_open<T>(
        &self,
        bytes: &[u8],
        content_at: usize,
        ctx: &mut DecodeContext,
        f: impl FnOnce(&Self, &mut PerDecoder<'_>, &mut DecodeContext) -> Result<T, CodecError>,
    ) -> Result<T, CodecError> {
        let mut inner = PerDecoder::new(bytes, self.options.variant);
        let saved = ctx.base_offset;
        ctx.base_offset = saved + content_at;
        let result = f(self, &mut inner, ctx);
        ctx.base_offset = saved;
        result
    }

    fn unknown_extension(&self, ctx: &mut DecodeContext, index: usize, octets: usize, at: usize) -> Result<(), CodecError> {
        match self.options.extensions {
            ExtensionPolicy::Reject => Err(ctx.error(PerError::UnsupportedExtension { index }, at)),
            ExtensionPolicy::Skip => {
                let path = ctx.path();
                debug!("{}: skipping unknown extension {} ({} octets)", path, index, octets);
                ctx.skipped.push(SkippedExtension { path, index, octets });
                Ok(())
            }
        }
    }

    fn encode_spec(&self, spec: &TypeSpec, value: &Value, enc: &mut PerEncoder, ctx: &mut EncodeContext) -> Result<(), CodecError> {
        match (spec, value) {
            (TypeSpec::Null, Value::Null) => Ok(()),
            (TypeSpec::Boolean, Value::Boolean(b)) => {
                enc.write_bit(*b);
                Ok(())
            }
            (TypeSpec::Integer(int), Value::Integer(v)) => {
                enc.encode_integer(*v, &int.constraint()).map_err(|e| ctx.error(e))
            }
            (TypeSpec::Enumerated(e), Value::Enumerated(v)) => self.encode_enumerated(e, v, enc, ctx),
            (TypeSpec::BitString(b), Value::BitString(bits)) => {
                enc.encode_bit_string(bits, &b.size.size()).map_err(|e| ctx.error(e))
            }
            (TypeSpec::OctetString(size), Value::OctetString(bytes))
            | (TypeSpec::OctetString(size), Value::Embedded(EmbeddedValue { bytes, .. })) => {
                enc.encode_octet_string(bytes, &size.size()).map_err(|e| ctx.error(e))
            }
            (TypeSpec::SequenceOf(s), Value::List(items)) => self.encode_sequence_of(s, items, enc, ctx),
            (TypeSpec::Sequence(s), Value::Sequence(v)) => self.encode_sequence(s, v, enc, ctx),
            (TypeSpec::Choice(c), Value::Choice(v)) => self.encode_choice(c, v, enc, ctx),
            (TypeSpec::TypeRef(name), _) => {
                let target = self
                    .resolved
                    .get_type(name)
                    .ok_or_else(|| CodecError::UnknownType(name.clone()))?;
                ctx.enter_type()?;
                self.encode_spec(target, value, enc, ctx)?;
                ctx.leave_type();
                Ok(())
            }
            (spec, value) => Err(CodecError::Validation(format!(
                "{}: expected {}, found {}",
                ctx.path(),
                spec_kind(spec),
                value.kind()
            ))),
        }
    }

    fn encode_enumerated(&self, e: &EnumeratedType, v: &EnumValue, enc: &mut PerEncoder, ctx: &mut EncodeContext) -> Result<(), CodecError> {
        let selection = match &v.name {
            Some(name) => match (e.root_index(name), e.addition_index(name)) {
                (Some(i), _) => Selection::Root(i),
                (None, Some(i)) => Selection::Extension(i),
                (None, None) => {
                    return Err(CodecError::Validation(format!(
                        "{}: unknown enumeration item {}",
                        ctx.path(),
                        name
                    )))
                }
            },
            None if v.extension => Selection::Extension(v.index),
            None => Selection::Root(v.index),
        };
        enc.encode_enumerated(selection, e.root.len(), e.extensible)
            .map_err(|err| ctx.error(err))
    }

    fn encode_choice(&self, c: &ChoiceType, v: &ChoiceValue, enc: &mut PerEncoder, ctx: &mut EncodeContext) -> Result<(), CodecError> {
        let selection = match &v.name {
            Some(name) => {
                let root = c.root.iter().position(|a| &a.name == name);
                let addition = c.additions.iter().position(|a| &a.name == name);
                match (root, addition) {
                    (Some(i), _) => Selection::Root(i),
                    (None, Some(i)) => Selection::Extension(i),
                    (None, None) => {
                        return Err(CodecError::Validation(format!(
                            "{}: unknown alternative {}",
                            ctx.path(),
                            name
                        )))
                    }
                }
            }
            None if v.extension => Selection::Extension(v.index),
            None => Selection::Root(v.index),
        };
        enc.encode_choice_index(selection, c.root.len(), c.extensible)
            .map_err(|e| ctx.error(e))?;
        match selection {
            Selection::Root(index) => {
                let alt = &c.root[index];
                ctx.enter(&alt.name);
                self.encode_spec(&alt.type_spec, &v.value, enc, ctx)?;
                ctx.leave();
                Ok(())
            }
            Selection::Extension(index) => {
                let encoded;
                let bytes: &[u8] = match (c.additions.get(index), &*v.value) {
                    (Some(alt), value) => {
                        ctx.enter(&alt.name);
                        encoded = self.encode_open(&alt.type_spec, value, ctx)?;
                        ctx.leave();
                        &encoded
                    }
                    (None, Value::Open(raw)) => raw,
                    (None, other) => {
                        return Err(CodecError::Validation(format!(
                            "{}: unknown extension alternative {} needs open type bytes, found {}",
                            ctx.path(),
                            index,
                            other.kind()
                        )))
                    }
                };
                enc.encode_open_type(bytes).map_err(|e| ctx.error(e))
            }
        }
    }

    fn encode_sequence(&self, seq: &SequenceType, v: &SequenceValue, enc: &mut PerEncoder, ctx: &mut EncodeContext) -> Result<(), CodecError> {
        if let Some((name, _)) = v.fields.iter().find(|(name, _)| seq.field(name).is_none()) {
            return Err(CodecError::Validation(format!(
                "{}: no component named {}",
                ctx.path(),
                name
            )));
        }

        // Additions first: the extension bit in front of the root depends on them.
        let mut additions: Vec<Option<Vec<u8>>> = Vec::with_capacity(seq.additions.len());
        for addition in &seq.additions {
            let encoded = match addition {
                ExtensionAddition::Field(field) => match self.carried(field, v, ctx)? {
                    Some(value) => {
                        ctx.enter(&field.name);
                        let bytes = self.encode_open(&field.type_spec, value, ctx)?;
                        ctx.leave();
                        Some(bytes)
                    }
                    None => None,
                },
                ExtensionAddition::Group { fields, .. } => {
                    let mut carried = false;
                    for field in fields {
                        carried |= self.carried(field, v, ctx)?.is_some();
                    }
                    if carried {
                        let mut inner = PerEncoder::new(self.options.variant);
                        self.encode_components(fields, v, None, &mut inner, ctx)?;
                        Some(inner.into_pdu_bytes())
                    } else {
                        None
                    }
                }
            };
            additions.push(encoded);
        }
        for unknown in &v.unknown_extensions {
            if unknown.index < seq.additions.len() {
                return Err(CodecError::Validation(format!(
                    "{}: extension {} is known to the schema",
                    ctx.path(),
                    unknown.index
                )));
            }
            if additions.len() <= unknown.index {
                additions.resize(unknown.index + 1, None);
            }
            additions[unknown.index] = Some(unknown.bytes.clone());
        }

        let count = additions.iter().rposition(Option::is_some).map_or(0, |i| i + 1);
        let extended = count > 0;
        if extended && !seq.extensible {
            return Err(CodecError::Validation(format!(
                "{}: extension additions on a non-extensible SEQUENCE",
                ctx.path()
            )));
        }
        self.encode_components(&seq.root, v, seq.extensible.then_some(extended), enc, ctx)?;
        if extended {
            let bitmap: BitVec<u8, Msb0> = additions[..count].iter().map(Option::is_some).collect();
            enc.encode_extension_bitmap(&bitmap).map_err(|e| ctx.error(e))?;
            for bytes in additions.iter().flatten() {
                enc.encode_open_type(bytes).map_err(|e| ctx.error(e))?;
            }
        }
        Ok(())
    }

    /// Preamble (extension bit when `extended` is Some) and present components.
    /// A DEFAULT component equal to its default is left out.
    fn encode_components(
        &self,
        fields: &[Field],
        v: &SequenceValue,
        extended: Option<bool>,
        enc: &mut PerEncoder,
        ctx: &mut EncodeContext,
    ) -> Result<(), CodecError> {
        let mut presence = BitVec::<u8, Msb0>::with_capacity(fields.len());
        let mut present = Vec::with_capacity(fields.len());
        for field in fields {
            let value = v.get(&field.name);
            match (&field.presence, value) {
                (Presence::Required, None) => {
                    return Err(CodecError::Validation(format!(
                        "{}: missing mandatory component {}",
                        ctx.path(),
                        field.name
                    )))
                }
                (Presence::Required, Some(value)) => present.push((field, value)),
                (Presence::Optional, value) => {
                    presence.push(value.is_some());
                    present.extend(value.map(|value| (field, value)));
                }
                (Presence::Default(_), _) => {
                    let value = self.carried(field, v, ctx)?;
                    presence.push(value.is_some());
                    present.extend(value.map(|value| (field, value)));
                }
            }
        }
        enc.encode_sequence_preamble(extended.is_some(), extended.unwrap_or(false), &presence);
        for (field, value) in present {
            ctx.enter(&field.name);
            self.encode_spec(&field.type_spec, value, enc, ctx)?;
            ctx.leave();
        }
        Ok(())
    }

    /// Value of `field` that goes on the wire: present and, for a DEFAULT
    /// component, different from its default.
    fn carried<'v>(&self, field: &Field, v: &'v SequenceValue, ctx: &EncodeContext) -> Result<Option<&'v Value>, CodecError> {
        let value = v.get(&field.name);
        match &field.presence {
            Presence::Default(literal) => {
                let default = self
                    .resolved
                    .default_value(&field.type_spec, literal)
                    .map_err(|e| CodecError::Validation(format!("{}.{}: {}", ctx.path(), field.name, e)))?;
                Ok(value.filter(|value| **value != default))
            }
            _ => Ok(value),
        }
    }

    fn encode_sequence_of(&self, s: &SequenceOfType, items: &[Value], enc: &mut PerEncoder, ctx: &mut EncodeContext) -> Result<(), CodecError> {
        let result = enc.encode_sized(
            &s.size.size(),
            Unit::Components,
            items.len(),
            |enc, range| {
                for index in range {
                    ctx.enter(format!("[{}]", index));
                    self.encode_spec(&s.element, &items[index], enc, ctx)?;
                    ctx.leave();
                }
                Ok::<(), CodecError>(())
            },
        );
        result.map_err(|e| ctx.locate(e))
    }

    /// Complete encoding of `value` for use as open-type contents.
    fn encode_open(&self, spec: &TypeSpec, value: &Value, ctx: &mut EncodeContext) -> Result<Vec<u8>, CodecError> {
        let mut inner = PerEncoder::new(self.options.variant);
        self.encode_spec(spec, value, &mut inner, ctx)?;
        Ok(inner.into_pdu_bytes())
    }
}

fn spec_kind(spec: &TypeSpec) -> &'static str {
    match spec {
        TypeSpec::Null => "NULL",
        TypeSpec::Boolean => "BOOLEAN",
        TypeSpec::Integer(_) => "INTEGER",
        TypeSpec::Enumerated(_) => "ENUMERATED",
        TypeSpec::BitString(_) => "BIT STRING",
        TypeSpec::OctetString(_) => "OCTET STRING",
        TypeSpec::SequenceOf(_) => "SEQUENCE OF",
        TypeSpec::Sequence(_) => "SEQUENCE",
        TypeSpec::Choice(_) => "CHOICE",
        TypeSpec::TypeRef(_) => "type reference",
    }
}

fn join_path(segments: &[String]) -> String {
    let mut out = String::new();
    for segment in segments {
        if !out.is_empty() && !segment.starts_with('[') {
            out.push('.');
        }
        out.push_str(segment);
    }
    out
}

/// Per-decode state: component path, enclosing sequences' decoded components,
/// reference depth and the skipped-extension report.
#[derive(Debug, Default)]
struct DecodeContext {
    path: Vec<String>,
    scopes: Vec<Vec<(String, Value)>>,
    depth: usize,
    max_depth: usize,
    /// Absolute bit offset of the buffer being decoded (non-zero inside open types).
    base_offset: usize,
    skipped: Vec<SkippedExtension>,
}

impl DecodeContext {
    fn new(max_depth: usize) -> Self {
        DecodeContext {
            max_depth,
            ..Self::default()
        }
    }

    fn path(&self) -> String {
        join_path(&self.path)
    }

    fn enter(&mut self, segment: impl Into<String>) {
        self.path.push(segment.into());
    }

    fn leave(&mut self) {
        self.path.pop();
    }

    fn enter_type(&mut self) -> Result<(), CodecError> {
        if self.depth >= self.max_depth {
            return Err(CodecError::DepthLimit(self.max_depth));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave_type(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn push_component(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((name.to_string(), value));
        }
    }

    /// Already decoded component by dotted path, innermost enclosing sequence first.
    fn lookup(&self, path: &str) -> Option<&Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let value = self
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.iter().rev().find(|(n, _)| n == head).map(|(_, v)| v))?;
        match rest {
            Some(rest) => value.path(rest),
            None => Some(value),
        }
    }

    fn error(&self, source: PerError, at: usize) -> CodecError {
        let offset = match &source {
            PerError::OutOfData { offset, .. } | PerError::MalformedLengthDeterminant { offset, .. } => *offset,
            _ => at,
        };
        CodecError::Decode {
            path: self.path(),
            offset: self.base_offset + offset,
            source,
        }
    }

    /// Attach path and offset to an error converted straight from a primitive.
    fn locate(&self, err: CodecError, at: usize) -> CodecError {
        match err {
            CodecError::Decode { path, source, .. } if path.is_empty() => self.error(source, at),
            other => other,
        }
    }
}

#[derive(Debug, Default)]
struct EncodeContext {
    path: Vec<String>,
    depth: usize,
    max_depth: usize,
}

impl EncodeContext {
    fn new(max_depth: usize) -> Self {
        EncodeContext {
            max_depth,
            ..Self::default()
        }
    }

    fn path(&self) -> String {
        join_path(&self.path)
    }

    fn enter(&mut self, segment: impl Into<String>) {
        self.path.push(segment.into());
    }

    fn leave(&mut self) {
        self.path.pop();
    }

    fn enter_type(&mut self) -> Result<(), CodecError> {
        if self.depth >= self.max_depth {
            return Err(CodecError::DepthLimit(self.max_depth));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave_type(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn error(&self, source: PerError) -> CodecError {
        CodecError::Encode {
            path: self.path(),
            source,
        }
    }

    fn locate(&self, err: CodecError) -> CodecError {
        match err {
            CodecError::Decode { path, source, .. } if path.is_empty() => self.error(source),
            other => other,
        }
    }
}
