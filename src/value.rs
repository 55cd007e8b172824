//! Runtime values for encoding/decoding (codec representation).

use bitvec::prelude::*;

/// A single decoded value (field or compound).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i128),
    Enumerated(EnumValue),
    BitString(BitVec<u8, Msb0>),
    OctetString(Vec<u8>),
    /// OCTET STRING whose contents were handed to a registered embedded decoder.
    Embedded(EmbeddedValue),
    Choice(ChoiceValue),
    Sequence(SequenceValue),
    List(Vec<Value>),
    /// Open type contents the schema does not describe (unknown extension).
    Open(Vec<u8>),
}

/// Enumerated item. Named items compare by name; unnamed ones (extension
/// items the schema does not know) by position. A named and an unnamed item
/// are never equal.
#[derive(Debug, Clone, Eq)]
pub struct EnumValue {
    pub index: usize,
    pub extension: bool,
    pub name: Option<String>,
    /// Item number from the schema (`a(5)`), when known.
    pub number: Option<i128>,
}

impl PartialEq for EnumValue {
    fn eq(&self, other: &Self) -> bool {
        same_selection(
            (&self.name, self.index, self.extension),
            (&other.name, other.index, other.extension),
        )
    }
}

/// Selected alternative. Compares like [`EnumValue`], then by value.
#[derive(Debug, Clone)]
pub struct ChoiceValue {
    pub index: usize,
    pub extension: bool,
    pub name: Option<String>,
    pub value: Box<Value>,
}

impl PartialEq for ChoiceValue {
    fn eq(&self, other: &Self) -> bool {
        same_selection(
            (&self.name, self.index, self.extension),
            (&other.name, other.index, other.extension),
        ) && self.value == other.value
    }
}

fn same_selection(a: (&Option<String>, usize, bool), b: (&Option<String>, usize, bool)) -> bool {
    match (a.0, b.0) {
        (Some(x), Some(y)) => x == y,
        (None, None) => a.1 == b.1 && a.2 == b.2,
        _ => false,
    }
}

/// Present components in declaration order (extension additions included),
/// plus additions this schema does not know.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SequenceValue {
    pub fields: Vec<(String, Value)>,
    pub unknown_extensions: Vec<UnknownExtension>,
}

impl SequenceValue {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Raw open-type bytes of an extension addition beyond the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownExtension {
    pub index: usize,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedValue {
    pub bytes: Vec<u8>,
    pub selector: i128,
    pub inner: Box<Value>,
}

impl Value {
    pub fn integer(v: impl Into<i128>) -> Self {
        Value::Integer(v.into())
    }

    pub fn enumerated(name: &str) -> Self {
        Value::Enumerated(EnumValue {
            index: 0,
            extension: false,
            name: Some(name.to_string()),
            number: None,
        })
    }

    pub fn choice(name: &str, value: Value) -> Self {
        Value::Choice(ChoiceValue {
            index: 0,
            extension: false,
            name: Some(name.to_string()),
            value: Box::new(value),
        })
    }

    pub fn sequence<'n>(fields: impl IntoIterator<Item = (&'n str, Value)>) -> Self {
        Value::Sequence(SequenceValue {
            fields: fields.into_iter().map(|(n, v)| (n.to_string(), v)).collect(),
            unknown_extensions: Vec::new(),
        })
    }

    /// INTEGER value, or the item number of an ENUMERATED (its index when the
    /// item is unknown to the schema).
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Integer(x) => Some(*x),
            Value::Enumerated(e) => Some(e.number.unwrap_or(e.index as i128)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|x| x.try_into().ok())
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_i128().and_then(|x| x.try_into().ok())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Octets of an OCTET STRING, embedded payload or open type.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::OctetString(b) | Value::Open(b) => Some(b),
            Value::Embedded(e) => Some(&e.bytes),
            _ => None,
        }
    }

    pub fn as_bits(&self) -> Option<&BitSlice<u8, Msb0>> {
        match self {
            Value::BitString(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumValue> {
        match self {
            Value::Enumerated(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_choice(&self) -> Option<&ChoiceValue> {
        match self {
            Value::Choice(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&SequenceValue> {
        match self {
            Value::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    /// Component of a SEQUENCE value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_sequence().and_then(|s| s.get(name))
    }

    /// Follow a dotted component path (`ePDU-Identifier.ePDU-ID`); a CHOICE is
    /// entered through its selected alternative's name.
    pub fn path(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(self, |v, segment| match v {
            Value::Sequence(s) => s.get(segment),
            Value::Choice(c) if c.name.as_deref() == Some(segment) => Some(&*c.value),
            _ => None,
        })
    }

    /// Kind name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(_) => "BOOLEAN",
            Value::Integer(_) => "INTEGER",
            Value::Enumerated(_) => "ENUMERATED",
            Value::BitString(_) => "BIT STRING",
            Value::OctetString(_) => "OCTET STRING",
            Value::Embedded(_) => "embedded OCTET STRING",
            Value::Choice(_) => "CHOICE",
            Value::Sequence(_) => "SEQUENCE",
            Value::List(_) => "SEQUENCE OF",
            Value::Open(_) => "open type",
        }
    }
}
