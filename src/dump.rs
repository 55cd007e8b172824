//! Render decoded values as indented text, using the descriptor for enumerated
//! names, named bits and nesting, and optional per-field formatters for units.

use crate::ast::{ResolvedModule, TypeSpec};
use crate::codec::CodecError;
use crate::value::{SequenceValue, Value};
use bitvec::prelude::*;
use std::collections::HashMap;
use std::fmt;

/// Custom formatter: the component value and the components decoded before it
/// in the same SEQUENCE (for scalings that depend on a sibling).
pub type FieldFormatter = Box<dyn Fn(&Value, &[(String, Value)]) -> Option<String> + Send + Sync>;

enum Format {
    Quantum(String),
    Custom(FieldFormatter),
}

/// Formatters keyed by component name.
#[derive(Default)]
pub struct Formatters {
    by_field: HashMap<String, Format>,
}

impl fmt::Debug for Formatters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.by_field.keys().collect();
        names.sort();
        f.debug_struct("Formatters").field("fields", &names).finish()
    }
}

impl Formatters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scale an INTEGER component: `"90/2^23 deg"`, `"0.5 m"`, `"2^-5 s"`.
    pub fn quantum(mut self, field: &str, quantum: &str) -> Self {
        self.by_field
            .insert(field.to_string(), Format::Quantum(quantum.to_string()));
        self
    }

    pub fn custom<F>(mut self, field: &str, f: F) -> Self
    where
        F: Fn(&Value, &[(String, Value)]) -> Option<String> + Send + Sync + 'static,
    {
        self.by_field.insert(field.to_string(), Format::Custom(Box::new(f)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.by_field.is_empty()
    }

    fn format(&self, field: &str, v: &Value, siblings: &[(String, Value)]) -> Option<String> {
        match self.by_field.get(field)? {
            Format::Quantum(q) => format_scalar_with_quantum(v, Some(q)),
            Format::Custom(f) => f(v, siblings),
        }
    }
}

/// Parse a quantum string (`"1/256 m"`, `"90/2^23 deg"`) into (scale, unit).
pub fn parse_quantum(quantum: &str) -> Option<(f64, String)> {
    let q = quantum.trim();
    let (scale, unit) = match q.split_once(char::is_whitespace) {
        Some((scale, unit)) => (scale, unit.trim().to_string()),
        None => (q, String::new()),
    };
    Some((parse_scale_expr(scale)?, unit))
}

fn parse_power_of_two(s: &str) -> Option<f64> {
    let exp: i32 = s.trim_matches(|c| c == '(' || c == ')').parse().ok()?;
    Some(2f64.powi(exp))
}

fn parse_scale_expr(s: &str) -> Option<f64> {
    let term = |t: &str| match t.trim().strip_prefix("2^") {
        Some(exp) => parse_power_of_two(exp),
        None => t.trim().parse::<f64>().ok(),
    };
    match s.split_once('/') {
        Some((num, denom)) => {
            let denom = term(denom)?;
            if denom == 0.0 {
                return None;
            }
            Some(term(num)? / denom)
        }
        None => term(s),
    }
}

/// Scaled rendering of an INTEGER, `physical unit (raw)`; `None` for other values
/// or an unparsable quantum.
pub fn format_scalar_with_quantum(v: &Value, quantum: Option<&str>) -> Option<String> {
    let raw = match v {
        Value::Integer(x) => *x,
        _ => return None,
    };
    let (scale, unit) = quantum.and_then(parse_quantum)?;
    let physical = raw as f64 * scale;
    Some(if unit.is_empty() {
        format!("{} ({})", physical, raw)
    } else {
        format!("{} {} ({})", physical, unit, raw)
    })
}

fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

fn bit_string(bits: &BitSlice<u8, Msb0>) -> String {
    let digits: String = bits.iter().by_vals().map(|b| if b { '1' } else { '0' }).collect();
    format!("'{}'B", digits)
}

/// Dump a value decoded as the named type.
pub fn dump_type(
    resolved: &ResolvedModule,
    type_name: &str,
    v: &Value,
    formatters: &Formatters,
) -> Result<String, CodecError> {
    let spec = resolved
        .get_type(type_name)
        .ok_or_else(|| CodecError::UnknownType(type_name.to_string()))?;
    Ok(value_to_dump(resolved, spec, v, formatters, 0))
}

/// Multi-line rendering of `v` against `spec`, starting at `indent` levels.
/// Values that do not match the descriptor are rendered without it.
pub fn value_to_dump(
    resolved: &ResolvedModule,
    spec: &TypeSpec,
    v: &Value,
    formatters: &Formatters,
    indent: usize,
) -> String {
    let dumper = Dumper { resolved, formatters };
    format!("{}{}", "  ".repeat(indent), dumper.dump(Some(spec), v, indent))
}

struct Dumper<'a> {
    resolved: &'a ResolvedModule,
    formatters: &'a Formatters,
}

impl Dumper<'_> {
    /// Rendering without the leading pad of the first line.
    fn dump(&self, spec: Option<&TypeSpec>, v: &Value, indent: usize) -> String {
        let spec = spec.and_then(|s| self.resolved.deref(s));
        match v {
            Value::Null => "NULL".to_string(),
            Value::Boolean(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            Value::Integer(x) => x.to_string(),
            Value::Enumerated(e) => match (&e.name, e.extension) {
                (Some(name), _) => name.clone(),
                (None, false) => format!("<item {}>", e.index),
                (None, true) => format!("<extension item {}>", e.index),
            },
            Value::BitString(bits) => {
                let named: Vec<&str> = match spec {
                    Some(TypeSpec::BitString(b)) => b
                        .named_bits
                        .iter()
                        .filter(|(_, pos)| bits.get(*pos as usize).map_or(false, |bit| *bit))
                        .map(|(name, _)| name.as_str())
                        .collect(),
                    _ => Vec::new(),
                };
                if named.is_empty() {
                    bit_string(bits)
                } else {
                    format!("{} {{{}}}", bit_string(bits), named.join(", "))
                }
            }
            Value::OctetString(b) => format!("hex({})", hex_string(b)),
            Value::Open(b) => format!("open({})", hex_string(b)),
            Value::Embedded(e) => format!(
                "hex({}) embedded[{}] {}",
                hex_string(&e.bytes),
                e.selector,
                self.dump(None, &e.inner, indent)
            ),
            Value::Choice(c) => {
                let alt_spec = match spec {
                    Some(TypeSpec::Choice(ct)) => c.name.as_deref().and_then(|name| {
                        ct.root
                            .iter()
                            .chain(ct.additions.iter())
                            .find(|a| a.name == name)
                            .map(|a| &a.type_spec)
                    }),
                    _ => None,
                };
                let name = match &c.name {
                    Some(name) => name.clone(),
                    None => format!("<extension {}>", c.index),
                };
                format!("{}: {}", name, self.dump(alt_spec, &c.value, indent))
            }
            Value::Sequence(s) => self.dump_sequence(spec, s, indent),
            Value::List(items) => {
                if items.is_empty() {
                    return "[]".to_string();
                }
                let element = match spec {
                    Some(TypeSpec::SequenceOf(so)) => Some(&*so.element),
                    _ => None,
                };
                let pad = "  ".repeat(indent);
                let mut lines = vec!["[".to_string()];
                for (i, item) in items.iter().enumerate() {
                    lines.push(format!("{}  [{}] {}", pad, i, self.dump(element, item, indent + 1)));
                }
                lines.push(format!("{}]", pad));
                lines.join("\n")
            }
        }
    }

    fn dump_sequence(&self, spec: Option<&TypeSpec>, s: &SequenceValue, indent: usize) -> String {
        let pad = "  ".repeat(indent);
        let mut lines = vec!["{".to_string()];
        for (i, (name, value)) in s.fields.iter().enumerate() {
            let field_spec = match spec {
                Some(TypeSpec::Sequence(st)) => st.field(name).map(|f| &f.type_spec),
                _ => None,
            };
            let text = self
                .formatters
                .format(name, value, &s.fields[..i])
                .unwrap_or_else(|| self.dump(field_spec, value, indent + 1));
            lines.push(format!("{}  {}: {}", pad, name, text));
        }
        for unknown in &s.unknown_extensions {
            lines.push(format!(
                "{}  <extension {}>: open({})",
                pad,
                unknown.index,
                hex_string(&unknown.bytes)
            ));
        }
        lines.push(format!("{}}}", pad));
        lines.join("\n")
    }
}
