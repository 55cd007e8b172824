//! Parse ASN.1 schema source into AST using PEST.

use crate::ast::*;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;
use std::path::Path;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct SchemaParser;

/// Parse schema source into AST.
pub fn parse(source: &str) -> Result<Module, String> {
    let pairs = SchemaParser::parse(Rule::module, source).map_err(|e| format!("Parse error: {}", e))?;
    let pair = pairs.into_iter().next().ok_or("Empty parse")?;
    build_module(pair)
}

/// Read and parse a schema file.
pub fn parse_file(path: impl AsRef<Path>) -> Result<Module, String> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    parse(&source)
}

fn line_of(pair: &Pair<Rule>) -> usize {
    pair.as_span().start_pos().line_col().0
}

fn parse_number(s: &str) -> Result<i128, String> {
    s.parse::<i128>().map_err(|e| format!("Invalid number {}: {}", s, e))
}

fn first_ident(pair: Pair<Rule>) -> Result<String, String> {
    pair.into_inner()
        .find(|p| p.as_rule() == Rule::ident)
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| "missing identifier".to_string())
}

fn build_module(pair: Pair<Rule>) -> Result<Module, String> {
    let mut module = Module::default();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::module_header => module.name = Some(first_ident(inner)?),
            Rule::value_assignment => module.values.push(build_value_assignment(inner)?),
            Rule::type_assignment => module.types.push(build_type_assignment(inner)?),
            _ => {}
        }
    }
    Ok(module)
}

fn build_value_assignment(pair: Pair<Rule>) -> Result<ValueAssignment, String> {
    let line = line_of(&pair);
    let mut name = None;
    let mut value = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = Some(inner.as_str().to_string()),
            Rule::number => value = Some(parse_number(inner.as_str())?),
            _ => {}
        }
    }
    Ok(ValueAssignment {
        name: name.ok_or("value assignment: missing name")?,
        value: value.ok_or("value assignment: missing value")?,
        line,
    })
}

fn build_type_assignment(pair: Pair<Rule>) -> Result<TypeAssignment, String> {
    let line = line_of(&pair);
    let mut it = pair.into_inner();
    let name = it.next().ok_or("type assignment: missing name")?.as_str().to_string();
    let spec_pair = it.next().ok_or("type assignment: missing type")?;
    let type_spec = build_type_spec(spec_pair).map_err(|e| format!("{} (line {}): {}", name, line, e))?;
    Ok(TypeAssignment { name, type_spec, line })
}

fn build_type_spec(pair: Pair<Rule>) -> Result<TypeSpec, String> {
    for inner in pair.into_inner() {
        let spec = match inner.as_rule() {
            Rule::null_type => TypeSpec::Null,
            Rule::boolean_type => TypeSpec::Boolean,
            Rule::integer_type => TypeSpec::Integer(build_integer(inner)?),
            Rule::enumerated_type => TypeSpec::Enumerated(build_enumerated(inner)?),
            Rule::bit_string_type => TypeSpec::BitString(build_bit_string(inner)?),
            Rule::octet_string_type => TypeSpec::OctetString(build_optional_size(inner)?),
            Rule::sequence_of_type => TypeSpec::SequenceOf(build_sequence_of(inner)?),
            Rule::sequence_type => TypeSpec::Sequence(build_sequence(inner)?),
            Rule::choice_type => TypeSpec::Choice(build_choice(inner)?),
            Rule::type_ref => TypeSpec::TypeRef(first_ident(inner)?),
            // tag numbers and tag keywords
            _ => continue,
        };
        return Ok(spec);
    }
    Err("type: missing body".to_string())
}

fn build_bound(pair: Pair<Rule>) -> Result<Bound, String> {
    let inner = pair.into_inner().next().ok_or("bound: empty")?;
    match inner.as_rule() {
        Rule::kw_min | Rule::kw_max => Ok(Bound::Unbounded),
        Rule::number => Ok(Bound::Value(parse_number(inner.as_str())?)),
        Rule::ident => Ok(Bound::Named(inner.as_str().to_string())),
        other => Err(format!("bound: unexpected {:?}", other)),
    }
}

/// `value_constraint` or `size_constraint`: (lower, upper, extensible).
fn build_constraint(pair: Pair<Rule>) -> Result<(Bound, Bound, bool), String> {
    let mut range = (Bound::Unbounded, Bound::Unbounded);
    let mut extensible = false;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::value_range => {
                let bounds = inner.into_inner().map(build_bound).collect::<Result<Vec<_>, _>>()?;
                range = match bounds.as_slice() {
                    [single] => (single.clone(), single.clone()),
                    [lower, upper] => (lower.clone(), upper.clone()),
                    _ => return Err("range: expected one or two bounds".to_string()),
                };
            }
            Rule::extension_marker => extensible = true,
            _ => {}
        }
    }
    Ok((range.0, range.1, extensible))
}

fn build_integer(pair: Pair<Rule>) -> Result<IntegerType, String> {
    match pair.into_inner().find(|p| p.as_rule() == Rule::value_constraint) {
        Some(c) => {
            let (lower, upper, extensible) = build_constraint(c)?;
            Ok(IntegerType {
                lower,
                upper,
                extensible,
            })
        }
        None => Ok(IntegerType::unconstrained()),
    }
}

fn build_size(pair: Pair<Rule>) -> Result<SizeSpec, String> {
    let (lower, upper, extensible) = build_constraint(pair)?;
    Ok(SizeSpec {
        lower,
        upper,
        extensible,
    })
}

fn build_optional_size(pair: Pair<Rule>) -> Result<SizeSpec, String> {
    match pair.into_inner().find(|p| p.as_rule() == Rule::size_constraint) {
        Some(c) => build_size(c),
        None => Ok(SizeSpec::unbounded()),
    }
}

fn build_enumerated(pair: Pair<Rule>) -> Result<EnumeratedType, String> {
    let mut e = EnumeratedType::default();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::extension_marker => {
                if e.extensible {
                    return Err("ENUMERATED: more than one extension marker".to_string());
                }
                e.extensible = true;
            }
            Rule::enum_item => {
                let mut it = inner.into_inner();
                let name = it.next().ok_or("enum item: name")?.as_str().to_string();
                let number = it.next().map(|n| parse_number(n.as_str())).transpose()?;
                let item = EnumItem { name, number };
                if e.extensible {
                    e.additions.push(item);
                } else {
                    e.root.push(item);
                }
            }
            _ => {}
        }
    }
    Ok(e)
}

fn build_bit_string(pair: Pair<Rule>) -> Result<BitStringType, String> {
    let mut b = BitStringType::default();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::named_bit_list => {
                for bit in inner.into_inner() {
                    let mut it = bit.into_inner();
                    let name = it.next().ok_or("named bit: name")?.as_str().to_string();
                    let position = parse_number(it.next().ok_or("named bit: position")?.as_str())?;
                    let position = u64::try_from(position).map_err(|_| format!("named bit {}: negative position", name))?;
                    b.named_bits.push((name, position));
                }
            }
            Rule::size_constraint => b.size = build_size(inner)?,
            _ => {}
        }
    }
    Ok(b)
}

fn build_sequence_of(pair: Pair<Rule>) -> Result<SequenceOfType, String> {
    let mut size = SizeSpec::unbounded();
    let mut element = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::size_constraint => size = build_size(inner)?,
            Rule::type_spec => element = Some(build_type_spec(inner)?),
            _ => {}
        }
    }
    Ok(SequenceOfType {
        element: Box::new(element.ok_or("SEQUENCE OF: missing element type")?),
        size,
    })
}

fn build_literal(pair: Pair<Rule>) -> Result<Literal, String> {
    let inner = pair.into_inner().next().ok_or("literal: empty")?;
    match inner.as_rule() {
        Rule::number => Ok(Literal::Int(parse_number(inner.as_str())?)),
        _ => Ok(match inner.as_str() {
            "TRUE" => Literal::Bool(true),
            "FALSE" => Literal::Bool(false),
            other => Literal::Ident(other.to_string()),
        }),
    }
}

fn build_field(pair: Pair<Rule>) -> Result<Field, String> {
    let mut name = None;
    let mut type_spec = None;
    let mut presence = Presence::Required;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = Some(inner.as_str().to_string()),
            Rule::type_spec => type_spec = Some(build_type_spec(inner)?),
            Rule::optional_marker => presence = Presence::Optional,
            Rule::default_value => {
                let lit = inner
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::literal)
                    .ok_or("DEFAULT: missing value")?;
                presence = Presence::Default(build_literal(lit)?);
            }
            _ => {}
        }
    }
    let name = name.ok_or("component: missing name")?;
    let type_spec = type_spec.ok_or_else(|| format!("component {}: missing type", name))?;
    Ok(Field {
        name,
        type_spec,
        presence,
    })
}

fn group_version(pair: &Pair<Rule>) -> Result<Option<u64>, String> {
    pair.clone()
        .into_inner()
        .find(|p| p.as_rule() == Rule::version)
        .map(|v| v.as_str().parse::<u64>().map_err(|e| format!("group version: {}", e)))
        .transpose()
}

fn build_sequence(pair: Pair<Rule>) -> Result<SequenceType, String> {
    let mut seq = SequenceType::default();
    let mut markers = 0;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::extension_marker => {
                markers += 1;
                if markers > 2 {
                    return Err("SEQUENCE: more than two extension markers".to_string());
                }
                seq.extensible = true;
            }
            Rule::field => {
                let field = build_field(inner)?;
                if markers == 1 {
                    seq.additions.push(ExtensionAddition::Field(field));
                } else {
                    // before the first marker, or after the closing one
                    seq.root.push(field);
                }
            }
            Rule::extension_group => {
                if markers != 1 {
                    return Err("SEQUENCE: extension group outside the extension additions".to_string());
                }
                let version = group_version(&inner)?;
                let fields = inner
                    .into_inner()
                    .filter(|p| p.as_rule() == Rule::field)
                    .map(build_field)
                    .collect::<Result<Vec<_>, _>>()?;
                seq.additions.push(ExtensionAddition::Group { version, fields });
            }
            _ => {}
        }
    }
    Ok(seq)
}

fn build_alternative(pair: Pair<Rule>) -> Result<Alternative, String> {
    let mut it = pair.into_inner();
    let name = it.next().ok_or("alternative: name")?.as_str().to_string();
    let spec = it.next().ok_or_else(|| format!("alternative {}: missing type", name))?;
    Ok(Alternative {
        type_spec: build_type_spec(spec)?,
        name,
    })
}

fn build_choice(pair: Pair<Rule>) -> Result<ChoiceType, String> {
    let mut choice = ChoiceType::default();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::extension_marker => {
                if choice.extensible {
                    return Err("CHOICE: more than one extension marker".to_string());
                }
                choice.extensible = true;
            }
            Rule::alternative => {
                let alt = build_alternative(inner)?;
                if choice.extensible {
                    choice.additions.push(alt);
                } else {
                    choice.root.push(alt);
                }
            }
            Rule::alternative_group => {
                if !choice.extensible {
                    return Err("CHOICE: extension group before the extension marker".to_string());
                }
                for alt in inner.into_inner().filter(|p| p.as_rule() == Rule::alternative) {
                    choice.additions.push(build_alternative(alt)?);
                }
            }
            _ => {}
        }
    }
    Ok(choice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyphenated_names_and_comments() {
        let m = parse(
            r#"
            -- header comment
            EPDU-ID ::= INTEGER (1..256) -- trailing
            /* block
               comment */
            a-gnss-Flag ::= BOOLEAN
            "#,
        )
        .expect("parse");
        assert_eq!(m.types.len(), 2);
        assert_eq!(m.types[0].name, "EPDU-ID");
        assert_eq!(m.types[0].type_spec, TypeSpec::Integer(IntegerType::range(1, 256)));
        assert_eq!(m.types[1].line, 6);
    }

    #[test]
    fn keyword_prefix_is_a_reference() {
        let m = parse("A ::= SEQUENCE { offset OFFSET-Type OPTIONAL }\nOFFSET-Type ::= NULL").expect("parse");
        let TypeSpec::Sequence(seq) = &m.types[0].type_spec else {
            panic!("expected SEQUENCE");
        };
        assert_eq!(seq.root[0].type_spec, TypeSpec::TypeRef("OFFSET-Type".into()));
        assert_eq!(seq.root[0].presence, Presence::Optional);
    }

    #[test]
    fn tags_are_dropped() {
        let m = parse("T ::= SEQUENCE { a [0] IMPLICIT INTEGER (0..7), b [1] BOOLEAN }").expect("parse");
        let TypeSpec::Sequence(seq) = &m.types[0].type_spec else {
            panic!("expected SEQUENCE");
        };
        assert_eq!(seq.root[0].type_spec, TypeSpec::Integer(IntegerType::range(0, 7)));
        assert_eq!(seq.root[1].type_spec, TypeSpec::Boolean);
    }
}
