//! Schema DSL tests: syntax (parse success/failure) and semantics (resolve, references, lint).

use uperdsl::ast::*;
use uperdsl::lint::{lint, Severity};
use uperdsl::{parse, parse_file, ResolvedModule};

fn fixture() -> Module {
    parse_file(concat!(env!("CARGO_MANIFEST_DIR"), "/schemas/lpp-subset.asn")).expect("parse fixture")
}

fn resolve(src: &str) -> Result<ResolvedModule, String> {
    ResolvedModule::resolve(parse(src)?)
}

// ==================== Syntax ====================

#[test]
fn parse_empty_module() {
    let m = parse("").expect("empty source parses");
    assert!(m.types.is_empty());
    assert!(m.values.is_empty());
}

#[test]
fn parse_fixture_header_and_assignments() {
    let m = fixture();
    assert_eq!(m.name.as_deref(), Some("LPP-PDU-Definitions"));
    let values: Vec<_> = m.values.iter().map(|v| (v.name.as_str(), v.value)).collect();
    assert_eq!(values, vec![("maxEPDU", 16), ("maxGNSS", 16), ("maxSat", 64)]);
    assert_eq!(m.types[0].name, "LPP-Message");
    assert!(m.types.iter().any(|t| t.name == "NavModelCNAV-KeplerianSet"));
}

#[test]
fn parse_integer_constraints() {
    let m = parse(
        "A ::= INTEGER\nB ::= INTEGER (0..MAX)\nC ::= INTEGER (-5..5, ...)\nD ::= INTEGER (MIN..10)\nE ::= INTEGER (7)",
    )
    .expect("parse");
    let ints: Vec<_> = m
        .types
        .iter()
        .map(|t| match &t.type_spec {
            TypeSpec::Integer(i) => i.constraint(),
            other => panic!("expected INTEGER, got {:?}", other),
        })
        .collect();
    assert_eq!((ints[0].lower, ints[0].upper, ints[0].extensible), (None, None, false));
    assert_eq!((ints[1].lower, ints[1].upper), (Some(0), None));
    assert_eq!((ints[2].lower, ints[2].upper, ints[2].extensible), (Some(-5), Some(5), true));
    assert_eq!((ints[3].lower, ints[3].upper), (None, Some(10)));
    assert_eq!((ints[4].lower, ints[4].upper), (Some(7), Some(7)));
}

#[test]
fn parse_sequence_components() {
    let m = parse(
        "S ::= SEQUENCE {
            a   INTEGER (0..7),
            b   BOOLEAN OPTIONAL,
            c   INTEGER (0..3) DEFAULT 2,
            ...,
            d   BOOLEAN,
            [[ 2: e OCTET STRING (SIZE (4)) OPTIONAL, f NULL ]],
            ...,
            g   BOOLEAN
        }",
    )
    .expect("parse");
    let s = match &m.types[0].type_spec {
        TypeSpec::Sequence(s) => s,
        other => panic!("expected SEQUENCE, got {:?}", other),
    };
    let root: Vec<_> = s.root.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(root, vec!["a", "b", "c", "g"]);
    assert!(s.extensible);
    assert_eq!(s.root[2].presence, Presence::Default(Literal::Int(2)));
    assert_eq!(s.additions.len(), 2);
    match &s.additions[1] {
        ExtensionAddition::Group { version, fields } => {
            assert_eq!(*version, Some(2));
            assert_eq!(fields.len(), 2);
            assert!(fields[0].is_optional());
            assert!(!fields[1].is_optional());
        }
        other => panic!("expected group, got {:?}", other),
    }
}

#[test]
fn parse_sequence_of_forms() {
    let m = parse("A ::= SEQUENCE (SIZE (1..4)) OF BOOLEAN\nB ::= SEQUENCE SIZE (2) OF INTEGER (0..1)\nC ::= SEQUENCE OF C2\nC2 ::= NULL")
        .expect("parse");
    match &m.types[0].type_spec {
        TypeSpec::SequenceOf(s) => {
            assert_eq!(s.size, SizeSpec::range(1, 4));
            assert_eq!(*s.element, TypeSpec::Boolean);
        }
        other => panic!("expected SEQUENCE OF, got {:?}", other),
    }
    match &m.types[1].type_spec {
        TypeSpec::SequenceOf(s) => assert_eq!(s.size, SizeSpec::fixed(2)),
        other => panic!("expected SEQUENCE OF, got {:?}", other),
    }
    match &m.types[2].type_spec {
        TypeSpec::SequenceOf(s) => {
            assert!(s.size.is_unbounded());
            assert_eq!(*s.element, TypeSpec::TypeRef("C2".to_string()));
        }
        other => panic!("expected SEQUENCE OF, got {:?}", other),
    }
}

#[test]
fn parse_choice_with_extension_alternatives() {
    let m = parse("C ::= CHOICE { a NULL, b BOOLEAN, ..., [[ c INTEGER (0..1), d NULL ]], e NULL }").expect("parse");
    match &m.types[0].type_spec {
        TypeSpec::Choice(c) => {
            assert_eq!(c.root.len(), 2);
            assert!(c.extensible);
            let additions: Vec<_> = c.additions.iter().map(|a| a.name.as_str()).collect();
            assert_eq!(additions, vec!["c", "d", "e"]);
        }
        other => panic!("expected CHOICE, got {:?}", other),
    }
}

#[test]
fn parse_errors() {
    assert!(parse("T ::= SEQUENCE { a INTEGER (0..7) ").is_err());
    assert!(parse("T ::= INTEGER (0..)").is_err());
    assert!(parse("T ::= ENUMERATED { a, ..., b, ..., c }").is_err());
    assert!(parse("T ::= SEQUENCE { a NULL, [[ b NULL ]] }").is_err());
    assert!(parse("T ::= SEQUENCE { a NULL, ..., b NULL, ..., c NULL, ..., d NULL }").is_err());
    assert!(parse("::= NULL").is_err());
}

// ==================== Resolution ====================

#[test]
fn resolve_fixture() {
    let resolved = ResolvedModule::resolve(fixture()).expect("resolve fixture");
    assert_eq!(resolved.get_value("maxEPDU"), Some(16));
    match resolved.get_type("EPDU-Sequence") {
        Some(TypeSpec::SequenceOf(s)) => assert_eq!(s.size, SizeSpec::range(1, 16)),
        other => panic!("expected SEQUENCE OF, got {:?}", other),
    }
    let body = resolved.get_type("EPDU-Body").expect("EPDU-Body");
    assert_eq!(*body, TypeSpec::OctetString(SizeSpec::unbounded()));
    let tn_ref = TypeSpec::TypeRef("TransactionNumber".to_string());
    let deref = resolved.deref(&tn_ref);
    assert_eq!(deref, Some(&TypeSpec::Integer(IntegerType::range(0, 255))));
}

#[test]
fn enumerated_items_are_ordered_by_value() {
    let resolved = resolve("E ::= ENUMERATED { c (5), a, b (0), ..., d, e (9) }").expect("resolve");
    match resolved.get_type("E") {
        Some(TypeSpec::Enumerated(e)) => {
            let root: Vec<_> = e.root.iter().map(|i| (i.name.as_str(), i.number)).collect();
            assert_eq!(root, vec![("b", Some(0)), ("a", Some(1)), ("c", Some(5))]);
            let additions: Vec<_> = e.additions.iter().map(|i| (i.name.as_str(), i.number)).collect();
            assert_eq!(additions, vec![("d", Some(6)), ("e", Some(9))]);
        }
        other => panic!("expected ENUMERATED, got {:?}", other),
    }
}

#[test]
fn resolve_errors() {
    let cases = [
        ("T ::= Missing", "Unknown type reference"),
        ("T ::= NULL\nT ::= BOOLEAN", "Duplicate type name"),
        ("x INTEGER ::= 1\nx INTEGER ::= 2", "Duplicate value name"),
        ("T ::= INTEGER (5..1)", "Inverted bounds"),
        ("T ::= OCTET STRING (SIZE (0..limit))", "Unknown value reference"),
        ("T ::= SEQUENCE { a NULL, a BOOLEAN }", "Duplicate component name"),
        ("T ::= CHOICE { a NULL, ..., a BOOLEAN }", "Duplicate alternative name"),
        ("T ::= ENUMERATED { a (1), b (1) }", "Duplicate enumeration value"),
        ("T ::= ENUMERATED { a (3), ..., b (2) }", "must be numbered above"),
        ("A ::= B\nB ::= A", "Circular type reference"),
        ("T ::= SEQUENCE { f BIT STRING (SIZE(2)) DEFAULT x, b BOOLEAN }", "unsupported DEFAULT"),
        ("T ::= SEQUENCE { a INTEGER (0..7) DEFAULT 9 }", "outside"),
        ("T ::= SEQUENCE { e ENUMERATED { a, b } DEFAULT c }", "not an item"),
        ("T ::= SEQUENCE { s SEQUENCE { n INTEGER DEFAULT TRUE } }", "unsupported DEFAULT"),
        ("T ::= SEQUENCE { a BOOLEAN, ..., [[ x INTEGER (0..3) DEFAULT 4 ]] }", "outside"),
    ];
    for (src, expected) in cases {
        let err = resolve(src).expect_err(src);
        assert!(err.contains(expected), "{}: {}", src, err);
    }
}

#[test]
fn named_bounds_are_substituted() {
    let resolved = resolve("max INTEGER ::= 12\nT ::= SEQUENCE (SIZE (1..max)) OF INTEGER (0..max)").expect("resolve");
    match resolved.get_type("T") {
        Some(TypeSpec::SequenceOf(s)) => {
            assert_eq!(s.size, SizeSpec::range(1, 12));
            assert_eq!(*s.element, TypeSpec::Integer(IntegerType::range(0, 12)));
        }
        other => panic!("expected SEQUENCE OF, got {:?}", other),
    }
}

// ==================== Lint ====================

#[test]
fn fixture_lints_without_errors() {
    let messages = lint(&fixture());
    let errors: Vec<_> = messages.iter().filter(|m| m.severity == Severity::Error).collect();
    assert!(errors.is_empty(), "fixture should lint clean of errors: {:?}", errors);
    // EPDU-Body is an unbounded OCTET STRING
    assert!(messages.iter().any(|m| m.path == "EPDU-Body"));
}

// ==================== Files ====================

#[test]
fn parse_file_from_disk() {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "Small DEFINITIONS AUTOMATIC TAGS ::= BEGIN").expect("write");
    writeln!(file, "T ::= INTEGER (0..3)").expect("write");
    writeln!(file, "END").expect("write");
    let m = parse_file(file.path()).expect("parse temp file");
    assert_eq!(m.name.as_deref(), Some("Small"));
    assert_eq!(m.types.len(), 1);

    let missing = file.path().with_extension("missing");
    let err = parse_file(&missing).expect_err("missing file");
    assert!(err.contains(&missing.display().to_string()));
}
