//! Linter for schema modules: naming and constraint rules on top of what
//! resolution already rejects.
//!
//! ## Rules
//!
//! - **Type names**: type references start with an upper-case letter (error).
//! - **Component names**: components, alternatives, enumeration items and
//!   values start with a lower-case letter (error).
//! - **Unconstrained INTEGER**: encoded with a length octet and minimal octets;
//!   usually an oversight in a PER schema (warning).
//! - **Unbounded SIZE**: strings and lists without an upper bound (warning).
//! - **Extension marker**: top-level SEQUENCE and CHOICE types without `...`
//!   cannot evolve without breaking old decoders (warning).
//! - **Mandatory in group**: a mandatory component inside `[[ ]]` (warning).
//! - **Trailing whitespace** (source lint only, warning).
//!
//! Run the linter via the `lint_schema` binary. Exit code 1 if any error-level findings.

use crate::ast::*;
use crate::parser::parse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintRule {
    TypeNameCase,
    ComponentNameCase,
    UnconstrainedInteger,
    UnboundedSize,
    MissingExtensionMarker,
    MandatoryInGroup,
    NoTrailingWhitespace,
}

impl LintRule {
    pub fn id(self) -> &'static str {
        match self {
            LintRule::TypeNameCase => "type-name-case",
            LintRule::ComponentNameCase => "component-name-case",
            LintRule::UnconstrainedInteger => "unconstrained-integer",
            LintRule::UnboundedSize => "unbounded-size",
            LintRule::MissingExtensionMarker => "missing-extension-marker",
            LintRule::MandatoryInGroup => "mandatory-in-group",
            LintRule::NoTrailingWhitespace => "no-trailing-whitespace",
        }
    }
}

/// A single lint message: line of the enclosing assignment and dotted path
/// of the offending component.
#[derive(Debug, Clone)]
pub struct LintMessage {
    pub line: usize,
    pub path: String,
    pub rule: LintRule,
    pub severity: Severity,
    pub message: String,
}

/// Run all module rules. Returns messages in assignment order.
pub fn lint(module: &Module) -> Vec<LintMessage> {
    let mut linter = Linter { out: Vec::new(), line: 0 };
    for v in &module.values {
        linter.line = v.line;
        if !starts_lower(&v.name) {
            linter.push(&v.name, LintRule::ComponentNameCase, Severity::Error, "value name must start with a lower-case letter");
        }
    }
    for t in &module.types {
        linter.line = t.line;
        if !starts_upper(&t.name) {
            linter.push(&t.name, LintRule::TypeNameCase, Severity::Error, "type name must start with an upper-case letter");
        }
        match &t.type_spec {
            TypeSpec::Sequence(s) if !s.extensible => {
                linter.push(&t.name, LintRule::MissingExtensionMarker, Severity::Warning, "SEQUENCE has no extension marker")
            }
            TypeSpec::Choice(c) if !c.extensible => {
                linter.push(&t.name, LintRule::MissingExtensionMarker, Severity::Warning, "CHOICE has no extension marker")
            }
            _ => {}
        }
        linter.spec(&t.name, &t.type_spec);
    }
    linter.out.sort_by_key(|m| m.line);
    linter.out
}

/// Parse `source`, lint the module and add the source-level rules.
pub fn lint_source(source: &str) -> Result<Vec<LintMessage>, String> {
    let module = parse(source)?;
    let mut out = lint(&module);
    for (i, line) in source.lines().enumerate() {
        if line != line.trim_end() {
            out.push(LintMessage {
                line: i + 1,
                path: String::new(),
                rule: LintRule::NoTrailingWhitespace,
                severity: Severity::Warning,
                message: "trailing whitespace not allowed".to_string(),
            });
        }
    }
    out.sort_by_key(|m| m.line);
    Ok(out)
}

fn starts_upper(name: &str) -> bool {
    name.chars().next().map_or(false, |c| c.is_ascii_uppercase())
}

fn starts_lower(name: &str) -> bool {
    name.chars().next().map_or(false, |c| c.is_ascii_lowercase())
}

struct Linter {
    out: Vec<LintMessage>,
    line: usize,
}

impl Linter {
    fn push(&mut self, path: &str, rule: LintRule, severity: Severity, message: &str) {
        self.out.push(LintMessage {
            line: self.line,
            path: path.to_string(),
            rule,
            severity,
            message: message.to_string(),
        });
    }

    fn component_name(&mut self, path: &str, name: &str) {
        if !starts_lower(name) {
            self.push(path, LintRule::ComponentNameCase, Severity::Error, "component name must start with a lower-case letter");
        }
    }

    fn size(&mut self, path: &str, size: &SizeSpec) {
        if size.is_unbounded() {
            self.push(path, LintRule::UnboundedSize, Severity::Warning, "SIZE has no upper bound");
        }
    }

    fn spec(&mut self, path: &str, spec: &TypeSpec) {
        match spec {
            TypeSpec::Null | TypeSpec::Boolean | TypeSpec::TypeRef(_) => {}
            TypeSpec::Integer(int) => {
                if int.lower == Bound::Unbounded && int.upper == Bound::Unbounded {
                    self.push(path, LintRule::UnconstrainedInteger, Severity::Warning, "INTEGER has no value constraint");
                }
            }
            TypeSpec::Enumerated(e) => {
                for item in e.root.iter().chain(e.additions.iter()) {
                    self.component_name(&format!("{}.{}", path, item.name), &item.name);
                }
            }
            TypeSpec::BitString(b) => self.size(path, &b.size),
            TypeSpec::OctetString(size) => self.size(path, size),
            TypeSpec::SequenceOf(s) => {
                self.size(path, &s.size);
                self.spec(&format!("{}[]", path), &s.element);
            }
            TypeSpec::Sequence(s) => {
                for field in &s.root {
                    self.field(path, field);
                }
                for addition in &s.additions {
                    if let ExtensionAddition::Group { fields, .. } = addition {
                        for field in fields.iter().filter(|f| !f.is_optional()) {
                            self.push(
                                &format!("{}.{}", path, field.name),
                                LintRule::MandatoryInGroup,
                                Severity::Warning,
                                "mandatory component inside an extension group",
                            );
                        }
                    }
                    for field in addition.fields() {
                        self.field(path, field);
                    }
                }
            }
            TypeSpec::Choice(c) => {
                for alt in c.root.iter().chain(c.additions.iter()) {
                    let alt_path = format!("{}.{}", path, alt.name);
                    self.component_name(&alt_path, &alt.name);
                    self.spec(&alt_path, &alt.type_spec);
                }
            }
        }
    }

    fn field(&mut self, path: &str, field: &Field) {
        let field_path = format!("{}.{}", path, field.name);
        self.component_name(&field_path, &field.name);
        self.spec(&field_path, &field.type_spec);
    }
}
