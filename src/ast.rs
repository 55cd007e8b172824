//! Abstract Syntax Tree for the ASN.1 schema subset: the descriptors the PER codec walks.

use crate::per::{Constraint, Size};
use crate::value::{EnumValue, Value};
use std::collections::{HashMap, HashSet};

/// Root module definition: value assignments and type assignments.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: Option<String>,
    pub values: Vec<ValueAssignment>,
    pub types: Vec<TypeAssignment>,
}

/// `maxEPDU INTEGER ::= 16`
#[derive(Debug, Clone, PartialEq)]
pub struct ValueAssignment {
    pub name: String,
    pub value: i128,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeAssignment {
    pub name: String,
    pub type_spec: TypeSpec,
    pub line: usize,
}

/// Type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpec {
    Null,
    Boolean,
    Integer(IntegerType),
    Enumerated(EnumeratedType),
    BitString(BitStringType),
    OctetString(SizeSpec),
    SequenceOf(SequenceOfType),
    Sequence(SequenceType),
    Choice(ChoiceType),
    TypeRef(String),
}

/// One end of a value or size range.
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    /// MIN / MAX, or no bound written.
    Unbounded,
    Value(i128),
    /// Reference to a value assignment; replaced during resolution.
    Named(String),
}

impl Bound {
    pub fn value(&self) -> Option<i128> {
        match self {
            Bound::Value(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntegerType {
    pub lower: Bound,
    pub upper: Bound,
    pub extensible: bool,
}

impl Default for IntegerType {
    fn default() -> Self {
        Self::unconstrained()
    }
}

impl IntegerType {
    pub fn unconstrained() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            extensible: false,
        }
    }

    pub fn range(lower: i128, upper: i128) -> Self {
        Self {
            lower: Bound::Value(lower),
            upper: Bound::Value(upper),
            extensible: false,
        }
    }

    pub fn constraint(&self) -> Constraint {
        Constraint {
            lower: self.lower.value(),
            upper: self.upper.value(),
            extensible: self.extensible,
        }
    }
}

/// SIZE(lower..upper[, ...]); a missing lower bound means 0.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeSpec {
    pub lower: Bound,
    pub upper: Bound,
    pub extensible: bool,
}

impl Default for SizeSpec {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl SizeSpec {
    pub fn unbounded() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            extensible: false,
        }
    }

    pub fn fixed(n: u64) -> Self {
        Self::range(n, n)
    }

    pub fn range(lower: u64, upper: u64) -> Self {
        Self {
            lower: Bound::Value(lower as i128),
            upper: Bound::Value(upper as i128),
            extensible: false,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.upper == Bound::Unbounded
    }

    pub fn size(&self) -> Size {
        Size {
            lower: self.lower.value().map_or(0, |v| v as u64),
            upper: self.upper.value().map(|v| v as u64),
            extensible: self.extensible,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnumeratedType {
    /// Root items, in index order once resolved (ascending item number).
    pub root: Vec<EnumItem>,
    pub extensible: bool,
    pub additions: Vec<EnumItem>,
}

impl EnumeratedType {
    pub fn from_names(root: &[&str], extensible: bool, additions: &[&str]) -> Self {
        let items = |names: &[&str]| {
            names
                .iter()
                .map(|n| EnumItem {
                    name: n.to_string(),
                    number: None,
                })
                .collect()
        };
        Self {
            root: items(root),
            extensible,
            additions: items(additions),
        }
    }

    pub fn root_index(&self, name: &str) -> Option<usize> {
        self.root.iter().position(|i| i.name == name)
    }

    pub fn addition_index(&self, name: &str) -> Option<usize> {
        self.additions.iter().position(|i| i.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumItem {
    pub name: String,
    pub number: Option<i128>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BitStringType {
    pub size: SizeSpec,
    pub named_bits: Vec<(String, u64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceOfType {
    pub element: Box<TypeSpec>,
    pub size: SizeSpec,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SequenceType {
    pub root: Vec<Field>,
    pub extensible: bool,
    pub additions: Vec<ExtensionAddition>,
}

impl SequenceType {
    /// Root field or addition field (group members included) with this name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.root
            .iter()
            .chain(self.additions.iter().flat_map(|a| a.fields()))
            .find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub type_spec: TypeSpec,
    pub presence: Presence,
}

impl Field {
    pub fn new(name: &str, type_spec: TypeSpec) -> Self {
        Self {
            name: name.to_string(),
            type_spec,
            presence: Presence::Required,
        }
    }

    pub fn optional(name: &str, type_spec: TypeSpec) -> Self {
        Self {
            presence: Presence::Optional,
            ..Self::new(name, type_spec)
        }
    }

    /// Whether the field owns a bit in the presence bitmap.
    pub fn is_optional(&self) -> bool {
        !matches!(self.presence, Presence::Required)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Presence {
    Required,
    Optional,
    Default(Literal),
}

/// One bit of the extension-addition bitmap.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionAddition {
    Field(Field),
    /// `[[ version: fields ]]`, encoded as one nested non-extensible sequence.
    Group { version: Option<u64>, fields: Vec<Field> },
}

impl ExtensionAddition {
    pub fn fields(&self) -> &[Field] {
        match self {
            ExtensionAddition::Field(f) => std::slice::from_ref(f),
            ExtensionAddition::Group { fields, .. } => fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChoiceType {
    pub root: Vec<Alternative>,
    pub extensible: bool,
    pub additions: Vec<Alternative>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub name: String,
    pub type_spec: TypeSpec,
}

impl Alternative {
    pub fn new(name: &str, type_spec: TypeSpec) -> Self {
        Self {
            name: name.to_string(),
            type_spec,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i128),
    Bool(bool),
    Ident(String),
}

/// Resolved module: named bounds substituted, references checked, types by name for codec.
#[derive(Debug, Clone)]
pub struct ResolvedModule {
    module: Module,
    types_by_name: HashMap<String, usize>,
    values_by_name: HashMap<String, i128>,
}

impl ResolvedModule {
    pub fn resolve(mut module: Module) -> Result<Self, String> {
        let mut values_by_name = HashMap::new();
        for v in &module.values {
            if values_by_name.insert(v.name.clone(), v.value).is_some() {
                return Err(format!("Duplicate value name: {}", v.name));
            }
        }
        let mut types_by_name = HashMap::new();
        for (i, t) in module.types.iter().enumerate() {
            if types_by_name.insert(t.name.clone(), i).is_some() {
                return Err(format!("Duplicate type name: {}", t.name));
            }
        }
        let resolver = Resolver {
            values: &values_by_name,
            types: &types_by_name,
        };
        for t in module.types.iter_mut() {
            resolver
                .resolve_spec(&mut t.type_spec)
                .map_err(|e| format!("{} (line {}): {}", t.name, t.line, e))?;
        }
        let resolved = ResolvedModule {
            module,
            types_by_name,
            values_by_name,
        };
        for t in &resolved.module.types {
            if resolved.deref(&t.type_spec).is_none() {
                return Err(format!("Circular type reference: {}", t.name));
            }
        }
        for t in &resolved.module.types {
            resolved
                .check_defaults(&t.type_spec)
                .map_err(|e| format!("{} (line {}): {}", t.name, t.line, e))?;
        }
        Ok(resolved)
    }

    /// Value a DEFAULT literal stands for in a component of type `spec`.
    pub fn default_value(&self, spec: &TypeSpec, literal: &Literal) -> Result<Value, String> {
        match (self.deref(spec), literal) {
            (Some(TypeSpec::Integer(int)), Literal::Int(v)) => Self::default_integer(int, *v),
            (Some(TypeSpec::Integer(int)), Literal::Ident(name)) => {
                let v = self
                    .get_value(name)
                    .ok_or_else(|| format!("Unknown value reference: {}", name))?;
                Self::default_integer(int, v)
            }
            (Some(TypeSpec::Boolean), Literal::Bool(b)) => Ok(Value::Boolean(*b)),
            (Some(TypeSpec::Enumerated(e)), Literal::Ident(name)) => {
                let (index, extension, item) = match (e.root_index(name), e.addition_index(name)) {
                    (Some(i), _) => (i, false, &e.root[i]),
                    (None, Some(i)) => (i, true, &e.additions[i]),
                    (None, None) => return Err(format!("DEFAULT {} is not an item of the enumeration", name)),
                };
                Ok(Value::Enumerated(EnumValue {
                    index,
                    extension,
                    name: Some(name.clone()),
                    number: item.number,
                }))
            }
            _ => Err(format!("unsupported DEFAULT value {:?}", literal)),
        }
    }

    fn default_integer(int: &IntegerType, v: i128) -> Result<Value, String> {
        let c = int.constraint();
        if !c.extensible && !c.contains(v) {
            let show = |b: Option<i128>, open: &str| b.map_or_else(|| open.to_string(), |b| b.to_string());
            return Err(format!("DEFAULT {} outside {}..{}", v, show(c.lower, "MIN"), show(c.upper, "MAX")));
        }
        Ok(Value::Integer(v))
    }

    fn check_defaults(&self, spec: &TypeSpec) -> Result<(), String> {
        match spec {
            TypeSpec::Sequence(s) => {
                for f in s.root.iter().chain(s.additions.iter().flat_map(|a| a.fields())) {
                    if let Presence::Default(literal) = &f.presence {
                        self.default_value(&f.type_spec, literal)
                            .map_err(|e| format!("component {}: {}", f.name, e))?;
                    }
                    self.check_defaults(&f.type_spec)?;
                }
                Ok(())
            }
            TypeSpec::SequenceOf(s) => self.check_defaults(&s.element),
            TypeSpec::Choice(c) => c
                .root
                .iter()
                .chain(c.additions.iter())
                .try_for_each(|a| self.check_defaults(&a.type_spec)),
            _ => Ok(()),
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn get_type(&self, name: &str) -> Option<&TypeSpec> {
        self.types_by_name
            .get(name)
            .map(|&i| &self.module.types[i].type_spec)
    }

    pub fn get_value(&self, name: &str) -> Option<i128> {
        self.values_by_name.get(name).copied()
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.module.types.iter().map(|t| t.name.as_str())
    }

    /// Follow type references to a structural descriptor. `None` for a
    /// dangling or circular reference.
    pub fn deref<'s>(&'s self, spec: &'s TypeSpec) -> Option<&'s TypeSpec> {
        let mut current = spec;
        for _ in 0..=self.module.types.len() {
            match current {
                TypeSpec::TypeRef(name) => current = self.get_type(name)?,
                other => return Some(other),
            }
        }
        None
    }
}

struct Resolver<'r> {
    values: &'r HashMap<String, i128>,
    types: &'r HashMap<String, usize>,
}

impl Resolver<'_> {
    fn bound(&self, bound: &mut Bound) -> Result<(), String> {
        if let Bound::Named(name) = bound {
            let v = self
                .values
                .get(name.as_str())
                .ok_or_else(|| format!("Unknown value reference: {}", name))?;
            *bound = Bound::Value(*v);
        }
        Ok(())
    }

    fn check_order(lower: &Bound, upper: &Bound) -> Result<(), String> {
        if let (Some(l), Some(u)) = (lower.value(), upper.value()) {
            if l > u {
                return Err(format!("Inverted bounds {}..{}", l, u));
            }
        }
        Ok(())
    }

    fn size(&self, size: &mut SizeSpec) -> Result<(), String> {
        self.bound(&mut size.lower)?;
        self.bound(&mut size.upper)?;
        for b in [&size.lower, &size.upper] {
            if let Some(v) = b.value() {
                if v < 0 || v > u64::MAX as i128 {
                    return Err(format!("SIZE bound out of range: {}", v));
                }
            }
        }
        Self::check_order(&size.lower, &size.upper)
    }

    fn unique<'n>(names: impl Iterator<Item = &'n str>, what: &str) -> Result<(), String> {
        let mut seen = HashSet::new();
        for name in names {
            if !seen.insert(name) {
                return Err(format!("Duplicate {} name: {}", what, name));
            }
        }
        Ok(())
    }

    fn resolve_spec(&self, spec: &mut TypeSpec) -> Result<(), String> {
        match spec {
            TypeSpec::Null | TypeSpec::Boolean => Ok(()),
            TypeSpec::Integer(int) => {
                self.bound(&mut int.lower)?;
                self.bound(&mut int.upper)?;
                Self::check_order(&int.lower, &int.upper)
            }
            TypeSpec::Enumerated(e) => self.enumerated(e),
            TypeSpec::BitString(b) => {
                Self::unique(b.named_bits.iter().map(|(n, _)| n.as_str()), "named bit")?;
                self.size(&mut b.size)
            }
            TypeSpec::OctetString(size) => self.size(size),
            TypeSpec::SequenceOf(s) => {
                self.size(&mut s.size)?;
                self.resolve_spec(&mut s.element)
            }
            TypeSpec::Sequence(s) => {
                Self::unique(
                    s.root
                        .iter()
                        .chain(s.additions.iter().flat_map(|a| a.fields()))
                        .map(|f| f.name.as_str()),
                    "component",
                )?;
                for f in s.root.iter_mut() {
                    self.resolve_spec(&mut f.type_spec)?;
                }
                for a in s.additions.iter_mut() {
                    match a {
                        ExtensionAddition::Field(f) => self.resolve_spec(&mut f.type_spec)?,
                        ExtensionAddition::Group { fields, .. } => {
                            for f in fields.iter_mut() {
                                self.resolve_spec(&mut f.type_spec)?;
                            }
                        }
                    }
                }
                Ok(())
            }
            TypeSpec::Choice(c) => {
                if c.root.is_empty() {
                    return Err("CHOICE without root alternatives".to_string());
                }
                Self::unique(
                    c.root.iter().chain(c.additions.iter()).map(|a| a.name.as_str()),
                    "alternative",
                )?;
                for a in c.root.iter_mut().chain(c.additions.iter_mut()) {
                    self.resolve_spec(&mut a.type_spec)?;
                }
                Ok(())
            }
            TypeSpec::TypeRef(name) => {
                if self.types.contains_key(name.as_str()) {
                    Ok(())
                } else {
                    Err(format!("Unknown type reference: {}", name))
                }
            }
        }
    }

    /// Number the items (X.680 §20) and order the root by item value.
    fn enumerated(&self, e: &mut EnumeratedType) -> Result<(), String> {
        if e.root.is_empty() {
            return Err("ENUMERATED without root items".to_string());
        }
        Self::unique(
            e.root.iter().chain(e.additions.iter()).map(|i| i.name.as_str()),
            "enumeration item",
        )?;
        let mut used: HashSet<i128> = e.root.iter().filter_map(|i| i.number).collect();
        let mut next = 0i128;
        for item in e.root.iter_mut().filter(|i| i.number.is_none()) {
            while used.contains(&next) {
                next += 1;
            }
            item.number = Some(next);
            used.insert(next);
        }
        Self::unique_numbers(&e.root)?;
        e.root.sort_by_key(|i| i.number);

        let mut next = e.root.iter().filter_map(|i| i.number).max().map_or(0, |m| m + 1);
        for item in e.additions.iter_mut() {
            match item.number {
                Some(n) if n < next => {
                    return Err(format!("Extension item {} must be numbered above {}", item.name, next - 1))
                }
                Some(n) => next = n + 1,
                None => {
                    item.number = Some(next);
                    next += 1;
                }
            }
        }
        Ok(())
    }

    fn unique_numbers(items: &[EnumItem]) -> Result<(), String> {
        let mut seen = HashSet::new();
        for item in items {
            if let Some(n) = item.number {
                if !seen.insert(n) {
                    return Err(format!("Duplicate enumeration value {} ({})", n, item.name));
                }
            }
        }
        Ok(())
    }
}
