//! Storage predicates compiled from schemas.
//!
//! A [`Predicate`] is a closed, data-only tree: field names and literals are
//! carried as values and never spliced into query text, so no caller input
//! can change the shape of the evaluation. `Display` renders field names
//! quoted and escaped for logging.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;

use crate::ast::{Format, InstanceType, Pattern};
use crate::value::json_equal;

/// Numeric comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn holds<T: PartialOrd>(&self, actual: T, bound: T) -> bool {
        match self {
            Self::Lt => actual < bound,
            Self::Le => actual <= bound,
            Self::Gt => actual > bound,
            Self::Ge => actual >= bound,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// A compiled filter evaluated against one JSON value.
///
/// Type-specific tests (`Number`, `Length`, `Matches`, ...) pass on values
/// of other types, mirroring JSON Schema keyword applicability.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Const(bool),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    ExactlyOne(Vec<Predicate>),
    Not(Box<Predicate>),
    IsType(Vec<InstanceType>),
    Equals(Value),
    InSet(Vec<Value>),
    Matches(Pattern),
    Format(Format),
    Number { op: Comparison, bound: f64 },
    Length { op: Comparison, bound: u64 },
    ItemCount { op: Comparison, bound: u64 },
    /// Applies `inner` to the named property of an object.
    Field {
        name: String,
        required: bool,
        inner: Box<Predicate>,
    },
    /// At least one array item satisfies the predicate.
    Contains(Box<Predicate>),
    /// Every array item satisfies the predicate.
    EveryItem(Box<Predicate>),
    /// Every object key outside `known` satisfies the predicate.
    ExtraKeys {
        known: BTreeSet<String>,
        inner: Box<Predicate>,
    },
}

impl Predicate {
    /// Conjunction with constant folding.
    pub fn all(predicates: Vec<Predicate>) -> Self {
        let mut kept = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            match predicate {
                Self::Const(true) => {}
                Self::Const(false) => return Self::Const(false),
                Self::All(inner) => kept.extend(inner),
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => Self::Const(true),
            1 => kept.pop().unwrap_or(Self::Const(true)),
            _ => Self::All(kept),
        }
    }

    /// Disjunction with constant folding.
    pub fn any(predicates: Vec<Predicate>) -> Self {
        let mut kept = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            match predicate {
                Self::Const(false) => {}
                Self::Const(true) => return Self::Const(true),
                Self::Any(inner) => kept.extend(inner),
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => Self::Const(false),
            1 => kept.pop().unwrap_or(Self::Const(false)),
            _ => Self::Any(kept),
        }
    }

    pub fn negate(predicate: Predicate) -> Self {
        match predicate {
            Self::Const(b) => Self::Const(!b),
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }

    pub fn field(name: impl Into<String>, required: bool, inner: Predicate) -> Self {
        Self::Field {
            name: name.into(),
            required,
            inner: Box::new(inner),
        }
    }

    pub fn evaluate(&self, value: &Value) -> bool {
        match self {
            Self::Const(b) => *b,
            Self::All(items) => items.iter().all(|p| p.evaluate(value)),
            Self::Any(items) => items.iter().any(|p| p.evaluate(value)),
            Self::ExactlyOne(items) => items.iter().filter(|p| p.evaluate(value)).count() == 1,
            Self::Not(inner) => !inner.evaluate(value),
            Self::IsType(types) => types.iter().any(|t| t.admits(value)),
            Self::Equals(expected) => json_equal(value, expected),
            Self::InSet(options) => options.iter().any(|o| json_equal(value, o)),
            Self::Matches(pattern) => value.as_str().map_or(true, |s| pattern.is_match(s)),
            Self::Format(format) => value.as_str().map_or(true, |s| format.check(s)),
            Self::Number { op, bound } => value.as_f64().map_or(true, |n| op.holds(n, *bound)),
            Self::Length { op, bound } => value
                .as_str()
                .map_or(true, |s| op.holds(s.chars().count() as u64, *bound)),
            Self::ItemCount { op, bound } => value
                .as_array()
                .map_or(true, |items| op.holds(items.len() as u64, *bound)),
            Self::Field {
                name,
                required,
                inner,
            } => match value.as_object() {
                Some(map) => match map.get(name) {
                    Some(field) => inner.evaluate(field),
                    None => !required,
                },
                None => true,
            },
            Self::Contains(inner) => value
                .as_array()
                .map_or(true, |items| items.iter().any(|item| inner.evaluate(item))),
            Self::EveryItem(inner) => value
                .as_array()
                .map_or(true, |items| items.iter().all(|item| inner.evaluate(item))),
            Self::ExtraKeys { known, inner } => value.as_object().map_or(true, |map| {
                map.iter()
                    .filter(|(key, _)| !known.contains(*key))
                    .all(|(_, v)| inner.evaluate(v))
            }),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, sep: &str, items: &[Predicate]) -> fmt::Result {
    f.write_str("(")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, " {sep} ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Self::All(items) => write_list(f, "AND", items),
            Self::Any(items) => write_list(f, "OR", items),
            Self::ExactlyOne(items) => {
                f.write_str("ONE")?;
                write_list(f, ",", items)
            }
            Self::Not(inner) => write!(f, "NOT {inner}"),
            Self::IsType(types) => {
                let names: Vec<&str> = types.iter().map(InstanceType::as_str).collect();
                write!(f, "TYPE IN [{}]", names.join(", "))
            }
            Self::Equals(v) => write!(f, "= {v}"),
            Self::InSet(values) => write!(f, "IN {}", Value::Array(values.clone())),
            Self::Matches(p) => write!(f, "~ {:?}", p.source()),
            Self::Format(format) => write!(f, "FORMAT {:?}", format.as_str()),
            Self::Number { op, bound } => write!(f, "{} {bound}", op.symbol()),
            Self::Length { op, bound } => write!(f, "LENGTH {} {bound}", op.symbol()),
            Self::ItemCount { op, bound } => write!(f, "COUNT {} {bound}", op.symbol()),
            Self::Field {
                name,
                required,
                inner,
            } => {
                let marker = if *required { "!" } else { "?" };
                write!(f, "{name:?}{marker} {inner}")
            }
            Self::Contains(inner) => write!(f, "CONTAINS {inner}"),
            Self::EveryItem(inner) => write!(f, "EVERY {inner}"),
            Self::ExtraKeys { inner, .. } => write!(f, "EXTRA {inner}"),
        }
    }
}
