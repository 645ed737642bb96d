//! The schema AST shared by queries, type validation and permissions.
//!
//! Query schemas, Type schemas and role read schemas are all parsed into the
//! same [`Schema`] tree. Everything downstream (predicate compilation,
//! projection, intersection) is a pure function over this tree.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::error::{SchemaError, SchemaResult};

/// A parsed schema: either a boolean schema or a keyword node.
#[derive(Clone, Debug, PartialEq)]
pub enum Schema {
    /// `true` accepts everything, `false` accepts nothing.
    Bool(bool),
    Node(Box<SchemaNode>),
}

impl Schema {
    /// The schema that accepts every value.
    pub fn any() -> Self {
        Self::Bool(true)
    }

    /// The schema that accepts no value.
    pub fn none() -> Self {
        Self::Bool(false)
    }

    pub fn node(node: SchemaNode) -> Self {
        Self::Node(Box::new(node))
    }

    pub fn as_node(&self) -> Option<&SchemaNode> {
        match self {
            Self::Node(node) => Some(node),
            Self::Bool(_) => None,
        }
    }

    /// Whether the schema places no constraint on values at all.
    pub fn is_unconstrained(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Node(node) => node.is_unconstrained(),
        }
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Self::Bool(false))
    }
}

/// JSON instance types accepted by the `type` keyword.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceType {
    Null,
    Boolean,
    Object,
    Array,
    Number,
    Integer,
    String,
}

impl InstanceType {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "null" => Self::Null,
            "boolean" => Self::Boolean,
            "object" => Self::Object,
            "array" => Self::Array,
            "number" => Self::Number,
            "integer" => Self::Integer,
            "string" => Self::String,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::String => "string",
        }
    }

    /// Whether `value` is an instance of this type.
    pub fn admits(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Null, Value::Null)
            | (Self::Boolean, Value::Bool(_))
            | (Self::Object, Value::Object(_))
            | (Self::Array, Value::Array(_))
            | (Self::Number, Value::Number(_))
            | (Self::String, Value::String(_)) => true,
            (Self::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => false,
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled regular expression together with its source text.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    case_insensitive: bool,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str, case_insensitive: bool) -> SchemaResult<Self> {
        let regex = RegexBuilder::new(source)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| SchemaError::InvalidRegularExpression {
                pattern: source.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            source: source.to_string(),
            case_insensitive,
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.case_insensitive == other.case_insensitive
    }
}

/// String formats understood by the `format` keyword.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Format {
    DateTime,
    Date,
    Email,
    Uuid,
    Uri,
    Slug,
    /// Unknown formats are accepted without checking.
    Other(String),
}

impl Format {
    pub fn parse(name: &str) -> Self {
        match name {
            "date-time" => Self::DateTime,
            "date" => Self::Date,
            "email" => Self::Email,
            "uuid" => Self::Uuid,
            "uri" => Self::Uri,
            "slug" => Self::Slug,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::DateTime => "date-time",
            Self::Date => "date",
            Self::Email => "email",
            Self::Uuid => "uuid",
            Self::Uri => "uri",
            Self::Slug => "slug",
            Self::Other(name) => name,
        }
    }

    pub fn check(&self, text: &str) -> bool {
        match self {
            Self::DateTime => chrono::DateTime::parse_from_rfc3339(text).is_ok(),
            Self::Date => chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok(),
            Self::Email => match text.split_once('@') {
                Some((local, domain)) => {
                    !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
                }
                None => false,
            },
            Self::Uuid => uuid::Uuid::parse_str(text).is_ok(),
            Self::Uri => text
                .split_once(':')
                .is_some_and(|(scheme, rest)| {
                    !scheme.is_empty()
                        && !rest.is_empty()
                        && scheme
                            .chars()
                            .all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c))
                }),
            Self::Slug => {
                deck_types::validate_slug(text, deck_types::DEFAULT_MAX_SLUG_LENGTH).is_ok()
            }
            Self::Other(_) => true,
        }
    }
}

/// Keyword node of a schema. Absent keywords are `None` or empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchemaNode {
    pub id: Option<String>,
    pub types: Vec<InstanceType>,
    pub properties: BTreeMap<String, Schema>,
    pub required: BTreeSet<String>,
    /// `None` when omitted. Next to declared properties, omission and
    /// `false` project identically.
    pub additional_properties: Option<Schema>,
    pub const_value: Option<Value>,
    pub enum_values: Option<Vec<Value>>,
    pub patterns: Vec<Pattern>,
    pub format: Option<Format>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: Option<f64>,
    pub exclusive_maximum: Option<f64>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub min_items: Option<u64>,
    pub max_items: Option<u64>,
    pub contains: Option<Schema>,
    pub items: Option<Schema>,
    pub all_of: Vec<Schema>,
    pub any_of: Vec<Schema>,
    pub one_of: Vec<Schema>,
    pub not: Option<Schema>,
    /// `$$links`: verb -> schema of the related elements.
    pub links: BTreeMap<String, Schema>,
    /// Filter-only subschemas. They constrain matches like `allOf` but
    /// never contribute to the projection. Produced by intersection.
    pub constraints: Vec<Schema>,
}

impl SchemaNode {
    /// Whether the node carries no constraining keyword.
    pub fn is_unconstrained(&self) -> bool {
        let mut bare = self.clone();
        bare.id = None;
        bare.additional_properties = None;
        bare.properties.retain(|_, s| !s.is_unconstrained());
        bare.all_of.retain(|s| !s.is_unconstrained());
        bare.constraints.retain(|s| !s.is_unconstrained());
        bare == SchemaNode::default()
    }

    /// A node whose only keyword is `anyOf`.
    pub fn is_pure_any_of(&self) -> bool {
        if self.any_of.is_empty() {
            return false;
        }
        let mut rest = self.clone();
        rest.any_of.clear();
        rest.id = None;
        rest == SchemaNode::default()
    }

    /// Whether the node (or any combinator member) declares which
    /// properties to return. Nodes that declare nothing project whole.
    pub fn declares_shape(&self) -> bool {
        !self.properties.is_empty()
            || self.additional_properties.is_some()
            || self
                .all_of
                .iter()
                .chain(&self.any_of)
                .chain(&self.one_of)
                .filter_map(Schema::as_node)
                .any(SchemaNode::declares_shape)
    }

    /// Whether `additionalProperties` lets undeclared keys through.
    pub fn allows_additional(&self) -> bool {
        matches!(
            self.additional_properties,
            Some(Schema::Bool(true)) | Some(Schema::Node(_))
        )
    }
}
