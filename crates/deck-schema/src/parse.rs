//! JSON -> [`Schema`] parsing.
//!
//! Parsing validates structure eagerly so that every later stage can assume
//! a well-formed tree: malformed keywords fail with `InvalidSchema`, bad
//! regular expressions with `InvalidRegularExpression`.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::ast::{Format, InstanceType, Pattern, Schema, SchemaNode};
use crate::error::{SchemaError, SchemaResult};
use crate::value::json_equal;

/// Maximum nesting depth accepted by the parser.
pub const MAX_SCHEMA_DEPTH: usize = 512;

impl Schema {
    /// Parse a schema from its JSON form.
    pub fn parse(value: &Value) -> SchemaResult<Self> {
        parse_schema(value, "#", 0)
    }
}

impl TryFrom<&Value> for Schema {
    type Error = SchemaError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

fn parse_schema(value: &Value, path: &str, depth: usize) -> SchemaResult<Schema> {
    if depth > MAX_SCHEMA_DEPTH {
        return Err(SchemaError::invalid(
            path,
            format!("nesting exceeds {MAX_SCHEMA_DEPTH} levels"),
        ));
    }
    match value {
        Value::Bool(b) => Ok(Schema::Bool(*b)),
        Value::Object(map) => parse_node(map, path, depth).map(Schema::node),
        _ => Err(SchemaError::invalid(path, "schema must be an object or a boolean")),
    }
}

fn parse_node(map: &Map<String, Value>, path: &str, depth: usize) -> SchemaResult<SchemaNode> {
    let mut node = SchemaNode::default();
    let child = |key: &str| format!("{path}/{key}");

    for (key, value) in map {
        let key = key.as_str();
        match key {
            "$id" => node.id = value.as_str().map(str::to_string),
            "type" => node.types = parse_types(value, &child(key))?,
            "properties" => {
                let props = value
                    .as_object()
                    .ok_or_else(|| SchemaError::invalid(child(key), "must be an object"))?;
                node.properties = parse_schema_map(props, &child(key), depth)?;
            }
            "required" => node.required = parse_required(value, &child(key))?,
            "additionalProperties" => {
                node.additional_properties =
                    Some(parse_schema(value, &child(key), depth + 1)?);
            }
            "const" => node.const_value = Some(value.clone()),
            "enum" => node.enum_values = Some(parse_enum(value, &child(key))?),
            "pattern" => {
                let source = value
                    .as_str()
                    .ok_or_else(|| SchemaError::invalid(child(key), "must be a string"))?;
                node.patterns.push(Pattern::new(source, false)?);
            }
            "regexp" => node.patterns.push(parse_regexp(value, &child(key))?),
            "format" => {
                let name = value
                    .as_str()
                    .ok_or_else(|| SchemaError::invalid(child(key), "must be a string"))?;
                node.format = Some(Format::parse(name));
            }
            "minimum" => node.minimum = Some(parse_number(value, &child(key))?),
            "maximum" => node.maximum = Some(parse_number(value, &child(key))?),
            "exclusiveMinimum" => {
                node.exclusive_minimum = Some(parse_number(value, &child(key))?)
            }
            "exclusiveMaximum" => {
                node.exclusive_maximum = Some(parse_number(value, &child(key))?)
            }
            "minLength" => node.min_length = Some(parse_count(value, &child(key))?),
            "maxLength" => node.max_length = Some(parse_count(value, &child(key))?),
            "minItems" => node.min_items = Some(parse_count(value, &child(key))?),
            "maxItems" => node.max_items = Some(parse_count(value, &child(key))?),
            "contains" => node.contains = Some(parse_schema(value, &child(key), depth + 1)?),
            "items" => node.items = Some(parse_schema(value, &child(key), depth + 1)?),
            "allOf" => node.all_of = parse_schema_list(value, &child(key), depth)?,
            "anyOf" => node.any_of = parse_schema_list(value, &child(key), depth)?,
            "oneOf" => node.one_of = parse_schema_list(value, &child(key), depth)?,
            "not" => node.not = Some(parse_schema(value, &child(key), depth + 1)?),
            "$$links" => {
                let links = value
                    .as_object()
                    .ok_or_else(|| SchemaError::invalid(child(key), "must be an object"))?;
                node.links = parse_schema_map(links, &child(key), depth)?;
            }
            // Annotations and unsupported keywords are ignored.
            _ => {}
        }
    }

    check_contradictions(&node, path)?;
    Ok(node)
}

fn parse_types(value: &Value, path: &str) -> SchemaResult<Vec<InstanceType>> {
    let names: Vec<&Value> = match value {
        Value::String(_) => vec![value],
        Value::Array(items) if !items.is_empty() => items.iter().collect(),
        _ => return Err(SchemaError::invalid(path, "must be a type name or a non-empty array")),
    };
    names
        .into_iter()
        .map(|name| {
            name.as_str()
                .and_then(InstanceType::parse)
                .ok_or_else(|| SchemaError::invalid(path, format!("unknown type {name}")))
        })
        .collect()
}

fn parse_required(value: &Value, path: &str) -> SchemaResult<BTreeSet<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| SchemaError::invalid(path, "must be an array of strings"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| SchemaError::invalid(path, "must be an array of strings"))
        })
        .collect()
}

fn parse_enum(value: &Value, path: &str) -> SchemaResult<Vec<Value>> {
    let items = value
        .as_array()
        .ok_or_else(|| SchemaError::invalid(path, "must be an array"))?;
    if items.is_empty() {
        return Err(SchemaError::invalid(path, "must not be empty"));
    }
    for (i, a) in items.iter().enumerate() {
        if items[i + 1..].iter().any(|b| json_equal(a, b)) {
            return Err(SchemaError::invalid(path, format!("duplicate entry {a}")));
        }
    }
    Ok(items.clone())
}

fn parse_regexp(value: &Value, path: &str) -> SchemaResult<Pattern> {
    match value {
        Value::String(source) => Pattern::new(source, false),
        Value::Object(map) => {
            let source = map
                .get("pattern")
                .and_then(Value::as_str)
                .ok_or_else(|| SchemaError::invalid(path, "missing string `pattern`"))?;
            let flags = map.get("flags").and_then(Value::as_str).unwrap_or("");
            Pattern::new(source, flags.contains('i'))
        }
        _ => Err(SchemaError::invalid(path, "must be a string or an object")),
    }
}

fn parse_number(value: &Value, path: &str) -> SchemaResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| SchemaError::invalid(path, "must be a number"))
}

fn parse_count(value: &Value, path: &str) -> SchemaResult<u64> {
    value
        .as_u64()
        .ok_or_else(|| SchemaError::invalid(path, "must be a non-negative integer"))
}

fn parse_schema_list(value: &Value, path: &str, depth: usize) -> SchemaResult<Vec<Schema>> {
    let items = value
        .as_array()
        .ok_or_else(|| SchemaError::invalid(path, "must be an array"))?;
    if items.is_empty() {
        return Err(SchemaError::invalid(path, "must not be empty"));
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_schema(item, &format!("{path}/{i}"), depth + 1))
        .collect()
}

fn parse_schema_map(
    map: &Map<String, Value>,
    path: &str,
    depth: usize,
) -> SchemaResult<BTreeMap<String, Schema>> {
    map.iter()
        .map(|(key, value)| {
            parse_schema(value, &format!("{path}/{key}"), depth + 1).map(|s| (key.clone(), s))
        })
        .collect()
}

/// Reject nodes that can never match anything because of their own `not`.
fn check_contradictions(node: &SchemaNode, path: &str) -> SchemaResult<()> {
    let Some(not) = &node.not else {
        return Ok(());
    };
    if not.is_unconstrained() {
        return Err(SchemaError::invalid(
            format!("{path}/not"),
            "`not` excludes every value",
        ));
    }
    if let (Some(value), Some(negated)) = (&node.const_value, not.as_node()) {
        let only_const = SchemaNode {
            const_value: negated.const_value.clone(),
            ..Default::default()
        };
        if negated == &only_const
            && negated
                .const_value
                .as_ref()
                .is_some_and(|other| json_equal(value, other))
        {
            return Err(SchemaError::invalid(
                format!("{path}/not"),
                "`not` contradicts `const`",
            ));
        }
    }
    Ok(())
}
