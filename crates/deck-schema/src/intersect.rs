//! Schema intersection and union.
//!
//! Permissions are enforced by intersecting the caller's query schema with
//! the permission schema. The result filters by both sides, and its
//! projection exposes a property only when both sides would return it.
//! [`restrict`] also carries the permission into every `$$links`
//! subschema, so related elements pass the same filter as the rows that
//! reach them.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{Schema, SchemaNode};
use crate::compile::MAX_LINK_DEPTH;

/// The schema matching values accepted by both `a` and `b`, returning only
/// properties visible through both.
pub fn intersect(a: &Schema, b: &Schema) -> Schema {
    match (a, b) {
        (Schema::Bool(false), _) | (_, Schema::Bool(false)) => Schema::none(),
        (Schema::Bool(true), other) | (other, Schema::Bool(true)) => other.clone(),
        (Schema::Node(x), Schema::Node(y)) => {
            if x.is_pure_any_of() {
                return union(x.any_of.iter().map(|member| intersect(member, b)).collect());
            }
            if y.is_pure_any_of() {
                return union(y.any_of.iter().map(|member| intersect(a, member)).collect());
            }
            Schema::node(merge_nodes(&flatten(x), &flatten(y)))
        }
    }
}

/// Narrow a caller schema to what `permission` may read, at every level.
///
/// The caller schema is intersected with the permission, and so is each
/// `$$links` subschema, recursively. A bare `$$links: {verb: true}` becomes
/// the permission itself, so linked elements are filtered and projected
/// like any other read.
pub fn restrict(query: &Schema, permission: &Schema) -> Schema {
    restrict_at(query, permission, contains_links(permission), 0)
}

fn restrict_at(query: &Schema, permission: &Schema, self_linking: bool, depth: usize) -> Schema {
    let mut merged = intersect(query, permission);
    restrict_links(&mut merged, permission, self_linking, depth);
    merged
}

fn restrict_links(schema: &mut Schema, permission: &Schema, self_linking: bool, depth: usize) {
    let Schema::Node(node) = schema else {
        return;
    };
    for linked in node.links.values_mut() {
        // A permission with its own `$$links` would nest forever.
        *linked = if self_linking && depth + 1 >= MAX_LINK_DEPTH {
            unreadable()
        } else {
            restrict_at(linked, permission, self_linking, depth + 1)
        };
    }
    for member in node.any_of.iter_mut().chain(node.all_of.iter_mut()) {
        restrict_links(member, permission, self_linking, depth);
    }
}

/// A link requirement no element satisfies.
fn unreadable() -> Schema {
    Schema::node(SchemaNode {
        not: Some(Schema::any()),
        ..Default::default()
    })
}

fn contains_links(schema: &Schema) -> bool {
    schema.as_node().is_some_and(|node| {
        !node.links.is_empty()
            || node
                .any_of
                .iter()
                .chain(&node.all_of)
                .chain(&node.one_of)
                .chain(&node.constraints)
                .any(contains_links)
    })
}

/// Disjunction of `schemas`, flattening nested pure `anyOf` nodes.
pub fn union(schemas: Vec<Schema>) -> Schema {
    let mut members = Vec::new();
    for schema in schemas {
        match schema {
            Schema::Bool(true) => return Schema::any(),
            Schema::Bool(false) => {}
            Schema::Node(node) if node.is_pure_any_of() => members.extend(node.any_of),
            other => members.push(other),
        }
    }
    match members.len() {
        0 => Schema::none(),
        1 => members.remove(0),
        _ => Schema::node(SchemaNode {
            any_of: members,
            ..Default::default()
        }),
    }
}

/// Fold `allOf` members that only declare properties into the node itself,
/// so their properties take part in projection matching.
fn flatten(node: &SchemaNode) -> SchemaNode {
    let mut flat = node.clone();
    flat.all_of.clear();
    for member in &node.all_of {
        let foldable = member.as_node().filter(|m| {
            let mut rest = (*m).clone();
            rest.properties.clear();
            rest.required.clear();
            rest == SchemaNode::default()
                && m.properties.keys().all(|k| !flat.properties.contains_key(k))
        });
        match foldable {
            Some(m) => {
                flat.properties.extend(m.properties.clone());
                flat.required.extend(m.required.iter().cloned());
            }
            None => flat.all_of.push(member.clone()),
        }
    }
    flat
}

/// Whether the node returns every property of a matching object.
fn exposes_everything(node: &SchemaNode) -> bool {
    !node.declares_shape() || node.allows_additional()
}

/// The subschema through which `key` is returned, if it is returned at all.
fn visible<'a>(node: &'a SchemaNode, key: &str) -> Option<Visibility<'a>> {
    if let Some(schema) = node.properties.get(key) {
        return Some(Visibility::Declared(schema));
    }
    exposes_everything(node).then_some(Visibility::Open)
}

enum Visibility<'a> {
    Declared(&'a Schema),
    Open,
}

/// The filtering part of a node: everything except projection keywords.
/// Property constraints are carried separately.
fn filter_only(node: &SchemaNode) -> SchemaNode {
    let mut filter = node.clone();
    filter.id = None;
    filter.properties.clear();
    filter.links.clear();
    if matches!(filter.additional_properties, Some(Schema::Bool(_))) {
        filter.additional_properties = None;
    }
    filter
}

fn merge_nodes(a: &SchemaNode, b: &SchemaNode) -> SchemaNode {
    let mut merged = SchemaNode::default();

    let keys: BTreeSet<&String> = a.properties.keys().chain(b.properties.keys()).collect();
    let mut hidden = BTreeMap::new();
    for key in keys {
        match (visible(a, key), visible(b, key)) {
            (Some(left), Some(right)) => {
                let schema = match (left, right) {
                    (Visibility::Declared(l), Visibility::Declared(r)) => intersect(l, r),
                    (Visibility::Declared(s), Visibility::Open)
                    | (Visibility::Open, Visibility::Declared(s)) => s.clone(),
                    (Visibility::Open, Visibility::Open) => Schema::any(),
                };
                merged.properties.insert(key.clone(), schema);
            }
            _ => {
                // Filter on the property without returning it.
                for side in [a, b] {
                    if let Some(schema) = side.properties.get(key) {
                        if !schema.is_unconstrained() {
                            hidden.insert(key.clone(), schema.clone());
                        }
                    }
                }
            }
        }
    }

    merged.required = a.required.union(&b.required).cloned().collect();

    merged.additional_properties = if exposes_everything(a) && exposes_everything(b) {
        let explicit = |n: &SchemaNode| matches!(n.additional_properties, Some(Schema::Bool(true)));
        (explicit(a) || explicit(b)).then(Schema::any)
    } else {
        Some(Schema::none())
    };

    for side in [a, b] {
        let filter = filter_only(side);
        if !filter.is_unconstrained() {
            merged.constraints.push(Schema::node(filter));
        }
    }
    if !hidden.is_empty() {
        merged.constraints.push(Schema::node(SchemaNode {
            properties: hidden,
            ..Default::default()
        }));
    }

    merged.links = a.links.clone();
    for (verb, schema) in &b.links {
        let combined = match merged.links.get(verb) {
            Some(existing) => intersect(existing, schema),
            None => schema.clone(),
        };
        merged.links.insert(verb.clone(), combined);
    }

    merged
}
