//! Schema -> (predicate, projection, link plan) compilation.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{Schema, SchemaNode};
use crate::error::{SchemaError, SchemaResult};
use crate::predicate::{Comparison, Predicate};
use crate::projection::{Projection, Shape};

/// Maximum nesting of `$$links` inside `$$links`.
pub const MAX_LINK_DEPTH: usize = 16;

/// How boolean `additionalProperties` is treated by the predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Queries: boolean `additionalProperties` only shapes the projection.
    Query,
    /// Type validation: `additionalProperties: false` rejects unknown keys.
    Strict,
}

/// Plan for one `$$links` verb.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkQuery {
    /// `true`: at least one related element must exist; it is returned whole.
    Attached,
    /// A subschema the related elements must match.
    Nested(Box<CompiledQuery>),
}

/// A schema compiled for execution against stored elements.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    /// Row filter, not including link requirements.
    pub predicate: Predicate,
    pub projection: Projection,
    /// Link verbs every match must satisfy (inner join).
    pub links: BTreeMap<String, LinkQuery>,
    /// When non-empty, the query matches if any alternative matches and
    /// the own predicate, projection and links are only a prefilter.
    pub alternatives: Vec<CompiledQuery>,
}

impl CompiledQuery {
    fn constant(matches: bool) -> Self {
        Self {
            predicate: Predicate::Const(matches),
            projection: Projection::Whole,
            links: BTreeMap::new(),
            alternatives: Vec::new(),
        }
    }

    /// Whether the query can never match an element.
    pub fn matches_nothing(&self) -> bool {
        self.predicate == Predicate::Const(false)
    }

    /// Whether evaluating this query needs the link graph.
    pub fn is_linked(&self) -> bool {
        !self.links.is_empty() || !self.alternatives.is_empty()
    }

    fn expand(self) -> Vec<CompiledQuery> {
        if self.alternatives.is_empty() {
            vec![self]
        } else {
            self.alternatives
        }
    }

    fn from_alternatives(members: Vec<CompiledQuery>) -> Self {
        let mut alternatives: Vec<CompiledQuery> = members
            .into_iter()
            .flat_map(CompiledQuery::expand)
            .filter(|q| !q.matches_nothing())
            .collect();
        match alternatives.len() {
            0 => Self::constant(false),
            1 => alternatives.remove(0),
            _ => Self {
                predicate: Predicate::any(
                    alternatives.iter().map(|q| q.predicate.clone()).collect(),
                ),
                projection: Projection::Whole,
                links: BTreeMap::new(),
                alternatives,
            },
        }
    }
}

/// Compile a query schema.
pub fn compile(schema: &Schema) -> SchemaResult<CompiledQuery> {
    let query = compile_at(schema, 0)?;
    tracing::trace!(
        predicate = %query.predicate,
        links = query.links.len(),
        alternatives = query.alternatives.len(),
        "compiled query"
    );
    Ok(query)
}

/// Whether `value` satisfies `schema` under type-validation rules.
pub fn validate(schema: &Schema, value: &serde_json::Value) -> bool {
    schema_predicate(schema, Mode::Strict).evaluate(value)
}

fn compile_at(schema: &Schema, depth: usize) -> SchemaResult<CompiledQuery> {
    let node = match schema {
        Schema::Bool(b) => return Ok(CompiledQuery::constant(*b)),
        Schema::Node(node) => node,
    };

    if !node.any_of.is_empty() {
        let members = node
            .any_of
            .iter()
            .map(|member| compile_at(member, depth))
            .collect::<SchemaResult<Vec<_>>>()?;
        if members.iter().any(CompiledQuery::is_linked) {
            let mut rest = (**node).clone();
            rest.any_of.clear();
            let base = compile_at(&Schema::node(rest), depth)?;
            return Ok(conjoin(base, CompiledQuery::from_alternatives(members)));
        }
    }

    let mut query = CompiledQuery {
        predicate: schema_predicate(schema, Mode::Query),
        projection: schema_projection(schema),
        links: compile_links(&node.links, depth)?,
        alternatives: Vec::new(),
    };
    for member in &node.all_of {
        let member = compile_at(member, depth)?;
        if member.is_linked() {
            query = conjoin(query, member);
        }
    }
    Ok(query)
}

fn compile_links(
    links: &BTreeMap<String, Schema>,
    depth: usize,
) -> SchemaResult<BTreeMap<String, LinkQuery>> {
    if !links.is_empty() && depth >= MAX_LINK_DEPTH {
        return Err(SchemaError::invalid(
            "#/$$links",
            format!("links nest deeper than {MAX_LINK_DEPTH} levels"),
        ));
    }
    let mut plans = BTreeMap::new();
    for (verb, schema) in links {
        let plan = match schema {
            Schema::Bool(true) => LinkQuery::Attached,
            Schema::Bool(false) => {
                return Err(SchemaError::invalid(
                    format!("#/$$links/{verb}"),
                    "a link requirement cannot be `false`",
                ))
            }
            Schema::Node(_) => LinkQuery::Nested(Box::new(compile_at(schema, depth + 1)?)),
        };
        plans.insert(verb.clone(), plan);
    }
    Ok(plans)
}

/// Conjunction of two compiled queries. A `Whole` projection on one side
/// defers to the other side's shape.
fn conjoin(a: CompiledQuery, b: CompiledQuery) -> CompiledQuery {
    if !a.alternatives.is_empty() || !b.alternatives.is_empty() {
        let left = a.expand();
        let right = b.expand();
        let mut product = Vec::with_capacity(left.len() * right.len());
        for l in &left {
            for r in &right {
                product.push(conjoin(l.clone(), r.clone()));
            }
        }
        return CompiledQuery::from_alternatives(product);
    }
    CompiledQuery {
        predicate: Predicate::all(vec![a.predicate, b.predicate]),
        projection: overlay(a.projection, b.projection),
        links: merge_links(a.links, b.links),
        alternatives: Vec::new(),
    }
}

fn overlay(a: Projection, b: Projection) -> Projection {
    match (a, b) {
        (Projection::Whole, other) | (other, Projection::Whole) => other,
        (a, b) => a.merge(b),
    }
}

fn merge_links(
    mut a: BTreeMap<String, LinkQuery>,
    b: BTreeMap<String, LinkQuery>,
) -> BTreeMap<String, LinkQuery> {
    for (verb, plan) in b {
        let merged = match a.remove(&verb) {
            None | Some(LinkQuery::Attached) => plan,
            Some(LinkQuery::Nested(existing)) => match plan {
                LinkQuery::Attached => LinkQuery::Nested(existing),
                LinkQuery::Nested(other) => LinkQuery::Nested(Box::new(conjoin(*existing, *other))),
            },
        };
        a.insert(verb, merged);
    }
    a
}

/// Compile the row filter of a schema. Link requirements are not part of
/// the predicate; they are evaluated against the link graph.
pub fn schema_predicate(schema: &Schema, mode: Mode) -> Predicate {
    match schema {
        Schema::Bool(b) => Predicate::Const(*b),
        Schema::Node(node) => node_predicate(node, mode),
    }
}

fn node_predicate(node: &SchemaNode, mode: Mode) -> Predicate {
    let mut parts = Vec::new();

    if !node.types.is_empty() {
        parts.push(Predicate::IsType(node.types.clone()));
    }
    if let Some(value) = &node.const_value {
        parts.push(Predicate::Equals(value.clone()));
    }
    if let Some(values) = &node.enum_values {
        parts.push(Predicate::InSet(values.clone()));
    }
    parts.extend(node.patterns.iter().cloned().map(Predicate::Matches));
    if let Some(format) = &node.format {
        parts.push(Predicate::Format(format.clone()));
    }

    let bounds = [
        (node.minimum, Comparison::Ge),
        (node.maximum, Comparison::Le),
        (node.exclusive_minimum, Comparison::Gt),
        (node.exclusive_maximum, Comparison::Lt),
    ];
    for (bound, op) in bounds {
        if let Some(bound) = bound {
            parts.push(Predicate::Number { op, bound });
        }
    }
    for (bound, op) in [(node.min_length, Comparison::Ge), (node.max_length, Comparison::Le)] {
        if let Some(bound) = bound {
            parts.push(Predicate::Length { op, bound });
        }
    }
    for (bound, op) in [(node.min_items, Comparison::Ge), (node.max_items, Comparison::Le)] {
        if let Some(bound) = bound {
            parts.push(Predicate::ItemCount { op, bound });
        }
    }
    if let Some(contains) = &node.contains {
        parts.push(Predicate::Contains(Box::new(schema_predicate(contains, mode))));
    }
    if let Some(items) = &node.items {
        let inner = schema_predicate(items, mode);
        if inner != Predicate::Const(true) {
            parts.push(Predicate::EveryItem(Box::new(inner)));
        }
    }

    for (name, property) in &node.properties {
        let required = node.required.contains(name);
        let inner = schema_predicate(property, mode);
        if required || inner != Predicate::Const(true) {
            parts.push(Predicate::field(name.clone(), required, inner));
        }
    }
    for name in node.required.iter().filter(|n| !node.properties.contains_key(*n)) {
        parts.push(Predicate::field(name.clone(), true, Predicate::Const(true)));
    }

    match &node.additional_properties {
        Some(Schema::Node(extra)) => parts.push(extra_keys(node, node_predicate(extra, mode))),
        Some(Schema::Bool(false)) if mode == Mode::Strict => {
            parts.push(extra_keys(node, Predicate::Const(false)))
        }
        _ => {}
    }

    parts.extend(node.all_of.iter().map(|s| schema_predicate(s, mode)));
    parts.extend(node.constraints.iter().map(|s| schema_predicate(s, mode)));
    if !node.any_of.is_empty() {
        parts.push(Predicate::any(
            node.any_of.iter().map(|s| schema_predicate(s, mode)).collect(),
        ));
    }
    if !node.one_of.is_empty() {
        parts.push(Predicate::ExactlyOne(
            node.one_of.iter().map(|s| schema_predicate(s, mode)).collect(),
        ));
    }
    if let Some(not) = &node.not {
        parts.push(Predicate::negate(schema_predicate(not, mode)));
    }

    Predicate::all(parts)
}

fn extra_keys(node: &SchemaNode, inner: Predicate) -> Predicate {
    Predicate::ExtraKeys {
        known: node.properties.keys().cloned().collect::<BTreeSet<_>>(),
        inner: Box::new(inner),
    }
}

/// Compile the projection of a schema.
pub fn schema_projection(schema: &Schema) -> Projection {
    match schema {
        Schema::Node(node) if node.declares_shape() => Projection::Shape(node_shape(node)),
        _ => Projection::Whole,
    }
}

fn node_shape(node: &SchemaNode) -> Shape {
    let mut shape = Shape {
        properties: node
            .properties
            .iter()
            .map(|(name, property)| (name.clone(), schema_projection(property)))
            .collect(),
        additional: node.allows_additional(),
        branches: Vec::new(),
    };

    let declaring = |s: &&Schema| s.as_node().is_some_and(SchemaNode::declares_shape);
    for member in node.all_of.iter().filter(declaring) {
        if let Projection::Shape(member_shape) = schema_projection(member) {
            shape = shape.union(member_shape);
        }
    }
    for member in node.any_of.iter().chain(&node.one_of).filter(declaring) {
        shape.branches.push((
            schema_predicate(member, Mode::Query),
            schema_projection(member),
        ));
    }
    shape
}
