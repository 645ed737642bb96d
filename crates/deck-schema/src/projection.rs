//! Result projections compiled from schemas.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::predicate::Predicate;
use crate::value::merge_into;

/// Describes which parts of a value a query returns.
#[derive(Clone, Debug, PartialEq)]
pub enum Projection {
    /// Return the value unchanged.
    Whole,
    Shape(Shape),
}

/// Object projection: declared properties plus row-dependent branches.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Shape {
    pub properties: BTreeMap<String, Projection>,
    /// Copy undeclared keys verbatim.
    pub additional: bool,
    /// `anyOf`/`oneOf` alternatives: a branch contributes its projection
    /// only when its predicate matches the value being projected.
    pub branches: Vec<(Predicate, Projection)>,
}

impl Projection {
    /// A projection that returns an empty object.
    pub fn empty() -> Self {
        Self::Shape(Shape::default())
    }

    pub fn apply(&self, value: &Value) -> Value {
        match self {
            Self::Whole => value.clone(),
            Self::Shape(shape) => shape.apply(value),
        }
    }

    /// Union of two projections over the same value.
    pub fn merge(self, other: Projection) -> Projection {
        match (self, other) {
            (Self::Whole, _) | (_, Self::Whole) => Self::Whole,
            (Self::Shape(a), Self::Shape(b)) => Self::Shape(a.union(b)),
        }
    }
}

impl Shape {
    pub fn union(mut self, other: Shape) -> Shape {
        for (key, projection) in other.properties {
            let merged = match self.properties.remove(&key) {
                Some(existing) => existing.merge(projection),
                None => projection,
            };
            self.properties.insert(key, merged);
        }
        self.additional |= other.additional;
        self.branches.extend(other.branches);
        self
    }

    fn apply(&self, value: &Value) -> Value {
        let Some(map) = value.as_object() else {
            return value.clone();
        };
        let mut out = if self.additional {
            map.clone()
        } else {
            Map::new()
        };
        for (key, projection) in &self.properties {
            if let Some(field) = map.get(key) {
                out.insert(key.clone(), projection.apply(field));
            }
        }
        let mut out = Value::Object(out);
        for (predicate, projection) in &self.branches {
            if predicate.evaluate(value) {
                merge_into(&mut out, projection.apply(value));
            }
        }
        out
    }
}
