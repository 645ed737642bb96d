//! Schema query translator for the Deck data kernel.
//!
//! Query schemas, Type schemas and role read schemas share one AST. This
//! crate turns that AST into executable pieces:
//!
//! - [`Schema::parse`] validates and parses the JSON form
//! - [`compile`] produces a [`CompiledQuery`]: a [`Predicate`] row filter,
//!   a [`Projection`] describing which properties to return, and the
//!   `$$links` plan for the link resolver
//! - [`validate`] checks an element against a Type schema
//! - [`intersect`] and [`union`] combine query and permission schemas
//!
//! # Example
//!
//! ```rust
//! use deck_schema::{compile, Schema};
//! use serde_json::json;
//!
//! let schema = Schema::parse(&json!({
//!     "type": "object",
//!     "properties": { "slug": { "type": "string", "pattern": "^user" } },
//!     "required": ["slug"]
//! }))
//! .unwrap();
//! let query = compile(&schema).unwrap();
//!
//! let element = json!({ "slug": "user-jane", "data": { "email": "j@example.com" } });
//! assert!(query.predicate.evaluate(&element));
//! assert_eq!(query.projection.apply(&element), json!({ "slug": "user-jane" }));
//! ```

pub mod ast;
pub mod compile;
pub mod error;
pub mod intersect;
pub mod parse;
pub mod predicate;
pub mod projection;
pub mod value;

pub use ast::{Format, InstanceType, Pattern, Schema, SchemaNode};
pub use compile::{
    compile, schema_predicate, schema_projection, validate, CompiledQuery, LinkQuery, Mode,
    MAX_LINK_DEPTH,
};
pub use error::{SchemaError, SchemaResult};
pub use intersect::{intersect, restrict, union};
pub use parse::MAX_SCHEMA_DEPTH;
pub use predicate::{Comparison, Predicate};
pub use projection::{Projection, Shape};
pub use value::{compare_values, get_path, json_equal, merge_into};
