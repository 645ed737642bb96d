//! Link graph resolution for the Deck data kernel.
//!
//! Links are ordinary elements of type `link@1.0.0`. The [`LinkIndex`]
//! keeps an adjacency list over the active ones, keyed by `(element, verb)`
//! in both directions, and [`run_query`] evaluates compiled schemas with
//! `$$links` against it using inner-join semantics.
//!
//! The graph may contain cycles (A -> B -> A). Resolution only ever follows
//! the finite nesting of the compiled query, never the graph itself.

pub mod graph;
pub mod options;
pub mod resolve;

pub use graph::{GraphSource, LinkEdge, LinkIndex};
pub use options::{LinkOptions, QueryOptions, SortDirection};
pub use resolve::{evaluate, paginate, run_query};
