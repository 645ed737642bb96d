//! Storage backend for the Deck data kernel.
//!
//! [`Backend`] is the persistence contract the kernel is written against:
//! element writes and lookups, schema queries, change streams and advisory
//! locks. [`InMemoryBackend`] implements it over in-process indexes and is
//! used for tests, embedding and the `deck` CLI.
//!
//! Every write is published as a [`deck_types::RowChange`] on one broadcast
//! channel, which the [`deck_stream::ChangeStreamEngine`] fans out.

pub mod config;
pub mod error;
pub mod lock;
pub mod memory;
pub mod traits;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use lock::LockTable;
pub use memory::InMemoryBackend;
pub use traits::Backend;
