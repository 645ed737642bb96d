//! Element lookup cache for the Deck data kernel.
//!
//! The storage backend consults the cache before its primary indexes and
//! refreshes it on every write, so a positive entry is never older than the
//! last confirmed write of that element.

pub mod cache;

pub use cache::{Cache, CacheLookup, CacheStats, DEFAULT_CAPACITY};
