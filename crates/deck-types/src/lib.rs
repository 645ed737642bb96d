//! Foundation types for the Deck data kernel.
//!
//! Every record in Deck is an [`Element`]: a generic, schema-governed card
//! identified by a server-assigned [`ElementId`] and by a human-stable
//! `slug@version` pair. Links, types, roles and sessions are all elements
//! distinguished only by their `type` reference.
//!
//! # Key Types
//!
//! - [`Element`]: the stored record, as returned by the storage backend
//! - [`ElementDraft`]: caller-supplied input for inserts and upserts
//! - [`ElementId`]: UUID v7 identifier, assigned only by the backend
//! - [`Version`]: semantic version with semver precedence ordering
//! - [`CardRef`]: parsed `slug@version` / `slug@latest` reference
//! - [`RowChange`]: a row-level change notification
//! - [`ErrorKind`]: the error taxonomy shared by every Deck crate

pub mod change;
pub mod element;
pub mod error;
pub mod reference;
pub mod version;

pub use change::{ChangeKind, RowChange};
pub use element::{Element, ElementDraft, ElementId, LinkData, LinkEndpoint};
pub use error::{ErrorKind, TypeError};
pub use reference::{validate_slug, CardRef, VersionSelector, DEFAULT_MAX_SLUG_LENGTH};
pub use version::Version;

/// Type reference of link elements.
pub const LINK_TYPE: &str = "link@1.0.0";

/// Type reference of type elements.
pub const TYPE_TYPE: &str = "type@1.0.0";

/// Version assigned to drafts that do not carry one.
pub const DEFAULT_VERSION: &str = "1.0.0";
