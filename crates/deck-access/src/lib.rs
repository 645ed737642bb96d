//! Permission filter for the Deck data kernel.
//!
//! Every read in Deck is filtered through exactly one permission schema.
//! That schema is derived per caller:
//!
//! 1. the session element resolves to its actor ([`PermissionFilter::resolve_actor`])
//! 2. the actor's `data.roles` name role elements (`role-<name>`)
//! 3. each role's `data.read` schema is templated against the actor and the
//!    results are unioned ([`merge_read_schema`])
//! 4. caller schemas are intersected with the union ([`Scope::restrict`])
//!
//! Properties outside the permission schema are never returned, rather than
//! producing an error.

pub mod error;
pub mod filter;
pub mod roles;
pub mod session;

pub use error::{AccessError, AccessResult};
pub use filter::{PermissionFilter, Scope};
pub use roles::{merge_read_schema, render_template, role_slug};
pub use session::{session_owner, OWNER_VERB};
