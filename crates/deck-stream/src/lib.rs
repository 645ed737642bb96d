//! Change stream engine for the Deck data kernel.
//!
//! The storage backend publishes every row change on one broadcast channel.
//! [`ChangeStreamEngine`] holds the single receiver of that channel and fans
//! each change out to registered [`Subscription`]s, evaluating the prior and
//! new row against each subscriber's compiled schema:
//!
//! - the new row does not match: no event
//! - the prior row is absent or did not match: `insert` with `before: null`
//! - both match and their projections differ: `update`
//! - both match with identical projections: no event

pub mod engine;
pub mod error;
pub mod event;
pub mod subscription;

pub use engine::{ChangeStreamEngine, StreamConfig};
pub use error::{StreamError, StreamResult};
pub use event::ChangeEvent;
pub use subscription::{Subscription, SubscriptionHandle};
