//! The Deck data kernel.
//!
//! [`Kernel`] is the facade over the storage backend, the permission filter
//! and the change stream engine. Cards are addressed as `slug@version`
//! (or `slug@latest`), validated against the schema of their type card on
//! every write, and filtered through the caller's read schema on every read.
//!
//! # Quick Start
//!
//! ```rust
//! use deck_kernel::{Kernel, KernelConfig};
//! use deck_types::ElementDraft;
//! use serde_json::json;
//!
//! # tokio_test_block(async {
//! let kernel = Kernel::in_memory(KernelConfig::default());
//! kernel.bootstrap().await.unwrap();
//!
//! let system = kernel.system();
//! let card = kernel
//!     .insert_card(&system, ElementDraft::new("card-a", "card@1.0.0").with_data(json!({ "v": 1 })))
//!     .await
//!     .unwrap();
//! assert_eq!(card["slug"], "card-a");
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

pub mod bootstrap;
pub mod caller;
pub mod config;
pub mod error;
pub mod kernel;
pub mod patch;

pub use bootstrap::{bootstrap_types, BOOTSTRAP_TYPES};
pub use caller::{Caller, SystemToken};
pub use config::KernelConfig;
pub use error::{KernelError, KernelResult};
pub use kernel::Kernel;
pub use patch::{apply_patch, parse_patch, parse_pointer, PatchOperation, PROTECTED_FIELDS};

// Re-exports for embedders.
pub use deck_links::{LinkOptions, QueryOptions, SortDirection};
pub use deck_stream::{ChangeEvent, Subscription, SubscriptionHandle};
pub use deck_types::{ChangeKind, Element, ElementDraft, ElementId, ErrorKind};
