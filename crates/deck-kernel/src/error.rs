use deck_access::AccessError;
use deck_schema::SchemaError;
use deck_store::StoreError;
use deck_stream::StreamError;
use deck_types::{ErrorKind, TypeError};

/// Errors surfaced by the kernel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// The referenced type card does not exist.
    #[error("unknown card type {0}")]
    UnknownCardType(String),

    /// Type validation or a permission check failed.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A patch operation is structurally invalid.
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    /// A referenced element is missing or not visible to the caller.
    #[error("no element {0}")]
    NoElement(String),

    /// The advisory lock on a card could not be taken in time.
    #[error("card {0} is locked")]
    Locked(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Access(#[from] AccessError),
}

impl KernelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownCardType(_) => ErrorKind::UnknownCardType,
            Self::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            Self::InvalidPatch(_) => ErrorKind::InvalidPatch,
            Self::NoElement(_) => ErrorKind::NoElement,
            Self::Locked(_) | Self::Config(_) => ErrorKind::DatabaseError,
            Self::Type(e) => e.kind(),
            Self::Schema(e) => e.kind(),
            Self::Store(e) => e.kind(),
            Self::Stream(e) => e.kind(),
            Self::Access(e) => e.kind(),
        }
    }
}

/// Convenience alias used throughout the kernel crate.
pub type KernelResult<T> = Result<T, KernelError>;
