use deck_schema::SchemaError;
use deck_stream::StreamError;
use deck_types::{ErrorKind, TypeError};

/// Errors produced by storage backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Neither a slug nor an id was supplied.
    #[error("element has neither a slug nor an id")]
    MissingIdentity,

    /// The element has no type.
    #[error("element {slug:?} has no type")]
    MissingType { slug: String },

    /// The slug is malformed or too long.
    #[error("invalid slug {slug:?}: {reason}")]
    InvalidSlug { slug: String, reason: String },

    /// The version string is not a semantic version.
    #[error("invalid version {0:?}")]
    InvalidVersion(String),

    /// The `slug@version` is already taken.
    #[error("element {0} already exists")]
    AlreadyExists(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Any other backend failure.
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingIdentity
            | Self::MissingType { .. }
            | Self::InvalidVersion(_)
            | Self::Database(_) => ErrorKind::DatabaseError,
            Self::InvalidSlug { .. } => ErrorKind::InvalidSlug,
            Self::AlreadyExists(_) => ErrorKind::ElementAlreadyExists,
            Self::Schema(e) => e.kind(),
            Self::Stream(e) => e.kind(),
        }
    }
}

impl From<TypeError> for StoreError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidSlug { slug, reason } => Self::InvalidSlug { slug, reason },
            TypeError::InvalidVersion(version) => Self::InvalidVersion(version),
            other => Self::Database(other.to_string()),
        }
    }
}

/// Convenience alias used throughout the store crate.
pub type StoreResult<T> = Result<T, StoreError>;
