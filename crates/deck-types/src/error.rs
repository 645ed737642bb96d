use std::fmt;

use thiserror::Error;

/// Distinguishable error kinds surfaced to callers of the kernel.
///
/// Every crate-specific error maps onto exactly one kind so the transport
/// layer can report failures without matching on crate internals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed write (missing primary key or type) or backend failure.
    DatabaseError,
    /// Slug format or length is invalid.
    InvalidSlug,
    /// The slug or id is already taken.
    ElementAlreadyExists,
    /// A session or referenced target is missing or inaccessible.
    NoElement,
    /// The session does not exist or has no resolvable owner.
    InvalidSession,
    /// The session expiration lies in the past.
    SessionExpired,
    /// The element references a type that does not exist.
    UnknownCardType,
    /// Type validation or permission check failed.
    SchemaMismatch,
    /// A patch operation is structurally invalid.
    InvalidPatch,
    /// A query schema is malformed.
    InvalidSchema,
    /// A `pattern` or `regexp` keyword does not compile.
    InvalidRegularExpression,
}

impl ErrorKind {
    /// Stable name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DatabaseError => "DatabaseError",
            Self::InvalidSlug => "InvalidSlug",
            Self::ElementAlreadyExists => "ElementAlreadyExists",
            Self::NoElement => "NoElement",
            Self::InvalidSession => "InvalidSession",
            Self::SessionExpired => "SessionExpired",
            Self::UnknownCardType => "UnknownCardType",
            Self::SchemaMismatch => "SchemaMismatch",
            Self::InvalidPatch => "InvalidPatch",
            Self::InvalidSchema => "InvalidSchema",
            Self::InvalidRegularExpression => "InvalidRegularExpression",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by type-level parsing and validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid slug {slug:?}: {reason}")]
    InvalidSlug { slug: String, reason: String },

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("invalid card reference: {0}")]
    InvalidReference(String),

    #[error("invalid element id: {0}")]
    InvalidId(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TypeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSlug { .. } | Self::InvalidReference(_) => ErrorKind::InvalidSlug,
            Self::InvalidVersion(_) | Self::InvalidId(_) | Self::Serialization(_) => {
                ErrorKind::DatabaseError
            }
        }
    }
}
