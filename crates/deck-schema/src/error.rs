use deck_types::ErrorKind;

/// Errors produced while parsing or compiling a schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// The schema is structurally malformed or can never be satisfied.
    #[error("invalid schema at {path}: {reason}")]
    InvalidSchema { path: String, reason: String },

    /// A `pattern` or `regexp` keyword does not compile.
    #[error("invalid regular expression {pattern:?}: {reason}")]
    InvalidRegularExpression { pattern: String, reason: String },
}

impl SchemaError {
    pub fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSchema {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSchema { .. } => ErrorKind::InvalidSchema,
            Self::InvalidRegularExpression { .. } => ErrorKind::InvalidRegularExpression,
        }
    }
}

/// Convenience alias used throughout the schema crate.
pub type SchemaResult<T> = Result<T, SchemaError>;
