use deck_schema::SchemaError;
use deck_types::ErrorKind;

/// Errors produced by the change stream engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The subscription schema does not compile.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The subscriber fell behind and events were dropped. The subscription
    /// is closed afterwards.
    #[error("subscriber lagged behind the change feed and was closed")]
    Lagged,
}

impl StreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema(e) => e.kind(),
            Self::Lagged => ErrorKind::DatabaseError,
        }
    }
}

/// Convenience alias used throughout the stream crate.
pub type StreamResult<T> = Result<T, StreamError>;
