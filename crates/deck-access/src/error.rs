use chrono::{DateTime, Utc};
use deck_schema::SchemaError;
use deck_store::StoreError;
use deck_types::{ElementId, ErrorKind};

/// Errors produced while deriving a caller's permissions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    /// The session does not exist or has no resolvable owner.
    #[error("invalid session {session}: {reason}")]
    InvalidSession { session: ElementId, reason: String },

    #[error("session {session} expired at {expired_at}")]
    SessionExpired {
        session: ElementId,
        expired_at: DateTime<Utc>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl AccessError {
    pub fn invalid_session(session: ElementId, reason: impl Into<String>) -> Self {
        Self::InvalidSession {
            session,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSession { .. } => ErrorKind::InvalidSession,
            Self::SessionExpired { .. } => ErrorKind::SessionExpired,
            Self::Store(e) => e.kind(),
            Self::Schema(e) => e.kind(),
        }
    }
}

/// Convenience alias used throughout the access crate.
pub type AccessResult<T> = Result<T, AccessError>;
