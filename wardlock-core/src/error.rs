//! Error types shared by the stores and the services.
//!
//! Conflicts are not errors here: a held resource or an occupied queue slot
//! comes back as an outcome value the caller is expected to handle.

/// Failures raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// The backend failed (I/O, SQL, lock poisoning, ...).
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, ref msg)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::UniqueViolation(msg.clone().unwrap_or_else(|| err.to_string()))
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Errors returned by the lock manager, collision service and queue coordinator.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Referenced lease or entry is absent, not owned by the caller, or already terminal.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// The operation is illegal from the current state.
    #[error("{kind} '{id}' is {state}; cannot {operation}")]
    InvalidState {
        kind: &'static str,
        id: String,
        state: String,
        operation: &'static str,
    },

    /// The lease TTL has passed.
    #[error("lease '{lease_id}' expired at {expired_at}")]
    Expired { lease_id: String, expired_at: u64 },

    /// The actor lacks privilege for the operation.
    #[error("actor '{actor_id}' may not {operation}")]
    Forbidden {
        actor_id: String,
        operation: &'static str,
    },

    /// Malformed input (empty ids, zero TTL, disallowed lease type, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Short machine-readable code used in audit rows and HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::InvalidState { .. } => "INVALID_STATE",
            CoreError::Expired { .. } => "EXPIRED",
            CoreError::Forbidden { .. } => "FORBIDDEN",
            CoreError::InvalidRequest(_) => "INVALID_REQUEST",
            CoreError::Storage(_) => "STORAGE",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
