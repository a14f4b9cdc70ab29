//! Error taxonomy for session operations.

use thiserror::Error;

/// Convenience result alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by the registry, supervisor, and attach protocol.
///
/// `Spawn` is fatal to the create call that triggered it (no session record
/// is left behind). `SessionNotFound` is benign and logged. `Delivery` is
/// recovered silently — the event stays buffered for replay.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Backend failed to start (missing executable, bad working directory).
    #[error("failed to spawn backend: {0}")]
    Spawn(String),

    /// The requested session type is not one of the supported kinds.
    #[error("unsupported session type: {0:?}")]
    UnsupportedType(String),

    /// No session exists with the given id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Caller is not authenticated for this operation.
    #[error("not authenticated")]
    Authentication,

    /// Live push failed because the transport is gone. Recoverable.
    #[error("live delivery failed: {0}")]
    Delivery(String),

    /// Working directory rejected by the workspace gate.
    #[error("workspace path rejected: {0}")]
    WorkspaceRejected(String),

    /// Workspace index (SQLite) failure.
    #[error("workspace index error: {0}")]
    Index(String),

    /// Underlying I/O failure talking to a backend.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Invariant violation or poisoned internal state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Stable machine-readable code for the wire protocol.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "SPAWN_ERROR",
            Self::UnsupportedType(_) => "UNSUPPORTED_TYPE",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::Authentication => "AUTHENTICATION_ERROR",
            Self::Delivery(_) => "DELIVERY_FAILURE",
            Self::WorkspaceRejected(_) => "WORKSPACE_REJECTED",
            Self::Index(_) => "INDEX_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
