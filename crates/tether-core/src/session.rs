//! Session records, type normalization, and the activity state machine.

use serde::{Deserialize, Serialize};

use crate::errors::SessionError;
use crate::ids::{BackendId, SessionId};

/// The two supported session kinds.
///
/// Clients may send aliases; [`SessionType::normalize`] folds them to the
/// canonical tag so the rest of the system only ever sees these two values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    /// Interactive shell process under a PTY.
    Process,
    /// Conversational agent backend.
    Agent,
}

impl SessionType {
    /// Fold client-supplied aliases onto the canonical tag.
    ///
    /// Unknown strings are an [`SessionError::UnsupportedType`] — rejected
    /// at the boundary rather than dispatched dynamically.
    pub fn normalize(raw: &str) -> Result<Self, SessionError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "process" | "shell" | "terminal" => Ok(Self::Process),
            "agent" | "assistant" | "ai" => Ok(Self::Agent),
            other => Err(SessionError::UnsupportedType(other.to_string())),
        }
    }

    /// Canonical wire tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Agent => "agent",
        }
    }
}

/// Coarse, advisory activity state of a session.
///
/// Used for UI and status polling; never blocks operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    /// Rest state.
    #[default]
    Idle,
    /// Input accepted, response pending (agent sessions).
    Processing,
    /// Output actively flowing.
    Streaming,
}

impl ActivityState {
    /// Whether `self → next` is a legal edge for the given session type.
    ///
    /// Agent sessions walk idle→processing→streaming→idle; process sessions
    /// skip `processing` and bounce idle↔streaming. Self-transitions are
    /// always allowed (state refresh).
    #[must_use]
    pub fn can_transition_to(self, next: Self, session_type: SessionType) -> bool {
        if self == next {
            return true;
        }
        match session_type {
            SessionType::Agent => matches!(
                (self, next),
                (Self::Idle, Self::Processing)
                    | (Self::Processing, Self::Streaming)
                    | (Self::Streaming, Self::Idle)
                    // A turn may end without any streamed output.
                    | (Self::Processing, Self::Idle)
            ),
            SessionType::Process => matches!(
                (self, next),
                (Self::Idle, Self::Streaming) | (Self::Streaming, Self::Idle)
            ),
        }
    }

    /// Canonical wire tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Streaming => "streaming",
        }
    }
}

/// A logical, long-lived interactive session.
///
/// Exactly one record exists per live session. The record is removed only on
/// explicit termination, never on transport disconnect. `backend_id` may be
/// replaced (respawn, new conversation id) while `id` stays stable.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Stable opaque id, assigned once at creation.
    pub id: SessionId,
    /// Session kind.
    #[serde(rename = "type")]
    pub session_type: SessionType,
    /// Current backend process/connection id.
    pub backend_id: BackendId,
    /// Workspace directory the session runs in.
    pub workspace_path: String,
    /// Display title.
    pub title: String,
    /// ISO 8601 creation time.
    pub created_at: String,
    /// Advisory activity state.
    pub activity_state: ActivityState,
    /// Whether the backend reported this session as resumed.
    pub resume_flag: bool,
    /// Type-specific metadata (opaque to the core).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Session {
    /// Deterministic default title: workspace basename plus type.
    #[must_use]
    pub fn default_title(workspace_path: &str, session_type: SessionType) -> String {
        let base = std::path::Path::new(workspace_path)
            .file_name()
            .map_or(workspace_path, |n| n.to_str().unwrap_or(workspace_path));
        format!("{base} {}", session_type.as_str())
    }
}

/// Minimal durable descriptor stored in the workspace index.
///
/// Sufficient to rebuild the session list after a restart; backend processes
/// themselves are not restored, only metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    /// Stable session id.
    pub id: SessionId,
    /// Display title.
    pub title: String,
    /// Session kind.
    #[serde(rename = "type")]
    pub session_type: SessionType,
    /// Backend id at last update.
    pub backend_id: BackendId,
}
