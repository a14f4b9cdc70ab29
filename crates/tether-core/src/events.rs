//! Session event types.
//!
//! Two layers:
//!
//! - **[`SessionEvent`]**: the closed union of things a session can emit.
//!   Dispatch is exhaustive pattern matching — there is no string → handler
//!   map and therefore no "unknown event" at runtime.
//! - **[`BufferedEvent`]**: a `SessionEvent` stamped with its session,
//!   per-session monotonic sequence number, and timestamp. This is the unit
//!   of replay: sequences start at 0, never reset while the session exists,
//!   and are assigned by the message buffer at insertion time.

use serde::{Deserialize, Serialize};

use crate::ids::{BackendId, SessionId};
use crate::session::ActivityState;

/// Current UTC time as an RFC 3339 string — the timestamp format used on
/// every wire and index record.
#[must_use]
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Everything a session can emit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// A chunk of backend output. PTY bytes are carried as lossy UTF-8.
    Output {
        /// Output text.
        data: String,
    },

    /// Advisory activity state changed.
    State {
        /// New state.
        state: ActivityState,
    },

    /// The backend behind this session was replaced (respawn, new
    /// conversation id). The session id is unchanged.
    BackendChanged {
        /// Replacement backend id.
        #[serde(rename = "backendId")]
        backend_id: BackendId,
    },

    /// Display title changed.
    TitleChanged {
        /// New title.
        title: String,
    },

    /// The backend process exited. Emitted exactly once per backend.
    Ended {
        /// Exit code, if the process exited normally.
        #[serde(rename = "exitCode", skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        /// Terminating signal, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        signal: Option<i32>,
    },
}

impl SessionEvent {
    /// Stable wire tag for logging and metrics labels.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Output { .. } => "output",
            Self::State { .. } => "state",
            Self::BackendChanged { .. } => "backendChanged",
            Self::TitleChanged { .. } => "titleChanged",
            Self::Ended { .. } => "ended",
        }
    }
}

/// A buffered, sequence-stamped session event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferedEvent {
    /// Session the event belongs to.
    pub session_id: SessionId,
    /// Per-session monotonic sequence, starting at 0.
    pub sequence: i64,
    /// ISO 8601 insertion time.
    pub timestamp: String,
    /// The event itself, flattened into the envelope.
    #[serde(flatten)]
    pub event: SessionEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_event_wire_shape() {
        let event = BufferedEvent {
            session_id: SessionId::from_string("sess_1"),
            sequence: 0,
            timestamp: "2026-01-01T00:00:00Z".into(),
            event: SessionEvent::Output { data: "ls\n".into() },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["sessionId"], "sess_1");
        assert_eq!(json["sequence"], 0);
        assert_eq!(json["type"], "output");
        assert_eq!(json["data"], "ls\n");
    }

    #[test]
    fn ended_event_omits_null_fields() {
        let json = serde_json::to_value(SessionEvent::Ended {
            exit_code: Some(0),
            signal: None,
        })
        .unwrap();
        assert_eq!(json["type"], "ended");
        assert_eq!(json["exitCode"], 0);
        assert!(json.get("signal").is_none());
    }

    #[test]
    fn event_round_trips() {
        let event = SessionEvent::BackendChanged {
            backend_id: BackendId::from_string("be_2"),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn event_type_tags() {
        assert_eq!(
            SessionEvent::Output { data: String::new() }.event_type(),
            "output"
        );
        assert_eq!(
            SessionEvent::State {
                state: ActivityState::Streaming
            }
            .event_type(),
            "state"
        );
        assert_eq!(
            SessionEvent::Ended {
                exit_code: None,
                signal: Some(9)
            }
            .event_type(),
            "ended"
        );
    }
}
