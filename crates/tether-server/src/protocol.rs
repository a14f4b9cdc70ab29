//! Wire protocol types.
//!
//! Requests arrive as `{ "id"?, "method", "params" }` JSON text frames.
//! The method/params pair deserializes into [`RequestPayload`], a closed
//! union: every supported method is a variant, and anything else is a
//! deserialization error answered with `METHOD_NOT_FOUND`. There is no
//! string → handler table.
//!
//! Responses mirror the request `id` and carry either `result` or a
//! `{ code, message }` error object. Server-initiated traffic uses the
//! same `{ method, params }` shape with no `id`.

use serde::{Deserialize, Serialize};

use tether_core::errors::SessionError;
use tether_core::events::BufferedEvent;
use tether_core::ids::SessionId;
use tether_core::session::Session;

/// Raw request envelope, before the payload is narrowed.
#[derive(Debug, Deserialize)]
pub struct RequestEnvelope {
    /// Caller-chosen correlation id, echoed in the response.
    pub id: Option<serde_json::Value>,
    /// Method name.
    pub method: String,
    /// Method parameters; missing means `{}`.
    pub params: Option<serde_json::Value>,
}

impl RequestEnvelope {
    /// Narrow the envelope to a typed payload.
    pub fn payload(&self) -> Result<RequestPayload, serde_json::Error> {
        serde_json::from_value(serde_json::json!({
            "method": self.method,
            "params": self.params.clone().unwrap_or_else(|| serde_json::json!({})),
        }))
    }
}

/// Every request the server understands.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params")]
pub enum RequestPayload {
    /// Authenticate this connection.
    #[serde(rename = "auth")]
    Auth(AuthParams),
    /// Create a session.
    #[serde(rename = "session.create")]
    SessionCreate(CreateParams),
    /// List sessions, optionally per workspace.
    #[serde(rename = "session.list")]
    SessionList(ListParams),
    /// Attach to a session and replay its backlog.
    #[serde(rename = "session.attach")]
    SessionAttach(AttachParams),
    /// Stop live delivery for this connection; the session keeps running.
    #[serde(rename = "session.detach")]
    SessionDetach(DetachParams),
    /// Forward input bytes to the session.
    #[serde(rename = "session.input")]
    SessionInput(InputParams),
    /// Resize the session's terminal.
    #[serde(rename = "session.resize")]
    SessionResize(ResizeParams),
    /// Terminate a session.
    #[serde(rename = "session.terminate")]
    SessionTerminate(TerminateParams),
}

/// `auth` parameters.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthParams {
    /// Opaque credential checked by the auth gate.
    pub token: Option<String>,
}

/// `session.create` parameters.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateParams {
    /// Session type; aliases accepted.
    #[serde(rename = "type")]
    pub session_type: String,
    /// Workspace directory.
    pub workspace_path: String,
    /// Display title override.
    #[serde(default)]
    pub title: Option<String>,
    /// Backend command override.
    #[serde(default)]
    pub command: Option<String>,
    /// Initial terminal width.
    #[serde(default)]
    pub cols: Option<u16>,
    /// Initial terminal height.
    #[serde(default)]
    pub rows: Option<u16>,
}

/// `session.list` parameters.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    /// Restrict to one workspace path.
    #[serde(default)]
    pub workspace_path: Option<String>,
}

/// `session.attach` parameters.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttachParams {
    /// Session to attach to.
    pub id: SessionId,
    /// Last sequence the client has seen; `-1` (or absent) replays
    /// everything retained.
    #[serde(default = "default_after_sequence")]
    pub after_sequence: i64,
}

fn default_after_sequence() -> i64 {
    -1
}

/// `session.detach` parameters.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetachParams {
    /// Session to detach from.
    pub id: SessionId,
}

/// `session.input` parameters.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputParams {
    /// Target session.
    pub id: SessionId,
    /// Input text, forwarded as bytes.
    pub data: String,
}

/// `session.resize` parameters.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResizeParams {
    /// Target session.
    pub id: SessionId,
    /// New width.
    pub cols: u16,
    /// New height.
    pub rows: u16,
}

/// `session.terminate` parameters.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TerminateParams {
    /// Target session.
    pub id: SessionId,
}

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

/// Response envelope: `result` xor `error`, with the request id echoed.
#[derive(Debug, Serialize)]
pub struct Response {
    /// Correlation id from the request.
    pub id: Option<serde_json::Value>,
    /// Whether the call succeeded.
    pub success: bool,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error details when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

/// Machine-readable error object.
#[derive(Debug, Serialize)]
pub struct WireError {
    /// Stable error code, see [`SessionError::code`].
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl Response {
    /// Successful response.
    #[must_use]
    pub fn ok(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Failure with an explicit code.
    #[must_use]
    pub fn fail(
        id: Option<serde_json::Value>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(WireError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    /// Failure derived from a [`SessionError`].
    #[must_use]
    pub fn from_error(id: Option<serde_json::Value>, err: &SessionError) -> Self {
        Self::fail(id, err.code(), err.to_string())
    }

    /// An unparseable frame.
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::fail(None, "PARSE_ERROR", message)
    }

    /// A method that is not part of the protocol.
    #[must_use]
    pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> Self {
        Self::fail(id, "METHOD_NOT_FOUND", format!("unknown method: {method}"))
    }
}

/// `session.attach` result payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachResult {
    /// The session, post respawn if one happened.
    pub session: Session,
    /// Replayed backlog, in strict sequence order.
    pub backlog: Vec<BufferedEvent>,
    /// Highest sequence in the backlog; `-1` when the backlog is empty
    /// and the caller gave no cursor.
    pub last_sequence: i64,
    /// False when eviction or expiry removed part of the requested window.
    pub complete: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Server → client notifications
// ─────────────────────────────────────────────────────────────────────────────

/// Server-initiated messages, same `{ method, params }` shape with no id.
#[derive(Debug, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum Notification {
    /// One live session event.
    #[serde(rename = "session.event")]
    SessionEvent(BufferedEvent),
    /// Backlog replay finished; live delivery is active from here.
    #[serde(rename = "session.catchupComplete")]
    #[serde(rename_all = "camelCase")]
    CatchupComplete {
        /// Session that finished catch-up.
        session_id: SessionId,
        /// Number of events replayed.
        count: usize,
        /// Highest sequence replayed, `-1` if none.
        last_sequence: i64,
    },
    /// The session's backend exited.
    #[serde(rename = "session.ended")]
    #[serde(rename_all = "camelCase")]
    Ended {
        /// Session whose backend exited.
        session_id: SessionId,
        /// Exit code, if the process exited normally.
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        /// Terminating signal, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        signal: Option<i32>,
        /// Buffer sequence of the underlying event.
        sequence: i64,
    },
}
