//! Request dispatch.
//!
//! One frame in, one response out (plus any follow-up notifications), all
//! through the connection's outbound queue so ordering is preserved: an
//! attach response always precedes its catch-up-complete marker, which
//! always precedes the first live event.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use tether_core::errors::SessionError;
use tether_core::ids::SessionId;
use tether_runtime::CreateSessionOptions;

use crate::connection::ClientConnection;
use crate::protocol::{
    AttachParams, AttachResult, AuthParams, CreateParams, DetachParams, InputParams, ListParams,
    Notification, RequestEnvelope, RequestPayload, ResizeParams, Response, TerminateParams,
};
use crate::server::AppState;

/// Parse and dispatch one inbound text frame.
pub async fn handle_frame(state: &AppState, conn: &Arc<ClientConnection>, raw: &str) {
    let envelope: RequestEnvelope = match serde_json::from_str(raw) {
        Ok(env) => env,
        Err(e) => {
            debug!(connection_id = %conn.id, error = %e, "unparseable frame");
            let _ = conn.send_json(&Response::parse_error(e.to_string()));
            return;
        }
    };
    let id = envelope.id.clone();
    let payload = match envelope.payload() {
        Ok(payload) => payload,
        Err(e) => {
            counter!("requests_rejected_total").increment(1);
            let response = if e.to_string().contains("unknown variant") {
                Response::method_not_found(id, &envelope.method)
            } else {
                Response::fail(id, "INVALID_PARAMS", e.to_string())
            };
            let _ = conn.send_json(&response);
            return;
        }
    };

    counter!("requests_total", "method" => envelope.method.clone()).increment(1);
    // `attach` writes its own frames (response before the catch-up marker);
    // everything else hands one response back.
    let response = match payload {
        RequestPayload::Auth(params) => Some(auth(state, conn, id, &params)),
        RequestPayload::SessionCreate(params) => Some(create(state, id, params).await),
        RequestPayload::SessionList(params) => Some(list(state, id, &params)),
        RequestPayload::SessionAttach(params) => attach(state, conn, id, &params).await,
        RequestPayload::SessionDetach(params) => Some(detach(state, conn, id, &params)),
        RequestPayload::SessionInput(params) => Some(input(state, conn, id, &params)),
        RequestPayload::SessionResize(params) => Some(resize(state, conn, id, &params)),
        RequestPayload::SessionTerminate(params) => Some(terminate(state, id, &params)),
    };
    if let Some(response) = response {
        let _ = conn.send_json(&response);
    }
}

fn auth(
    state: &AppState,
    conn: &Arc<ClientConnection>,
    id: Option<serde_json::Value>,
    params: &AuthParams,
) -> Response {
    if state.auth.authenticate(params.token.as_deref()) {
        conn.set_authenticated();
        Response::ok(id, serde_json::json!({ "authenticated": true }))
    } else {
        warn!(connection_id = %conn.id, "authentication rejected");
        Response::from_error(id, &SessionError::Authentication)
    }
}

async fn create(
    state: &AppState,
    id: Option<serde_json::Value>,
    params: CreateParams,
) -> Response {
    let result = state
        .registry
        .create_session(CreateSessionOptions {
            session_type: params.session_type,
            workspace_path: params.workspace_path,
            title: params.title,
            command: params.command,
            cols: params.cols,
            rows: params.rows,
        })
        .await;
    match result {
        Ok(session) => match serde_json::to_value(&session) {
            Ok(value) => Response::ok(id, value),
            Err(e) => Response::fail(id, "INTERNAL_ERROR", e.to_string()),
        },
        Err(e) => Response::from_error(id, &e),
    }
}

fn list(state: &AppState, id: Option<serde_json::Value>, params: &ListParams) -> Response {
    let sessions = state
        .registry
        .list_sessions(params.workspace_path.as_deref());
    match serde_json::to_value(&sessions) {
        Ok(value) => Response::ok(id, value),
        Err(e) => Response::fail(id, "INTERNAL_ERROR", e.to_string()),
    }
}

async fn attach(
    state: &AppState,
    conn: &Arc<ClientConnection>,
    id: Option<serde_json::Value>,
    params: &AttachParams,
) -> Option<Response> {
    // Respawn-on-attach: the session keeps its id, a dead backend is
    // replaced before the transport goes live.
    let session = match state.registry.ensure_backend(&params.id).await {
        Ok(session) => session,
        Err(e) => return Some(Response::from_error(id, &e)),
    };

    let mut replayed = 0;
    let _ = state.attachments.attach(
        &params.id,
        Arc::clone(conn),
        &state.buffer,
        params.after_sequence,
        // Queued while live delivery is held back: response first, then the
        // catch-up marker, both guaranteed to precede the first live event.
        |replay| {
            replayed = replay.events.len();
            let last_sequence = replay.last_sequence.unwrap_or(params.after_sequence);
            let result = AttachResult {
                session,
                backlog: replay.events.clone(),
                last_sequence,
                complete: replay.complete,
            };
            let response = match serde_json::to_value(&result) {
                Ok(value) => Response::ok(id.clone(), value),
                Err(e) => Response::fail(id.clone(), "INTERNAL_ERROR", e.to_string()),
            };
            let _ = conn.send_json(&response);
            let _ = conn.send_json(&Notification::CatchupComplete {
                session_id: params.id.clone(),
                count: replayed,
                last_sequence,
            });
        },
    );
    debug!(
        session_id = %params.id,
        connection_id = %conn.id,
        replayed,
        "transport attached"
    );
    counter!("attaches_total").increment(1);
    None
}

fn detach(
    state: &AppState,
    conn: &Arc<ClientConnection>,
    id: Option<serde_json::Value>,
    params: &DetachParams,
) -> Response {
    // Live delivery stops; the session and its buffer are untouched.
    let detached = state.attachments.detach(&params.id, &conn.id);
    Response::ok(id, serde_json::json!(detached))
}

/// Input/resize precondition: authenticated and currently attached.
fn gate_io(
    state: &AppState,
    conn: &Arc<ClientConnection>,
    session_id: &SessionId,
) -> Option<(&'static str, String)> {
    if !conn.is_authenticated() {
        return Some(("AUTHENTICATION_ERROR", "not authenticated".into()));
    }
    if !state.attachments.is_attached(session_id, &conn.id) {
        return Some((
            "NOT_ATTACHED",
            format!("connection is not attached to {session_id}"),
        ));
    }
    None
}

fn input(
    state: &AppState,
    conn: &Arc<ClientConnection>,
    id: Option<serde_json::Value>,
    params: &InputParams,
) -> Response {
    if let Some((code, message)) = gate_io(state, conn, &params.id) {
        return Response::fail(id, code, message);
    }
    match state
        .registry
        .send_to_session(&params.id, params.data.as_bytes())
    {
        Ok(()) => Response::ok(id, serde_json::json!({ "accepted": true })),
        Err(e) => Response::from_error(id, &e),
    }
}

fn resize(
    state: &AppState,
    conn: &Arc<ClientConnection>,
    id: Option<serde_json::Value>,
    params: &ResizeParams,
) -> Response {
    if let Some((code, message)) = gate_io(state, conn, &params.id) {
        return Response::fail(id, code, message);
    }
    match state
        .registry
        .resize_session(&params.id, params.cols, params.rows)
    {
        Ok(()) => Response::ok(id, serde_json::json!({ "accepted": true })),
        Err(e) => Response::from_error(id, &e),
    }
}

fn terminate(
    state: &AppState,
    id: Option<serde_json::Value>,
    params: &TerminateParams,
) -> Response {
    match state.registry.terminate_session(&params.id) {
        Ok(terminated) => {
            // The ended notification has already gone out through live
            // delivery; only now does the transport forget the session.
            state.attachments.remove_session(&params.id);
            Response::ok(id, serde_json::json!(terminated))
        }
        Err(e) => Response::from_error(id, &e),
    }
}
