//! Router assembly and WebSocket socket loops.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use tether_core::ids::ConnectionId;
use tether_events::buffer::MessageBuffer;
use tether_runtime::SessionRegistry;

use crate::attach::AttachmentManager;
use crate::auth::AuthGate;
use crate::connection::{ClientConnection, OUTBOUND_QUEUE_CAPACITY};
use crate::handler;

/// Shared state available to every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// The session registry.
    pub registry: Arc<SessionRegistry>,
    /// Live transport tracking.
    pub attachments: Arc<AttachmentManager>,
    /// Replay buffer, read directly during attach.
    pub buffer: Arc<MessageBuffer>,
    /// Authentication gate.
    pub auth: Arc<dyn AuthGate>,
    /// Whether connections start unauthenticated.
    pub auth_required: bool,
    /// When the server started.
    pub start_time: Instant,
}

/// Build the router: `/ws` for the session protocol, `/health` for probes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "uptimeSecs": state.start_time.elapsed().as_secs(),
        "sessions": state.registry.list_sessions(None).len(),
        "attachedTransports": state.attachments.attached_count(),
    }))
}

/// One task pair per socket: a writer draining the outbound queue and this
/// read loop dispatching inbound frames.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(OUTBOUND_QUEUE_CAPACITY);
    let conn = Arc::new(ClientConnection::new(
        ConnectionId::generate(),
        tx,
        !state.auth_required,
    ));
    info!(connection_id = %conn.id, "websocket connected");
    counter!("ws_connections_total").increment(1);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink
                .send(Message::Text(frame.as_str().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            inbound = stream.next() => {
                let Some(Ok(message)) = inbound else { break };
                match message {
                    Message::Text(text) => {
                        handler::handle_frame(&state, &conn, text.as_str()).await;
                    }
                    Message::Close(_) => break,
                    // Ping/pong handled by axum; binary frames are not part
                    // of the protocol.
                    Message::Binary(_) => {
                        debug!(connection_id = %conn.id, "ignoring binary frame");
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            // A client that cannot keep up with its own event stream is cut
            // loose; it can reattach and replay. The signal comes from the
            // send path, so a purely-listening client is covered too.
            () = conn.overflowed() => {
                warn!(connection_id = %conn.id, dropped = conn.drop_count(), "disconnecting slow consumer");
                counter!("ws_slow_disconnects_total").increment(1);
                break;
            }
        }
    }

    state.attachments.detach_connection(&conn.id);
    writer.abort();
    info!(connection_id = %conn.id, "websocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use tether_events::buffer::LiveDelivery;
    use tether_events::index::WorkspaceIndex;
    use tether_events::sqlite::connection::open_in_memory_pool;
    use tether_runtime::AllowedRootGate;

    use crate::auth::AllowAll;

    fn state() -> AppState {
        let buffer = Arc::new(MessageBuffer::new(100, Duration::from_secs(300)));
        let attachments = Arc::new(AttachmentManager::new());
        let index = Arc::new(WorkspaceIndex::new(open_in_memory_pool().unwrap()));
        let registry = SessionRegistry::new(
            Arc::clone(&buffer),
            Arc::clone(&attachments) as Arc<dyn LiveDelivery>,
            index,
            Arc::new(AllowedRootGate::new("/")),
        );
        AppState {
            registry: Arc::new(registry),
            attachments,
            buffer,
            auth: Arc::new(AllowAll),
            auth_required: false,
            start_time: Instant::now(),
        }
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let app = build_router(state());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["sessions"], 0);
        assert_eq!(parsed["attachedTransports"], 0);
    }

    #[tokio::test]
    async fn ws_route_requires_upgrade() {
        let app = build_router(state());
        let resp = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        // A plain GET without the upgrade handshake is rejected.
        assert_ne!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = build_router(state());
        let resp = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
