//! Per-client connection state.
//!
//! Each WebSocket client gets a `ClientConnection` with a bounded outbound
//! queue. Sends never block: a full queue drops the frame and bumps a
//! counter, and a connection that keeps dropping is considered too slow to
//! keep (the socket loop disconnects it past [`MAX_TOTAL_DROPS`]).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::{Notify, mpsc};

use tether_core::ids::ConnectionId;

/// Outbound frames queued per connection before drops start.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Total dropped frames after which the connection is disconnected.
pub const MAX_TOTAL_DROPS: u64 = 100;

/// A connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection id.
    pub id: ConnectionId,
    /// When this connection was established.
    pub connected_at: Instant,
    tx: mpsc::Sender<Arc<String>>,
    authenticated: AtomicBool,
    dropped: AtomicU64,
    overflow: Notify,
}

impl ClientConnection {
    /// New connection writing frames into `tx`.
    #[must_use]
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>, authenticated: bool) -> Self {
        Self {
            id,
            connected_at: Instant::now(),
            tx,
            authenticated: AtomicBool::new(authenticated),
            dropped: AtomicU64::new(0),
            overflow: Notify::new(),
        }
    }

    /// Queue a text frame. Returns `false` (and counts a drop) when the
    /// queue is full or the socket is gone.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            // Signaled from the send path: the socket loop learns about a
            // consumer that stopped draining even if it never sends again.
            if dropped > MAX_TOTAL_DROPS {
                self.overflow.notify_one();
            }
            false
        }
    }

    /// Resolves once the connection has dropped more than
    /// [`MAX_TOTAL_DROPS`] frames in total.
    pub async fn overflowed(&self) {
        while self.drop_count() <= MAX_TOTAL_DROPS {
            self.overflow.notified().await;
        }
    }

    /// Serialize and queue a value.
    pub fn send_json<T: serde::Serialize>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Total frames dropped on this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether this connection has passed the auth gate.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }

    /// Mark the connection authenticated.
    pub fn set_authenticated(&self) {
        self.authenticated.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make() -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(4);
        (
            ClientConnection::new(ConnectionId::from_string("conn_1"), tx, true),
            rx,
        )
    }

    #[tokio::test]
    async fn send_delivers_in_order() {
        let (conn, mut rx) = make();
        assert!(conn.send(Arc::new("a".into())));
        assert!(conn.send(Arc::new("b".into())));
        assert_eq!(&*rx.recv().await.unwrap(), "a");
        assert_eq!(&*rx.recv().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn full_queue_counts_drops() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new(ConnectionId::from_string("conn_2"), tx, true);
        assert!(conn.send(Arc::new("a".into())));
        assert!(!conn.send(Arc::new("b".into())));
        assert!(!conn.send(Arc::new("c".into())));
        assert_eq!(conn.drop_count(), 2);
    }

    #[tokio::test]
    async fn closed_socket_counts_drops() {
        let (conn, rx) = make();
        drop(rx);
        assert!(!conn.send(Arc::new("a".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_json_serializes() {
        let (conn, mut rx) = make();
        assert!(conn.send_json(&serde_json::json!({"k": "v"})));
        let frame = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["k"], "v");
    }

    #[tokio::test]
    async fn overflow_resolves_past_drop_limit() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new(ConnectionId::from_string("conn_4"), tx, true);
        assert!(conn.send(Arc::new("a".into())));
        for _ in 0..=MAX_TOTAL_DROPS {
            let _ = conn.send(Arc::new("x".into()));
        }
        // Even a waiter arriving after the threshold was crossed resolves.
        tokio::time::timeout(std::time::Duration::from_secs(1), conn.overflowed())
            .await
            .expect("overflow never signaled");
    }

    #[tokio::test]
    async fn overflow_pends_below_drop_limit() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new(ConnectionId::from_string("conn_5"), tx, true);
        assert!(conn.send(Arc::new("a".into())));
        assert!(!conn.send(Arc::new("b".into())));

        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(50), conn.overflowed()).await;
        assert!(waited.is_err(), "one drop is not an overflow");
    }

    #[test]
    fn auth_flag_latches() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new(ConnectionId::from_string("conn_3"), tx, false);
        assert!(!conn.is_authenticated());
        conn.set_authenticated();
        assert!(conn.is_authenticated());
    }
}
