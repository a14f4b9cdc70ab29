//! Session attachment and live delivery.
//!
//! At most one live transport per session: a new `attach` transparently
//! takes over delivery, and the previous transport simply stops receiving
//! (it is never forcibly disconnected).
//!
//! INVARIANT: across the attach handshake, a client sees every event
//! exactly once — backlog in the attach response, everything after it live.
//! The per-attachment mutex makes that hold: live delivery and the backlog
//! read serialize on it, and the sequence floor recorded after the read
//! suppresses any live event the backlog already covered.

use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use tether_core::errors::SessionError;
use tether_core::events::{BufferedEvent, SessionEvent};
use tether_core::ids::{ConnectionId, SessionId};
use tether_events::buffer::{LiveDelivery, MessageBuffer, Replay, ReplayCursor};

use crate::connection::ClientConnection;
use crate::protocol::Notification;

struct Attachment {
    connection: Arc<ClientConnection>,
    // Highest sequence already sent to this transport. Live events at or
    // below it are duplicates of the backlog and are suppressed. Starts at
    // i64::MAX so nothing leaks out before the backlog read completes.
    floor: Mutex<i64>,
}

/// Tracks which transport, if any, is live for each session.
pub struct AttachmentManager {
    attachments: DashMap<SessionId, Arc<Attachment>>,
}

impl Default for AttachmentManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AttachmentManager {
    /// Empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            attachments: DashMap::new(),
        }
    }

    /// Attach `connection` as the live transport for `session_id` and read
    /// the backlog from `after_sequence` (`-1` replays everything retained).
    ///
    /// `respond` runs with the replay window while live delivery for the
    /// session is still held back; frames it queues (the attach response and
    /// the catch-up marker) are therefore guaranteed to precede the first
    /// live event. Any previous transport stops receiving from here on.
    pub fn attach(
        &self,
        session_id: &SessionId,
        connection: Arc<ClientConnection>,
        buffer: &MessageBuffer,
        after_sequence: i64,
        respond: impl FnOnce(&Replay),
    ) -> Replay {
        let attachment = Arc::new(Attachment {
            connection,
            floor: Mutex::new(i64::MAX),
        });
        let takeover = self
            .attachments
            .insert(session_id.clone(), Arc::clone(&attachment))
            .is_some();
        if takeover {
            info!(session_id = %session_id, "attach takeover, previous transport goes silent");
            counter!("attach_takeovers_total").increment(1);
        }

        // Holding the floor lock across the read and the response blocks
        // live delivery for this session, so nothing can slip between the
        // backlog and the first live event.
        let mut floor = attachment.floor.lock();
        // Highest sequence this session has ever assigned; read before the
        // backlog so a concurrent emit can only land above it.
        let ceiling = buffer.next_sequence(session_id) - 1;
        let cursor = if after_sequence < 0 {
            ReplayCursor::FromStart
        } else {
            ReplayCursor::AfterSequence(after_sequence)
        };
        let mut replay = buffer.get_messages(session_id, cursor, None);
        if after_sequence > ceiling {
            // The cursor points past anything this session has emitted —
            // stale after a buffer purge, or a client bug. The window the
            // client asked for does not exist.
            warn!(session_id = %session_id, after_sequence, ceiling, "attach cursor beyond session history");
            replay.complete = false;
        }
        respond(&replay);
        // The floor never exceeds the ceiling: a stale cursor must not
        // suppress live events the client has never seen.
        *floor = replay
            .last_sequence
            .unwrap_or_else(|| after_sequence.min(ceiling));
        replay
    }

    /// Whether `connection_id` is the current live transport for the session.
    pub fn is_attached(&self, session_id: &SessionId, connection_id: &ConnectionId) -> bool {
        self.attachments
            .get(session_id)
            .is_some_and(|a| a.connection.id == *connection_id)
    }

    /// Detach one session, but only if `connection_id` is its current
    /// transport. Returns whether an attachment was removed. The session
    /// and its backend keep running; the buffer keeps accumulating.
    pub fn detach(&self, session_id: &SessionId, connection_id: &ConnectionId) -> bool {
        let removed = self
            .attachments
            .remove_if(session_id, |_, attachment| {
                attachment.connection.id == *connection_id
            })
            .is_some();
        if removed {
            debug!(session_id = %session_id, connection_id = %connection_id, "transport detached");
        }
        removed
    }

    /// Drop every attachment still belonging to this connection.
    ///
    /// Called when a socket closes. A takeover by another connection wins;
    /// the stale transport's detach is then a no-op.
    pub fn detach_connection(&self, connection_id: &ConnectionId) {
        self.attachments.retain(|session_id, attachment| {
            let keep = attachment.connection.id != *connection_id;
            if !keep {
                debug!(session_id = %session_id, connection_id = %connection_id, "transport detached");
            }
            keep
        });
    }

    /// Forget a session entirely (termination path).
    pub fn remove_session(&self, session_id: &SessionId) {
        let _ = self.attachments.remove(session_id);
    }

    /// Number of sessions with a live transport.
    pub fn attached_count(&self) -> usize {
        self.attachments.len()
    }
}

impl LiveDelivery for AttachmentManager {
    fn deliver(&self, event: &BufferedEvent) -> Result<(), SessionError> {
        let Some(attachment) = self
            .attachments
            .get(&event.session_id)
            .map(|a| Arc::clone(a.value()))
        else {
            return Err(SessionError::Delivery("no transport attached".into()));
        };

        let mut floor = attachment.floor.lock();
        if event.sequence <= *floor {
            // Covered by the backlog the client just received.
            return Ok(());
        }
        let notification = match &event.event {
            SessionEvent::Ended { exit_code, signal } => Notification::Ended {
                session_id: event.session_id.clone(),
                exit_code: *exit_code,
                signal: *signal,
                sequence: event.sequence,
            },
            _ => Notification::SessionEvent(event.clone()),
        };
        if !attachment.connection.send_json(&notification) {
            return Err(SessionError::Delivery(format!(
                "outbound queue rejected frame for {}",
                attachment.connection.id
            )));
        }
        *floor = event.sequence;
        Ok(())
    }
}
