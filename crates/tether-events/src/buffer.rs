//! Per-session replay buffer.
//!
//! Each session gets a bounded ring of [`BufferedEvent`]s with a monotonic
//! sequence counter. Insertion beyond capacity evicts the oldest entry
//! (FIFO) — eviction is lossy by design, and replay communicates the loss
//! via [`Replay::complete`] instead of erroring.
//!
//! INVARIANT: sequence assignment is atomic per session (the per-session
//! mutex inside the `DashMap` entry). Unrelated sessions never contend on a
//! shared lock, so a chatty session cannot head-of-line-block others.
//!
//! A buffer whose last write is older than the TTL is expired: its events
//! are dropped on the next access or by the periodic sweep. Sequence
//! counters survive expiry — they never reset while the session exists.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, trace};

use tether_core::constants::{BUFFER_CAPACITY, BUFFER_TTL_SECS};
use tether_core::errors::SessionError;
use tether_core::events::{BufferedEvent, SessionEvent, now_rfc3339};
use tether_core::ids::SessionId;

/// Where replay should start.
#[derive(Clone, Copy, Debug)]
pub enum ReplayCursor {
    /// Everything retained. Negative `afterSequence` values map here.
    FromStart,
    /// Events with sequence strictly greater than this.
    AfterSequence(i64),
    /// Events with timestamp strictly after this instant.
    SinceTimestamp(DateTime<Utc>),
}

/// Result of a replay read.
#[derive(Clone, Debug)]
pub struct Replay {
    /// Retained events in strictly increasing sequence order.
    pub events: Vec<BufferedEvent>,
    /// `false` when eviction or expiry removed events the cursor asked for.
    /// Callers must not assume the window is the full history when unset.
    pub complete: bool,
    /// Highest sequence delivered, if any.
    pub last_sequence: Option<i64>,
}

impl Replay {
    fn empty() -> Self {
        Self {
            events: Vec::new(),
            complete: true,
            last_sequence: None,
        }
    }
}

/// A transport that can accept live events right now.
///
/// Implemented by the server's attachment layer. Failure to deliver is not
/// an error at this level — the event is already buffered for replay.
pub trait LiveDelivery: Send + Sync {
    /// Push one event to the currently attached transport, if any.
    fn deliver(&self, event: &BufferedEvent) -> Result<(), SessionError>;
}

struct SessionRing {
    events: VecDeque<BufferedEvent>,
    next_sequence: i64,
    last_write: Instant,
}

impl SessionRing {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
            next_sequence: 0,
            last_write: Instant::now(),
        }
    }

    /// Oldest retained sequence, or the next one to be assigned when empty.
    fn oldest_retained(&self) -> i64 {
        self.events.front().map_or(self.next_sequence, |e| e.sequence)
    }

    fn expired(&self, ttl: Duration) -> bool {
        !self.events.is_empty() && self.last_write.elapsed() > ttl
    }
}

/// The per-session message buffer.
///
/// Shared between the registry's output pumps (producers) and the attach
/// protocol (replay reads). Cheap to clone via `Arc`.
pub struct MessageBuffer {
    rings: DashMap<SessionId, Mutex<SessionRing>>,
    capacity: usize,
    ttl: Duration,
}

impl MessageBuffer {
    /// Create a buffer with the given per-session capacity and TTL.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            rings: DashMap::new(),
            capacity,
            ttl,
        }
    }

    /// Buffer with the compiled default limits.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BUFFER_CAPACITY, Duration::from_secs(BUFFER_TTL_SECS))
    }

    /// Record an event, assigning the session's next sequence number.
    ///
    /// The sequence is assigned here, at insertion time — never by the
    /// backend. Returns the assigned sequence.
    pub fn add_message(&self, session_id: &SessionId, event: SessionEvent) -> i64 {
        self.push(session_id, event).sequence
    }

    fn push(&self, session_id: &SessionId, event: SessionEvent) -> BufferedEvent {
        let entry = self
            .rings
            .entry(session_id.clone())
            .or_insert_with(|| Mutex::new(SessionRing::new()));
        let mut ring = entry.lock();

        if ring.expired(self.ttl) {
            self.expire_ring(session_id, &mut ring);
        }

        let sequence = ring.next_sequence;
        ring.next_sequence += 1;
        let buffered = BufferedEvent {
            session_id: session_id.clone(),
            sequence,
            timestamp: now_rfc3339(),
            event,
        };
        ring.events.push_back(buffered.clone());
        if ring.events.len() > self.capacity {
            let _ = ring.events.pop_front();
            counter!("buffer_evictions_total").increment(1);
        }
        ring.last_write = Instant::now();

        trace!(session_id = %session_id, sequence, "buffered event");
        buffered
    }

    /// Replay retained events for a session from the given cursor.
    ///
    /// Events come back in strictly increasing sequence order with no
    /// duplicates and no gaps within the retained window. If eviction or
    /// expiry dropped events the cursor asked for, all retained events are
    /// still returned and [`Replay::complete`] is `false`.
    pub fn get_messages(
        &self,
        session_id: &SessionId,
        cursor: ReplayCursor,
        limit: Option<usize>,
    ) -> Replay {
        let Some(entry) = self.rings.get(session_id) else {
            return Replay::empty();
        };
        let mut ring = entry.lock();

        if ring.expired(self.ttl) {
            self.expire_ring(session_id, &mut ring);
        }

        let oldest = ring.oldest_retained();
        let (requested_from, complete) = match cursor {
            ReplayCursor::FromStart => (0, oldest == 0),
            ReplayCursor::AfterSequence(after) => {
                let from = after.saturating_add(1).max(0);
                (from, from >= oldest)
            }
            // Conservative: a timestamp window is only known-complete when
            // nothing has ever been evicted or expired from this ring.
            ReplayCursor::SinceTimestamp(_) => (0, oldest == 0),
        };

        let mut events: Vec<BufferedEvent> = ring
            .events
            .iter()
            .filter(|e| match cursor {
                ReplayCursor::FromStart => true,
                ReplayCursor::AfterSequence(_) => e.sequence >= requested_from,
                ReplayCursor::SinceTimestamp(since) => {
                    DateTime::parse_from_rfc3339(&e.timestamp)
                        .map(|ts| ts.with_timezone(&Utc) > since)
                        .unwrap_or(true)
                }
            })
            .cloned()
            .collect();

        if let Some(limit) = limit {
            events.truncate(limit);
        }
        let last_sequence = events.last().map(|e| e.sequence);

        Replay {
            events,
            complete,
            last_sequence,
        }
    }

    /// Whether the session has any retained, unexpired events.
    pub fn has_messages(&self, session_id: &SessionId) -> bool {
        self.rings.get(session_id).is_some_and(|entry| {
            let ring = entry.lock();
            !ring.events.is_empty() && !ring.expired(self.ttl)
        })
    }

    /// Next sequence that will be assigned for this session.
    pub fn next_sequence(&self, session_id: &SessionId) -> i64 {
        self.rings
            .get(session_id)
            .map_or(0, |entry| entry.lock().next_sequence)
    }

    /// Purge a session's buffer entirely (termination path).
    pub fn clear_buffer(&self, session_id: &SessionId) {
        if self.rings.remove(session_id).is_some() {
            debug!(session_id = %session_id, "cleared session buffer");
        }
    }

    /// Drop events from all expired rings. Returns the number of rings swept.
    ///
    /// Runs periodically off the hot path; bounds memory for abandoned
    /// sessions. Rings themselves are kept so sequence counters survive.
    pub fn cleanup_expired(&self) -> usize {
        let mut swept = 0;
        for entry in &self.rings {
            let mut ring = entry.value().lock();
            if ring.expired(self.ttl) {
                self.expire_ring(entry.key(), &mut ring);
                swept += 1;
            }
        }
        if swept > 0 {
            debug!(swept, "expired session buffers");
        }
        swept
    }

    /// Buffer first, then best-effort live delivery.
    ///
    /// The event is always recorded; a delivery failure (transport gone,
    /// channel full) is logged and recovered silently — the event remains
    /// available for replay. Returns the assigned sequence.
    pub fn emit_with_buffer(
        &self,
        delivery: &dyn LiveDelivery,
        session_id: &SessionId,
        event: SessionEvent,
    ) -> i64 {
        let buffered = self.push(session_id, event);
        let sequence = buffered.sequence;
        if let Err(e) = delivery.deliver(&buffered) {
            counter!("live_delivery_failures_total").increment(1);
            debug!(session_id = %session_id, sequence, error = %e, "live delivery failed, event stays buffered");
        }
        sequence
    }

    fn expire_ring(&self, session_id: &SessionId, ring: &mut SessionRing) {
        debug!(session_id = %session_id, dropped = ring.events.len(), "buffer TTL expired");
        counter!("buffer_expiries_total").increment(1);
        ring.events.clear();
    }
}

/// Spawn the periodic expiry sweep.
///
/// Returns the task handle; aborting it stops the sweep.
pub fn spawn_sweeper(buffer: Arc<MessageBuffer>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            let _ = ticker.tick().await;
            let _ = buffer.cleanup_expired();
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
