//! # tether-events
//!
//! The event plumbing of the Tether server:
//!
//! - **[`buffer::MessageBuffer`]** — per-session ring of recently emitted
//!   events with monotonic sequence numbers and a TTL. Makes the event
//!   stream survive client disconnects: a reattaching client replays from
//!   its last-seen sequence with no gaps and no duplicates within the
//!   retained window.
//! - **[`index::WorkspaceIndex`]** — durable SQLite mapping of workspace
//!   path → session descriptors, used to rebuild the session list after a
//!   restart. Backend processes are not restored, only metadata.
//!
//! The buffer is in-memory and lossy by design (bounded capacity, FIFO
//! eviction, TTL expiry). Callers needing guaranteed full history need a
//! durable log, which this crate deliberately does not provide.

#![deny(unsafe_code)]

pub mod buffer;
pub mod errors;
pub mod index;
pub mod sqlite;

pub use buffer::{LiveDelivery, MessageBuffer, Replay, ReplayCursor};
pub use errors::{EventsError, Result};
pub use index::WorkspaceIndex;
