//! # tether-server
//!
//! The transport layer: Axum WebSocket endpoint, wire protocol, and the
//! attach/replay handshake.
//!
//! - **[`protocol`]** — the closed request/response/notification unions.
//!   Method dispatch is exhaustive pattern matching over a tagged enum;
//!   an unknown method fails at parse time, not at a string lookup.
//! - **[`connection`]** — per-client connection state and the bounded
//!   outbound queue.
//! - **[`attach`]** — at-most-one live transport per session, takeover,
//!   and the gap-free catch-up sequence floor.
//! - **[`auth`]** — the boolean authentication gate.
//! - **[`handler`]** — request dispatch against the registry.
//! - **[`server`]** — router assembly and the WebSocket read/write loops.

#![deny(unsafe_code)]

pub mod attach;
pub mod auth;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod server;

pub use attach::AttachmentManager;
pub use auth::{AllowAll, AuthGate, StaticToken};
pub use connection::ClientConnection;
pub use server::{AppState, build_router};
