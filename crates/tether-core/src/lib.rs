//! # tether-core
//!
//! Foundation types for the Tether session server.
//!
//! This crate provides the shared vocabulary that all other Tether crates
//! depend on:
//!
//! - **Branded IDs**: [`ids::SessionId`], [`ids::BackendId`],
//!   [`ids::ConnectionId`] as prefixed-UUID newtypes
//! - **Sessions**: [`session::Session`], the [`session::SessionType`]
//!   normalizer, and the [`session::ActivityState`] machine
//! - **Events**: the closed [`events::SessionEvent`] union and the
//!   sequence-numbered [`events::BufferedEvent`] envelope
//! - **Errors**: [`errors::SessionError`] hierarchy via `thiserror`
//! - **Constants**: buffer capacity, TTL, and PTY defaults
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other tether crates.

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod session;
