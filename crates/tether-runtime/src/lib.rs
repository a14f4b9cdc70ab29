//! # tether-runtime
//!
//! The live half of the Tether server:
//!
//! - **[`backend::SessionBackend`]** — the trait every backend implements:
//!   spawn, write, resize, subscribe, screen buffer, terminate. The shell
//!   supervisor and any external agent backend share this one contract;
//!   the registry holds trait objects, never concrete types.
//! - **[`supervisor::PtySupervisor`]** — owns one pseudo-terminal process
//!   per backend id: bounded scrollback cache, broadcast fan-out, one-shot
//!   exit notification.
//! - **[`registry::SessionRegistry`]** — the dispatch layer: session
//!   identity independent of backend identity, input/output routing by
//!   session type, the advisory activity state machine, idempotent
//!   termination, and respawn-on-attach.

#![deny(unsafe_code)]

pub mod backend;
pub mod registry;
pub mod supervisor;
pub mod workspace;

pub use backend::{BackendCreated, BackendEvent, BackendSpawnOptions, SessionBackend};
pub use registry::{CreateSessionOptions, SessionRegistry};
pub use supervisor::PtySupervisor;
pub use workspace::{AllowedRootGate, WorkspaceGate};
