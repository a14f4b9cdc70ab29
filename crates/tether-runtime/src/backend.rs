//! The backend contract.
//!
//! A backend is the process or connection actually doing the work behind a
//! session: a shell under a PTY, or a conversational agent. The registry
//! only ever talks to `dyn SessionBackend`; swapping in an external agent
//! backend is implementing this trait, nothing more.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use tether_core::errors::SessionError;
use tether_core::ids::BackendId;

/// What a backend emits while alive.
///
/// `Exited` is emitted exactly once, after which the backend id is dead and
/// all backend-side state for it is dropped. Respawn is a registry-level
/// decision, never the backend's.
#[derive(Clone, Debug)]
pub enum BackendEvent {
    /// Raw output bytes.
    Output(Bytes),
    /// The underlying process exited (any reason).
    Exited {
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Terminating signal, if any.
        signal: Option<i32>,
    },
}

/// Options for starting a backend process.
#[derive(Clone, Debug)]
pub struct BackendSpawnOptions {
    /// Working directory. Must exist.
    pub working_directory: PathBuf,
    /// Override the backend's default command.
    pub command: Option<String>,
    /// Initial PTY width.
    pub cols: u16,
    /// Initial PTY height.
    pub rows: u16,
    /// Ask the backend to resume a previous conversation if it can.
    pub resume: bool,
}

/// Result of [`SessionBackend::create`].
#[derive(Clone, Debug)]
pub struct BackendCreated {
    /// Backend-assigned identifier for the new process/connection.
    pub backend_id: BackendId,
    /// Whether the backend actually resumed prior context.
    pub resumed: bool,
}

/// The create/send/terminate contract shared by all backend kinds.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Start a new backend process.
    ///
    /// Fails with [`SessionError::Spawn`] if the executable is missing or
    /// the working directory is invalid — no state is left behind.
    async fn create(&self, opts: BackendSpawnOptions) -> Result<BackendCreated, SessionError>;

    /// Forward input bytes. Fire-and-forget from the caller's perspective.
    fn write(&self, backend_id: &BackendId, data: &[u8]) -> Result<(), SessionError>;

    /// Resize the backing terminal, where the backend has one.
    fn resize(&self, backend_id: &BackendId, cols: u16, rows: u16) -> Result<(), SessionError>;

    /// Subscribe to output and the exit notification.
    ///
    /// Multiple simultaneous subscribers are supported; a slow subscriber
    /// lags and recovers on its own, it never breaks delivery to others.
    fn subscribe(
        &self,
        backend_id: &BackendId,
    ) -> Result<broadcast::Receiver<BackendEvent>, SessionError>;

    /// The coarse "last screenful" byte cache for the backend.
    fn screen_buffer(&self, backend_id: &BackendId) -> Vec<u8>;

    /// Whether the backend process is still running.
    fn is_alive(&self, backend_id: &BackendId) -> bool;

    /// Stop the backend process. The exit notification still fires.
    fn terminate(&self, backend_id: &BackendId) -> Result<(), SessionError>;
}
