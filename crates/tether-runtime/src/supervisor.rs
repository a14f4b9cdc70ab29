//! PTY process supervisor.
//!
//! Owns one OS-level pseudo-terminal process per backend id. Output is both
//! appended to a bounded byte ring (the coarse "last screenful" cache,
//! distinct from the structured replay buffer) and fanned out to all
//! broadcast subscribers. Process exit fires a one-time [`BackendEvent::Exited`]
//! and then all supervisor state for that backend id is dropped — the
//! supervisor never respawns; respawn-on-reattach is the registry's call.
//!
//! I/O layout follows the usual PTY shape: a blocking reader task, a
//! blocking writer task draining an input channel, and a blocking exit
//! monitor around `child.wait()`.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use tether_core::constants::BACKEND_CHANNEL_CAPACITY;
use tether_core::errors::SessionError;
use tether_core::ids::BackendId;

use crate::backend::{BackendCreated, BackendEvent, BackendSpawnOptions, SessionBackend};

/// Capacity of the input channel feeding the PTY writer.
const INPUT_CHANNEL_CAPACITY: usize = 64;

struct PtyHandle {
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    input_tx: mpsc::Sender<Bytes>,
    events_tx: broadcast::Sender<BackendEvent>,
    scrollback: Arc<Mutex<VecDeque<u8>>>,
}

/// Supervisor for PTY-backed backends.
///
/// One instance per backend kind: the shell supervisor and the agent-CLI
/// supervisor differ only in their default command. All state is per
/// backend id inside a concurrent map — sessions never serialize on each
/// other here.
pub struct PtySupervisor {
    label: String,
    default_command: String,
    scrollback_bytes: usize,
    backends: Arc<DashMap<BackendId, Arc<PtyHandle>>>,
}

impl PtySupervisor {
    /// Create a supervisor whose backends run `default_command` by default.
    ///
    /// `label` tags log lines and metrics (`"shell"`, `"agent"`).
    #[must_use]
    pub fn new(label: impl Into<String>, default_command: impl Into<String>, scrollback_bytes: usize) -> Self {
        Self {
            label: label.into(),
            default_command: default_command.into(),
            scrollback_bytes,
            backends: Arc::new(DashMap::new()),
        }
    }

    /// Number of live backends.
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    fn handle(&self, backend_id: &BackendId) -> Result<Arc<PtyHandle>, SessionError> {
        self.backends
            .get(backend_id)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| SessionError::SessionNotFound(backend_id.to_string()))
    }
}

#[async_trait]
impl SessionBackend for PtySupervisor {
    async fn create(&self, opts: BackendSpawnOptions) -> Result<BackendCreated, SessionError> {
        if !opts.working_directory.is_dir() {
            return Err(SessionError::Spawn(format!(
                "working directory does not exist: {}",
                opts.working_directory.display()
            )));
        }

        let command_line = opts
            .command
            .clone()
            .unwrap_or_else(|| self.default_command.clone());
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| SessionError::Spawn("empty command".into()))?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: opts.rows,
                cols: opts.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Spawn(e.to_string()))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(parts);
        cmd.cwd(&opts.working_directory);

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Spawn(e.to_string()))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::Spawn(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::Spawn(e.to_string()))?;
        let killer = child.clone_killer();

        let backend_id = BackendId::generate();
        let (events_tx, _) = broadcast::channel(BACKEND_CHANNEL_CAPACITY);
        let (input_tx, mut input_rx) = mpsc::channel::<Bytes>(INPUT_CHANNEL_CAPACITY);
        let scrollback = Arc::new(Mutex::new(VecDeque::new()));

        // Reader: broadcast first (lossy for slow subscribers), then append
        // to the bounded scrollback cache.
        {
            let events_tx = events_tx.clone();
            let scrollback = Arc::clone(&scrollback);
            let cap = self.scrollback_bytes;
            let _ = tokio::task::spawn_blocking(move || {
                use std::io::Read;
                let mut reader = reader;
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let data = Bytes::copy_from_slice(&buf[..n]);
                            let _ = events_tx.send(BackendEvent::Output(data));
                            let mut ring = scrollback.lock();
                            ring.extend(&buf[..n]);
                            let len = ring.len();
                            if len > cap {
                                let _ = ring.drain(0..len - cap);
                            }
                        }
                    }
                }
            });
        }

        // Writer: drains the input channel until it closes or the PTY goes
        // away.
        let _ = tokio::task::spawn_blocking(move || {
            use std::io::Write;
            let mut writer = writer;
            while let Some(data) = input_rx.blocking_recv() {
                if writer.write_all(&data).is_err() {
                    break;
                }
                let _ = writer.flush();
            }
        });

        // Exit monitor: one-time notification, then drop all state for this
        // backend id.
        {
            let backends = Arc::clone(&self.backends);
            let events_tx = events_tx.clone();
            let backend_id = backend_id.clone();
            let label = self.label.clone();
            let _ = tokio::task::spawn_blocking(move || {
                let (exit_code, signal) = match child.wait() {
                    Ok(status) => (Some(status.exit_code() as i32), None),
                    Err(e) => {
                        warn!(backend = %label, backend_id = %backend_id, error = %e, "wait for child failed");
                        (None, None)
                    }
                };
                debug!(backend = %label, backend_id = %backend_id, ?exit_code, "backend process exited");
                counter!("backend_exits_total").increment(1);
                let _ = events_tx.send(BackendEvent::Exited { exit_code, signal });
                let _ = backends.remove(&backend_id);
            });
        }

        let handle = Arc::new(PtyHandle {
            master: Mutex::new(pair.master),
            killer: Mutex::new(killer),
            input_tx,
            events_tx,
            scrollback,
        });
        let _ = self.backends.insert(backend_id.clone(), handle);

        info!(backend = %self.label, backend_id = %backend_id, command = %command_line, cwd = %opts.working_directory.display(), "spawned backend");
        counter!("backend_spawns_total").increment(1);

        // A PTY process is always a fresh start; resume is an agent-backend
        // capability.
        Ok(BackendCreated {
            backend_id,
            resumed: false,
        })
    }

    fn write(&self, backend_id: &BackendId, data: &[u8]) -> Result<(), SessionError> {
        let handle = self.handle(backend_id)?;
        if let Err(e) = handle.input_tx.try_send(Bytes::copy_from_slice(data)) {
            // Fire-and-forget: a full channel drops the write, it does not
            // block the caller.
            warn!(backend = %self.label, backend_id = %backend_id, error = %e, "input channel rejected write");
            counter!("backend_input_drops_total").increment(1);
        }
        Ok(())
    }

    fn resize(&self, backend_id: &BackendId, cols: u16, rows: u16) -> Result<(), SessionError> {
        let handle = self.handle(backend_id)?;
        handle
            .master
            .lock()
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Internal(format!("resize failed: {e}")))
    }

    fn subscribe(
        &self,
        backend_id: &BackendId,
    ) -> Result<broadcast::Receiver<BackendEvent>, SessionError> {
        Ok(self.handle(backend_id)?.events_tx.subscribe())
    }

    fn screen_buffer(&self, backend_id: &BackendId) -> Vec<u8> {
        self.backends
            .get(backend_id)
            .map(|h| h.scrollback.lock().iter().copied().collect())
            .unwrap_or_default()
    }

    fn is_alive(&self, backend_id: &BackendId) -> bool {
        self.backends.contains_key(backend_id)
    }

    fn terminate(&self, backend_id: &BackendId) -> Result<(), SessionError> {
        let Ok(handle) = self.handle(backend_id) else {
            // Already gone — benign.
            debug!(backend = %self.label, backend_id = %backend_id, "terminate on unknown backend");
            return Ok(());
        };
        handle
            .killer
            .lock()
            .kill()
            .map_err(|e| SessionError::Internal(format!("kill failed: {e}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
