//! Session registry and dispatch.
//!
//! The registry owns the session-id → record map and is the only component
//! that ties the other pieces together: backends (by session type), the
//! replay buffer, live delivery, and the durable workspace index. Session
//! identity is independent of backend identity — a session keeps its id
//! across backend death and respawn, and its record is removed only on
//! explicit termination.
//!
//! Every live backend gets one output pump task: it converts raw backend
//! output into buffered session events, steps the advisory activity state,
//! and turns process exit into a one-time `ended` event.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use tether_core::constants::{DEFAULT_COLS, DEFAULT_ROWS};
use tether_core::errors::SessionError;
use tether_core::events::{SessionEvent, now_rfc3339};
use tether_core::ids::{BackendId, SessionId};
use tether_core::session::{ActivityState, Session, SessionDescriptor, SessionType};
use tether_events::buffer::{LiveDelivery, MessageBuffer};
use tether_events::index::WorkspaceIndex;

use crate::backend::{BackendEvent, BackendSpawnOptions, SessionBackend};
use crate::workspace::WorkspaceGate;

/// Client-facing options for creating a session.
#[derive(Clone, Debug, Default)]
pub struct CreateSessionOptions {
    /// Requested session type (aliases accepted).
    pub session_type: String,
    /// Workspace directory for the session.
    pub workspace_path: String,
    /// Display title; defaults to workspace basename plus type.
    pub title: Option<String>,
    /// Override the backend's default command.
    pub command: Option<String>,
    /// Initial terminal width.
    pub cols: Option<u16>,
    /// Initial terminal height.
    pub rows: Option<u16>,
}

/// The resolved options a session's backend was created with. Reused
/// verbatim on respawn so a replaced backend behaves like the original.
#[derive(Clone)]
struct SpawnProfile {
    command: Option<String>,
    cols: u16,
    rows: u16,
}

impl Default for SpawnProfile {
    fn default() -> Self {
        Self {
            command: None,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

struct SessionRecord {
    session: Mutex<Session>,
    spawn: SpawnProfile,
    // Set exactly once by the terminate path; the pump checks it so an
    // exit racing a terminate produces no duplicate `ended` event.
    terminating: AtomicBool,
}

struct RegistryShared {
    sessions: DashMap<SessionId, Arc<SessionRecord>>,
    buffer: Arc<MessageBuffer>,
    delivery: Arc<dyn LiveDelivery>,
    index: Arc<WorkspaceIndex>,
}

impl RegistryShared {
    fn emit(&self, session_id: &SessionId, event: SessionEvent) {
        let _ = self.buffer.emit_with_buffer(&*self.delivery, session_id, event);
    }

    /// Advisory state step: applied and announced only when the edge is
    /// legal for the session type, silently skipped otherwise.
    fn try_step_state(&self, record: &SessionRecord, next: ActivityState) {
        let (session_id, changed) = {
            let mut session = record.session.lock();
            if session.activity_state == next
                || !session.activity_state.can_transition_to(next, session.session_type)
            {
                return;
            }
            session.activity_state = next;
            (session.id.clone(), true)
        };
        if changed {
            self.emit(&session_id, SessionEvent::State { state: next });
        }
    }
}

/// The session registry.
///
/// Construct once at startup with the shared collaborators, register one
/// backend per session type, then share via `Arc`.
pub struct SessionRegistry {
    shared: Arc<RegistryShared>,
    backends: HashMap<SessionType, Arc<dyn SessionBackend>>,
    gate: Arc<dyn WorkspaceGate>,
}

impl SessionRegistry {
    /// Registry with no backends yet; see [`Self::register_backend`].
    #[must_use]
    pub fn new(
        buffer: Arc<MessageBuffer>,
        delivery: Arc<dyn LiveDelivery>,
        index: Arc<WorkspaceIndex>,
        gate: Arc<dyn WorkspaceGate>,
    ) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                sessions: DashMap::new(),
                buffer,
                delivery,
                index,
            }),
            backends: HashMap::new(),
            gate,
        }
    }

    /// Wire the backend that serves one session type.
    pub fn register_backend(&mut self, session_type: SessionType, backend: Arc<dyn SessionBackend>) {
        let _ = self.backends.insert(session_type, backend);
    }

    fn backend_for(&self, session_type: SessionType) -> Result<&Arc<dyn SessionBackend>, SessionError> {
        self.backends
            .get(&session_type)
            .ok_or_else(|| SessionError::UnsupportedType(session_type.as_str().to_string()))
    }

    /// Create a session: normalize the type, validate the workspace, spawn
    /// a backend, record durably, and start the output pump.
    ///
    /// A spawn failure leaves no registry or index state behind.
    pub async fn create_session(&self, opts: CreateSessionOptions) -> Result<Session, SessionError> {
        let session_type = SessionType::normalize(&opts.session_type)?;
        let workspace = PathBuf::from(&opts.workspace_path);
        self.gate.validate(&workspace)?;
        let backend = self.backend_for(session_type)?;

        let spawn = SpawnProfile {
            command: opts.command.clone(),
            cols: opts.cols.unwrap_or(DEFAULT_COLS),
            rows: opts.rows.unwrap_or(DEFAULT_ROWS),
        };
        let created = backend
            .create(BackendSpawnOptions {
                working_directory: workspace,
                command: spawn.command.clone(),
                cols: spawn.cols,
                rows: spawn.rows,
                resume: false,
            })
            .await?;

        let session = Session {
            id: SessionId::generate(),
            session_type,
            backend_id: created.backend_id.clone(),
            workspace_path: opts.workspace_path.clone(),
            title: opts
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| Session::default_title(&opts.workspace_path, session_type)),
            created_at: now_rfc3339(),
            activity_state: ActivityState::Idle,
            resume_flag: created.resumed,
            extra: serde_json::Map::new(),
        };

        let record = Arc::new(SessionRecord {
            session: Mutex::new(session.clone()),
            spawn,
            terminating: AtomicBool::new(false),
        });
        let _ = self
            .shared
            .sessions
            .insert(session.id.clone(), Arc::clone(&record));

        // The index write is durable bookkeeping, not a gate: the live
        // session wins if the database is unhappy.
        if let Err(e) = self.shared.index.record_session(
            &session.workspace_path,
            &SessionDescriptor {
                id: session.id.clone(),
                title: session.title.clone(),
                session_type,
                backend_id: session.backend_id.clone(),
            },
        ) {
            warn!(session_id = %session.id, error = %e, "failed to index new session");
        }

        spawn_pump(
            Arc::clone(&self.shared),
            record,
            Arc::clone(backend),
            session.backend_id.clone(),
        );

        info!(
            session_id = %session.id,
            backend_id = %session.backend_id,
            session_type = session_type.as_str(),
            workspace = %session.workspace_path,
            "session created"
        );
        counter!("sessions_created_total").increment(1);
        Ok(session)
    }

    /// Snapshot of one session, if it exists.
    pub fn get_session(&self, session_id: &SessionId) -> Option<Session> {
        self.shared
            .sessions
            .get(session_id)
            .map(|r| r.session.lock().clone())
    }

    /// Snapshot of all sessions, optionally filtered by workspace path.
    pub fn list_sessions(&self, workspace_path: Option<&str>) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .shared
            .sessions
            .iter()
            .map(|r| r.session.lock().clone())
            .filter(|s| workspace_path.is_none_or(|w| s.workspace_path == w))
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Forward input bytes to a session's backend.
    ///
    /// Unknown session ids are a warn-and-drop, never an error — input from
    /// a stale transport must not kill the connection.
    pub fn send_to_session(&self, session_id: &SessionId, data: &[u8]) -> Result<(), SessionError> {
        let Some(record) = self.shared.sessions.get(session_id).map(|r| Arc::clone(&r)) else {
            warn!(session_id = %session_id, "input for unknown session dropped");
            counter!("input_unknown_session_total").increment(1);
            return Ok(());
        };
        let (session_type, backend_id) = {
            let session = record.session.lock();
            (session.session_type, session.backend_id.clone())
        };
        self.backend_for(session_type)?.write(&backend_id, data)?;
        // Agent input opens a turn; raw shell input has no state meaning.
        if session_type == SessionType::Agent {
            self.shared.try_step_state(&record, ActivityState::Processing);
        }
        Ok(())
    }

    /// Resize a session's terminal. Unknown ids are a warn-and-drop.
    pub fn resize_session(
        &self,
        session_id: &SessionId,
        cols: u16,
        rows: u16,
    ) -> Result<(), SessionError> {
        let Some(record) = self.shared.sessions.get(session_id).map(|r| Arc::clone(&r)) else {
            warn!(session_id = %session_id, "resize for unknown session dropped");
            return Ok(());
        };
        let (session_type, backend_id) = {
            let session = record.session.lock();
            (session.session_type, session.backend_id.clone())
        };
        self.backend_for(session_type)?.resize(&backend_id, cols, rows)
    }

    /// Set the advisory activity state.
    ///
    /// Returns `true` if the edge was legal and applied; illegal edges are
    /// rejected without side effects.
    pub fn set_activity_state(&self, session_id: &SessionId, next: ActivityState) -> bool {
        let Some(record) = self.shared.sessions.get(session_id).map(|r| Arc::clone(&r)) else {
            return false;
        };
        let legal = {
            let session = record.session.lock();
            session.activity_state.can_transition_to(next, session.session_type)
        };
        if !legal {
            debug!(session_id = %session_id, next = next.as_str(), "rejected activity transition");
            return false;
        }
        self.shared.try_step_state(&record, next);
        true
    }

    /// Rename a session, announcing the change to any attached transport.
    pub fn rename_session(&self, session_id: &SessionId, title: String) -> Result<(), SessionError> {
        let Some(record) = self.shared.sessions.get(session_id).map(|r| Arc::clone(&r)) else {
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        };
        let descriptor = {
            let mut session = record.session.lock();
            session.title = title.clone();
            SessionDescriptor {
                id: session.id.clone(),
                title,
                session_type: session.session_type,
                backend_id: session.backend_id.clone(),
            }
        };
        let workspace = record.session.lock().workspace_path.clone();
        if let Err(e) = self.shared.index.record_session(&workspace, &descriptor) {
            warn!(session_id = %session_id, error = %e, "failed to index rename");
        }
        self.shared.emit(
            session_id,
            SessionEvent::TitleChanged {
                title: descriptor.title,
            },
        );
        Ok(())
    }

    /// Make sure the session has a live backend, respawning if it died.
    ///
    /// The session id never changes; on respawn the backend id is replaced,
    /// the index is updated, and a `backendChanged` event is emitted so the
    /// attaching client learns the new identity.
    pub async fn ensure_backend(&self, session_id: &SessionId) -> Result<Session, SessionError> {
        let Some(record) = self.shared.sessions.get(session_id).map(|r| Arc::clone(&r)) else {
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        };
        let (session_type, backend_id, workspace) = {
            let session = record.session.lock();
            (
                session.session_type,
                session.backend_id.clone(),
                session.workspace_path.clone(),
            )
        };
        let backend = self.backend_for(session_type)?;
        if backend.is_alive(&backend_id) {
            return Ok(record.session.lock().clone());
        }

        // The replacement backend gets the options the original was created
        // with; only the resume flag differs.
        let created = backend
            .create(BackendSpawnOptions {
                working_directory: PathBuf::from(&workspace),
                command: record.spawn.command.clone(),
                cols: record.spawn.cols,
                rows: record.spawn.rows,
                resume: true,
            })
            .await?;

        {
            let mut session = record.session.lock();
            session.backend_id = created.backend_id.clone();
            session.resume_flag = created.resumed;
            session.activity_state = ActivityState::Idle;
        }
        if let Err(e) = self
            .shared
            .index
            .update_backend_id(session_id, &created.backend_id)
        {
            warn!(session_id = %session_id, error = %e, "failed to index respawned backend");
        }

        spawn_pump(
            Arc::clone(&self.shared),
            Arc::clone(&record),
            Arc::clone(backend),
            created.backend_id.clone(),
        );
        self.shared.emit(
            session_id,
            SessionEvent::BackendChanged {
                backend_id: created.backend_id,
            },
        );

        info!(session_id = %session_id, "respawned backend on reattach");
        counter!("backend_respawns_total").increment(1);
        Ok(record.session.lock().clone())
    }

    /// Terminate a session. Idempotent: returns `true` only for the call
    /// that actually performed the teardown.
    ///
    /// Teardown order is fixed: stop the backend, purge the replay buffer,
    /// remove the index descriptor, then drop the registry record.
    pub fn terminate_session(&self, session_id: &SessionId) -> Result<bool, SessionError> {
        let Some(record) = self.shared.sessions.get(session_id).map(|r| Arc::clone(&r)) else {
            return Ok(false);
        };
        if record
            .terminating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(false);
        }

        let (session_type, backend_id) = {
            let session = record.session.lock();
            (session.session_type, session.backend_id.clone())
        };
        if let Ok(backend) = self.backend_for(session_type)
            && let Err(e) = backend.terminate(&backend_id)
        {
            warn!(session_id = %session_id, error = %e, "backend terminate failed; continuing teardown");
        }

        // The `ended` notification goes out before the buffer is purged, so
        // only the live transport sees it — terminated sessions have nothing
        // left to replay.
        self.shared.emit(
            session_id,
            SessionEvent::Ended {
                exit_code: None,
                signal: None,
            },
        );
        self.shared.buffer.clear_buffer(session_id);
        if let Err(e) = self.shared.index.remove_session(session_id) {
            warn!(session_id = %session_id, error = %e, "failed to remove session from index");
        }
        let _ = self.shared.sessions.remove(session_id);

        info!(session_id = %session_id, "session terminated");
        counter!("sessions_terminated_total").increment(1);
        Ok(true)
    }

    /// Rebuild session records from the durable index after a restart.
    ///
    /// Restored sessions carry metadata only — their backends are dead
    /// until the first attach triggers a respawn. Returns the number of
    /// sessions restored.
    pub fn restore_from_index(&self) -> Result<usize, SessionError> {
        let rows = self
            .shared
            .index
            .all_sessions()
            .map_err(|e| SessionError::Index(e.to_string()))?;
        let mut restored = 0;
        for (workspace_path, descriptor) in rows {
            if self.shared.sessions.contains_key(&descriptor.id) {
                continue;
            }
            let session = Session {
                id: descriptor.id.clone(),
                session_type: descriptor.session_type,
                backend_id: descriptor.backend_id,
                workspace_path,
                title: descriptor.title,
                // Original creation time is not part of the descriptor;
                // restore time stands in.
                created_at: now_rfc3339(),
                activity_state: ActivityState::Idle,
                resume_flag: false,
                extra: serde_json::Map::new(),
            };
            // Create options are not part of the descriptor; restored
            // sessions respawn with supervisor defaults.
            let _ = self.shared.sessions.insert(
                descriptor.id,
                Arc::new(SessionRecord {
                    session: Mutex::new(session),
                    spawn: SpawnProfile::default(),
                    terminating: AtomicBool::new(false),
                }),
            );
            restored += 1;
        }
        if restored > 0 {
            info!(restored, "restored sessions from index");
        }
        Ok(restored)
    }
}

/// One pump per live backend: backend events in, session events out.
fn spawn_pump(
    shared: Arc<RegistryShared>,
    record: Arc<SessionRecord>,
    backend: Arc<dyn SessionBackend>,
    backend_id: BackendId,
) {
    let session_id = record.session.lock().id.clone();
    // Subscribe before the task is spawned: a broadcast receiver only sees
    // events sent after subscription, so output the backend produces before
    // the task's first poll must already have a receiver waiting.
    let mut rx = match backend.subscribe(&backend_id) {
        Ok(rx) => rx,
        // The backend can exit between spawn and subscribe; nothing to
        // pump in that case.
        Err(e) => {
            debug!(session_id = %session_id, error = %e, "backend gone before pump start");
            return;
        }
    };
    let _ = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(BackendEvent::Output(data)) => {
                    // Stale pump after a backend swap: stop quietly.
                    if record.session.lock().backend_id != backend_id {
                        break;
                    }
                    shared.try_step_state(&record, ActivityState::Streaming);
                    shared.emit(
                        &session_id,
                        SessionEvent::Output {
                            data: String::from_utf8_lossy(&data).into_owned(),
                        },
                    );
                }
                Ok(BackendEvent::Exited { exit_code, signal }) => {
                    if !record.terminating.load(Ordering::Acquire)
                        && record.session.lock().backend_id == backend_id
                    {
                        shared.try_step_state(&record, ActivityState::Idle);
                        shared.emit(&session_id, SessionEvent::Ended { exit_code, signal });
                    }
                    break;
                }
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(session_id = %session_id, skipped, "output pump lagged, events skipped");
                    counter!("pump_lag_total").increment(skipped);
                }
            }
        }
        debug!(session_id = %session_id, backend_id = %backend_id, "output pump stopped");
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;
    use tether_core::events::BufferedEvent;
    use tether_events::buffer::ReplayCursor;
    use tether_events::sqlite::connection::open_in_memory_pool;

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    struct FakeState {
        events_tx: broadcast::Sender<BackendEvent>,
        alive: AtomicBool,
        writes: Mutex<Vec<Vec<u8>>>,
    }

    /// In-memory backend: records writes, lets tests inject output and exit.
    #[derive(Default)]
    struct FakeBackend {
        fail_spawn: AtomicBool,
        backends: DashMap<BackendId, Arc<FakeState>>,
        spawn_requests: Mutex<Vec<BackendSpawnOptions>>,
    }

    impl FakeBackend {
        fn state(&self, backend_id: &BackendId) -> Arc<FakeState> {
            Arc::clone(self.backends.get(backend_id).unwrap().value())
        }

        fn emit_output(&self, backend_id: &BackendId, data: &[u8]) {
            let _ = self
                .state(backend_id)
                .events_tx
                .send(BackendEvent::Output(bytes::Bytes::copy_from_slice(data)));
        }

        fn emit_exit(&self, backend_id: &BackendId, exit_code: Option<i32>) {
            let state = self.state(backend_id);
            state.alive.store(false, Ordering::Release);
            let _ = state.events_tx.send(BackendEvent::Exited {
                exit_code,
                signal: None,
            });
        }
    }

    #[async_trait]
    impl SessionBackend for FakeBackend {
        async fn create(
            &self,
            opts: BackendSpawnOptions,
        ) -> Result<crate::backend::BackendCreated, SessionError> {
            if self.fail_spawn.load(Ordering::Acquire) {
                return Err(SessionError::Spawn("injected".into()));
            }
            self.spawn_requests.lock().push(opts.clone());
            let backend_id = BackendId::generate();
            let (events_tx, _) = broadcast::channel(64);
            let _ = self.backends.insert(
                backend_id.clone(),
                Arc::new(FakeState {
                    events_tx,
                    alive: AtomicBool::new(true),
                    writes: Mutex::new(Vec::new()),
                }),
            );
            Ok(crate::backend::BackendCreated {
                backend_id,
                resumed: opts.resume,
            })
        }

        fn write(&self, backend_id: &BackendId, data: &[u8]) -> Result<(), SessionError> {
            self.state(backend_id).writes.lock().push(data.to_vec());
            Ok(())
        }

        fn resize(&self, _backend_id: &BackendId, _cols: u16, _rows: u16) -> Result<(), SessionError> {
            Ok(())
        }

        fn subscribe(
            &self,
            backend_id: &BackendId,
        ) -> Result<broadcast::Receiver<BackendEvent>, SessionError> {
            Ok(self.state(backend_id).events_tx.subscribe())
        }

        fn screen_buffer(&self, _backend_id: &BackendId) -> Vec<u8> {
            Vec::new()
        }

        fn is_alive(&self, backend_id: &BackendId) -> bool {
            self.backends
                .get(backend_id)
                .is_some_and(|s| s.alive.load(Ordering::Acquire))
        }

        fn terminate(&self, backend_id: &BackendId) -> Result<(), SessionError> {
            if let Some(state) = self.backends.get(backend_id) {
                state.alive.store(false, Ordering::Release);
                let _ = state.events_tx.send(BackendEvent::Exited {
                    exit_code: None,
                    signal: Some(15),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingDelivery(Mutex<Vec<BufferedEvent>>);
    impl LiveDelivery for RecordingDelivery {
        fn deliver(&self, event: &BufferedEvent) -> Result<(), SessionError> {
            self.0.lock().push(event.clone());
            Ok(())
        }
    }

    struct Harness {
        registry: SessionRegistry,
        backend: Arc<FakeBackend>,
        buffer: Arc<MessageBuffer>,
        index: Arc<WorkspaceIndex>,
        delivery: Arc<RecordingDelivery>,
        workspace: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let backend = Arc::new(FakeBackend::default());
        let buffer = Arc::new(MessageBuffer::with_defaults());
        let index = Arc::new(WorkspaceIndex::new(open_in_memory_pool().unwrap()));
        let delivery = Arc::new(RecordingDelivery::default());
        let workspace = tempfile::tempdir().unwrap();
        let gate = Arc::new(crate::workspace::AllowedRootGate::new(workspace.path()));

        let mut registry = SessionRegistry::new(
            Arc::clone(&buffer),
            Arc::clone(&delivery) as Arc<dyn LiveDelivery>,
            Arc::clone(&index),
            gate,
        );
        registry.register_backend(
            SessionType::Process,
            Arc::clone(&backend) as Arc<dyn SessionBackend>,
        );
        registry.register_backend(
            SessionType::Agent,
            Arc::clone(&backend) as Arc<dyn SessionBackend>,
        );

        Harness {
            registry,
            backend,
            buffer,
            index,
            delivery,
            workspace,
        }
    }

    fn opts(h: &Harness, session_type: &str) -> CreateSessionOptions {
        CreateSessionOptions {
            session_type: session_type.into(),
            workspace_path: h.workspace.path().to_string_lossy().into_owned(),
            ..CreateSessionOptions::default()
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn create_assigns_identity_and_indexes() {
        let h = harness();
        let session = h.registry.create_session(opts(&h, "shell")).await.unwrap();

        assert!(session.id.as_str().starts_with("sess_"));
        assert_eq!(session.session_type, SessionType::Process);
        assert_eq!(session.activity_state, ActivityState::Idle);
        assert!(!session.resume_flag);
        let base = h.workspace.path().file_name().unwrap().to_string_lossy();
        assert_eq!(session.title, format!("{base} process"));

        let indexed = h
            .index
            .sessions_for(&session.workspace_path)
            .unwrap();
        assert_eq!(indexed.len(), 1);
        assert_eq!(indexed[0].id, session.id);
    }

    #[tokio::test]
    async fn create_rejects_unknown_type_and_bad_workspace() {
        let h = harness();

        let mut bad_type = opts(&h, "tmux");
        bad_type.title = None;
        assert_matches!(
            h.registry.create_session(bad_type).await,
            Err(SessionError::UnsupportedType(_))
        );

        let mut bad_workspace = opts(&h, "process");
        bad_workspace.workspace_path = "/nonexistent/workspace".into();
        assert_matches!(
            h.registry.create_session(bad_workspace).await,
            Err(SessionError::WorkspaceRejected(_))
        );
        assert!(h.registry.list_sessions(None).is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_leaves_no_state() {
        let h = harness();
        h.backend.fail_spawn.store(true, Ordering::Release);
        assert_matches!(
            h.registry.create_session(opts(&h, "process")).await,
            Err(SessionError::Spawn(_))
        );
        assert!(h.registry.list_sessions(None).is_empty());
        assert!(h.index.all_sessions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn input_routes_and_steps_agent_state() {
        let h = harness();
        let session = h.registry.create_session(opts(&h, "agent")).await.unwrap();

        h.registry
            .send_to_session(&session.id, b"hello agent")
            .unwrap();
        let writes = h.backend.state(&session.backend_id).writes.lock().clone();
        assert_eq!(writes, vec![b"hello agent".to_vec()]);

        let current = h.registry.get_session(&session.id).unwrap();
        assert_eq!(current.activity_state, ActivityState::Processing);
        // The state change was announced.
        let replay = h.buffer.get_messages(&session.id, ReplayCursor::FromStart, None);
        assert!(replay.events.iter().any(|e| matches!(
            e.event,
            SessionEvent::State {
                state: ActivityState::Processing
            }
        )));
    }

    #[tokio::test]
    async fn input_to_unknown_session_is_noop() {
        let h = harness();
        h.registry
            .send_to_session(&SessionId::from_string("sess_ghost"), b"x")
            .unwrap();
        h.registry
            .resize_session(&SessionId::from_string("sess_ghost"), 80, 24)
            .unwrap();
    }

    #[tokio::test]
    async fn output_is_buffered_and_steps_process_state() {
        let h = harness();
        let session = h.registry.create_session(opts(&h, "process")).await.unwrap();

        h.backend.emit_output(&session.backend_id, b"$ ls\n");
        wait_until(|| h.buffer.has_messages(&session.id)).await;

        let replay = h.buffer.get_messages(&session.id, ReplayCursor::FromStart, None);
        assert!(replay.events.iter().any(|e| matches!(
            &e.event,
            SessionEvent::Output { data } if data == "$ ls\n"
        )));
        assert_eq!(
            h.registry.get_session(&session.id).unwrap().activity_state,
            ActivityState::Streaming
        );
        // Live delivery saw the same events, in sequence order.
        let delivered = h.delivery.0.lock().clone();
        assert!(!delivered.is_empty());
        for pair in delivered.windows(2) {
            assert!(pair[0].sequence < pair[1].sequence);
        }
    }

    #[tokio::test]
    async fn output_emitted_before_first_pump_poll_is_buffered() {
        let h = harness();
        let session = h.registry.create_session(opts(&h, "process")).await.unwrap();

        // No yield between create returning and the emit: the pump task has
        // not run yet, so this only survives if the subscription was taken
        // before the task was spawned.
        h.backend.emit_output(&session.backend_id, b"banner\n");
        wait_until(|| h.buffer.has_messages(&session.id)).await;

        let replay = h.buffer.get_messages(&session.id, ReplayCursor::FromStart, None);
        assert_eq!(replay.events[0].sequence, 0);
        assert_matches!(
            &replay.events[0].event,
            SessionEvent::Output { data } if data == "banner\n"
        );
    }

    #[tokio::test]
    async fn backend_exit_emits_ended_and_keeps_session() {
        let h = harness();
        let session = h.registry.create_session(opts(&h, "process")).await.unwrap();

        h.backend.emit_exit(&session.backend_id, Some(0));
        wait_until(|| {
            h.buffer
                .get_messages(&session.id, ReplayCursor::FromStart, None)
                .events
                .iter()
                .any(|e| matches!(e.event, SessionEvent::Ended { .. }))
        })
        .await;

        // The session record survives backend death.
        let current = h.registry.get_session(&session.id).unwrap();
        assert_eq!(current.activity_state, ActivityState::Idle);
        assert_eq!(current.id, session.id);
    }

    #[tokio::test]
    async fn terminate_is_idempotent_and_ordered() {
        let h = harness();
        let session = h.registry.create_session(opts(&h, "process")).await.unwrap();
        let _ = h.buffer.add_message(
            &session.id,
            SessionEvent::Output { data: "x".into() },
        );

        assert!(h.registry.terminate_session(&session.id).unwrap());
        assert!(!h.registry.terminate_session(&session.id).unwrap());

        assert!(h.registry.get_session(&session.id).is_none());
        assert!(!h.buffer.has_messages(&session.id));
        assert!(h.index.all_sessions().unwrap().is_empty());
        assert!(!h.backend.is_alive(&session.backend_id));
        // The ended notification reached the live transport.
        assert!(h
            .delivery
            .0
            .lock()
            .iter()
            .any(|e| matches!(e.event, SessionEvent::Ended { .. })));
    }

    #[tokio::test]
    async fn terminate_wins_exit_race() {
        let h = harness();
        let session = h.registry.create_session(opts(&h, "process")).await.unwrap();

        assert!(h.registry.terminate_session(&session.id).unwrap());
        // The fake backend's terminate broadcast an exit; give the pump a
        // chance to mishandle it.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let ended: Vec<_> = h
            .delivery
            .0
            .lock()
            .iter()
            .filter(|e| matches!(e.event, SessionEvent::Ended { .. }))
            .cloned()
            .collect();
        assert_eq!(ended.len(), 1, "exactly one ended notification");
    }

    #[tokio::test]
    async fn ensure_backend_respawns_preserving_identity() {
        let h = harness();
        let session = h.registry.create_session(opts(&h, "process")).await.unwrap();
        h.backend.emit_exit(&session.backend_id, Some(1));
        wait_until(|| !h.backend.is_alive(&session.backend_id)).await;

        let revived = h.registry.ensure_backend(&session.id).await.unwrap();
        assert_eq!(revived.id, session.id);
        assert_ne!(revived.backend_id, session.backend_id);
        assert!(revived.resume_flag, "respawn requested resume");
        let resumes: Vec<bool> = h.backend.spawn_requests.lock().iter().map(|o| o.resume).collect();
        assert_eq!(resumes, vec![false, true]);

        // Index follows the new backend id.
        let indexed = h.index.sessions_for(&session.workspace_path).unwrap();
        assert_eq!(indexed[0].backend_id, revived.backend_id);
        // And the transport was told.
        wait_until(|| {
            h.delivery
                .0
                .lock()
                .iter()
                .any(|e| matches!(e.event, SessionEvent::BackendChanged { .. }))
        })
        .await;
    }

    #[tokio::test]
    async fn ensure_backend_respawns_with_original_options() {
        let h = harness();
        let mut custom = opts(&h, "process");
        custom.command = Some("htop".into());
        custom.cols = Some(132);
        custom.rows = Some(50);
        let session = h.registry.create_session(custom).await.unwrap();

        h.backend.emit_exit(&session.backend_id, Some(1));
        wait_until(|| !h.backend.is_alive(&session.backend_id)).await;
        let _ = h.registry.ensure_backend(&session.id).await.unwrap();

        let requests = h.backend.spawn_requests.lock();
        assert_eq!(requests.len(), 2);
        // The replacement runs the same command at the same size.
        assert_eq!(requests[1].command.as_deref(), Some("htop"));
        assert_eq!((requests[1].cols, requests[1].rows), (132, 50));
        assert_eq!(
            requests[1].working_directory,
            requests[0].working_directory
        );
    }

    #[tokio::test]
    async fn ensure_backend_with_live_backend_is_noop() {
        let h = harness();
        let session = h.registry.create_session(opts(&h, "process")).await.unwrap();
        let same = h.registry.ensure_backend(&session.id).await.unwrap();
        assert_eq!(same.backend_id, session.backend_id);
        assert_eq!(h.backend.spawn_requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn ensure_backend_unknown_session_errors() {
        let h = harness();
        assert_matches!(
            h.registry
                .ensure_backend(&SessionId::from_string("sess_ghost"))
                .await,
            Err(SessionError::SessionNotFound(_))
        );
    }

    #[tokio::test]
    async fn list_sessions_filters_by_workspace() {
        let h = harness();
        let sub = h.workspace.path().join("other");
        std::fs::create_dir(&sub).unwrap();

        let a = h.registry.create_session(opts(&h, "process")).await.unwrap();
        let mut other = opts(&h, "process");
        other.workspace_path = sub.to_string_lossy().into_owned();
        let b = h.registry.create_session(other).await.unwrap();

        assert_eq!(h.registry.list_sessions(None).len(), 2);
        let filtered = h.registry.list_sessions(Some(&a.workspace_path));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, a.id);
        let filtered = h.registry.list_sessions(Some(&b.workspace_path));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, b.id);
    }

    #[tokio::test]
    async fn set_activity_state_validates_edges() {
        let h = harness();
        let session = h.registry.create_session(opts(&h, "process")).await.unwrap();

        // Process sessions have no `processing` state.
        assert!(!h
            .registry
            .set_activity_state(&session.id, ActivityState::Processing));
        assert!(h
            .registry
            .set_activity_state(&session.id, ActivityState::Streaming));
        assert_eq!(
            h.registry.get_session(&session.id).unwrap().activity_state,
            ActivityState::Streaming
        );
        assert!(h.registry.set_activity_state(&session.id, ActivityState::Idle));
    }

    #[tokio::test]
    async fn rename_announces_and_indexes() {
        let h = harness();
        let session = h.registry.create_session(opts(&h, "process")).await.unwrap();

        h.registry
            .rename_session(&session.id, "renamed".into())
            .unwrap();
        assert_eq!(h.registry.get_session(&session.id).unwrap().title, "renamed");
        let indexed = h.index.sessions_for(&session.workspace_path).unwrap();
        assert_eq!(indexed[0].title, "renamed");
        assert!(h.delivery.0.lock().iter().any(|e| matches!(
            &e.event,
            SessionEvent::TitleChanged { title } if title == "renamed"
        )));
    }

    #[tokio::test]
    async fn restore_from_index_rebuilds_metadata() {
        let h = harness();
        let session = h.registry.create_session(opts(&h, "process")).await.unwrap();

        // Fresh registry over the same index, as after a restart.
        let gate = Arc::new(crate::workspace::AllowedRootGate::new(h.workspace.path()));
        let mut restarted = SessionRegistry::new(
            Arc::new(MessageBuffer::with_defaults()),
            Arc::new(RecordingDelivery::default()) as Arc<dyn LiveDelivery>,
            Arc::clone(&h.index),
            gate,
        );
        restarted.register_backend(
            SessionType::Process,
            Arc::clone(&h.backend) as Arc<dyn SessionBackend>,
        );

        assert_eq!(restarted.restore_from_index().unwrap(), 1);
        let restored = restarted.get_session(&session.id).unwrap();
        assert_eq!(restored.title, session.title);
        assert_eq!(restored.workspace_path, session.workspace_path);
        assert_eq!(restored.backend_id, session.backend_id);

        // Restoring again is a no-op.
        assert_eq!(restarted.restore_from_index().unwrap(), 0);
    }
}
