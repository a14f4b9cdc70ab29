//! High-level `WorkspaceIndex` API.
//!
//! Composes the workspace and descriptor repositories into atomic,
//! session-centric methods. Every write runs inside a single SQLite
//! transaction — callers never observe partial state.
//!
//! The index is the durable record per workspace path: last-active
//! timestamp plus the session descriptors needed to rebuild the session
//! list after a process restart. Workspaces are created implicitly on
//! first activity and never deleted automatically.

use tracing::instrument;

use crate::errors::{EventsError, Result};
use crate::sqlite::connection::{ConnectionPool, PooledConnection};
use crate::sqlite::repositories::descriptor::DescriptorRepo;
use crate::sqlite::repositories::workspace::WorkspaceRepo;
use crate::sqlite::row_types::{DescriptorRow, WorkspaceRow};
use tether_core::ids::{BackendId, SessionId};
use tether_core::session::{SessionDescriptor, SessionType};

/// Durable workspace → session-descriptor index over a connection pool.
pub struct WorkspaceIndex {
    pool: ConnectionPool,
}

impl WorkspaceIndex {
    /// Wrap an opened pool (see [`crate::sqlite::connection::open_pool`]).
    #[must_use]
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Record (or refresh) a session under its workspace.
    ///
    /// Atomic: implicit workspace get-or-create, descriptor upsert, and the
    /// workspace activity touch happen in one transaction.
    #[instrument(skip(self, descriptor), fields(session_id = %descriptor.id, workspace_path))]
    pub fn record_session(
        &self,
        workspace_path: &str,
        descriptor: &SessionDescriptor,
    ) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let _ = WorkspaceRepo::get_or_create(&tx, workspace_path)?;
        DescriptorRepo::upsert(
            &tx,
            descriptor.id.as_str(),
            workspace_path,
            &descriptor.title,
            descriptor.session_type.as_str(),
            descriptor.backend_id.as_str(),
        )?;
        let _ = WorkspaceRepo::touch(&tx, workspace_path)?;
        tx.commit()?;
        Ok(())
    }

    /// Replace a session's backend id in place.
    pub fn update_backend_id(&self, session_id: &SessionId, backend_id: &BackendId) -> Result<bool> {
        let conn = self.conn()?;
        DescriptorRepo::update_backend_id(&conn, session_id.as_str(), backend_id.as_str())
    }

    /// Remove a session descriptor. Returns `true` if it existed.
    ///
    /// Touches the owning workspace's activity timestamp; the workspace row
    /// itself is kept.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn remove_session(&self, session_id: &SessionId) -> Result<bool> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let existing = DescriptorRepo::get(&tx, session_id.as_str())?;
        let removed = DescriptorRepo::delete(&tx, session_id.as_str())?;
        if let Some(row) = existing {
            let _ = WorkspaceRepo::touch(&tx, &row.workspace_path)?;
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Session descriptors recorded under one workspace path.
    pub fn sessions_for(&self, workspace_path: &str) -> Result<Vec<SessionDescriptor>> {
        let conn = self.conn()?;
        DescriptorRepo::list_for_workspace(&conn, workspace_path)?
            .into_iter()
            .map(row_to_core)
            .collect()
    }

    /// All recorded sessions with their workspace paths.
    pub fn all_sessions(&self) -> Result<Vec<(String, SessionDescriptor)>> {
        let conn = self.conn()?;
        DescriptorRepo::list_all(&conn)?
            .into_iter()
            .map(|row| {
                let path = row.workspace_path.clone();
                row_to_core(row).map(|d| (path, d))
            })
            .collect()
    }

    /// All workspaces, most recently active first.
    pub fn list_workspaces(&self) -> Result<Vec<WorkspaceRow>> {
        let conn = self.conn()?;
        WorkspaceRepo::list(&conn)
    }

    /// Update a workspace's last-active timestamp.
    pub fn touch(&self, workspace_path: &str) -> Result<bool> {
        let conn = self.conn()?;
        WorkspaceRepo::touch(&conn, workspace_path)
    }
}

fn row_to_core(row: DescriptorRow) -> Result<SessionDescriptor> {
    let session_type = SessionType::normalize(&row.session_type)
        .map_err(|_| EventsError::Internal(format!("corrupt session type: {}", row.session_type)))?;
    Ok(SessionDescriptor {
        id: SessionId::from_string(row.id),
        title: row.title,
        session_type,
        backend_id: BackendId::from_string(row.backend_id),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::connection::{open_in_memory_pool, open_pool};

    fn descriptor(id: &str, backend: &str) -> SessionDescriptor {
        SessionDescriptor {
            id: SessionId::from_string(id),
            title: "a process".into(),
            session_type: SessionType::Process,
            backend_id: BackendId::from_string(backend),
        }
    }

    fn index() -> WorkspaceIndex {
        WorkspaceIndex::new(open_in_memory_pool().unwrap())
    }

    #[test]
    fn record_creates_workspace_implicitly() {
        let index = index();
        index
            .record_session("/workspace/a", &descriptor("sess_1", "be_1"))
            .unwrap();

        let workspaces = index.list_workspaces().unwrap();
        assert_eq!(workspaces.len(), 1);
        assert_eq!(workspaces[0].path, "/workspace/a");
        assert_eq!(workspaces[0].session_count, 1);
    }

    #[test]
    fn sessions_for_round_trips_descriptor() {
        let index = index();
        let d = descriptor("sess_1", "be_1");
        index.record_session("/workspace/a", &d).unwrap();

        let sessions = index.sessions_for("/workspace/a").unwrap();
        assert_eq!(sessions, vec![d]);
    }

    #[test]
    fn update_backend_id_in_place() {
        let index = index();
        index
            .record_session("/workspace/a", &descriptor("sess_1", "be_1"))
            .unwrap();
        assert!(index
            .update_backend_id(
                &SessionId::from_string("sess_1"),
                &BackendId::from_string("be_2")
            )
            .unwrap());

        let sessions = index.sessions_for("/workspace/a").unwrap();
        assert_eq!(sessions[0].backend_id.as_str(), "be_2");
        assert_eq!(sessions[0].id.as_str(), "sess_1");
    }

    #[test]
    fn remove_session_keeps_workspace() {
        let index = index();
        index
            .record_session("/workspace/a", &descriptor("sess_1", "be_1"))
            .unwrap();
        assert!(index.remove_session(&SessionId::from_string("sess_1")).unwrap());
        assert!(!index.remove_session(&SessionId::from_string("sess_1")).unwrap());

        assert!(index.sessions_for("/workspace/a").unwrap().is_empty());
        // Workspace is never deleted automatically.
        assert_eq!(index.list_workspaces().unwrap().len(), 1);
    }

    #[test]
    fn all_sessions_spans_workspaces() {
        let index = index();
        index
            .record_session("/workspace/a", &descriptor("sess_1", "be_1"))
            .unwrap();
        index
            .record_session("/workspace/b", &descriptor("sess_2", "be_2"))
            .unwrap();

        let all = index.all_sessions().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, "/workspace/a");
        assert_eq!(all[1].0, "/workspace/b");
    }

    #[test]
    fn index_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let path = path.to_str().unwrap();

        {
            let index = WorkspaceIndex::new(open_pool(path).unwrap());
            index
                .record_session("/workspace/a", &descriptor("sess_1", "be_1"))
                .unwrap();
        }

        // Fresh pool over the same file — only metadata comes back.
        let index = WorkspaceIndex::new(open_pool(path).unwrap());
        let sessions = index.sessions_for("/workspace/a").unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id.as_str(), "sess_1");
    }
}
