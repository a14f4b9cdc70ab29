//! Workspace repository — CRUD for the `workspaces` table.
//!
//! A workspace is a project directory. It is created implicitly the first
//! time a session records activity under its path and is never deleted
//! automatically.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row_types::WorkspaceRow;
use tether_core::events::now_rfc3339;

/// Workspace repository — stateless, every method takes `&Connection`.
pub struct WorkspaceRepo;

const SELECT_COLUMNS: &str = "w.path, w.name, w.created_at, w.last_active_at,
    (SELECT COUNT(*) FROM session_descriptors WHERE workspace_path = w.path) AS session_count";

fn row_to_workspace(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkspaceRow> {
    Ok(WorkspaceRow {
        path: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        last_active_at: row.get(3)?,
        session_count: row.get(4)?,
    })
}

impl WorkspaceRepo {
    /// Create a new workspace record.
    pub fn create(conn: &Connection, path: &str, name: Option<&str>) -> Result<WorkspaceRow> {
        let now = now_rfc3339();
        let _ = conn.execute(
            "INSERT INTO workspaces (path, name, created_at, last_active_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![path, name, now, now],
        )?;
        Ok(WorkspaceRow {
            path: path.to_string(),
            name: name.map(String::from),
            created_at: now.clone(),
            last_active_at: now,
            session_count: 0,
        })
    }

    /// Get workspace by path, with session count.
    pub fn get_by_path(conn: &Connection, path: &str) -> Result<Option<WorkspaceRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM workspaces w WHERE w.path = ?1"),
                params![path],
                row_to_workspace,
            )
            .optional()?;
        Ok(row)
    }

    /// Get existing workspace by path, or create a new one.
    pub fn get_or_create(conn: &Connection, path: &str) -> Result<WorkspaceRow> {
        if let Some(ws) = Self::get_by_path(conn, path)? {
            return Ok(ws);
        }
        Self::create(conn, path, None)
    }

    /// List all workspaces ordered by last activity (most recent first).
    pub fn list(conn: &Connection) -> Result<Vec<WorkspaceRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM workspaces w ORDER BY w.last_active_at DESC"
        ))?;
        let rows = stmt
            .query_map([], row_to_workspace)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Update last activity timestamp to now. Returns `true` if the row existed.
    pub fn touch(conn: &Connection, path: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE workspaces SET last_active_at = ?1 WHERE path = ?2",
            params![now_rfc3339(), path],
        )?;
        Ok(changed > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
