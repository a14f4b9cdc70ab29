//! Session descriptor repository — CRUD for the `session_descriptors` table.
//!
//! Descriptors are the durable half of a session: enough metadata to rebuild
//! the session list after a restart. The live half (the backend process) is
//! never persisted.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row_types::DescriptorRow;
use tether_core::events::now_rfc3339;

/// Session descriptor repository — stateless, every method takes `&Connection`.
pub struct DescriptorRepo;

fn row_to_descriptor(row: &rusqlite::Row<'_>) -> rusqlite::Result<DescriptorRow> {
    Ok(DescriptorRow {
        id: row.get(0)?,
        workspace_path: row.get(1)?,
        title: row.get(2)?,
        session_type: row.get(3)?,
        backend_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

const COLUMNS: &str = "id, workspace_path, title, session_type, backend_id, created_at";

impl DescriptorRepo {
    /// Insert or replace a descriptor.
    pub fn upsert(
        conn: &Connection,
        id: &str,
        workspace_path: &str,
        title: &str,
        session_type: &str,
        backend_id: &str,
    ) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO session_descriptors
                 (id, workspace_path, title, session_type, backend_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 backend_id = excluded.backend_id",
            params![id, workspace_path, title, session_type, backend_id, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Replace the backend id for a session. Returns `true` if the row existed.
    pub fn update_backend_id(conn: &Connection, id: &str, backend_id: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE session_descriptors SET backend_id = ?1 WHERE id = ?2",
            params![backend_id, id],
        )?;
        Ok(changed > 0)
    }

    /// Get a descriptor by session id.
    pub fn get(conn: &Connection, id: &str) -> Result<Option<DescriptorRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM session_descriptors WHERE id = ?1"),
                params![id],
                row_to_descriptor,
            )
            .optional()?;
        Ok(row)
    }

    /// Descriptors under one workspace, oldest first.
    pub fn list_for_workspace(conn: &Connection, workspace_path: &str) -> Result<Vec<DescriptorRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM session_descriptors
             WHERE workspace_path = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt
            .query_map(params![workspace_path], row_to_descriptor)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All descriptors, oldest first.
    pub fn list_all(conn: &Connection) -> Result<Vec<DescriptorRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM session_descriptors ORDER BY created_at ASC"
        ))?;
        let rows = stmt
            .query_map([], row_to_descriptor)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a descriptor. Returns `true` if a row was deleted.
    pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM session_descriptors WHERE id = ?1",
            params![id],
        )?;
        Ok(changed > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
