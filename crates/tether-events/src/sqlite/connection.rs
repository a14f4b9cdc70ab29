//! Connection pool construction and schema migrations.

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::info;

use crate::errors::Result;

/// Pool of SQLite connections.
pub type ConnectionPool = r2d2::Pool<SqliteConnectionManager>;

/// One checked-out connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Open (or create) the index database and run migrations.
pub fn open_pool(path: &str) -> Result<ConnectionPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });
    let pool = r2d2::Pool::builder().build(manager)?;
    let conn = pool.get()?;
    run_migrations(&conn)?;
    info!(path, "workspace index opened");
    Ok(pool)
}

/// Single-connection in-memory pool for tests.
///
/// Capped at one connection because each `:memory:` connection is its own
/// database.
pub fn open_in_memory_pool() -> Result<ConnectionPool> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = r2d2::Pool::builder().max_size(1).build(manager)?;
    let conn = pool.get()?;
    run_migrations(&conn)?;
    Ok(pool)
}

/// Create the schema. Idempotent.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS workspaces (
             path            TEXT PRIMARY KEY,
             name            TEXT,
             created_at      TEXT NOT NULL,
             last_active_at  TEXT NOT NULL
         );

         CREATE TABLE IF NOT EXISTS session_descriptors (
             id              TEXT PRIMARY KEY,
             workspace_path  TEXT NOT NULL REFERENCES workspaces(path) ON DELETE CASCADE,
             title           TEXT NOT NULL,
             session_type    TEXT NOT NULL,
             backend_id      TEXT NOT NULL,
             created_at      TEXT NOT NULL
         );

         CREATE INDEX IF NOT EXISTS idx_descriptors_workspace
             ON session_descriptors(workspace_path);",
    )?;
    Ok(())
}
