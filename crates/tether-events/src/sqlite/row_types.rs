//! Row structs mirroring the index tables.

use serde::{Deserialize, Serialize};

/// A `workspaces` table row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRow {
    /// Absolute filesystem path (primary key).
    pub path: String,
    /// Optional display name.
    pub name: Option<String>,
    /// ISO 8601 creation time.
    pub created_at: String,
    /// ISO 8601 time of last session activity.
    pub last_active_at: String,
    /// Number of descriptors currently recorded under this workspace.
    pub session_count: i64,
}

/// A `session_descriptors` table row.
#[derive(Clone, Debug, PartialEq)]
pub struct DescriptorRow {
    /// Session id.
    pub id: String,
    /// Owning workspace path.
    pub workspace_path: String,
    /// Display title.
    pub title: String,
    /// Canonical session type tag.
    pub session_type: String,
    /// Backend id at last update.
    pub backend_id: String,
    /// ISO 8601 creation time.
    pub created_at: String,
}
