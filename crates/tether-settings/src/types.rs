//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a partial settings file is valid — missing fields get their compiled
//! default during deserialization.

use serde::{Deserialize, Serialize};

use tether_core::constants as tether_defaults;

/// Root settings type for the Tether server.
///
/// # JSON Format
///
/// All field names are camelCase. Example:
///
/// ```json
/// {
///   "server": { "port": 4770, "allowedRoot": "/workspace" },
///   "buffer": { "capacity": 100, "ttlSecs": 300 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Server network settings.
    pub server: ServerSettings,
    /// Message buffer limits.
    pub buffer: BufferSettings,
    /// Process supervisor settings.
    pub supervisor: SupervisorSettings,
    /// Workspace index settings.
    pub index: IndexSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Server network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Root directory session workspaces must live under.
    pub allowed_root: String,
    /// Whether the auth gate must approve connections before input/resize.
    pub auth_required: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4770,
            allowed_root: "/".to_string(),
            auth_required: false,
        }
    }
}

/// Message buffer limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BufferSettings {
    /// Events retained per session before FIFO eviction.
    pub capacity: usize,
    /// Seconds of inactivity before a session buffer expires.
    pub ttl_secs: u64,
    /// Interval between periodic expiry sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            capacity: tether_defaults::BUFFER_CAPACITY,
            ttl_secs: tether_defaults::BUFFER_TTL_SECS,
            sweep_interval_secs: tether_defaults::BUFFER_SWEEP_INTERVAL_SECS,
        }
    }
}

/// Process supervisor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorSettings {
    /// Bytes of raw output kept as the coarse screen cache.
    pub scrollback_bytes: usize,
    /// Shell command for process-type sessions.
    pub shell: String,
    /// Command for agent-type sessions (an agent CLI run under a PTY).
    pub agent_command: String,
    /// Default PTY width.
    pub default_cols: u16,
    /// Default PTY height.
    pub default_rows: u16,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            scrollback_bytes: tether_defaults::SCROLLBACK_BYTES,
            shell: "/bin/bash".to_string(),
            agent_command: "claude".to_string(),
            default_cols: tether_defaults::DEFAULT_COLS,
            default_rows: tether_defaults::DEFAULT_ROWS,
        }
    }
}

/// Workspace index settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexSettings {
    /// SQLite database path. `:memory:` is accepted for tests.
    pub db_path: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            db_path: "tether.db".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive string.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "tether=info,info".to_string(),
        }
    }
}
