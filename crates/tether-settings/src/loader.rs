//! Settings loading: defaults ← file deep-merge ← env overrides.

use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::errors::{Result, SettingsError};
use crate::types::TetherSettings;

/// Deep-merge `overlay` into `base`.
///
/// Objects merge recursively; any other value in `overlay` replaces the
/// value in `base`. `null` in `overlay` removes nothing — it replaces,
/// matching ordinary JSON semantics.
#[must_use]
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => overlay_val,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Load settings from an explicit file path, with env overrides applied.
///
/// A missing file is not an error — defaults are used, matching first-run
/// behavior.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let file_value: Value = serde_json::from_str(&raw)?;
        deep_merge(defaults, file_value)
    } else {
        defaults
    };

    let mut settings: TetherSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings)?;
    Ok(settings)
}

/// Load settings with defaults and env overrides only (no file).
pub fn load_settings() -> Result<TetherSettings> {
    let mut settings = TetherSettings::default();
    apply_env_overrides(&mut settings)?;
    Ok(settings)
}

/// Apply `TETHER_*` env var overrides (highest priority layer).
fn apply_env_overrides(settings: &mut TetherSettings) -> Result<()> {
    if let Ok(host) = std::env::var("TETHER_HOST") {
        settings.server.host = host;
    }
    if let Ok(port) = std::env::var("TETHER_PORT") {
        settings.server.port = parse_env("TETHER_PORT", &port)?;
    }
    if let Ok(root) = std::env::var("TETHER_ALLOWED_ROOT") {
        settings.server.allowed_root = root;
    }
    if let Ok(db) = std::env::var("TETHER_DB_PATH") {
        settings.index.db_path = db;
    }
    if let Ok(cap) = std::env::var("TETHER_BUFFER_CAPACITY") {
        settings.buffer.capacity = parse_env("TETHER_BUFFER_CAPACITY", &cap)?;
    }
    if let Ok(ttl) = std::env::var("TETHER_BUFFER_TTL_SECS") {
        settings.buffer.ttl_secs = parse_env("TETHER_BUFFER_TTL_SECS", &ttl)?;
    }
    if let Ok(shell) = std::env::var("TETHER_SHELL") {
        settings.supervisor.shell = shell;
    }
    if let Ok(cmd) = std::env::var("TETHER_AGENT_COMMAND") {
        settings.supervisor.agent_command = cmd;
    }
    if let Ok(filter) = std::env::var("TETHER_LOG") {
        settings.logging.filter = filter;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        warn!(var, value, "invalid env override");
        SettingsError::InvalidEnvOverride {
            var: var.to_string(),
            value: value.to_string(),
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
