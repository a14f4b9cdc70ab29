//! # tether-settings
//!
//! Configuration management with layered sources for the Tether server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`TetherSettings::default()`]
//! 2. **Settings file** — JSON, deep-merged over defaults
//! 3. **Environment variables** — `TETHER_*` overrides (highest priority)
//!
//! There is no global singleton: `main` calls [`load_settings`] once and
//! passes the value down by `Arc`. Lifecycle is explicit, not implied by
//! import order.

// Tests mutate process env vars, which is `unsafe` in edition 2024.
#![cfg_attr(not(test), deny(unsafe_code))]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path};
pub use types::*;
