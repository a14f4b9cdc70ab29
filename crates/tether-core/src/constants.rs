//! Compiled default limits and sizes.
//!
//! These are the defaults baked into [`tether-settings`]; operators can
//! override them via the settings file or `TETHER_*` env vars.

/// Maximum buffered events retained per session before FIFO eviction.
pub const BUFFER_CAPACITY: usize = 100;

/// Seconds of inactivity after which a session's buffer is expired.
pub const BUFFER_TTL_SECS: u64 = 300;

/// Interval between periodic expired-buffer sweeps.
pub const BUFFER_SWEEP_INTERVAL_SECS: u64 = 60;

/// Bytes of raw PTY output kept as the coarse "last screenful" cache.
pub const SCROLLBACK_BYTES: usize = 5000;

/// Default PTY width.
pub const DEFAULT_COLS: u16 = 80;

/// Default PTY height.
pub const DEFAULT_ROWS: u16 = 24;

/// Capacity of a backend's output broadcast channel.
pub const BACKEND_CHANNEL_CAPACITY: usize = 1024;
