//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `filter` is an `EnvFilter` directive string (e.g. `"tether=debug,info"`);
/// the `RUST_LOG` env var takes precedence when set. Safe to call once from
/// `main`; subsequent calls are ignored.
pub fn init_logging(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}
