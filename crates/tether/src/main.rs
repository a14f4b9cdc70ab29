//! Tether server binary.
//!
//! Wires the pieces together: settings, the workspace index, the replay
//! buffer, the PTY supervisors, the session registry, and the WebSocket
//! server. Run with `tether --config path/to/settings.json`.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use tether_core::logging::init_logging;
use tether_core::session::SessionType;
use tether_events::buffer::{LiveDelivery, MessageBuffer, spawn_sweeper};
use tether_events::index::WorkspaceIndex;
use tether_events::sqlite::connection::open_pool;
use tether_runtime::{AllowedRootGate, PtySupervisor, SessionRegistry};
use tether_server::auth::{AllowAll, AuthGate, StaticToken};
use tether_server::{AppState, AttachmentManager, build_router};
use tether_settings::loader::{load_settings, load_settings_from_path};
use tether_settings::types::TetherSettings;

/// Session orchestration and reconnection server.
#[derive(Parser, Debug)]
#[command(name = "tether", version, about)]
struct Cli {
    /// Path to a settings JSON file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind host (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Tracing filter directive (overrides settings).
    #[arg(long)]
    log_filter: Option<String>,
}

/// Settings layered as defaults ← file ← env ← CLI flags.
fn effective_settings(cli: &Cli) -> anyhow::Result<TetherSettings> {
    let mut settings = match &cli.config {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => load_settings().context("loading settings")?,
    };
    if let Some(host) = &cli.host {
        settings.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(filter) = &cli.log_filter {
        settings.logging.filter = filter.clone();
    }
    Ok(settings)
}

/// Assemble the shared server state from settings.
fn build_state(settings: &TetherSettings) -> anyhow::Result<AppState> {
    let pool = open_pool(&settings.index.db_path)
        .with_context(|| format!("opening workspace index at {}", settings.index.db_path))?;
    let index = Arc::new(WorkspaceIndex::new(pool));

    let buffer = Arc::new(MessageBuffer::new(
        settings.buffer.capacity,
        Duration::from_secs(settings.buffer.ttl_secs),
    ));
    let attachments = Arc::new(AttachmentManager::new());

    let mut registry = SessionRegistry::new(
        Arc::clone(&buffer),
        Arc::clone(&attachments) as Arc<dyn LiveDelivery>,
        index,
        Arc::new(AllowedRootGate::new(&settings.server.allowed_root)),
    );
    registry.register_backend(
        SessionType::Process,
        Arc::new(PtySupervisor::new(
            "shell",
            &settings.supervisor.shell,
            settings.supervisor.scrollback_bytes,
        )),
    );
    registry.register_backend(
        SessionType::Agent,
        Arc::new(PtySupervisor::new(
            "agent",
            &settings.supervisor.agent_command,
            settings.supervisor.scrollback_bytes,
        )),
    );

    let restored = registry
        .restore_from_index()
        .context("restoring sessions from index")?;
    if restored > 0 {
        info!(restored, "restored sessions from index");
    }

    // The pre-shared token comes from the environment so it never lands in
    // the settings file.
    let (auth, auth_required): (Arc<dyn AuthGate>, bool) = if settings.server.auth_required {
        match std::env::var("TETHER_AUTH_TOKEN") {
            Ok(token) if !token.is_empty() => (Arc::new(StaticToken::new(token)), true),
            _ => {
                warn!("authRequired is set but TETHER_AUTH_TOKEN is unset; disabling auth");
                (Arc::new(AllowAll), false)
            }
        }
    } else {
        (Arc::new(AllowAll), false)
    };

    Ok(AppState {
        registry: Arc::new(registry),
        attachments,
        buffer,
        auth,
        auth_required,
        start_time: Instant::now(),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                let _ = sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = effective_settings(&cli)?;
    init_logging(&settings.logging.filter);

    info!(
        host = %settings.server.host,
        port = settings.server.port,
        allowed_root = %settings.server.allowed_root,
        db_path = %settings.index.db_path,
        "starting tether"
    );

    let state = build_state(&settings)?;
    let _sweeper = spawn_sweeper(
        Arc::clone(&state.buffer),
        Duration::from_secs(settings.buffer.sweep_interval_secs),
    );

    let app = build_router(state);
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("tether stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["tether"]);
        assert!(cli.config.is_none());
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from(["tether", "--host", "0.0.0.0", "--port", "9000"]);
        let settings = effective_settings(&cli).unwrap();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
    }

    #[test]
    fn config_file_feeds_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"server": {{"port": 5151}}}}"#).unwrap();

        let cli = Cli::parse_from([
            "tether",
            "--config",
            file.path().to_str().unwrap(),
        ]);
        let settings = effective_settings(&cli).unwrap();
        assert_eq!(settings.server.port, 5151);
    }

    #[test]
    fn state_boots_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = TetherSettings::default();
        settings.index.db_path = dir
            .path()
            .join("tether.db")
            .to_string_lossy()
            .into_owned();
        settings.server.allowed_root = dir.path().to_string_lossy().into_owned();

        let state = build_state(&settings).unwrap();
        assert!(!state.auth_required);
        assert_eq!(state.registry.list_sessions(None).len(), 0);
    }
}
