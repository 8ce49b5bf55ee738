//! Mandy server binary: the HTTP control plane for per-room voice agents.
//!
//! Starts an axum HTTP server with structured logging, optionally joins an
//! autostart room, and shuts every agent down on SIGTERM/SIGINT.

use mandy_server::config::{self, AutostartConfig};
use mandy_server::registry::{AgentRegistry, StartParams};
use mandy_server::{app, AppState};
use mandy_types::{derive_domain, room_name_from_url, RoomKey};
use mandy_voice::sim::Simulation;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("MANDY_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

/// Starts an agent in the configured autostart room.
async fn autostart(registry: &AgentRegistry, autostart: &AutostartConfig) {
    let Some(room_url) = autostart.room_url.clone() else {
        return;
    };
    let Some(room) = room_name_from_url(&room_url) else {
        tracing::warn!(room_url = %room_url, "autostart room URL has no room name, skipping");
        return;
    };

    let key = RoomKey::new(derive_domain(None, &room_url), room);
    tracing::info!(room = %key, "autostarting agent");
    let state = registry
        .start_or_reuse(StartParams {
            key,
            room_url,
            token: autostart.token.clone(),
            directive: autostart.directive.clone(),
        })
        .await;
    tracing::info!(status = %state.status, "autostart agent launched");
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );
    tracing::debug!(agent = ?config.agent, autostart = ?config.autostart, "agent configuration");

    // No media adapter is linked into this binary; rooms run on the
    // in-process simulation.
    tracing::warn!("using simulated room transport and pipeline engine");
    let backend = Simulation::new().backend();
    let registry = Arc::new(AgentRegistry::new(backend, config.agent.clone()));

    autostart(&registry, &config.autostart).await;

    // Build application
    let state = AppState::new(Arc::clone(&registry))
        .with_cors_origins(config.server.cors_origins.clone());
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting mandy server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    registry.shutdown_all().await;
    tracing::info!("mandy server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
