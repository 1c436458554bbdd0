mod api;
mod auth;
mod bootstrap;
mod error;
mod health;
mod passthrough;

use std::time::Duration;

use anyhow::Result;
use axum::Router;
use tracing::{info, warn};

use wabridge_core::config::{AppConfig, LoadOptions};
use wabridge_plugin::host::HostApi;
use wabridge_plugin::PluginHooks;

fn init_logging(config: &AppConfig) {
    use tracing::Level;
    use wabridge_core::config::LogFormat::*;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging comes up before anything else can log.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let state = api::ApiState::new(app.plugin.clone());
    let router = Router::new()
        .merge(api::router(state.clone()))
        .merge(passthrough::router(state))
        .merge(health::router(app.db_pool.clone()));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let teams = app.host.get_teams().await.map(|teams| teams.len()).unwrap_or_default();
    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        teams,
        "wabridge-server listening"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "wabridge-server stopping"
    );
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, app.plugin.on_deactivate()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!(
            event_name = "system.server.deactivate_failed",
            correlation_id = "shutdown",
            error = %error,
            "plugin deactivation failed"
        ),
        Err(_) => warn!(
            event_name = "system.server.deactivate_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "plugin deactivation did not finish in time"
        ),
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for ctrl-c; shutting down"
        );
    }
}
