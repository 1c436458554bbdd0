use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use wabridge_core::config::{AppConfig, ConfigError, LoadOptions};
use wabridge_core::plugin_config::ConfigurationStore;
use wabridge_db::migrations::definitions;
use wabridge_db::{
    connect_from_config, DbPool, MigrationError, MigrationRunner, SqlChannelRepository,
    SqlSessionRepository, TableNames,
};
use wabridge_plugin::host::{InMemoryHost, ServerSettings};
use wabridge_plugin::{Plugin, PluginError, PluginHooks, PluginOptions, WhatsappApp};

/// Team seeded into the in-memory host so webhook deliveries have a destination.
pub const DEFAULT_TEAM_NAME: &str = "main";

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub host: Arc<InMemoryHost>,
    pub plugin: Arc<Plugin>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] MigrationError),
    #[error("plugin activation failed: {0}")]
    Plugin(#[from] PluginError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        plugin_id = %config.host.plugin_id,
        "starting application bootstrap"
    );

    let db_pool = connect_from_config(&config.database)
        .await
        .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    if config.database.skip_migrations {
        info!(
            event_name = "system.bootstrap.migrations_skipped",
            correlation_id = "bootstrap",
            "database migrations skipped by configuration"
        );
    } else {
        let report = MigrationRunner::new(db_pool.clone(), config.database.table_prefix.clone())
            .with_lock_timeout(Duration::from_secs(config.database.migration_timeout_secs))
            .run(&definitions())
            .await
            .map_err(BootstrapError::Migration)?;
        info!(
            event_name = "system.bootstrap.migrations_applied",
            correlation_id = "bootstrap",
            applied = report.applied.len(),
            already_applied = report.already_applied,
            "database migrations applied"
        );
    }

    let host = Arc::new(InMemoryHost::new(
        ServerSettings { site_url: config.host.site_url.clone(), ..ServerSettings::default() },
        config.plugin.clone(),
    ));
    host.add_team(DEFAULT_TEAM_NAME, "Main").await;

    let tables = TableNames::with_prefix(&config.database.table_prefix);
    let app = Arc::new(WhatsappApp::new(
        host.clone(),
        Arc::new(SqlSessionRepository::new(db_pool.clone(), &tables)),
        Arc::new(SqlChannelRepository::new(db_pool.clone(), &tables)),
        Arc::new(ConfigurationStore::new()),
    ));
    let plugin = Arc::new(Plugin::new(app, PluginOptions::from_config(&config))?);
    plugin.on_activate().await?;
    info!(
        event_name = "system.bootstrap.plugin_activated",
        correlation_id = "bootstrap",
        "plugin activated"
    );

    Ok(Application { config, db_pool, host, plugin })
}
