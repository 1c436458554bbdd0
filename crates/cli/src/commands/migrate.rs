use std::time::Duration;

use wabridge_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use wabridge_db::migrations::definitions;
use wabridge_db::{connect_from_config, MigrationRunner};

use crate::commands::CommandResult;

pub fn run(overrides: ConfigOverrides) -> CommandResult {
    let config = match AppConfig::load(LoadOptions { overrides, ..LoadOptions::default() }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let report = MigrationRunner::new(pool.clone(), config.database.table_prefix.clone())
            .with_lock_timeout(Duration::from_secs(config.database.migration_timeout_secs))
            .run(&definitions())
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(report)
    });

    match result {
        Ok(report) => {
            let mut message = format!(
                "applied {} migration(s), {} already applied (table prefix `{}`)",
                report.applied.len(),
                report.already_applied,
                config.database.table_prefix
            );
            if !report.removed_orphans.is_empty() {
                message.push_str(&format!(
                    "; removed {} orphaned tracking row(s)",
                    report.removed_orphans.len()
                ));
            }
            CommandResult::success("migrate", message)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
