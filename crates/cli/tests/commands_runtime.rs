use std::env;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use wabridge_cli::commands::{config, migrate, render};
use wabridge_core::config::ConfigOverrides;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("WABRIDGE_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run(ConfigOverrides::default());
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.starts_with("applied 5 migration(s), 0 already applied"));
        assert!(message.contains("`demo_plugin_`"));
    });
}

#[test]
fn migrate_is_idempotent_against_a_file_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("bridge.db").display());

    with_env(&[], || {
        let overrides = || ConfigOverrides {
            database_url: Some(url.clone()),
            table_prefix: Some("ops_".to_string()),
            ..ConfigOverrides::default()
        };

        let first = migrate::run(overrides());
        assert_eq!(first.exit_code, 0, "first run: {}", first.output);

        let second = migrate::run(overrides());
        assert_eq!(second.exit_code, 0, "second run: {}", second.output);
        let payload = parse_payload(&second.output);
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.starts_with("applied 0 migration(s), 5 already applied"));
        assert!(message.contains("`ops_`"));
    });
}

#[test]
fn migrate_reports_config_failures() {
    with_env(&[("WABRIDGE_DATABASE_URL", "postgres://nope")], || {
        let result = migrate::run(ConfigOverrides::default());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn render_migrations_prints_prefixed_ddl() {
    let result = render::run("postgres", "p_", None);
    assert_eq!(result.exit_code, 0);
    assert!(result.output.contains("-- 000001_create_session"));
    assert!(result.output.contains("p_session"));
    assert!(result.output.contains("p_channel"));

    let mysql = render::run("mysql", "p_", Some("mattermost"));
    assert_eq!(mysql.exit_code, 0);
    assert!(mysql.output.contains("INFORMATION_SCHEMA"));
    assert!(mysql.output.contains("`mattermost`"));
}

#[test]
fn render_migrations_rejects_unknown_dialects() {
    let result = render::run("oracle", "p_", None);
    assert_eq!(result.exit_code, 2);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "render-migrations");
    assert_eq!(payload["error_class"], "invalid_dialect");
}

#[test]
fn config_attributes_env_sources_and_redacts_the_token() {
    with_env(
        &[
            ("WABRIDGE_DATABASE_URL", "sqlite::memory:"),
            ("WABRIDGE_WHATSAPP_ACCESS_TOKEN", "EAAG-secret-token"),
        ],
        || {
            let output = config::run();
            assert!(output.contains(
                "- database.url = sqlite::memory: (source: env (WABRIDGE_DATABASE_URL))"
            ));
            assert!(output.contains("- whatsapp.access_token = <redacted>"));
            assert!(!output.contains("EAAG-secret-token"));
            assert!(output.contains("- server.port = 8065 (source: default)"));
        },
    );
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "WABRIDGE_DATABASE_URL",
        "WABRIDGE_DATABASE_MAX_CONNECTIONS",
        "WABRIDGE_DATABASE_TIMEOUT_SECS",
        "WABRIDGE_DATABASE_TABLE_PREFIX",
        "WABRIDGE_DATABASE_MIGRATION_TIMEOUT_SECS",
        "WABRIDGE_DATABASE_SKIP_MIGRATIONS",
        "WABRIDGE_SERVER_BIND_ADDRESS",
        "WABRIDGE_SERVER_PORT",
        "WABRIDGE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "WABRIDGE_HOST_SITE_URL",
        "WABRIDGE_HOST_PLUGIN_ID",
        "WABRIDGE_PLUGIN_USERNAME",
        "WABRIDGE_PLUGIN_CHANNEL_NAME",
        "WABRIDGE_PLUGIN_WEBHOOK_URL",
        "WABRIDGE_WHATSAPP_ACCESS_TOKEN",
        "WABRIDGE_LOGGING_LEVEL",
        "WABRIDGE_LOGGING_FORMAT",
        "WABRIDGE_LOG_LEVEL",
        "WABRIDGE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
