use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use toml::Value;
use wabridge_core::config::{AppConfig, LoadOptions};

struct Sources {
    file_doc: Option<Value>,
    file_path: Option<PathBuf>,
}

impl Sources {
    fn detect() -> Self {
        let file_path = detect_config_path();
        let file_doc = load_config_file_doc(file_path.as_deref());
        Self { file_doc, file_path }
    }

    fn line(&self, key_path: &str, env_key: Option<&str>, value: &str) -> String {
        render_line(key_path, value, self.source(key_path, env_key))
    }

    fn source(&self, key_path: &str, env_key: Option<&str>) -> String {
        if let Some(env_key) = env_key {
            if env::var_os(env_key).is_some() {
                return format!("env ({env_key})");
            }
        }

        if let Some(doc) = &self.file_doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .file_path
                    .as_deref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };
    let sources = Sources::detect();

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    let database = &config.database;
    lines.push(sources.line("database.url", Some("WABRIDGE_DATABASE_URL"), &database.url));
    lines.push(sources.line(
        "database.max_connections",
        Some("WABRIDGE_DATABASE_MAX_CONNECTIONS"),
        &database.max_connections.to_string(),
    ));
    lines.push(sources.line(
        "database.timeout_secs",
        Some("WABRIDGE_DATABASE_TIMEOUT_SECS"),
        &database.timeout_secs.to_string(),
    ));
    lines.push(sources.line(
        "database.table_prefix",
        Some("WABRIDGE_DATABASE_TABLE_PREFIX"),
        &database.table_prefix,
    ));
    lines.push(sources.line(
        "database.migration_timeout_secs",
        Some("WABRIDGE_DATABASE_MIGRATION_TIMEOUT_SECS"),
        &database.migration_timeout_secs.to_string(),
    ));
    lines.push(sources.line(
        "database.skip_migrations",
        Some("WABRIDGE_DATABASE_SKIP_MIGRATIONS"),
        &database.skip_migrations.to_string(),
    ));

    lines.push(sources.line(
        "server.bind_address",
        Some("WABRIDGE_SERVER_BIND_ADDRESS"),
        &config.server.bind_address,
    ));
    lines.push(sources.line(
        "server.port",
        Some("WABRIDGE_SERVER_PORT"),
        &config.server.port.to_string(),
    ));
    lines.push(sources.line(
        "server.graceful_shutdown_secs",
        Some("WABRIDGE_SERVER_GRACEFUL_SHUTDOWN_SECS"),
        &config.server.graceful_shutdown_secs.to_string(),
    ));

    lines.push(sources.line(
        "host.site_url",
        Some("WABRIDGE_HOST_SITE_URL"),
        &config.host.site_url,
    ));
    lines.push(sources.line(
        "host.plugin_id",
        Some("WABRIDGE_HOST_PLUGIN_ID"),
        &config.host.plugin_id,
    ));
    lines.push(sources.line(
        "host.require_gif_picker",
        None,
        &config.host.require_gif_picker.to_string(),
    ));
    lines.push(sources.line(
        "host.require_public_links",
        None,
        &config.host.require_public_links.to_string(),
    ));

    lines.push(sources.line(
        "plugin.username",
        Some("WABRIDGE_PLUGIN_USERNAME"),
        &config.plugin.username,
    ));
    lines.push(sources.line(
        "plugin.channel_name",
        Some("WABRIDGE_PLUGIN_CHANNEL_NAME"),
        &config.plugin.channel_name,
    ));
    lines.push(sources.line(
        "plugin.webhook_url",
        Some("WABRIDGE_PLUGIN_WEBHOOK_URL"),
        or_unset(&config.plugin.webhook_url),
    ));
    let random_secret =
        if config.plugin.random_secret.is_empty() { "<unset>" } else { "<redacted>" };
    lines.push(sources.line("plugin.random_secret", None, random_secret));

    let access_token =
        if config.whatsapp.access_token.is_some() { "<redacted>" } else { "<unset>" };
    lines.push(sources.line(
        "whatsapp.access_token",
        Some("WABRIDGE_WHATSAPP_ACCESS_TOKEN"),
        access_token,
    ));

    lines.push(sources.line(
        "logging.level",
        Some("WABRIDGE_LOGGING_LEVEL"),
        &config.logging.level,
    ));
    lines.push(sources.line(
        "logging.format",
        Some("WABRIDGE_LOGGING_FORMAT"),
        &format!("{:?}", config.logging.format),
    ));

    lines.join("\n")
}

fn or_unset(value: &str) -> &str {
    if value.is_empty() {
        "<unset>"
    } else {
        value
    }
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("wabridge.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/wabridge.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
