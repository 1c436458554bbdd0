use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plugin_config::{is_valid_webhook_url, PluginSettings};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub host: HostConfig,
    pub plugin: PluginSettings,
    pub whatsapp: WhatsappConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
    pub table_prefix: String,
    pub migration_timeout_secs: u64,
    pub skip_migrations: bool,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Host-level settings the plugin checks on activation.
#[derive(Clone, Debug)]
pub struct HostConfig {
    pub site_url: String,
    pub plugin_id: String,
    pub require_gif_picker: bool,
    pub require_public_links: bool,
}

#[derive(Clone, Debug)]
pub struct WhatsappConfig {
    pub access_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub table_prefix: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub site_url: Option<String>,
    pub whatsapp_access_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://wabridge.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
                table_prefix: "demo_plugin_".to_string(),
                migration_timeout_secs: 30,
                skip_migrations: false,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8065,
                graceful_shutdown_secs: 15,
            },
            host: HostConfig {
                site_url: "http://localhost:8065".to_string(),
                plugin_id: "com.mattermost.whatsapp-bridge".to_string(),
                require_gif_picker: true,
                require_public_links: true,
            },
            plugin: PluginSettings::with_defaults(),
            whatsapp: WhatsappConfig { access_token: None },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("wabridge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
            if let Some(table_prefix) = database.table_prefix {
                self.database.table_prefix = table_prefix;
            }
            if let Some(migration_timeout_secs) = database.migration_timeout_secs {
                self.database.migration_timeout_secs = migration_timeout_secs;
            }
            if let Some(skip_migrations) = database.skip_migrations {
                self.database.skip_migrations = skip_migrations;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(host) = patch.host {
            if let Some(site_url) = host.site_url {
                self.host.site_url = site_url;
            }
            if let Some(plugin_id) = host.plugin_id {
                self.host.plugin_id = plugin_id;
            }
            if let Some(require_gif_picker) = host.require_gif_picker {
                self.host.require_gif_picker = require_gif_picker;
            }
            if let Some(require_public_links) = host.require_public_links {
                self.host.require_public_links = require_public_links;
            }
        }

        if let Some(plugin) = patch.plugin {
            self.plugin = plugin;
        }

        if let Some(whatsapp) = patch.whatsapp {
            if let Some(access_token_value) = whatsapp.access_token {
                self.whatsapp.access_token = Some(secret_value(access_token_value));
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("WABRIDGE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("WABRIDGE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("WABRIDGE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("WABRIDGE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("WABRIDGE_DATABASE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("WABRIDGE_DATABASE_TABLE_PREFIX") {
            self.database.table_prefix = value;
        }
        if let Some(value) = read_env("WABRIDGE_DATABASE_MIGRATION_TIMEOUT_SECS") {
            self.database.migration_timeout_secs =
                parse_u64("WABRIDGE_DATABASE_MIGRATION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("WABRIDGE_DATABASE_SKIP_MIGRATIONS") {
            self.database.skip_migrations =
                parse_bool("WABRIDGE_DATABASE_SKIP_MIGRATIONS", &value)?;
        }

        if let Some(value) = read_env("WABRIDGE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("WABRIDGE_SERVER_PORT") {
            self.server.port = parse_u16("WABRIDGE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("WABRIDGE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("WABRIDGE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("WABRIDGE_HOST_SITE_URL") {
            self.host.site_url = value;
        }
        if let Some(value) = read_env("WABRIDGE_HOST_PLUGIN_ID") {
            self.host.plugin_id = value;
        }

        if let Some(value) = read_env("WABRIDGE_PLUGIN_USERNAME") {
            self.plugin.username = value;
        }
        if let Some(value) = read_env("WABRIDGE_PLUGIN_CHANNEL_NAME") {
            self.plugin.channel_name = value;
        }
        if let Some(value) = read_env("WABRIDGE_PLUGIN_WEBHOOK_URL") {
            self.plugin.webhook_url = value;
        }

        if let Some(value) = read_env("WABRIDGE_WHATSAPP_ACCESS_TOKEN") {
            self.whatsapp.access_token = Some(secret_value(value));
        }

        let log_level =
            read_env("WABRIDGE_LOGGING_LEVEL").or_else(|| read_env("WABRIDGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("WABRIDGE_LOGGING_FORMAT").or_else(|| read_env("WABRIDGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(table_prefix) = overrides.table_prefix {
            self.database.table_prefix = table_prefix;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(site_url) = overrides.site_url {
            self.host.site_url = site_url;
        }
        if let Some(access_token) = overrides.whatsapp_access_token {
            self.whatsapp.access_token = Some(secret_value(access_token));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_host(&self.host)?;
        validate_plugin(&self.plugin)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("wabridge.toml"), PathBuf::from("config/wabridge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    let prefix_is_identifier = !database.table_prefix.is_empty()
        && database.table_prefix.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if !prefix_is_identifier {
        return Err(ConfigError::Validation(
            "database.table_prefix must be non-empty and contain only [A-Za-z0-9_]".to_string(),
        ));
    }

    if database.migration_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "database.migration_timeout_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_host(host: &HostConfig) -> Result<(), ConfigError> {
    if !is_valid_webhook_url(&host.site_url) {
        return Err(ConfigError::Validation(
            "host.site_url must start with http:// or https://".to_string(),
        ));
    }

    if host.plugin_id.trim().is_empty() {
        return Err(ConfigError::Validation("host.plugin_id cannot be empty".to_string()));
    }

    Ok(())
}

fn validate_plugin(plugin: &PluginSettings) -> Result<(), ConfigError> {
    if plugin.username.trim().is_empty() {
        return Err(ConfigError::Validation("plugin.username cannot be empty".to_string()));
    }

    if plugin.channel_name.trim().is_empty() {
        return Err(ConfigError::Validation("plugin.channel_name cannot be empty".to_string()));
    }

    if !plugin.webhook_url.is_empty() && !plugin.has_valid_webhook_url() {
        return Err(ConfigError::Validation(
            "plugin.webhook_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    host: Option<HostPatch>,
    plugin: Option<PluginSettings>,
    whatsapp: Option<WhatsappPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
    table_prefix: Option<String>,
    migration_timeout_secs: Option<u64>,
    skip_migrations: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct HostPatch {
    site_url: Option<String>,
    plugin_id: Option<String>,
    require_gif_picker: Option<bool>,
    require_public_links: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsappPatch {
    access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
