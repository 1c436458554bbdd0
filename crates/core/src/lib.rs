pub mod config;
pub mod domain;
pub mod errors;
pub mod ids;
pub mod plugin_config;

pub use domain::channel::Channel;
pub use domain::session::{Session, SessionId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use plugin_config::{ConfigurationStore, PluginConfiguration, PluginSettings};
