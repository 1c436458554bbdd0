pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect_from_config, connect_with_settings, ping, DbPool};
pub use migrations::{run_pending, MigrationError, MigrationReport, MigrationRunner};
pub use repositories::{
    ChannelRepository, InMemoryChannelRepository, InMemorySessionRepository, RepositoryError,
    SessionRepository, SqlChannelRepository, SqlSessionRepository, TableNames,
};
