pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use wabridge_core::config::ConfigOverrides;
use wabridge_db::migrations::DEFAULT_TABLE_PREFIX;

#[derive(Debug, Parser)]
#[command(
    name = "wabridge",
    about = "WhatsApp bridge operator CLI",
    long_about = "Apply or render the bridge's schema migrations and inspect configuration.",
    after_help = "Examples:\n  wabridge migrate\n  wabridge render-migrations --dialect mysql\n  \
                  wabridge config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate {
        #[arg(long, help = "Database URL, overriding config and environment")]
        database_url: Option<String>,
        #[arg(long, help = "Table prefix, overriding config and environment")]
        table_prefix: Option<String>,
    },
    #[command(about = "Print the migration DDL for a SQL dialect")]
    RenderMigrations {
        #[arg(long, default_value = "postgres", help = "postgres, mysql or sqlite")]
        dialect: String,
        #[arg(long, default_value = DEFAULT_TABLE_PREFIX)]
        table_prefix: String,
        #[arg(long, help = "Schema used to qualify table names")]
        schema: Option<String>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate { database_url, table_prefix } => {
            commands::migrate::run(ConfigOverrides {
                database_url,
                table_prefix,
                ..ConfigOverrides::default()
            })
        }
        Command::RenderMigrations { dialect, table_prefix, schema } => {
            commands::render::run(&dialect, &table_prefix, schema.as_deref())
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
