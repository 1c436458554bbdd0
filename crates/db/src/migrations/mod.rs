//! Schema migrations defined as data and applied through a prefix-aware runner.

pub mod ddl;
pub mod lock;
pub mod runner;

pub use ddl::{
    ColumnDef, ColumnType, Constraint, DdlError, DdlOp, Dialect, RenderContext, Statement,
};
pub use lock::SqlLock;
pub use runner::{MigrationError, MigrationReport, MigrationRunner};

use crate::DbPool;

pub const DEFAULT_TABLE_PREFIX: &str = "demo_plugin_";
pub const MIGRATION_LOCK_KEY: &str = "plugin-demo-lock-key";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Ddl(DdlOp),
    /// Runs only when rendering for `dialect`.
    Raw { dialect: Dialect, sql: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub steps: Vec<Step>,
}

impl Migration {
    pub fn render(&self, ctx: &RenderContext) -> Result<Vec<Statement>, DdlError> {
        let mut statements = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            match step {
                Step::Ddl(op) => statements.push(ctx.render(op)?),
                Step::Raw { dialect, sql } if *dialect == ctx.dialect => {
                    statements.push(Statement { sql: sql.clone(), guard: None })
                }
                Step::Raw { .. } => {}
            }
        }
        Ok(statements)
    }

    pub fn label(&self) -> String {
        format!("{:06}_{}", self.version, self.name)
    }
}

/// The bridge schema, in version order.
pub fn definitions() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "create_session",
            steps: vec![
                Step::Ddl(DdlOp::CreateTable {
                    table: "session".to_owned(),
                    columns: vec![
                        ColumnDef::required("id", ColumnType::Id),
                        ColumnDef::required("user_id", ColumnType::Id),
                        ColumnDef::required("create_at", ColumnType::BigInt),
                        ColumnDef::nullable("closed_at", ColumnType::BigInt),
                    ],
                    primary_key: vec!["id".to_owned()],
                }),
                Step::Ddl(DdlOp::CreateIndexIfAbsent {
                    table: "session".to_owned(),
                    columns: "user_id".to_owned(),
                }),
            ],
        },
        Migration {
            version: 2,
            name: "create_channel",
            steps: vec![Step::Ddl(DdlOp::CreateTable {
                table: "channel".to_owned(),
                columns: vec![
                    ColumnDef::required("id", ColumnType::Id),
                    ColumnDef::required("channel_id", ColumnType::Varchar(64)),
                ],
                primary_key: vec!["id".to_owned()],
            })],
        },
        Migration {
            version: 3,
            name: "add_channel_phone_fields",
            steps: vec![
                Step::Ddl(DdlOp::AddColumnIfAbsent {
                    table: "channel".to_owned(),
                    column: ColumnDef::nullable("phone_number", ColumnType::Varchar(32)),
                }),
                Step::Ddl(DdlOp::AddColumnIfAbsent {
                    table: "channel".to_owned(),
                    column: ColumnDef::nullable("phone_number_id", ColumnType::Varchar(64)),
                }),
            ],
        },
        Migration {
            version: 4,
            name: "unique_channel_id",
            steps: vec![Step::Ddl(DdlOp::AddConstraintIfAbsent {
                table: "channel".to_owned(),
                name: "uq_channel_channel_id".to_owned(),
                constraint: Constraint::Unique { columns: vec!["channel_id".to_owned()] },
            })],
        },
        Migration {
            version: 5,
            name: "session_open_lookup_index",
            steps: vec![
                Step::Ddl(DdlOp::CreateIndexIfAbsent {
                    table: "session".to_owned(),
                    columns: "user_id, closed_at".to_owned(),
                }),
                Step::Ddl(DdlOp::DropIndexIfPresent {
                    table: "session".to_owned(),
                    columns: "user_id".to_owned(),
                }),
            ],
        },
    ]
}

/// Renders every migration into one script, for review or for applying by hand.
pub fn render_script(ctx: &RenderContext, migrations: &[Migration]) -> Result<String, DdlError> {
    let mut script = String::new();
    for migration in migrations {
        script.push_str(&format!("-- {}\n", migration.label()));
        for statement in migration.render(ctx)? {
            let text = statement.to_script();
            script.push_str(text.trim_matches('\n'));
            if !text.trim_end().ends_with(';') {
                script.push(';');
            }
            script.push('\n');
        }
        script.push('\n');
    }
    Ok(script)
}

/// Applies [`definitions`] against `pool` with the default lock timeout.
pub async fn run_pending(
    pool: &DbPool,
    table_prefix: &str,
) -> Result<MigrationReport, MigrationError> {
    MigrationRunner::new(pool.clone(), table_prefix).run(&definitions()).await
}
