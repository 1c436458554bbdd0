//! Abstract schema operations and their per-dialect SQL renderings.
//!
//! Postgres and MySQL renderings embed their own existence checks so the emitted script
//! can be replayed safely. SQLite has no conditional `ALTER TABLE`, so its renderings carry a
//! [`Guard`] check that the runner evaluates before executing the statement.

use std::fmt;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dialect {
    type Err = DdlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySql),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(DdlError::UnknownDialect(other.to_owned())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnType {
    /// 26-character generated identifier.
    Id,
    Varchar(u16),
    BigInt,
    Text,
}

impl ColumnType {
    fn render(&self, dialect: Dialect) -> String {
        match (self, dialect) {
            (Self::Id, Dialect::Sqlite) | (Self::Varchar(_), Dialect::Sqlite) => "TEXT".to_owned(),
            (Self::Id, _) => "VARCHAR(26)".to_owned(),
            (Self::Varchar(len), _) => format!("VARCHAR({len})"),
            (Self::BigInt, Dialect::Sqlite) => "INTEGER".to_owned(),
            (Self::BigInt, _) => "BIGINT".to_owned(),
            (Self::Text, _) => "TEXT".to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn required(name: &str, column_type: ColumnType) -> Self {
        Self { name: name.to_owned(), column_type, nullable: false }
    }

    pub fn nullable(name: &str, column_type: ColumnType) -> Self {
        Self { name: name.to_owned(), column_type, nullable: true }
    }

    fn constraint(&self) -> &'static str {
        if self.nullable {
            "NULL"
        } else {
            "NOT NULL"
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Constraint {
    Unique { columns: Vec<String> },
}

impl Constraint {
    fn constraint_type(&self) -> &'static str {
        match self {
            Self::Unique { .. } => "UNIQUE",
        }
    }

    fn definition(&self) -> String {
        match self {
            Self::Unique { columns } => format!("UNIQUE ({})", columns.join(", ")),
        }
    }
}

/// Table names are given without the prefix; it is added when rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DdlOp {
    CreateTable { table: String, columns: Vec<ColumnDef>, primary_key: Vec<String> },
    AddColumnIfAbsent { table: String, column: ColumnDef },
    DropColumnIfPresent { table: String, column: String },
    AddConstraintIfAbsent { table: String, name: String, constraint: Constraint },
    /// `columns` may be separated by commas and/or spaces.
    CreateIndexIfAbsent { table: String, columns: String },
    DropIndexIfPresent { table: String, columns: String },
    RenameColumnIfAbsent { table: String, old: String, new: String, column_type: ColumnType },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DdlError {
    #[error("unknown SQL dialect `{0}`")]
    UnknownDialect(String),
    #[error("`{operation}` is not supported on {dialect}")]
    Unsupported { operation: &'static str, dialect: Dialect },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyWhen {
    /// Apply when the check counts zero rows.
    Absent,
    /// Apply when the check counts at least one row.
    Present,
}

/// A `SELECT COUNT(*)` check deciding whether a statement runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Guard {
    pub check: String,
    pub apply_when: ApplyWhen,
}

impl Guard {
    pub fn should_apply(&self, count: i64) -> bool {
        match self.apply_when {
            ApplyWhen::Absent => count == 0,
            ApplyWhen::Present => count > 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub guard: Option<Guard>,
}

impl Statement {
    fn plain(sql: String) -> Self {
        Self { sql, guard: None }
    }

    fn guarded(sql: String, check: String, apply_when: ApplyWhen) -> Self {
        Self { sql, guard: Some(Guard { check, apply_when }) }
    }

    /// The statement as script text; SQLite guards are kept as a leading comment.
    pub fn to_script(&self) -> String {
        match &self.guard {
            Some(guard) => {
                let condition = match guard.apply_when {
                    ApplyWhen::Absent => "= 0",
                    ApplyWhen::Present => "> 0",
                };
                format!("-- when ({}) {condition}\n{};\n", guard.check, self.sql)
            }
            None => self.sql.clone(),
        }
    }
}

/// Everything a renderer needs besides the operation itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderContext {
    pub dialect: Dialect,
    pub table_prefix: String,
    pub schema: Option<String>,
}

impl RenderContext {
    pub fn new(dialect: Dialect, table_prefix: impl Into<String>) -> Self {
        Self { dialect, table_prefix: table_prefix.into(), schema: None }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        let schema = schema.into();
        self.schema = (!schema.is_empty()).then_some(schema);
        self
    }

    pub fn prefixed(&self, table: &str) -> String {
        if table.starts_with(&self.table_prefix) {
            table.to_owned()
        } else {
            format!("{}{table}", self.table_prefix)
        }
    }

    /// Schema-qualifies an already prefixed table name.
    pub fn normalized(&self, table: &str) -> String {
        match &self.schema {
            Some(schema) if !table.starts_with(&format!("{schema}.")) => match self.dialect {
                Dialect::MySql => format!("`{schema}`.{table}"),
                _ => format!("{schema}.{table}"),
            },
            _ => table.to_owned(),
        }
    }

    fn schema_literal(&self) -> String {
        quote_escape(self.schema.as_deref().unwrap_or_default())
    }

    pub fn render(&self, op: &DdlOp) -> Result<Statement, DdlError> {
        match op {
            DdlOp::CreateTable { table, columns, primary_key } => {
                Ok(self.create_table(table, columns, primary_key))
            }
            DdlOp::AddColumnIfAbsent { table, column } => Ok(self.add_column(table, column)),
            DdlOp::DropColumnIfPresent { table, column } => Ok(self.drop_column(table, column)),
            DdlOp::AddConstraintIfAbsent { table, name, constraint } => {
                self.add_constraint(table, name, constraint)
            }
            DdlOp::CreateIndexIfAbsent { table, columns } => Ok(self.create_index(table, columns)),
            DdlOp::DropIndexIfPresent { table, columns } => Ok(self.drop_index(table, columns)),
            DdlOp::RenameColumnIfAbsent { table, old, new, column_type } => {
                Ok(self.rename_column(table, old, new, column_type))
            }
        }
    }

    fn create_table(
        &self,
        table: &str,
        columns: &[ColumnDef],
        primary_key: &[String],
    ) -> Statement {
        let table = self.normalized(&self.prefixed(table));
        let mut definitions: Vec<String> = columns
            .iter()
            .map(|column| {
                format!(
                    "{} {} {}",
                    column.name,
                    column.column_type.render(self.dialect),
                    column.constraint()
                )
            })
            .collect();
        if !primary_key.is_empty() {
            definitions.push(format!("PRIMARY KEY ({})", primary_key.join(", ")));
        }

        Statement::plain(format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n    {}\n)",
            definitions.join(",\n    ")
        ))
    }

    fn add_column(&self, table: &str, column: &ColumnDef) -> Statement {
        let table_name = self.prefixed(table);
        let norm_table_name = self.normalized(&table_name);
        let data_type = column.column_type.render(self.dialect);

        match self.dialect {
            Dialect::MySql => Statement::plain(mysql_guarded(
                "addColumnIfNeeded",
                &column_count_check(&table_name, &self.schema_literal(), &column.name),
                "'SELECT 1;'",
                &format!(
                    "'ALTER TABLE {} ADD COLUMN {} {} {};'",
                    quote_escape(&norm_table_name),
                    quote_escape(&column.name),
                    quote_escape(&data_type),
                    quote_escape(column.constraint())
                ),
            )),
            Dialect::Postgres => Statement::plain(format!(
                "\nALTER TABLE {norm_table_name} ADD COLUMN IF NOT EXISTS {} {data_type} {};\n",
                column.name,
                column.constraint()
            )),
            Dialect::Sqlite => Statement::guarded(
                format!(
                    "ALTER TABLE {norm_table_name} ADD COLUMN {} {data_type} {}",
                    column.name,
                    column.constraint()
                ),
                sqlite_column_check(&table_name, &column.name),
                ApplyWhen::Absent,
            ),
        }
    }

    fn drop_column(&self, table: &str, column: &str) -> Statement {
        let table_name = self.prefixed(table);
        let norm_table_name = self.normalized(&table_name);

        match self.dialect {
            Dialect::MySql => Statement::plain(mysql_guarded(
                "dropColumnIfNeeded",
                &column_count_check(&table_name, &self.schema_literal(), column),
                &format!(
                    "'ALTER TABLE {} DROP COLUMN {};'",
                    quote_escape(&norm_table_name),
                    quote_escape(column)
                ),
                "'SELECT 1;'",
            )),
            Dialect::Postgres => Statement::plain(format!(
                "\nALTER TABLE {norm_table_name} DROP COLUMN IF EXISTS {column};\n"
            )),
            Dialect::Sqlite => Statement::guarded(
                format!("ALTER TABLE {norm_table_name} DROP COLUMN {column}"),
                sqlite_column_check(&table_name, column),
                ApplyWhen::Present,
            ),
        }
    }

    fn add_constraint(
        &self,
        table: &str,
        name: &str,
        constraint: &Constraint,
    ) -> Result<Statement, DdlError> {
        let table_name = self.prefixed(table);
        let norm_table_name = self.normalized(&table_name);
        let check = format!(
            "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS\n\
             \x20   WHERE constraint_schema = '{}'\n\
             \x20   AND constraint_name = '{}'\n\
             \x20   AND constraint_type = '{}'\n\
             \x20   AND table_name = '{}'",
            self.schema_literal(),
            quote_escape(name),
            quote_escape(constraint.constraint_type()),
            quote_escape(&table_name)
        );

        match self.dialect {
            Dialect::MySql => Ok(Statement::plain(mysql_guarded(
                "addConstraintIfNeeded",
                &check,
                "'SELECT 1;'",
                &format!(
                    "'ALTER TABLE {} ADD CONSTRAINT {} {};'",
                    quote_escape(&norm_table_name),
                    quote_escape(name),
                    quote_escape(&constraint.definition())
                ),
            ))),
            Dialect::Postgres => Ok(Statement::plain(format!(
                "\nDO\n$$\nBEGIN\nIF NOT EXISTS (\n    {check}\n) THEN\n\
                 \x20   ALTER TABLE {} ADD CONSTRAINT {} {};\n\
                 END IF;\nEND;\n$$\nLANGUAGE plpgsql;\n",
                quote_escape(&norm_table_name),
                quote_escape(name),
                quote_escape(&constraint.definition())
            ))),
            Dialect::Sqlite => match constraint {
                Constraint::Unique { columns } => Ok(Statement::plain(format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {name} ON {norm_table_name} ({})",
                    columns.join(", ")
                ))),
            },
        }
    }

    fn create_index(&self, table: &str, columns: &str) -> Statement {
        let index_name = index_name(table, columns);
        let table_name = self.prefixed(table);
        let norm_table_name = self.normalized(&table_name);

        match self.dialect {
            Dialect::MySql => Statement::plain(mysql_guarded(
                "createIndexIfNeeded",
                &index_count_check(&table_name, &self.schema_literal(), &index_name),
                "'SELECT 1;'",
                &format!(
                    "'CREATE INDEX {} ON {} ({});'",
                    quote_escape(&index_name),
                    quote_escape(&norm_table_name),
                    quote_escape(columns)
                ),
            )),
            Dialect::Postgres | Dialect::Sqlite => Statement::plain(format!(
                "\nCREATE INDEX IF NOT EXISTS {index_name} ON {norm_table_name} ({columns});\n"
            )),
        }
    }

    fn drop_index(&self, table: &str, columns: &str) -> Statement {
        let index_name = index_name(table, columns);
        let table_name = self.prefixed(table);
        let norm_table_name = self.normalized(&table_name);

        match self.dialect {
            Dialect::MySql => Statement::plain(mysql_guarded(
                "dropIndexIfNeeded",
                &index_count_check(&table_name, &self.schema_literal(), &index_name),
                &format!(
                    "'DROP INDEX {} ON {};'",
                    quote_escape(&index_name),
                    quote_escape(&norm_table_name)
                ),
                "'SELECT 1;'",
            )),
            Dialect::Postgres | Dialect::Sqlite => {
                Statement::plain(format!("\nDROP INDEX IF EXISTS {index_name};\n"))
            }
        }
    }

    fn rename_column(
        &self,
        table: &str,
        old: &str,
        new: &str,
        column_type: &ColumnType,
    ) -> Statement {
        let table_name = self.prefixed(table);
        let norm_table_name = self.normalized(&table_name);

        match self.dialect {
            Dialect::MySql => Statement::plain(mysql_guarded(
                "renameColumnIfNeeded",
                &column_count_check(&table_name, &self.schema_literal(), new),
                "'SELECT 1;'",
                &format!(
                    "'ALTER TABLE {} CHANGE {} {} {};'",
                    quote_escape(&norm_table_name),
                    quote_escape(old),
                    quote_escape(new),
                    quote_escape(&column_type.render(self.dialect))
                ),
            )),
            Dialect::Postgres => Statement::plain(format!(
                "\ndo $$\nbegin\n    if ({}) = 0 then\n\
                 \x20       ALTER TABLE {} RENAME COLUMN {} TO {};\n\
                 \x20   end if;\nend$$;\n",
                column_count_check(&table_name, &self.schema_literal(), new)
                    .replace("COUNT(column_name)", "COUNT(table_name)"),
                quote_escape(&norm_table_name),
                quote_escape(old),
                quote_escape(new)
            )),
            Dialect::Sqlite => Statement::guarded(
                format!("ALTER TABLE {norm_table_name} RENAME COLUMN {old} TO {new}"),
                sqlite_column_check(&table_name, new),
                ApplyWhen::Absent,
            ),
        }
    }
}

/// `idx_<table>_<col>...` with the table name as given, before prefixing.
pub fn index_name(table: &str, columns: &str) -> String {
    let mut name = format!("idx_{table}");
    for column in columns.replace(',', " ").split(' ').filter(|column| !column.trim().is_empty()) {
        name.push('_');
        name.push_str(column);
    }
    name
}

/// Escapes single quotes for embedding in a quoted SQL literal.
pub fn quote_escape(value: &str) -> String {
    value.replace('\'', "\\'")
}

fn column_count_check(table_name: &str, schema: &str, column: &str) -> String {
    format!(
        "SELECT COUNT(column_name) FROM INFORMATION_SCHEMA.COLUMNS\n\
         \x20   WHERE table_name = '{}'\n\
         \x20   AND table_schema = '{schema}'\n\
         \x20   AND column_name = '{}'",
        quote_escape(table_name),
        quote_escape(column)
    )
}

fn index_count_check(table_name: &str, schema: &str, index_name: &str) -> String {
    format!(
        "SELECT COUNT(index_name) FROM INFORMATION_SCHEMA.STATISTICS\n\
         \x20   WHERE table_name = '{}'\n\
         \x20   AND table_schema = '{schema}'\n\
         \x20   AND index_name = '{}'",
        quote_escape(table_name),
        quote_escape(index_name)
    )
}

fn mysql_guarded(
    statement_name: &str,
    check: &str,
    when_present: &str,
    when_absent: &str,
) -> String {
    format!(
        "\nSET @stmt = (SELECT IF(\n    (\n    {check}\n    ) > 0,\n\
         \x20   {when_present},\n    {when_absent}\n));\n\
         PREPARE {statement_name} FROM @stmt;\n\
         EXECUTE {statement_name};\n\
         DEALLOCATE PREPARE {statement_name};\n"
    )
}

fn sqlite_column_check(table_name: &str, column: &str) -> String {
    format!(
        "SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = '{}'",
        table_name.replace('\'', "''"),
        column.replace('\'', "''")
    )
}

#[cfg(test)]
mod tests {
    use super::{
        index_name, quote_escape, ApplyWhen, ColumnDef, ColumnType, Constraint, DdlOp, Dialect,
        RenderContext,
    };

    fn add_phone_number() -> DdlOp {
        DdlOp::AddColumnIfAbsent {
            table: "channel".to_owned(),
            column: ColumnDef::nullable("phone_number", ColumnType::Varchar(32)),
        }
    }

    #[test]
    fn index_names_split_on_commas_and_spaces() {
        assert_eq!(index_name("session", "user_id"), "idx_session_user_id");
        assert_eq!(index_name("session", "user_id, closed_at"), "idx_session_user_id_closed_at");
        assert_eq!(index_name("session", "user_id,closed_at"), "idx_session_user_id_closed_at");
    }

    #[test]
    fn quote_escape_backslashes_single_quotes() {
        assert_eq!(quote_escape("DEFAULT 'x'"), "DEFAULT \\'x\\'");
    }

    #[test]
    fn prefix_is_added_only_once() {
        let ctx = RenderContext::new(Dialect::Postgres, "demo_plugin_");
        assert_eq!(ctx.prefixed("session"), "demo_plugin_session");
        assert_eq!(ctx.prefixed("demo_plugin_session"), "demo_plugin_session");
    }

    #[test]
    fn schema_is_backtick_quoted_on_mysql_only() {
        let mysql = RenderContext::new(Dialect::MySql, "p_").with_schema("mm");
        let postgres = RenderContext::new(Dialect::Postgres, "p_").with_schema("public");

        assert_eq!(mysql.normalized("p_session"), "`mm`.p_session");
        assert_eq!(postgres.normalized("p_session"), "public.p_session");
        assert_eq!(postgres.normalized("public.p_session"), "public.p_session");
    }

    #[test]
    fn postgres_add_column_uses_if_not_exists() {
        let ctx = RenderContext::new(Dialect::Postgres, "demo_plugin_").with_schema("public");
        let statement = ctx.render(&add_phone_number()).expect("render");

        assert_eq!(
            statement.sql,
            "\nALTER TABLE public.demo_plugin_channel \
             ADD COLUMN IF NOT EXISTS phone_number VARCHAR(32) NULL;\n"
        );
        assert!(statement.guard.is_none());
    }

    #[test]
    fn mysql_add_column_uses_guarded_prepared_statement() {
        let ctx = RenderContext::new(Dialect::MySql, "demo_plugin_").with_schema("mattermost");
        let sql = ctx.render(&add_phone_number()).expect("render").sql;

        assert!(sql.contains("SET @stmt = (SELECT IF("));
        assert!(sql.contains("FROM INFORMATION_SCHEMA.COLUMNS"));
        assert!(sql.contains("WHERE table_name = 'demo_plugin_channel'"));
        assert!(sql.contains("AND table_schema = 'mattermost'"));
        assert!(sql.contains("AND column_name = 'phone_number'"));
        assert!(sql.contains(
            "'ALTER TABLE `mattermost`.demo_plugin_channel \
             ADD COLUMN phone_number VARCHAR(32) NULL;'"
        ));
        assert!(sql.contains("PREPARE addColumnIfNeeded FROM @stmt;"));
        assert!(sql.contains("EXECUTE addColumnIfNeeded;"));
        assert!(sql.contains("DEALLOCATE PREPARE addColumnIfNeeded;"));

        let select_one = sql.find("'SELECT 1;'").expect("no-op branch");
        let alter = sql.find("'ALTER TABLE").expect("alter branch");
        assert!(select_one < alter, "existing column must take the no-op branch");
    }

    #[test]
    fn mysql_drop_column_swaps_branches() {
        let ctx = RenderContext::new(Dialect::MySql, "p_");
        let sql = ctx
            .render(&DdlOp::DropColumnIfPresent {
                table: "channel".to_owned(),
                column: "legacy".to_owned(),
            })
            .expect("render")
            .sql;

        let select_one = sql.find("'SELECT 1;'").expect("no-op branch");
        let alter = sql.find("'ALTER TABLE p_channel DROP COLUMN legacy;'").expect("drop branch");
        assert!(alter < select_one);
        assert!(sql.contains("PREPARE dropColumnIfNeeded FROM @stmt;"));
    }

    #[test]
    fn postgres_index_operations() {
        let ctx = RenderContext::new(Dialect::Postgres, "p_");
        let create = ctx
            .render(&DdlOp::CreateIndexIfAbsent {
                table: "session".to_owned(),
                columns: "user_id, closed_at".to_owned(),
            })
            .expect("render");
        assert_eq!(
            create.sql,
            "\nCREATE INDEX IF NOT EXISTS idx_session_user_id_closed_at \
             ON p_session (user_id, closed_at);\n"
        );

        let drop = ctx
            .render(&DdlOp::DropIndexIfPresent {
                table: "session".to_owned(),
                columns: "user_id".to_owned(),
            })
            .expect("render");
        assert_eq!(drop.sql, "\nDROP INDEX IF EXISTS idx_session_user_id;\n");
    }

    #[test]
    fn mysql_index_operations_check_statistics() {
        let ctx = RenderContext::new(Dialect::MySql, "p_");
        let sql = ctx
            .render(&DdlOp::DropIndexIfPresent {
                table: "session".to_owned(),
                columns: "user_id".to_owned(),
            })
            .expect("render")
            .sql;

        assert!(sql.contains("FROM INFORMATION_SCHEMA.STATISTICS"));
        assert!(sql.contains("'DROP INDEX idx_session_user_id ON p_session;'"));
        assert!(sql.contains("DEALLOCATE PREPARE dropIndexIfNeeded;"));
    }

    #[test]
    fn postgres_constraint_uses_plpgsql_block() {
        let ctx = RenderContext::new(Dialect::Postgres, "p_").with_schema("public");
        let sql = ctx
            .render(&DdlOp::AddConstraintIfAbsent {
                table: "channel".to_owned(),
                name: "p_channel_channel_id_key".to_owned(),
                constraint: Constraint::Unique { columns: vec!["channel_id".to_owned()] },
            })
            .expect("render")
            .sql;

        assert!(sql.contains("DO\n$$\nBEGIN\nIF NOT EXISTS ("));
        assert!(sql.contains("FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS"));
        assert!(sql.contains("AND constraint_type = 'UNIQUE'"));
        assert!(sql.contains(
            "ALTER TABLE public.p_channel \
             ADD CONSTRAINT p_channel_channel_id_key UNIQUE (channel_id);"
        ));
        assert!(sql.ends_with("$$\nLANGUAGE plpgsql;\n"));
    }

    #[test]
    fn rename_column_per_dialect() {
        let op = DdlOp::RenameColumnIfAbsent {
            table: "session".to_owned(),
            old: "createat".to_owned(),
            new: "create_at".to_owned(),
            column_type: ColumnType::BigInt,
        };

        let mysql = RenderContext::new(Dialect::MySql, "p_").render(&op).expect("mysql").sql;
        assert!(mysql.contains("'ALTER TABLE p_session CHANGE createat create_at BIGINT;'"));
        assert!(mysql.contains("PREPARE renameColumnIfNeeded FROM @stmt;"));

        let postgres = RenderContext::new(Dialect::Postgres, "p_").render(&op).expect("pg").sql;
        assert!(postgres.starts_with("\ndo $$\nbegin\n"));
        assert!(postgres.contains("SELECT COUNT(table_name) FROM INFORMATION_SCHEMA.COLUMNS"));
        assert!(postgres.contains("ALTER TABLE p_session RENAME COLUMN createat TO create_at;"));
        assert!(postgres.ends_with("end$$;\n"));

        let sqlite = RenderContext::new(Dialect::Sqlite, "p_").render(&op).expect("sqlite");
        let guard = sqlite.guard.expect("sqlite rename is guarded");
        assert_eq!(guard.apply_when, ApplyWhen::Absent);
        assert!(guard.check.contains("pragma_table_info('p_session')"));
        assert_eq!(sqlite.sql, "ALTER TABLE p_session RENAME COLUMN createat TO create_at");
    }

    #[test]
    fn sqlite_add_column_is_guarded_by_table_info_check() {
        let ctx = RenderContext::new(Dialect::Sqlite, "demo_plugin_");
        let statement = ctx.render(&add_phone_number()).expect("render");

        assert_eq!(
            statement.sql,
            "ALTER TABLE demo_plugin_channel ADD COLUMN phone_number TEXT NULL"
        );
        let guard = statement.guard.expect("guard");
        assert!(guard.should_apply(0));
        assert!(!guard.should_apply(1));
        assert!(statement_script_mentions_check(&ctx));
    }

    fn statement_script_mentions_check(ctx: &RenderContext) -> bool {
        ctx.render(&add_phone_number())
            .map(|statement| statement.to_script().starts_with("-- when (SELECT COUNT(*)"))
            .unwrap_or(false)
    }

    #[test]
    fn create_table_renders_typed_columns() {
        let op = DdlOp::CreateTable {
            table: "session".to_owned(),
            columns: vec![
                ColumnDef::required("id", ColumnType::Id),
                ColumnDef::nullable("closed_at", ColumnType::BigInt),
            ],
            primary_key: vec!["id".to_owned()],
        };

        let postgres = RenderContext::new(Dialect::Postgres, "p_").render(&op).expect("pg").sql;
        assert_eq!(
            postgres,
            "CREATE TABLE IF NOT EXISTS p_session (\n\
             \x20   id VARCHAR(26) NOT NULL,\n\
             \x20   closed_at BIGINT NULL,\n\
             \x20   PRIMARY KEY (id)\n)"
        );

        let sqlite = RenderContext::new(Dialect::Sqlite, "p_").render(&op).expect("sqlite").sql;
        assert!(sqlite.contains("id TEXT NOT NULL"));
        assert!(sqlite.contains("closed_at INTEGER NULL"));
    }

    #[test]
    fn dialect_parses_from_names() {
        assert_eq!("Postgres".parse::<Dialect>(), Ok(Dialect::Postgres));
        assert_eq!("mysql".parse::<Dialect>(), Ok(Dialect::MySql));
        assert!("oracle".parse::<Dialect>().is_err());
    }
}
