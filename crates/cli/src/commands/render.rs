use wabridge_db::migrations::{definitions, render_script, Dialect, RenderContext};

use crate::commands::CommandResult;

/// Prints the migration script for `dialect` so it can be reviewed or applied by hand.
pub fn run(dialect: &str, table_prefix: &str, schema: Option<&str>) -> CommandResult {
    let dialect = match dialect.parse::<Dialect>() {
        Ok(dialect) => dialect,
        Err(error) => {
            let message = error.to_string();
            return CommandResult::failure("render-migrations", "invalid_dialect", message, 2);
        }
    };

    let mut context = RenderContext::new(dialect, table_prefix);
    if let Some(schema) = schema {
        context = context.with_schema(schema);
    }

    match render_script(&context, &definitions()) {
        Ok(script) => CommandResult::text(script),
        Err(error) => CommandResult::failure("render-migrations", "render", error.to_string(), 5),
    }
}
