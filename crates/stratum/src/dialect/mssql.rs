//! SQL Server dialect syntax.

use super::SqlHelper;

/// Microsoft SQL Server dialect implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerHelper;

impl SqlHelper for SqlServerHelper {
    fn name(&self) -> &str {
        "mssql"
    }

    fn delimit_identifier(&self, name: &str) -> String {
        // Square-bracket quoting; closing brackets are doubled
        format!("[{}]", name.replace(']', "]]"))
    }

    fn escape_identifier(&self, name: &str) -> String {
        name.replace('\'', "''")
    }

    fn parameterized(&self, name: &str) -> String {
        format!("@{}", name)
    }

    fn statement_terminator(&self) -> &str {
        ";"
    }

    fn escape_literal(&self, text: &str) -> String {
        text.replace('\'', "''")
    }
}
