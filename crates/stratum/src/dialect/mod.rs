//! SQL dialect seam.
//!
//! Every component that emits SQL punctuation (identifier delimiting,
//! parameter placeholders, statement terminators) goes through [`SqlHelper`]
//! instead of hard-coding dialect syntax. One implementation exists per
//! database provider.

mod mssql;

pub use mssql::SqlServerHelper;

/// SQL syntax strategy for the active database provider.
pub trait SqlHelper: Send + Sync {
    /// Get the dialect identifier (e.g., "mssql").
    fn name(&self) -> &str;

    /// Quote an identifier (table name, column name, etc.).
    fn delimit_identifier(&self, name: &str) -> String;

    /// Quote an identifier with an optional schema qualifier.
    fn delimit_qualified(&self, name: &str, schema: Option<&str>) -> String {
        match schema {
            Some(schema) => format!(
                "{}.{}",
                self.delimit_identifier(schema),
                self.delimit_identifier(name)
            ),
            None => self.delimit_identifier(name),
        }
    }

    /// Escape an identifier for embedding inside a string literal
    /// (e.g. `OBJECT_ID(N'...')` existence probes) without delimiting it.
    fn escape_identifier(&self, name: &str) -> String;

    /// Format a named parameter placeholder.
    fn parameterized(&self, name: &str) -> String;

    /// The statement terminator.
    fn statement_terminator(&self) -> &str;

    /// Escape a string literal's content (quote doubling).
    fn escape_literal(&self, text: &str) -> String;
}
