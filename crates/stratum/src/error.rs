//! Error types for the ORM and migration library.

use thiserror::Error;

/// Main error type for metadata, SQL generation and migration operations.
#[derive(Error, Debug)]
pub enum StratumError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metadata cannot satisfy the requested operation (no primary key,
    /// no insertable columns, unknown property, ...).
    #[error("Model error: {0}")]
    Model(String),

    /// An expression node is not representable in SQL. This is a programmer
    /// error and is never silently approximated.
    #[error("Expression not translatable: {0}")]
    Translation(String),

    /// A second value was attached under an annotation name already present.
    /// Callers needing replace semantics must remove the old value first.
    #[error("Annotation '{name}' is already present on {target}")]
    DuplicateAnnotation { name: String, target: String },

    /// A migration operation could not be rendered by the active provider.
    /// A complete renderer covers the full operation set, so this is an
    /// assertion-grade failure rather than a normal error path.
    #[error("Cannot render migration operation {operation}: {message}")]
    MigrationRender { operation: String, message: String },

    /// The executor boundary reported a statement failure. Not retried here;
    /// retry policy belongs to the caller.
    #[error("Statement execution failed: {0}")]
    Execution(String),

    /// Database client error.
    #[error("Database error: {0}")]
    Database(#[from] tiberius::error::Error),

    /// Connection pool error.
    #[error("Pool error: {0}")]
    Pool(String),

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The in-flight statement was aborted by a cancellation signal.
    #[error("Statement cancelled")]
    Cancelled,
}

impl StratumError {
    /// Create a Model error.
    pub fn model(message: impl Into<String>) -> Self {
        StratumError::Model(message.into())
    }

    /// Create a Translation error naming the unsupported construct.
    pub fn translation(message: impl Into<String>) -> Self {
        StratumError::Translation(message.into())
    }

    /// Create a DuplicateAnnotation error.
    pub fn duplicate_annotation(name: impl Into<String>, target: impl Into<String>) -> Self {
        StratumError::DuplicateAnnotation {
            name: name.into(),
            target: target.into(),
        }
    }

    /// Create a MigrationRender error for an operation the provider cannot express.
    pub fn render(operation: impl Into<String>, message: impl Into<String>) -> Self {
        StratumError::MigrationRender {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an Execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        StratumError::Execution(message.into())
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for ORM operations.
pub type Result<T> = std::result::Result<T, StratumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_message() {
        let err = StratumError::model("type User has no primary key");
        assert_eq!(err.to_string(), "Model error: type User has no primary key");
    }

    #[test]
    fn test_duplicate_annotation_message() {
        let err = StratumError::duplicate_annotation("SqlServer:Clustered", "CreateIndex");
        assert_eq!(
            err.to_string(),
            "Annotation 'SqlServer:Clustered' is already present on CreateIndex"
        );
    }

    #[test]
    fn test_render_error_message() {
        let err = StratumError::render("AlterColumn", "cannot add identity to an existing column");
        assert!(err.to_string().contains("AlterColumn"));
        assert!(err.to_string().contains("identity"));
    }
}
