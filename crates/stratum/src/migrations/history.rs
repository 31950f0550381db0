//! Migration history storage.
//!
//! One durable row per named migration (identifier plus applied version) in
//! a fixed-schema, prefix-aware table. The table itself is created on first
//! use.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dialect::SqlHelper;
use crate::error::Result;
use crate::executor::Executor;
use crate::metadata::{Model, Table, PREFIX_TOKEN};
use crate::migrations::builder::{constraint_name, NameKind};
use crate::query::SqlScript;
use crate::value::{Parameters, Value};

/// Reads and writes the migration history table.
pub struct HistoryRepository {
    executor: Arc<dyn Executor>,
    sql_helper: Arc<dyn SqlHelper>,
    table: Table,
}

impl HistoryRepository {
    /// Bind the repository to the model's dialect and an executor.
    pub fn new(model: &Model, executor: Arc<dyn Executor>) -> Self {
        let table = model.table(&format!("{}Migrations", PREFIX_TOKEN), None);
        Self {
            executor,
            sql_helper: Arc::clone(model.sql_helper()),
            table,
        }
    }

    /// Existence probe for the history table.
    fn exists_sql(&self) -> String {
        let mut name = String::new();
        if let Some(schema) = self.table.schema() {
            name.push_str(&self.sql_helper.escape_identifier(schema));
            name.push('.');
        }
        name.push_str(&self.sql_helper.escape_identifier(self.table.name()));
        format!("SELECT OBJECT_ID(N'{}');", name)
    }

    /// DDL for the history table: migration identifier plus integer
    /// version, defaulted to 0.
    fn create_sql(&self) -> String {
        format!(
            "CREATE TABLE {}(\n    [Id]      NVARCHAR(256) NOT NULL,\n    [Version] INT NOT NULL DEFAULT(0),\n    CONSTRAINT {} PRIMARY KEY([Id])\n);",
            self.table,
            self.sql_helper
                .delimit_identifier(&constraint_name(NameKind::PrimaryKey, &self.table, None, None))
        )
    }

    /// Create the history table if it does not exist yet. Idempotent.
    pub async fn ensure_created(&self, cancel: &CancellationToken) -> Result<()> {
        let exists = self
            .executor
            .scalar(&self.exists_sql(), &Parameters::new(), cancel)
            .await?;
        if matches!(exists, None | Some(Value::Null)) {
            info!("creating migration history table {}", self.table.bare_name());
            self.executor
                .execute(&self.create_sql(), &Parameters::new(), cancel)
                .await?;
        }
        Ok(())
    }

    /// The applied version of a migration, or `None` when it has never
    /// been applied.
    pub async fn get_version(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<i32>> {
        let sql = format!(
            "SELECT [Version] FROM {} WHERE [Id]={};",
            self.table,
            self.sql_helper.parameterized("Id")
        );
        let mut parameters = Parameters::new();
        parameters.add("Id", id);
        let value = self.executor.scalar(&sql, &parameters, cancel).await?;
        Ok(value.and_then(|v| v.as_i64()).map(|v| v as i32))
    }

    /// Upsert statement recording a migration at a version. Executed inside
    /// the migration unit's transaction.
    pub fn save_version_script(&self, id: &str, version: i32) -> SqlScript {
        let id_param = self.sql_helper.parameterized("Id");
        let version_param = self.sql_helper.parameterized("Version");
        let sql = format!(
            "IF EXISTS(SELECT 1 FROM {table} WHERE [Id]={id}) \
             UPDATE {table} SET [Version]={version} WHERE [Id]={id} \
             ELSE INSERT INTO {table}([Id],[Version])VALUES({id},{version});",
            table = self.table,
            id = id_param,
            version = version_param,
        );
        let mut parameters = Parameters::new();
        parameters.add("Id", id);
        parameters.add("Version", version);
        SqlScript::new(sql, parameters)
    }

    /// Delete statement removing a migration's history row. Executed inside
    /// the destroy unit's transaction.
    pub fn delete_script(&self, id: &str) -> SqlScript {
        let sql = format!(
            "DELETE FROM {} WHERE [Id]={};",
            self.table,
            self.sql_helper.parameterized("Id")
        );
        let mut parameters = Parameters::new();
        parameters.add("Id", id);
        SqlScript::new(sql, parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqlServerHelper;
    use crate::value::Row;
    use async_trait::async_trait;

    struct NullExecutor;

    #[async_trait]
    impl Executor for NullExecutor {
        async fn execute(
            &self,
            _sql: &str,
            _parameters: &Parameters,
            _cancel: &CancellationToken,
        ) -> Result<u64> {
            Ok(0)
        }

        async fn scalar(
            &self,
            _sql: &str,
            _parameters: &Parameters,
            _cancel: &CancellationToken,
        ) -> Result<Option<Value>> {
            Ok(None)
        }

        async fn query(
            &self,
            _sql: &str,
            _parameters: &Parameters,
            _cancel: &CancellationToken,
        ) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn begin(&self) -> Result<Box<dyn crate::executor::ExecutorTransaction>> {
            unimplemented!("not used in these tests")
        }
    }

    fn history() -> HistoryRepository {
        let model = Model::new(Arc::new(SqlServerHelper));
        HistoryRepository::new(&model, Arc::new(NullExecutor))
    }

    #[test]
    fn test_exists_probe_carries_prefix_token() {
        let history = history();
        assert_eq!(history.exists_sql(), "SELECT OBJECT_ID(N'$pre:Migrations');");
    }

    #[test]
    fn test_create_sql_shape() {
        let history = history();
        let sql = history.create_sql();
        assert!(sql.starts_with("CREATE TABLE [$pre:Migrations]("));
        assert!(sql.contains("[Id]      NVARCHAR(256) NOT NULL"));
        assert!(sql.contains("[Version] INT NOT NULL DEFAULT(0)"));
        assert!(sql.contains("CONSTRAINT [PK_$pre:Migrations] PRIMARY KEY([Id])"));
    }

    #[test]
    fn test_save_version_script_is_upsert() {
        let history = history();
        let script = history.save_version_script("core", 2);
        assert!(script.sql().contains("IF EXISTS"));
        assert!(script.sql().contains("UPDATE [$pre:Migrations] SET [Version]=@Version"));
        assert!(script.sql().contains("INSERT INTO [$pre:Migrations]([Id],[Version])"));
        assert_eq!(
            script.parameters().get("Id"),
            Some(&Value::Text("core".to_string()))
        );
        assert_eq!(script.parameters().get("Version"), Some(&Value::I32(2)));
    }
}
