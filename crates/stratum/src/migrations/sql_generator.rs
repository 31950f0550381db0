//! Dialect rendering of migration operations.
//!
//! The renderer maps every operation variant to literal SQL statements. An
//! operation combination the provider cannot express fails with a render
//! error instead of being silently approximated.

use std::sync::Arc;

use tracing::debug;

use crate::dialect::SqlHelper;
use crate::error::{Result, StratumError};
use crate::metadata::Model;
use crate::migrations::operations::{
    ColumnDef, MigrationOperation, OperationKind, ReferentialAction, SequenceFacts,
};
use crate::query::{SqlGenerator, SqlScript};
use crate::value::{Parameters, ValueKind};

/// Renders recorded operations into provider SQL.
pub trait MigrationsSqlGenerator: Send + Sync {
    /// Render an ordered operation list into the statements to execute, in
    /// order.
    fn generate(&self, operations: &[MigrationOperation]) -> Result<Vec<SqlScript>>;
}

/// Maps value kinds onto SQL Server column types.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerTypeMapper;

impl SqlServerTypeMapper {
    /// Pick the column type for the given facts. An explicit type override
    /// and the rowversion marker win over kind mapping.
    pub fn column_type(&self, column: &ColumnDef) -> String {
        if let Some(explicit) = &column.column_type {
            return explicit.clone();
        }
        if column.is_row_version {
            return "rowversion".to_string();
        }

        let sized = |unicode: bool| {
            let (prefix, max) = if unicode { ("n", 4000) } else { ("", 8000) };
            match column.max_length {
                Some(n) if n > 0 && n <= max => format!("{}varchar({})", prefix, n),
                _ => format!("{}varchar(max)", prefix),
            }
        };

        match column.kind {
            ValueKind::Bool => "bit".to_string(),
            ValueKind::I16 => "smallint".to_string(),
            ValueKind::I32 => "int".to_string(),
            ValueKind::I64 => "bigint".to_string(),
            ValueKind::F64 => "float".to_string(),
            ValueKind::Decimal => "decimal(18,2)".to_string(),
            ValueKind::Text => sized(column.is_unicode.unwrap_or(true)),
            ValueKind::Bytes => match column.max_length {
                Some(n) if n > 0 && n <= 8000 => format!("varbinary({})", n),
                _ => "varbinary(max)".to_string(),
            },
            ValueKind::Uuid => "uniqueidentifier".to_string(),
            ValueKind::DateTime => "datetime2".to_string(),
        }
    }
}

/// SQL Server migration renderer.
pub struct MigrationsSqlServerGenerator {
    model: Arc<Model>,
    generator: Arc<dyn SqlGenerator>,
    type_mapper: SqlServerTypeMapper,
}

impl MigrationsSqlServerGenerator {
    /// Create a renderer over the model; seed operations are rendered
    /// through the statement generator.
    pub fn new(model: Arc<Model>, generator: Arc<dyn SqlGenerator>) -> Self {
        Self {
            model,
            generator,
            type_mapper: SqlServerTypeMapper,
        }
    }

    fn helper(&self) -> &dyn SqlHelper {
        self.model.sql_helper().as_ref()
    }

    fn referential(&self, action: ReferentialAction) -> &'static str {
        match action {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
            // SQL Server has no RESTRICT keyword; NO ACTION carries the
            // same check-at-statement-end semantics here.
            ReferentialAction::Restrict => "NO ACTION",
        }
    }

    fn column_definition(&self, operation: &str, column: &ColumnDef) -> Result<String> {
        let helper = self.helper();
        let name = helper.delimit_identifier(&column.name);

        if let Some(computed) = &column.computed_column_sql {
            if column.is_identity {
                return Err(StratumError::render(
                    operation,
                    format!("column {} cannot be both computed and identity", column.name),
                ));
            }
            return Ok(format!("{} AS ({})", name, computed));
        }

        let mut definition = format!("{} {}", name, self.type_mapper.column_type(column));
        if column.is_identity {
            definition.push_str(" IDENTITY(1,1)");
        }
        if column.is_nullable {
            definition.push_str(" NULL");
        } else {
            definition.push_str(" NOT NULL");
        }
        if let Some(sql) = &column.default_value_sql {
            definition.push_str(&format!(" DEFAULT ({})", sql));
        } else if let Some(value) = &column.default_value {
            definition.push_str(&format!(" DEFAULT {}", value.to_sql_literal()));
        }
        Ok(definition)
    }

    fn delimited_columns(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.helper().delimit_identifier(c))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn sequence_options(&self, facts: &SequenceFacts) -> String {
        let mut out = format!(" INCREMENT BY {}", facts.increment_by);
        if let Some(min) = facts.min_value {
            out.push_str(&format!(" MINVALUE {}", min));
        }
        if let Some(max) = facts.max_value {
            out.push_str(&format!(" MAXVALUE {}", max));
        }
        out.push_str(if facts.is_cyclic { " CYCLE" } else { " NO CYCLE" });
        out
    }

    fn plain(&self, sql: String) -> SqlScript {
        SqlScript::new(sql, Parameters::new())
    }

    fn render(&self, operation: &MigrationOperation) -> Result<Vec<SqlScript>> {
        let helper = self.helper();
        let scripts = match operation.kind() {
            OperationKind::CreateTable {
                table,
                columns,
                primary_key,
                unique_constraints,
                foreign_keys,
            } => {
                if columns.is_empty() {
                    return Err(StratumError::render(
                        operation.name(),
                        format!("table {} declares no columns", table.bare_name()),
                    ));
                }
                let mut parts: Vec<String> = Vec::new();
                for column in columns {
                    parts.push(format!("    {}", self.column_definition(operation.name(), column)?));
                }
                if let Some(pk) = primary_key {
                    parts.push(format!(
                        "    CONSTRAINT {} PRIMARY KEY({})",
                        helper.delimit_identifier(&pk.name),
                        self.delimited_columns(&pk.columns)
                    ));
                }
                for unique in unique_constraints {
                    parts.push(format!(
                        "    CONSTRAINT {} UNIQUE({})",
                        helper.delimit_identifier(&unique.name),
                        self.delimited_columns(&unique.columns)
                    ));
                }
                for fk in foreign_keys {
                    parts.push(format!(
                        "    CONSTRAINT {} FOREIGN KEY({}) REFERENCES {}({}) ON DELETE {} ON UPDATE {}",
                        helper.delimit_identifier(&fk.name),
                        self.delimited_columns(&fk.columns),
                        fk.principal_table,
                        self.delimited_columns(&fk.principal_columns),
                        self.referential(fk.on_delete),
                        self.referential(fk.on_update),
                    ));
                }
                vec![self.plain(format!("CREATE TABLE {}(\n{}\n);", table, parts.join(",\n")))]
            }

            OperationKind::DropTable { table } => {
                vec![self.plain(format!("DROP TABLE {};", table))]
            }

            OperationKind::AddColumn { table, column } => {
                vec![self.plain(format!(
                    "ALTER TABLE {} ADD {};",
                    table,
                    self.column_definition(operation.name(), column)?
                ))]
            }

            OperationKind::AlterColumn {
                table,
                column,
                old_column,
            } => {
                if column.is_identity != old_column.is_identity {
                    return Err(StratumError::render(
                        operation.name(),
                        format!(
                            "identity cannot be added to or removed from existing column {}",
                            column.name
                        ),
                    ));
                }
                if column.computed_column_sql.is_some() || old_column.computed_column_sql.is_some()
                {
                    return Err(StratumError::render(
                        operation.name(),
                        format!("computed column {} must be dropped and re-added", column.name),
                    ));
                }

                let mut scripts = vec![self.plain(format!(
                    "ALTER TABLE {} ALTER COLUMN {} {} {};",
                    table,
                    helper.delimit_identifier(&column.name),
                    self.type_mapper.column_type(column),
                    if column.is_nullable { "NULL" } else { "NOT NULL" },
                ))];
                if let Some(sql) = &column.default_value_sql {
                    scripts.push(self.plain(format!(
                        "ALTER TABLE {} ADD DEFAULT ({}) FOR {};",
                        table,
                        sql,
                        helper.delimit_identifier(&column.name)
                    )));
                } else if let Some(value) = &column.default_value {
                    scripts.push(self.plain(format!(
                        "ALTER TABLE {} ADD DEFAULT {} FOR {};",
                        table,
                        value.to_sql_literal(),
                        helper.delimit_identifier(&column.name)
                    )));
                }
                scripts
            }

            OperationKind::DropColumn { table, name } => {
                vec![self.plain(format!(
                    "ALTER TABLE {} DROP COLUMN {};",
                    table,
                    helper.delimit_identifier(name)
                ))]
            }

            OperationKind::AddPrimaryKey { table, constraint } => {
                vec![self.plain(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY({});",
                    table,
                    helper.delimit_identifier(&constraint.name),
                    self.delimited_columns(&constraint.columns)
                ))]
            }

            OperationKind::DropPrimaryKey { table, name }
            | OperationKind::DropUniqueConstraint { table, name }
            | OperationKind::DropForeignKey { table, name } => {
                vec![self.plain(format!(
                    "ALTER TABLE {} DROP CONSTRAINT {};",
                    table,
                    helper.delimit_identifier(name)
                ))]
            }

            OperationKind::AddUniqueConstraint { table, constraint } => {
                vec![self.plain(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE({});",
                    table,
                    helper.delimit_identifier(&constraint.name),
                    self.delimited_columns(&constraint.columns)
                ))]
            }

            OperationKind::AddForeignKey { table, constraint } => {
                vec![self.plain(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY({}) REFERENCES {}({}) ON DELETE {} ON UPDATE {};",
                    table,
                    helper.delimit_identifier(&constraint.name),
                    self.delimited_columns(&constraint.columns),
                    constraint.principal_table,
                    self.delimited_columns(&constraint.principal_columns),
                    self.referential(constraint.on_delete),
                    self.referential(constraint.on_update),
                ))]
            }

            OperationKind::CreateIndex {
                table,
                name,
                columns,
                is_unique,
            } => {
                vec![self.plain(format!(
                    "CREATE {}INDEX {} ON {}({});",
                    if *is_unique { "UNIQUE " } else { "" },
                    helper.delimit_identifier(name),
                    table,
                    self.delimited_columns(columns)
                ))]
            }

            OperationKind::DropIndex { table, name } => {
                vec![self.plain(format!(
                    "DROP INDEX {} ON {};",
                    helper.delimit_identifier(name),
                    table
                ))]
            }

            OperationKind::RenameColumn {
                table,
                name,
                new_name,
            } => {
                vec![self.plain(format!(
                    "EXEC sp_rename N'{}.{}', N'{}', N'COLUMN';",
                    table,
                    helper.delimit_identifier(name),
                    helper.escape_identifier(new_name)
                ))]
            }

            OperationKind::RenameIndex {
                table,
                name,
                new_name,
            } => {
                vec![self.plain(format!(
                    "EXEC sp_rename N'{}.{}', N'{}', N'INDEX';",
                    table,
                    helper.delimit_identifier(name),
                    helper.escape_identifier(new_name)
                ))]
            }

            OperationKind::RenameTable { table, new_table } => {
                vec![self.plain(format!(
                    "EXEC sp_rename N'{}', N'{}';",
                    table,
                    helper.escape_identifier(new_table.name())
                ))]
            }

            OperationKind::EnsureSchema { name } => {
                vec![self.plain(format!(
                    "IF SCHEMA_ID(N'{}') IS NULL EXEC(N'CREATE SCHEMA {}');",
                    helper.escape_identifier(name),
                    helper.delimit_identifier(name)
                ))]
            }

            OperationKind::DropSchema { name } => {
                vec![self.plain(format!("DROP SCHEMA {};", helper.delimit_identifier(name)))]
            }

            OperationKind::CreateSequence {
                name,
                schema,
                kind,
                start_value,
                facts,
            } => {
                let sequence_type = match kind {
                    ValueKind::I16 => "smallint",
                    ValueKind::I32 => "int",
                    _ => "bigint",
                };
                vec![self.plain(format!(
                    "CREATE SEQUENCE {} AS {} START WITH {}{};",
                    helper.delimit_qualified(name, schema.as_deref()),
                    sequence_type,
                    start_value,
                    self.sequence_options(facts)
                ))]
            }

            OperationKind::AlterSequence {
                name,
                schema,
                facts,
                // The old snapshot is best-effort metadata for reversible
                // renderers; the forward statement does not need it.
                old_facts: _,
            } => {
                vec![self.plain(format!(
                    "ALTER SEQUENCE {}{};",
                    helper.delimit_qualified(name, schema.as_deref()),
                    self.sequence_options(facts)
                ))]
            }

            OperationKind::DropSequence { name, schema } => {
                vec![self.plain(format!(
                    "DROP SEQUENCE {};",
                    helper.delimit_qualified(name, schema.as_deref())
                ))]
            }

            OperationKind::RestartSequence {
                name,
                schema,
                start_value,
            } => {
                vec![self.plain(format!(
                    "ALTER SEQUENCE {} RESTART WITH {};",
                    helper.delimit_qualified(name, schema.as_deref()),
                    start_value
                ))]
            }

            OperationKind::RenameSequence {
                name,
                schema,
                new_name,
                new_schema,
            } => {
                let mut scripts = Vec::new();
                if let Some(new_name) = new_name {
                    scripts.push(self.plain(format!(
                        "EXEC sp_rename N'{}', N'{}';",
                        helper.delimit_qualified(name, schema.as_deref()),
                        helper.escape_identifier(new_name)
                    )));
                }
                if let Some(new_schema) = new_schema {
                    let current = new_name.as_deref().unwrap_or(name);
                    scripts.push(self.plain(format!(
                        "ALTER SCHEMA {} TRANSFER {};",
                        helper.delimit_identifier(new_schema),
                        helper.delimit_qualified(current, schema.as_deref())
                    )));
                }
                if scripts.is_empty() {
                    return Err(StratumError::render(
                        operation.name(),
                        format!("sequence {} rename changes neither name nor schema", name),
                    ));
                }
                scripts
            }

            OperationKind::Sql { sql } => vec![self.plain(sql.clone())],

            OperationKind::SqlCreate { entity, values } => {
                if values.is_empty() {
                    return Err(StratumError::render(
                        operation.name(),
                        format!("seed insert into {} captures no values", entity.name()),
                    ));
                }
                let table = self.model.table_for(entity);
                let columns: Vec<String> = values
                    .names()
                    .map(|n| helper.delimit_identifier(n))
                    .collect();
                let placeholders: Vec<String> =
                    values.names().map(|n| helper.parameterized(n)).collect();
                let sql = format!(
                    "INSERT INTO {}({})VALUES({}){}",
                    table,
                    columns.join(","),
                    placeholders.join(","),
                    helper.statement_terminator()
                );
                vec![SqlScript::new(sql, values.clone())]
            }

            OperationKind::SqlUpdate {
                entity,
                values,
                filter,
            } => vec![self.generator.update_where(entity, values, filter.as_ref())?],

            OperationKind::SqlDelete { entity, filter } => {
                vec![self.generator.delete(entity, filter.as_ref())?]
            }
        };
        Ok(scripts)
    }
}

impl MigrationsSqlGenerator for MigrationsSqlServerGenerator {
    fn generate(&self, operations: &[MigrationOperation]) -> Result<Vec<SqlScript>> {
        let mut scripts = Vec::new();
        for operation in operations {
            let rendered = self.render(operation)?;
            debug!(
                "rendered {} into {} statement(s)",
                operation.name(),
                rendered.len()
            );
            scripts.extend(rendered);
        }
        Ok(scripts)
    }
}
