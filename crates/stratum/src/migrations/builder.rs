//! Fluent recording of schema-change operations.
//!
//! A builder instance collects ordered [`MigrationOperation`]s against the
//! metadata model; column facts come from entity metadata, with per-call
//! option overrides. Recording has no side effects; rendering and execution
//! happen later.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Result, StratumError};
use crate::metadata::{DeleteBehavior, Entity, EntityType, Ignore, Model, Table};
use crate::migrations::operations::{
    ColumnDef, Constraint, ForeignKeyConstraint, MigrationOperation, OperationKind,
    ReferentialAction, SequenceFacts,
};
use crate::query::Expr;
use crate::value::{Parameters, Value, ValueKind};

/// Constraint name classes with their conventional prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    PrimaryKey,
    UniqueKey,
    Index,
    ForeignKey,
}

/// Derive a deterministic constraint name: prefix, schema and table,
/// optionally the column list and the principal table. Rebuilding the same
/// operations against an unchanged model yields byte-identical names.
pub fn constraint_name(
    kind: NameKind,
    table: &Table,
    columns: Option<&[String]>,
    principal: Option<&Table>,
) -> String {
    let mut name = String::from(match kind {
        NameKind::PrimaryKey => "PK_",
        NameKind::UniqueKey => "UK_",
        NameKind::Index => "IX_",
        NameKind::ForeignKey => "FK_",
    });
    if let Some(schema) = table.schema() {
        name.push_str(schema);
    }
    name.push_str(table.name());
    if let Some(columns) = columns {
        name.push('_');
        name.push_str(&columns.join("_"));
    }
    if let Some(principal) = principal {
        name.push('_');
        if let Some(schema) = principal.schema() {
            name.push_str(schema);
        }
        name.push_str(principal.name());
    }
    name
}

/// Map a metadata delete behavior onto a referential action.
pub fn referential_action(behavior: DeleteBehavior) -> ReferentialAction {
    match behavior {
        DeleteBehavior::Restrict => ReferentialAction::Restrict,
        DeleteBehavior::SetNull => ReferentialAction::SetNull,
        DeleteBehavior::Cascade => ReferentialAction::Cascade,
    }
}

/// Per-call overrides for a column operation. Anything left `None` falls
/// back to the property's metadata facts.
#[derive(Debug, Clone, Default)]
pub struct ColumnOptions {
    /// Explicit provider column type.
    pub column_type: Option<String>,
    /// Nullability override.
    pub nullable: Option<bool>,
    /// Unicode storage override.
    pub unicode: Option<bool>,
    /// Captured default value.
    pub default_value: Option<Value>,
    /// Raw SQL default expression.
    pub default_value_sql: Option<String>,
    /// Raw SQL computed-column expression.
    pub computed_column_sql: Option<String>,
}

/// Snapshot facts of a column before an alter, for down-migration and
/// provider rebuild decisions.
#[derive(Debug, Clone, Default)]
pub struct OldColumn {
    pub kind: Option<ValueKind>,
    pub column_type: Option<String>,
    pub unicode: Option<bool>,
    pub max_length: Option<i32>,
    pub identity: bool,
    pub row_version: bool,
    pub nullable: bool,
    pub default_value: Option<Value>,
    pub default_value_sql: Option<String>,
    pub computed_column_sql: Option<String>,
}

fn column_def(entity: &EntityType, name: &str, options: &ColumnOptions) -> Result<ColumnDef> {
    let property = entity.find_property(name).ok_or_else(|| {
        StratumError::model(format!(
            "type {} has no property named {}",
            entity.name(),
            name
        ))
    })?;
    Ok(ColumnDef {
        name: property.name().to_string(),
        kind: property.kind(),
        column_type: options.column_type.clone(),
        max_length: property.max_length(),
        is_unicode: options.unicode,
        is_identity: property.is_identity(),
        is_row_version: property.is_row_version(),
        is_nullable: options.nullable.unwrap_or(property.is_nullable()),
        default_value: options.default_value.clone(),
        default_value_sql: options.default_value_sql.clone(),
        computed_column_sql: options.computed_column_sql.clone(),
    })
}

fn column_names(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

/// Records a migration's ordered operation list.
pub struct MigrationBuilder {
    model: Arc<Model>,
    operations: Vec<MigrationOperation>,
}

impl MigrationBuilder {
    /// Create an empty builder over the metadata model.
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            operations: Vec::new(),
        }
    }

    /// The metadata model operations are validated against.
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Recorded operations in execution order.
    pub fn operations(&self) -> &[MigrationOperation] {
        &self.operations
    }

    /// Consume the builder, yielding its operations.
    pub fn into_operations(self) -> Vec<MigrationOperation> {
        self.operations
    }

    fn push(&mut self, kind: OperationKind) -> &mut MigrationOperation {
        let index = self.operations.len();
        self.operations.push(MigrationOperation::new(kind));
        &mut self.operations[index]
    }

    /// Record a table creation. The closure configures columns and
    /// constraints; when it declares no primary key, the entity's metadata
    /// key is added automatically.
    pub fn create_table<T: Entity>(
        &mut self,
        configure: impl FnOnce(&mut CreateTableBuilder<T>) -> Result<()>,
    ) -> Result<&mut MigrationOperation> {
        let entity = self.model.get_entity::<T>();
        let table = self.model.get_table::<T>();
        let mut builder = CreateTableBuilder {
            model: Arc::clone(&self.model),
            entity,
            table: (*table).clone(),
            columns: Vec::new(),
            primary_key: None,
            unique_constraints: Vec::new(),
            foreign_keys: Vec::new(),
            _entity: PhantomData,
        };
        configure(&mut builder)?;
        if builder.primary_key.is_none() {
            builder.primary_key();
        }

        Ok(self.push(OperationKind::CreateTable {
            table: builder.table,
            columns: builder.columns,
            primary_key: builder.primary_key,
            unique_constraints: builder.unique_constraints,
            foreign_keys: builder.foreign_keys,
        }))
    }

    /// Record dropping the entity's table.
    pub fn drop_table<T: Entity>(&mut self) -> &mut MigrationOperation {
        let table = (*self.model.get_table::<T>()).clone();
        self.push(OperationKind::DropTable { table })
    }

    /// Record dropping a table by explicit name.
    pub fn drop_table_named(
        &mut self,
        name: &str,
        schema: Option<&str>,
    ) -> &mut MigrationOperation {
        let table = self.model.table(name, schema);
        self.push(OperationKind::DropTable { table })
    }

    /// Record adding a column whose facts come from the entity's metadata.
    pub fn add_column<T: Entity>(
        &mut self,
        name: &str,
        options: ColumnOptions,
    ) -> Result<&mut MigrationOperation> {
        let entity = self.model.get_entity::<T>();
        let column = column_def(&entity, name, &options)?;
        let table = (*self.model.get_table::<T>()).clone();
        Ok(self.push(OperationKind::AddColumn { table, column }))
    }

    /// Record altering a column, capturing the old snapshot alongside the
    /// new facts.
    pub fn alter_column<T: Entity>(
        &mut self,
        name: &str,
        options: ColumnOptions,
        old: OldColumn,
    ) -> Result<&mut MigrationOperation> {
        let entity = self.model.get_entity::<T>();
        let column = column_def(&entity, name, &options)?;
        let old_column = ColumnDef {
            name: column.name.clone(),
            kind: old.kind.unwrap_or(column.kind),
            column_type: old.column_type,
            max_length: old.max_length,
            is_unicode: old.unicode,
            is_identity: old.identity,
            is_row_version: old.row_version,
            is_nullable: old.nullable,
            default_value: old.default_value,
            default_value_sql: old.default_value_sql,
            computed_column_sql: old.computed_column_sql,
        };
        let table = (*self.model.get_table::<T>()).clone();
        Ok(self.push(OperationKind::AlterColumn {
            table,
            column,
            old_column,
        }))
    }

    /// Record dropping a column by name. No metadata check: the column may
    /// already be gone from the shape.
    pub fn drop_column<T: Entity>(&mut self, name: &str) -> &mut MigrationOperation {
        let table = (*self.model.get_table::<T>()).clone();
        self.push(OperationKind::DropColumn {
            table,
            name: name.to_string(),
        })
    }

    /// Record adding the primary key over the given columns.
    pub fn add_primary_key<T: Entity>(&mut self, columns: &[&str]) -> &mut MigrationOperation {
        let table = (*self.model.get_table::<T>()).clone();
        let constraint = Constraint {
            name: constraint_name(NameKind::PrimaryKey, &table, None, None),
            columns: column_names(columns),
        };
        self.push(OperationKind::AddPrimaryKey { table, constraint })
    }

    /// Record dropping the primary key.
    pub fn drop_primary_key<T: Entity>(&mut self) -> &mut MigrationOperation {
        let table = (*self.model.get_table::<T>()).clone();
        let name = constraint_name(NameKind::PrimaryKey, &table, None, None);
        self.push(OperationKind::DropPrimaryKey { table, name })
    }

    /// Record adding a unique constraint over the given columns.
    pub fn add_unique_constraint<T: Entity>(
        &mut self,
        columns: &[&str],
    ) -> &mut MigrationOperation {
        let table = (*self.model.get_table::<T>()).clone();
        let columns = column_names(columns);
        let constraint = Constraint {
            name: constraint_name(NameKind::UniqueKey, &table, Some(&columns), None),
            columns,
        };
        self.push(OperationKind::AddUniqueConstraint { table, constraint })
    }

    /// Record dropping the unique constraint derived from the given columns.
    pub fn drop_unique_constraint<T: Entity>(
        &mut self,
        columns: &[&str],
    ) -> &mut MigrationOperation {
        let table = (*self.model.get_table::<T>()).clone();
        let columns = column_names(columns);
        let name = constraint_name(NameKind::UniqueKey, &table, Some(&columns), None);
        self.push(OperationKind::DropUniqueConstraint { table, name })
    }

    /// Record dropping a unique constraint by its full name.
    pub fn drop_unique_constraint_named<T: Entity>(
        &mut self,
        name: &str,
    ) -> &mut MigrationOperation {
        let table = (*self.model.get_table::<T>()).clone();
        self.push(OperationKind::DropUniqueConstraint {
            table,
            name: name.to_string(),
        })
    }

    /// Record adding a foreign key from `T` to `P`. Principal columns
    /// default to the dependent columns.
    pub fn add_foreign_key<T: Entity, P: Entity>(
        &mut self,
        columns: &[&str],
        principal_columns: Option<&[&str]>,
        on_update: ReferentialAction,
        on_delete: ReferentialAction,
    ) -> &mut MigrationOperation {
        let table = (*self.model.get_table::<T>()).clone();
        let principal_table = (*self.model.get_table::<P>()).clone();
        let columns = column_names(columns);
        let principal_columns = principal_columns.map(column_names).unwrap_or_else(|| columns.clone());
        let constraint = ForeignKeyConstraint {
            name: constraint_name(
                NameKind::ForeignKey,
                &table,
                Some(&columns),
                Some(&principal_table),
            ),
            columns,
            principal_table,
            principal_columns,
            on_update,
            on_delete,
        };
        self.push(OperationKind::AddForeignKey { table, constraint })
    }

    /// Record one AddForeignKey per foreign key declared on the entity's
    /// metadata, resolving each principal by its logical name.
    pub fn add_foreign_keys_from_metadata<T: Entity>(&mut self) -> Result<()> {
        let entity = self.model.get_entity::<T>();
        let table = (*self.model.get_table::<T>()).clone();
        for fk in entity.foreign_keys() {
            let principal = self
                .model
                .find_entity_by_logical_name(fk.principal())
                .ok_or_else(|| {
                    StratumError::model(format!(
                        "foreign key on {} references unknown entity {}",
                        entity.name(),
                        fk.principal()
                    ))
                })?;
            let principal_table = self.model.table_for(&principal);
            let columns = fk.columns().to_vec();
            let constraint = ForeignKeyConstraint {
                name: constraint_name(
                    NameKind::ForeignKey,
                    &table,
                    Some(&columns),
                    Some(principal_table.as_ref()),
                ),
                columns,
                principal_table: (*principal_table).clone(),
                principal_columns: fk.principal_columns().to_vec(),
                on_update: ReferentialAction::NoAction,
                on_delete: referential_action(fk.on_delete()),
            };
            self.push(OperationKind::AddForeignKey {
                table: table.clone(),
                constraint,
            });
        }
        Ok(())
    }

    /// Record dropping the foreign key derived from the given columns.
    pub fn drop_foreign_key<T: Entity, P: Entity>(
        &mut self,
        columns: &[&str],
    ) -> &mut MigrationOperation {
        let table = (*self.model.get_table::<T>()).clone();
        let principal_table = self.model.get_table::<P>();
        let columns = column_names(columns);
        let name = constraint_name(
            NameKind::ForeignKey,
            &table,
            Some(&columns),
            Some(principal_table.as_ref()),
        );
        self.push(OperationKind::DropForeignKey { table, name })
    }

    /// Record dropping a foreign key by its full name.
    pub fn drop_foreign_key_named<T: Entity>(&mut self, name: &str) -> &mut MigrationOperation {
        let table = (*self.model.get_table::<T>()).clone();
        self.push(OperationKind::DropForeignKey {
            table,
            name: name.to_string(),
        })
    }

    /// Record creating an index over the given columns.
    pub fn create_index<T: Entity>(
        &mut self,
        columns: &[&str],
        unique: bool,
    ) -> &mut MigrationOperation {
        let table = (*self.model.get_table::<T>()).clone();
        let columns = column_names(columns);
        let name = constraint_name(NameKind::Index, &table, Some(&columns), None);
        self.push(OperationKind::CreateIndex {
            table,
            name,
            columns,
            is_unique: unique,
        })
    }

    /// Record dropping the index derived from the given columns.
    pub fn drop_index<T: Entity>(&mut self, columns: &[&str]) -> &mut MigrationOperation {
        let table = (*self.model.get_table::<T>()).clone();
        let columns = column_names(columns);
        let name = constraint_name(NameKind::Index, &table, Some(&columns), None);
        self.push(OperationKind::DropIndex { table, name })
    }

    /// Record dropping an index by its full name.
    pub fn drop_index_named<T: Entity>(&mut self, name: &str) -> &mut MigrationOperation {
        let table = (*self.model.get_table::<T>()).clone();
        self.push(OperationKind::DropIndex {
            table,
            name: name.to_string(),
        })
    }

    /// Record renaming a column to a property of the current shape.
    pub fn rename_column<T: Entity>(
        &mut self,
        name: &str,
        new_name: &str,
    ) -> Result<&mut MigrationOperation> {
        let entity = self.model.get_entity::<T>();
        let property = entity.find_property(new_name).ok_or_else(|| {
            StratumError::model(format!(
                "type {} has no property named {}",
                entity.name(),
                new_name
            ))
        })?;
        let new_name = property.name().to_string();
        let table = (*self.model.get_table::<T>()).clone();
        Ok(self.push(OperationKind::RenameColumn {
            table,
            name: name.to_string(),
            new_name,
        }))
    }

    /// Record renaming an index to the name derived from the given columns.
    pub fn rename_index<T: Entity>(
        &mut self,
        name: &str,
        columns: &[&str],
    ) -> &mut MigrationOperation {
        let table = (*self.model.get_table::<T>()).clone();
        let columns = column_names(columns);
        let new_name = constraint_name(NameKind::Index, &table, Some(&columns), None);
        self.push(OperationKind::RenameIndex {
            table,
            name: name.to_string(),
            new_name,
        })
    }

    /// Record renaming a table (by its old physical name) to the entity's
    /// current table.
    pub fn rename_table<T: Entity>(
        &mut self,
        name: &str,
        schema: Option<&str>,
    ) -> &mut MigrationOperation {
        let table = self.model.table(name, schema);
        let new_table = (*self.model.get_table::<T>()).clone();
        self.push(OperationKind::RenameTable { table, new_table })
    }

    /// Record ensuring a schema exists.
    pub fn ensure_schema(&mut self, name: &str) -> &mut MigrationOperation {
        self.push(OperationKind::EnsureSchema {
            name: name.to_string(),
        })
    }

    /// Record dropping a schema.
    pub fn drop_schema(&mut self, name: &str) -> &mut MigrationOperation {
        self.push(OperationKind::DropSchema {
            name: name.to_string(),
        })
    }

    /// Record creating a sequence.
    pub fn create_sequence(
        &mut self,
        name: &str,
        schema: Option<&str>,
        start_value: i64,
        facts: SequenceFacts,
    ) -> &mut MigrationOperation {
        self.push(OperationKind::CreateSequence {
            name: name.to_string(),
            schema: schema.map(str::to_string),
            kind: ValueKind::I64,
            start_value,
            facts,
        })
    }

    /// Record altering a sequence, capturing the old snapshot.
    pub fn alter_sequence(
        &mut self,
        name: &str,
        schema: Option<&str>,
        facts: SequenceFacts,
        old_facts: SequenceFacts,
    ) -> &mut MigrationOperation {
        self.push(OperationKind::AlterSequence {
            name: name.to_string(),
            schema: schema.map(str::to_string),
            facts,
            old_facts,
        })
    }

    /// Record dropping a sequence.
    pub fn drop_sequence(&mut self, name: &str, schema: Option<&str>) -> &mut MigrationOperation {
        self.push(OperationKind::DropSequence {
            name: name.to_string(),
            schema: schema.map(str::to_string),
        })
    }

    /// Record restarting a sequence at a value.
    pub fn restart_sequence(
        &mut self,
        name: &str,
        start_value: i64,
        schema: Option<&str>,
    ) -> &mut MigrationOperation {
        self.push(OperationKind::RestartSequence {
            name: name.to_string(),
            schema: schema.map(str::to_string),
            start_value,
        })
    }

    /// Record renaming a sequence.
    pub fn rename_sequence(
        &mut self,
        name: &str,
        schema: Option<&str>,
        new_name: Option<&str>,
        new_schema: Option<&str>,
    ) -> &mut MigrationOperation {
        self.push(OperationKind::RenameSequence {
            name: name.to_string(),
            schema: schema.map(str::to_string),
            new_name: new_name.map(str::to_string),
            new_schema: new_schema.map(str::to_string),
        })
    }

    /// Record a raw SQL operation.
    pub fn sql(&mut self, sql: &str) -> &mut MigrationOperation {
        self.push(OperationKind::Sql {
            sql: sql.to_string(),
        })
    }

    /// Record a seed insert, capturing the instance's insertable values
    /// through the entity's getters.
    pub fn sql_create<T: Entity>(&mut self, instance: &T) -> &mut MigrationOperation {
        let entity = self.model.get_entity::<T>();
        let values: Parameters = entity
            .properties_for(Ignore::INSERT)
            .map(|p| (p.name().to_string(), p.get(instance)))
            .collect();
        self.push(OperationKind::SqlCreate { entity, values })
    }

    /// Record a seed update of the given column/value set under a
    /// predicate.
    pub fn sql_update<T: Entity>(
        &mut self,
        filter: Expr,
        statement: Parameters,
    ) -> &mut MigrationOperation {
        let entity = self.model.get_entity::<T>();
        self.push(OperationKind::SqlUpdate {
            entity,
            values: statement,
            filter: Some(filter),
        })
    }

    /// Record a seed delete under an optional predicate.
    pub fn sql_delete<T: Entity>(&mut self, filter: Option<Expr>) -> &mut MigrationOperation {
        let entity = self.model.get_entity::<T>();
        self.push(OperationKind::SqlDelete { entity, filter })
    }
}

/// Configures the columns and constraints of one CreateTable operation.
pub struct CreateTableBuilder<T: Entity> {
    model: Arc<Model>,
    entity: Arc<EntityType>,
    table: Table,
    columns: Vec<ColumnDef>,
    primary_key: Option<Constraint>,
    unique_constraints: Vec<Constraint>,
    foreign_keys: Vec<ForeignKeyConstraint>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> CreateTableBuilder<T> {
    /// Add a column for the named property.
    pub fn column(&mut self, name: &str, options: ColumnOptions) -> Result<&mut Self> {
        let column = column_def(&self.entity, name, &options)?;
        self.columns.push(column);
        Ok(self)
    }

    /// Add columns for every persisted property of the shape.
    pub fn columns_from_metadata(&mut self) -> &mut Self {
        for property in self.entity.properties() {
            if property.ignore().contains(Ignore::ALL) {
                continue;
            }
            self.columns.push(ColumnDef {
                name: property.name().to_string(),
                kind: property.kind(),
                column_type: None,
                max_length: property.max_length(),
                is_unicode: None,
                is_identity: property.is_identity(),
                is_row_version: property.is_row_version(),
                is_nullable: property.is_nullable(),
                default_value: None,
                default_value_sql: None,
                computed_column_sql: None,
            });
        }
        self
    }

    /// Declare the primary key from the entity's metadata key. A shape
    /// without a key leaves the table keyless.
    pub fn primary_key(&mut self) -> &mut Self {
        if let Some(key) = self.entity.primary_key() {
            self.primary_key = Some(Constraint {
                name: constraint_name(NameKind::PrimaryKey, &self.table, None, None),
                columns: key.properties().to_vec(),
            });
        }
        self
    }

    /// Declare a unique constraint over the given columns.
    pub fn unique_constraint(&mut self, columns: &[&str]) -> &mut Self {
        let columns = column_names(columns);
        self.unique_constraints.push(Constraint {
            name: constraint_name(NameKind::UniqueKey, &self.table, Some(&columns), None),
            columns,
        });
        self
    }

    /// Declare a foreign key to `P`. Principal columns default to the
    /// dependent columns; the delete action defaults to the behavior the
    /// entity's metadata declares for these columns, if any.
    pub fn foreign_key<P: Entity>(
        &mut self,
        columns: &[&str],
        principal_columns: Option<&[&str]>,
        on_update: ReferentialAction,
        on_delete: Option<ReferentialAction>,
    ) -> &mut Self {
        let principal_table = (*self.model.get_table::<P>()).clone();
        let columns = column_names(columns);
        let principal_columns = principal_columns.map(column_names).unwrap_or_else(|| columns.clone());

        let on_delete = on_delete.unwrap_or_else(|| {
            self.entity
                .foreign_keys()
                .iter()
                .find(|fk| fk.columns() == columns.as_slice())
                .map(|fk| referential_action(fk.on_delete()))
                .unwrap_or_default()
        });

        self.foreign_keys.push(ForeignKeyConstraint {
            name: constraint_name(
                NameKind::ForeignKey,
                &self.table,
                Some(&columns),
                Some(&principal_table),
            ),
            columns,
            principal_table,
            principal_columns,
            on_update,
            on_delete,
        });
        self
    }
}
