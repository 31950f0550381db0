//! Schema-change operations.
//!
//! A migration's create/destroy step records an ordered list of
//! [`MigrationOperation`]s; a dialect renderer later turns each one into
//! literal SQL. Operations are plain data: every payload fact a renderer
//! could need is captured at build time.

use std::sync::Arc;

use crate::error::Result;
use crate::metadata::{Annotations, EntityType, Table};
use crate::query::Expr;
use crate::value::{Parameters, Value, ValueKind};

/// Referential action applied by a foreign key on update/delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
}

/// A column definition captured for create/add/alter operations.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Value kind driving provider type selection.
    pub kind: ValueKind,
    /// Explicit provider column type, used verbatim when present.
    pub column_type: Option<String>,
    /// Maximum length for string/binary content.
    pub max_length: Option<i32>,
    /// Unicode storage (`None` means provider default).
    pub is_unicode: Option<bool>,
    /// Auto-increment identity column.
    pub is_identity: bool,
    /// Concurrency token column.
    pub is_row_version: bool,
    /// Whether the column allows NULL.
    pub is_nullable: bool,
    /// Captured default value.
    pub default_value: Option<Value>,
    /// Raw SQL default expression.
    pub default_value_sql: Option<String>,
    /// Raw SQL computed-column expression.
    pub computed_column_sql: Option<String>,
}

/// Sequence facts shared by create/alter operations and the alter-old
/// snapshot.
#[derive(Debug, Clone)]
pub struct SequenceFacts {
    pub increment_by: i64,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub is_cyclic: bool,
}

/// One atomic, named schema-change instruction plus its extension bag and
/// destructive flag.
#[derive(Debug, Clone)]
pub struct MigrationOperation {
    kind: OperationKind,
    annotations: Annotations,
    is_destructive: bool,
}

impl MigrationOperation {
    /// Wrap an operation payload, deriving the default destructive flag.
    pub fn new(kind: OperationKind) -> Self {
        let is_destructive = kind.is_destructive_by_default();
        let annotations = Annotations::for_owner(kind.name());
        Self {
            kind,
            annotations,
            is_destructive,
        }
    }

    /// The operation payload.
    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    /// Variant name, used in render errors and annotation owners.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Whether the change destroys data irrecoverably.
    pub fn is_destructive(&self) -> bool {
        self.is_destructive
    }

    /// Override the destructive flag.
    pub fn set_destructive(&mut self, destructive: bool) -> &mut Self {
        self.is_destructive = destructive;
        self
    }

    /// Extension bag.
    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    /// Attach an annotation; fails on a duplicate name.
    pub fn annotate(
        &mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Result<&mut Self> {
        self.annotations.add(name, value)?;
        Ok(self)
    }
}

/// The full tagged-variant set a renderer must cover.
#[derive(Debug, Clone)]
pub enum OperationKind {
    CreateTable {
        table: Table,
        columns: Vec<ColumnDef>,
        primary_key: Option<Constraint>,
        unique_constraints: Vec<Constraint>,
        foreign_keys: Vec<ForeignKeyConstraint>,
    },
    DropTable {
        table: Table,
    },
    AddColumn {
        table: Table,
        column: ColumnDef,
    },
    AlterColumn {
        table: Table,
        column: ColumnDef,
        /// Snapshot of the column before the change, for reversible
        /// renderers and provider-specific rebuild decisions.
        old_column: ColumnDef,
    },
    DropColumn {
        table: Table,
        name: String,
    },
    AddPrimaryKey {
        table: Table,
        constraint: Constraint,
    },
    DropPrimaryKey {
        table: Table,
        name: String,
    },
    AddUniqueConstraint {
        table: Table,
        constraint: Constraint,
    },
    DropUniqueConstraint {
        table: Table,
        name: String,
    },
    AddForeignKey {
        table: Table,
        constraint: ForeignKeyConstraint,
    },
    DropForeignKey {
        table: Table,
        name: String,
    },
    CreateIndex {
        table: Table,
        name: String,
        columns: Vec<String>,
        is_unique: bool,
    },
    DropIndex {
        table: Table,
        name: String,
    },
    RenameColumn {
        table: Table,
        name: String,
        new_name: String,
    },
    RenameIndex {
        table: Table,
        name: String,
        new_name: String,
    },
    RenameTable {
        table: Table,
        new_table: Table,
    },
    EnsureSchema {
        name: String,
    },
    DropSchema {
        name: String,
    },
    CreateSequence {
        name: String,
        schema: Option<String>,
        kind: ValueKind,
        start_value: i64,
        facts: SequenceFacts,
    },
    AlterSequence {
        name: String,
        schema: Option<String>,
        facts: SequenceFacts,
        /// Snapshot of the sequence before the change.
        old_facts: SequenceFacts,
    },
    DropSequence {
        name: String,
        schema: Option<String>,
    },
    RestartSequence {
        name: String,
        schema: Option<String>,
        start_value: i64,
    },
    RenameSequence {
        name: String,
        schema: Option<String>,
        new_name: Option<String>,
        new_schema: Option<String>,
    },
    /// Raw SQL passed through verbatim.
    Sql {
        sql: String,
    },
    /// Data seed: insert one captured row.
    SqlCreate {
        entity: Arc<EntityType>,
        values: Parameters,
    },
    /// Data seed: update rows matching a predicate.
    SqlUpdate {
        entity: Arc<EntityType>,
        values: Parameters,
        filter: Option<Expr>,
    },
    /// Data seed: delete rows matching a predicate.
    SqlDelete {
        entity: Arc<EntityType>,
        filter: Option<Expr>,
    },
}

impl OperationKind {
    /// Variant name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::CreateTable { .. } => "CreateTable",
            OperationKind::DropTable { .. } => "DropTable",
            OperationKind::AddColumn { .. } => "AddColumn",
            OperationKind::AlterColumn { .. } => "AlterColumn",
            OperationKind::DropColumn { .. } => "DropColumn",
            OperationKind::AddPrimaryKey { .. } => "AddPrimaryKey",
            OperationKind::DropPrimaryKey { .. } => "DropPrimaryKey",
            OperationKind::AddUniqueConstraint { .. } => "AddUniqueConstraint",
            OperationKind::DropUniqueConstraint { .. } => "DropUniqueConstraint",
            OperationKind::AddForeignKey { .. } => "AddForeignKey",
            OperationKind::DropForeignKey { .. } => "DropForeignKey",
            OperationKind::CreateIndex { .. } => "CreateIndex",
            OperationKind::DropIndex { .. } => "DropIndex",
            OperationKind::RenameColumn { .. } => "RenameColumn",
            OperationKind::RenameIndex { .. } => "RenameIndex",
            OperationKind::RenameTable { .. } => "RenameTable",
            OperationKind::EnsureSchema { .. } => "EnsureSchema",
            OperationKind::DropSchema { .. } => "DropSchema",
            OperationKind::CreateSequence { .. } => "CreateSequence",
            OperationKind::AlterSequence { .. } => "AlterSequence",
            OperationKind::DropSequence { .. } => "DropSequence",
            OperationKind::RestartSequence { .. } => "RestartSequence",
            OperationKind::RenameSequence { .. } => "RenameSequence",
            OperationKind::Sql { .. } => "Sql",
            OperationKind::SqlCreate { .. } => "SqlCreate",
            OperationKind::SqlUpdate { .. } => "SqlUpdate",
            OperationKind::SqlDelete { .. } => "SqlDelete",
        }
    }

    fn is_destructive_by_default(&self) -> bool {
        matches!(
            self,
            OperationKind::DropTable { .. }
                | OperationKind::DropColumn { .. }
                | OperationKind::DropSchema { .. }
                | OperationKind::DropSequence { .. }
                | OperationKind::SqlDelete { .. }
        )
    }
}

/// A named key/unique constraint over columns of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub name: String,
    pub columns: Vec<String>,
}

/// A named foreign key constraint.
#[derive(Debug, Clone)]
pub struct ForeignKeyConstraint {
    pub name: String,
    pub columns: Vec<String>,
    pub principal_table: Table,
    pub principal_columns: Vec<String>,
    pub on_update: ReferentialAction,
    pub on_delete: ReferentialAction,
}
