//! Declarative schema migrations.
//!
//! A migration unit records schema-change operations through a fluent
//! builder; a dialect renderer turns each operation into literal SQL; the
//! migrator applies rendered units transactionally and tracks applied
//! versions in a durable history table.

mod builder;
mod history;
mod migrator;
mod operations;
mod sql_generator;

pub use builder::{
    constraint_name, referential_action, ColumnOptions, CreateTableBuilder, MigrationBuilder,
    NameKind, OldColumn,
};
pub use history::HistoryRepository;
pub use migrator::{DataMigration, Migrator};
pub use operations::{
    ColumnDef, Constraint, ForeignKeyConstraint, MigrationOperation, OperationKind,
    ReferentialAction, SequenceFacts,
};
pub use sql_generator::{
    MigrationsSqlGenerator, MigrationsSqlServerGenerator, SqlServerTypeMapper,
};
