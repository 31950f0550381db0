//! # stratum
//!
//! Metadata-driven micro-ORM and schema migration toolkit for SQL Server.
//!
//! The crate builds an in-memory model of persistent entity shapes,
//! translates typed predicate expressions into parameterized SQL, composes
//! CRUD/scalar/paging/recursive statements per dialect, and applies
//! declarative, versioned schema migrations:
//!
//! - **Metadata** ([`metadata`]): each shape declares its property table
//!   once; descriptions are compiled with pre-bound accessors and cached
//!   for the process lifetime.
//! - **Queries** ([`query`]): predicates are explicit expression trees
//!   built with a combinator API; captured values always become named
//!   parameters.
//! - **Migrations** ([`migrations`]): a fluent builder records operations,
//!   a dialect renderer turns them into SQL, and a history table tracks
//!   applied versions; each unit applies transactionally.
//! - **Execution** ([`executor`], [`repository`]): statements run through a
//!   pooled executor boundary with cancellation support; rows map back into
//!   instances through the metadata accessors.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stratum::{
//!     col, DatabaseOptions, Model, Repository, SqlServerExecutor, SqlServerGenerator,
//!     SqlServerHelper, StatementCache,
//! };
//! # use stratum::{Entity, PropertyDef, ValueKind};
//! # #[derive(Debug, Default)]
//! # struct User { id: i32 }
//! # impl Entity for User {
//! #     fn entity_name() -> &'static str { "app::User" }
//! #     fn properties() -> Vec<PropertyDef<Self>> {
//! #         vec![PropertyDef::new("Id", ValueKind::I32,
//! #             |m: &User| m.id.into(),
//! #             |m, v| m.id = v.as_i64().unwrap_or_default() as i32).identity()]
//! #     }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> stratum::Result<()> {
//!     let options = DatabaseOptions::load("database.yaml")?;
//!     let model = Arc::new(Model::new(Arc::new(SqlServerHelper)));
//!     let generator = Arc::new(SqlServerGenerator::new(
//!         Arc::clone(&model),
//!         Arc::new(StatementCache::new()),
//!     ));
//!     let executor = Arc::new(SqlServerExecutor::connect(options).await?);
//!
//!     let users: Repository<User> = Repository::new(model, generator, executor);
//!     let cancel = tokio_util::sync::CancellationToken::new();
//!     let admin = users.find(&col("Id").eq(1), &cancel).await?;
//!     println!("{:?}", admin);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod metadata;
pub mod migrations;
pub mod query;
pub mod repository;
pub mod value;

// Re-exports for convenient access
pub use config::DatabaseOptions;
pub use dialect::{SqlHelper, SqlServerHelper};
pub use error::{Result, StratumError};
pub use executor::{Executor, ExecutorTransaction, SqlServerExecutor};
pub use metadata::{
    Annotations, DeleteBehavior, Entity, EntityType, ForeignKeyDef, Ignore, Model, PropertyDef,
    Table,
};
pub use migrations::{
    DataMigration, MigrationBuilder, Migrator, MigrationsSqlGenerator,
    MigrationsSqlServerGenerator, ReferentialAction,
};
pub use query::{col, Expr, QuerySql, SqlGenerator, SqlScript, SqlServerGenerator, StatementCache};
pub use repository::{Repository, TransactionRepository};
pub use value::{Parameters, Row, Value, ValueKind};
