//! Statement generation.
//!
//! Predicates are typed expression trees ([`expr`]), translated into SQL
//! fragments by a per-invocation visitor ([`visitor`]); the generator
//! composes complete statements from entity metadata and translated
//! fragments, caching whole-row CRUD text per shape ([`script`]).

pub mod expr;
mod generator;
mod mssql;
mod script;
mod visitor;

pub use expr::{col, BinaryOp, Expr, MatchKind};
pub use generator::{QuerySql, SqlGenerator};
pub use mssql::SqlServerGenerator;
pub use script::{SqlScript, StatementCache};
pub use visitor::ExpressionVisitor;
