//! Statement execution boundary.
//!
//! The core only ever hands this surface rendered SQL text plus parameter
//! maps; it never opens connections itself. Suspending variants accept a
//! cancellation token that aborts the in-flight statement and surfaces a
//! cancellation outcome instead of a generic failure.

mod mssql;

pub use mssql::SqlServerExecutor;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::value::{Parameters, Row, Value};

/// Issues statements against the active database.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute a statement and return the affected row count.
    async fn execute(
        &self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<u64>;

    /// Execute a statement and return the first column of the first row.
    async fn scalar(
        &self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>>;

    /// Execute a statement and return its result rows.
    async fn query(
        &self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>>;

    /// Open a transaction scope. Statements issued through the returned
    /// handle either all commit or all roll back.
    async fn begin(&self) -> Result<Box<dyn ExecutorTransaction>>;
}

/// A transaction scope over the executor.
///
/// Dropping the handle without committing abandons the work; well-behaved
/// callers finish with an explicit [`commit`](ExecutorTransaction::commit)
/// or [`rollback`](ExecutorTransaction::rollback).
#[async_trait]
pub trait ExecutorTransaction: Send {
    /// Execute a statement inside the transaction.
    async fn execute(
        &mut self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<u64>;

    /// Execute a scalar query inside the transaction.
    async fn scalar(
        &mut self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>>;

    /// Execute a row query inside the transaction.
    async fn query(
        &mut self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>>;

    /// Commit the transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll the transaction back.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
