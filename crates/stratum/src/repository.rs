//! Entity repositories.
//!
//! A repository issues generated statements through the executor boundary
//! and maps result rows back into entity instances via the metadata model's
//! compiled accessors. It owns no SQL knowledge of its own.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Result, StratumError};
use crate::executor::{Executor, ExecutorTransaction};
use crate::metadata::{Entity, EntityType, Model};
use crate::query::{Expr, QuerySql, SqlGenerator};
use crate::value::{Parameters, Value};

/// Database operations for one entity shape.
pub struct Repository<T: Entity> {
    model: Arc<Model>,
    generator: Arc<dyn SqlGenerator>,
    executor: Arc<dyn Executor>,
    entity: Arc<EntityType>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Repository<T> {
    /// Create a repository over the shared model, generator and executor.
    pub fn new(
        model: Arc<Model>,
        generator: Arc<dyn SqlGenerator>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let entity = model.get_entity::<T>();
        Self {
            model,
            generator,
            executor,
            entity,
            _entity: PhantomData,
        }
    }

    /// The shape's metadata description.
    pub fn entity(&self) -> &Arc<EntityType> {
        &self.entity
    }

    /// Insert the instance. On shapes with an identity property the
    /// generated key comes back in the same round trip and is written onto
    /// the instance.
    pub async fn create(&self, model: &mut T, cancel: &CancellationToken) -> Result<bool> {
        let script = self.generator.create(&self.entity)?;
        let parameters = script.create_parameters(model);
        if let Some(identity) = self.entity.identity() {
            let generated = self
                .executor
                .scalar(script.sql(), &parameters, cancel)
                .await?;
            match generated {
                Some(value) if !value.is_null() => {
                    identity.set(model, value);
                    Ok(true)
                }
                _ => Ok(false),
            }
        } else {
            let affected = self
                .executor
                .execute(script.sql(), &parameters, cancel)
                .await?;
            Ok(affected > 0)
        }
    }

    /// Whole-row update of the instance, filtered by its primary key.
    pub async fn update(&self, model: &T, cancel: &CancellationToken) -> Result<bool> {
        let script = self.generator.update(&self.entity)?;
        let parameters = script.create_parameters(model);
        let affected = self
            .executor
            .execute(script.sql(), &parameters, cancel)
            .await?;
        Ok(affected > 0)
    }

    /// Update the given column/value set on rows matching the condition.
    pub async fn update_where(
        &self,
        filter: Option<&Expr>,
        statement: Parameters,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let script = self.generator.update_where(&self.entity, &statement, filter)?;
        let affected = self
            .executor
            .execute(script.sql(), script.parameters(), cancel)
            .await?;
        Ok(affected > 0)
    }

    /// Delete rows matching the condition (all rows when absent).
    pub async fn delete(&self, filter: Option<&Expr>, cancel: &CancellationToken) -> Result<bool> {
        let script = self.generator.delete(&self.entity, filter)?;
        let affected = self
            .executor
            .execute(script.sql(), script.parameters(), cancel)
            .await?;
        Ok(affected > 0)
    }

    /// Fetch the first instance matching the condition.
    pub async fn find(&self, filter: &Expr, cancel: &CancellationToken) -> Result<Option<T>> {
        let script = self.generator.list(&self.entity, Some(filter))?;
        let rows = self
            .executor
            .query(script.sql(), script.parameters(), cancel)
            .await?;
        Ok(rows.first().map(|row| self.entity.read(row)))
    }

    /// Load all instances matching the condition.
    pub async fn load(&self, filter: Option<&Expr>, cancel: &CancellationToken) -> Result<Vec<T>> {
        let script = self.generator.list(&self.entity, filter)?;
        let rows = self
            .executor
            .query(script.sql(), script.parameters(), cancel)
            .await?;
        Ok(rows.iter().map(|row| self.entity.read(row)).collect())
    }

    /// Load the transitive parents or children of the rows matching the
    /// condition.
    pub async fn load_recursive(
        &self,
        filter: Option<&Expr>,
        parent: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>> {
        let script = self.generator.recurse(&self.entity, filter, parent)?;
        let rows = self
            .executor
            .query(script.sql(), script.parameters(), cancel)
            .await?;
        Ok(rows.iter().map(|row| self.entity.read(row)).collect())
    }

    /// Run a pre-assembled query request and map its first result set.
    pub async fn query(&self, request: &QuerySql, cancel: &CancellationToken) -> Result<Vec<T>> {
        let script = self.generator.query(request)?;
        let rows = self
            .executor
            .query(script.sql(), script.parameters(), cancel)
            .await?;
        Ok(rows.iter().map(|row| self.entity.read(row)).collect())
    }

    /// Whether any row matches the condition.
    pub async fn any(&self, filter: Option<&Expr>, cancel: &CancellationToken) -> Result<bool> {
        let script = self.generator.any(&self.entity, filter)?;
        let probe = self
            .executor
            .scalar(script.sql(), script.parameters(), cancel)
            .await?;
        Ok(matches!(probe, Some(value) if !value.is_null()))
    }

    /// Count the rows matching the condition.
    pub async fn count(&self, filter: Option<&Expr>, cancel: &CancellationToken) -> Result<i64> {
        let script = self
            .generator
            .scalar(&self.entity, "COUNT", None, filter)?;
        let count = self
            .executor
            .scalar(script.sql(), script.parameters(), cancel)
            .await?;
        Ok(count.and_then(|v| v.as_i64()).unwrap_or(0))
    }

    /// Run an aggregate over a column.
    pub async fn scalar(
        &self,
        func_name: &str,
        inner: Option<&str>,
        filter: Option<&Expr>,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        let script = self
            .generator
            .scalar(&self.entity, func_name, inner, filter)?;
        self.executor
            .scalar(script.sql(), script.parameters(), cancel)
            .await
    }

    /// Atomically add `value` to the named columns on matching rows.
    pub async fn increase_by(
        &self,
        filter: Option<&Expr>,
        columns: &[&str],
        value: Value,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let script = self
            .generator
            .increase_by(&self.entity, filter, columns, value)?;
        let affected = self
            .executor
            .execute(script.sql(), script.parameters(), cancel)
            .await?;
        Ok(affected > 0)
    }

    /// Atomically subtract `value` from the named columns on matching rows.
    pub async fn decrease_by(
        &self,
        filter: Option<&Expr>,
        columns: &[&str],
        value: Value,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let script = self
            .generator
            .decrease_by(&self.entity, filter, columns, value)?;
        let affected = self
            .executor
            .execute(script.sql(), script.parameters(), cancel)
            .await?;
        Ok(affected > 0)
    }

    /// Get a repository for another shape sharing this one's model,
    /// generator and executor.
    pub fn of<O: Entity>(&self) -> Repository<O> {
        Repository::new(
            Arc::clone(&self.model),
            Arc::clone(&self.generator),
            Arc::clone(&self.executor),
        )
    }

    /// Run `work` against a transactional view of this repository. The
    /// transaction commits when the closure succeeds within the timeout;
    /// a closure error or a timeout rolls it back and surfaces the failure.
    pub async fn transaction<R>(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
        work: impl for<'t> FnOnce(&'t mut TransactionRepository<T>) -> BoxFuture<'t, Result<R>>,
    ) -> Result<R> {
        let tx = self.executor.begin().await?;
        let mut view = TransactionRepository {
            generator: Arc::clone(&self.generator),
            entity: Arc::clone(&self.entity),
            tx,
            cancel: cancel.clone(),
            _entity: PhantomData,
        };

        match tokio::time::timeout(timeout, work(&mut view)).await {
            Ok(Ok(value)) => {
                view.tx.commit().await?;
                Ok(value)
            }
            Ok(Err(err)) => {
                warn!("transaction failed, rolling back: {}", err);
                view.tx.rollback().await?;
                Err(err)
            }
            Err(_) => {
                warn!("transaction timed out after {:?}, rolling back", timeout);
                view.tx.rollback().await?;
                Err(StratumError::execution(format!(
                    "transaction timed out after {:?}",
                    timeout
                )))
            }
        }
    }
}

/// Repository operations scoped to one open transaction.
pub struct TransactionRepository<T: Entity> {
    generator: Arc<dyn SqlGenerator>,
    entity: Arc<EntityType>,
    tx: Box<dyn ExecutorTransaction>,
    cancel: CancellationToken,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> TransactionRepository<T> {
    /// Insert the instance inside the transaction.
    pub async fn create(&mut self, model: &mut T) -> Result<bool> {
        let script = self.generator.create(&self.entity)?;
        let parameters = script.create_parameters(model);
        if let Some(identity) = self.entity.identity() {
            let generated = self
                .tx
                .scalar(script.sql(), &parameters, &self.cancel)
                .await?;
            match generated {
                Some(value) if !value.is_null() => {
                    identity.set(model, value);
                    Ok(true)
                }
                _ => Ok(false),
            }
        } else {
            let affected = self
                .tx
                .execute(script.sql(), &parameters, &self.cancel)
                .await?;
            Ok(affected > 0)
        }
    }

    /// Whole-row update inside the transaction.
    pub async fn update(&mut self, model: &T) -> Result<bool> {
        let script = self.generator.update(&self.entity)?;
        let parameters = script.create_parameters(model);
        let affected = self
            .tx
            .execute(script.sql(), &parameters, &self.cancel)
            .await?;
        Ok(affected > 0)
    }

    /// Predicate update inside the transaction.
    pub async fn update_where(
        &mut self,
        filter: Option<&Expr>,
        statement: Parameters,
    ) -> Result<bool> {
        let script = self.generator.update_where(&self.entity, &statement, filter)?;
        let affected = self
            .tx
            .execute(script.sql(), script.parameters(), &self.cancel)
            .await?;
        Ok(affected > 0)
    }

    /// Delete inside the transaction.
    pub async fn delete(&mut self, filter: Option<&Expr>) -> Result<bool> {
        let script = self.generator.delete(&self.entity, filter)?;
        let affected = self
            .tx
            .execute(script.sql(), script.parameters(), &self.cancel)
            .await?;
        Ok(affected > 0)
    }

    /// Load matching instances inside the transaction.
    pub async fn load(&mut self, filter: Option<&Expr>) -> Result<Vec<T>> {
        let script = self.generator.list(&self.entity, filter)?;
        let rows = self
            .tx
            .query(script.sql(), script.parameters(), &self.cancel)
            .await?;
        Ok(rows.iter().map(|row| self.entity.read(row)).collect())
    }
}
