//! Shared test support: a scripted in-memory executor and fixture shapes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use stratum::{
    Entity, Executor, ExecutorTransaction, Model, Parameters, PropertyDef, Result, Row,
    SqlServerGenerator, SqlServerHelper, StatementCache, StratumError, Value, ValueKind,
};

/// One recorded statement: SQL text plus its parameters.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub sql: String,
    pub parameters: Vec<(String, Value)>,
}

#[derive(Default)]
pub struct FakeState {
    /// Every statement seen, in order, transactional or not.
    pub statements: Mutex<Vec<Recorded>>,
    /// Scripted scalar results, popped per scalar call.
    pub scalars: Mutex<VecDeque<Option<Value>>>,
    /// Scripted query results, popped per query call.
    pub queries: Mutex<VecDeque<Vec<Row>>>,
    /// 1-based index of the transactional statement that should fail.
    pub fail_on_tx_statement: Mutex<Option<usize>>,
    pub tx_statement_count: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
}

impl FakeState {
    fn record(&self, sql: &str, parameters: &Parameters) {
        self.statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Recorded {
                sql: sql.to_string(),
                parameters: parameters
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.clone()))
                    .collect(),
            });
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn push_scalar(&self, value: Option<Value>) {
        self.scalars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(value);
    }

    pub fn push_query(&self, rows: Vec<Row>) {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(rows);
    }

    fn next_scalar(&self) -> Option<Value> {
        self.scalars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .flatten()
    }

    fn next_query(&self) -> Vec<Row> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default()
    }
}

/// Scripted executor capturing everything the core hands the boundary.
#[derive(Clone, Default)]
pub struct FakeExecutor {
    pub state: Arc<FakeState>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(StratumError::Cancelled);
    }
    Ok(())
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(
        &self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        check_cancel(cancel)?;
        self.state.record(sql, parameters);
        Ok(1)
    }

    async fn scalar(
        &self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        check_cancel(cancel)?;
        self.state.record(sql, parameters);
        Ok(self.state.next_scalar())
    }

    async fn query(
        &self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>> {
        check_cancel(cancel)?;
        self.state.record(sql, parameters);
        Ok(self.state.next_query())
    }

    async fn begin(&self) -> Result<Box<dyn ExecutorTransaction>> {
        Ok(Box::new(FakeTransaction {
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct FakeTransaction {
    state: Arc<FakeState>,
}

#[async_trait]
impl ExecutorTransaction for FakeTransaction {
    async fn execute(
        &mut self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        check_cancel(cancel)?;
        let index = self.state.tx_statement_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(fail_on) = *self
            .state
            .fail_on_tx_statement
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
        {
            if index == fail_on {
                return Err(StratumError::execution(format!(
                    "scripted failure at transactional statement {}",
                    index
                )));
            }
        }
        self.state.record(sql, parameters);
        Ok(1)
    }

    async fn scalar(
        &mut self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        check_cancel(cancel)?;
        self.state.record(sql, parameters);
        Ok(self.state.next_scalar())
    }

    async fn query(
        &mut self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>> {
        check_cancel(cancel)?;
        self.state.record(sql, parameters);
        Ok(self.state.next_query())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fixture shape: identity key plus a nullable name and a counter.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct User {
    pub id: i32,
    pub name: Option<String>,
    pub score: i32,
}

impl Entity for User {
    fn entity_name() -> &'static str {
        "app::users::User"
    }

    fn properties() -> Vec<PropertyDef<Self>> {
        vec![
            PropertyDef::new(
                "Id",
                ValueKind::I32,
                |m: &User| m.id.into(),
                |m, v| m.id = v.as_i64().unwrap_or_default() as i32,
            )
            .identity(),
            PropertyDef::new(
                "Name",
                ValueKind::Text,
                |m: &User| m.name.clone().into(),
                |m, v| m.name = v.as_str().map(str::to_string),
            )
            .nullable()
            .max_length(256),
            PropertyDef::new(
                "Score",
                ValueKind::I32,
                |m: &User| m.score.into(),
                |m, v| m.score = v.as_i64().unwrap_or_default() as i32,
            ),
        ]
    }
}

/// Build the shared model/generator pair over the SQL Server dialect.
pub fn model_and_generator() -> (Arc<Model>, Arc<SqlServerGenerator>) {
    let model = Arc::new(Model::new(Arc::new(SqlServerHelper)));
    let generator = Arc::new(SqlServerGenerator::new(
        Arc::clone(&model),
        Arc::new(StatementCache::new()),
    ));
    (model, generator)
}
