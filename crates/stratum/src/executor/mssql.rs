//! SQL Server executor over a pooled tiberius client.

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tiberius::{Client, ColumnData, ColumnType, Query, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseOptions;
use crate::error::{Result, StratumError};
use crate::executor::{Executor, ExecutorTransaction};
use crate::metadata::replace_prefix;
use crate::value::{Parameters, Row, Value};

type SqlClient = Client<Compat<TcpStream>>;

/// Connection manager for a bb8 pool of tiberius clients.
#[derive(Clone)]
struct TiberiusConnectionManager {
    options: DatabaseOptions,
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = SqlClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.options.tiberius_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;
        tcp.set_nodelay(true)?;
        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Rewrite named `@Name` placeholders into the positional `@PN` binds the
/// client protocol wants, collecting values in occurrence order. Content of
/// string literals is left untouched.
fn rewrite_placeholders(sql: &str, parameters: &Parameters) -> Result<(String, Vec<Value>)> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut binds: Vec<Value> = Vec::new();
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            in_string = !in_string;
            out.push(c);
            i += 1;
            continue;
        }
        if c == '@' && !in_string {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                end += 1;
            }
            let name: String = chars[start..end].iter().collect();
            if !name.is_empty() {
                let value = parameters.get(&name).ok_or_else(|| {
                    StratumError::execution(format!(
                        "statement references undeclared parameter @{}",
                        name
                    ))
                })?;
                binds.push(value.clone());
                out.push_str(&format!("@P{}", binds.len()));
                i = end;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }

    Ok((out, binds))
}

fn bind_values<'a>(query: &mut Query<'a>, binds: &'a [Value]) {
    for value in binds {
        match value {
            Value::Null => query.bind(Option::<&str>::None),
            Value::Bool(v) => query.bind(*v),
            Value::I16(v) => query.bind(*v),
            Value::I32(v) => query.bind(*v),
            Value::I64(v) => query.bind(*v),
            Value::F64(v) => query.bind(*v),
            // tiberius 0.12 implements only `ToSql` (not `IntoSql`) for
            // `rust_decimal::Decimal`, so route the value through its `ToSql`
            // conversion and bind the resulting `Numeric` payload, which does
            // implement `IntoSql`. This binds the identical `ColumnData`.
            Value::Decimal(v) => match v.to_sql() {
                ColumnData::Numeric(n) => query.bind(n),
                _ => unreachable!("Decimal always converts to ColumnData::Numeric"),
            },
            Value::Text(v) => query.bind(v.as_str()),
            Value::Bytes(v) => query.bind(v.as_slice()),
            Value::Uuid(v) => query.bind(*v),
            Value::DateTime(v) => query.bind(*v),
        }
    }
}

fn convert_value(row: &tiberius::Row, idx: usize) -> Value {
    let column_type = row.columns()[idx].column_type();
    match column_type {
        ColumnType::Bit | ColumnType::Bitn => row
            .try_get::<bool, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        ColumnType::Int1 => row
            .try_get::<u8, _>(idx)
            .ok()
            .flatten()
            .map(|v| Value::I16(i16::from(v)))
            .unwrap_or(Value::Null),
        ColumnType::Int2 => row
            .try_get::<i16, _>(idx)
            .ok()
            .flatten()
            .map(Value::I16)
            .unwrap_or(Value::Null),
        ColumnType::Int4 => row
            .try_get::<i32, _>(idx)
            .ok()
            .flatten()
            .map(Value::I32)
            .unwrap_or(Value::Null),
        ColumnType::Int8 => row
            .try_get::<i64, _>(idx)
            .ok()
            .flatten()
            .map(Value::I64)
            .unwrap_or(Value::Null),
        ColumnType::Intn => row
            .try_get::<i32, _>(idx)
            .ok()
            .flatten()
            .map(Value::I32)
            .or_else(|| {
                row.try_get::<i64, _>(idx)
                    .ok()
                    .flatten()
                    .map(Value::I64)
            })
            .or_else(|| {
                row.try_get::<i16, _>(idx)
                    .ok()
                    .flatten()
                    .map(Value::I16)
            })
            .or_else(|| {
                row.try_get::<u8, _>(idx)
                    .ok()
                    .flatten()
                    .map(|v| Value::I16(i16::from(v)))
            })
            .unwrap_or(Value::Null),
        ColumnType::Float4 => row
            .try_get::<f32, _>(idx)
            .ok()
            .flatten()
            .map(|v| Value::F64(f64::from(v)))
            .unwrap_or(Value::Null),
        ColumnType::Float8 | ColumnType::Floatn => row
            .try_get::<f64, _>(idx)
            .ok()
            .flatten()
            .map(Value::F64)
            .or_else(|| {
                row.try_get::<f32, _>(idx)
                    .ok()
                    .flatten()
                    .map(|v| Value::F64(f64::from(v)))
            })
            .unwrap_or(Value::Null),
        ColumnType::Decimaln | ColumnType::Numericn | ColumnType::Money | ColumnType::Money4 => {
            row.try_get::<&str, _>(idx)
                .ok()
                .flatten()
                .and_then(|s| s.parse::<rust_decimal::Decimal>().ok())
                .map(Value::Decimal)
                .or_else(|| {
                    row.try_get::<f64, _>(idx)
                        .ok()
                        .flatten()
                        .and_then(|f| rust_decimal::Decimal::try_from(f).ok())
                        .map(Value::Decimal)
                })
                .unwrap_or(Value::Null)
        }
        ColumnType::Guid => row
            .try_get::<Uuid, _>(idx)
            .ok()
            .flatten()
            .map(Value::Uuid)
            .unwrap_or(Value::Null),
        ColumnType::Datetime
        | ColumnType::Datetime2
        | ColumnType::Datetime4
        | ColumnType::Datetimen => row
            .try_get::<NaiveDateTime, _>(idx)
            .ok()
            .flatten()
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        ColumnType::Daten => row
            .try_get::<NaiveDate, _>(idx)
            .ok()
            .flatten()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        ColumnType::Timen => row
            .try_get::<NaiveTime, _>(idx)
            .ok()
            .flatten()
            .map(|t| Value::Text(t.format("%H:%M:%S%.f").to_string()))
            .unwrap_or(Value::Null),
        ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => row
            .try_get::<&[u8], _>(idx)
            .ok()
            .flatten()
            .map(|v| Value::Bytes(v.to_vec()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<&str, _>(idx)
            .ok()
            .flatten()
            .map(|s| Value::Text(s.to_string()))
            .unwrap_or(Value::Null),
    }
}

fn convert_row(row: &tiberius::Row) -> Row {
    let columns: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values: Vec<Value> = (0..columns.len()).map(|i| convert_value(row, i)).collect();
    Row::new(columns, values)
}

async fn run_execute(client: &mut SqlClient, sql: &str, binds: &[Value]) -> Result<u64> {
    let mut query = Query::new(sql.to_string());
    bind_values(&mut query, binds);
    let result = query.execute(client).await?;
    Ok(result.total())
}

async fn run_scalar(client: &mut SqlClient, sql: &str, binds: &[Value]) -> Result<Option<Value>> {
    let mut query = Query::new(sql.to_string());
    bind_values(&mut query, binds);
    let results = query.query(client).await?.into_results().await?;
    // Take the last result set's first row; multi-statement batches put the
    // interesting scalar (e.g. identity capture) last.
    Ok(results
        .iter()
        .filter_map(|set| set.first())
        .last()
        .map(|row| convert_value(row, 0)))
}

async fn run_query(client: &mut SqlClient, sql: &str, binds: &[Value]) -> Result<Vec<Row>> {
    let mut query = Query::new(sql.to_string());
    bind_values(&mut query, binds);
    let rows = query.query(client).await?.into_first_result().await?;
    Ok(rows.iter().map(convert_row).collect())
}

/// Race a statement future against the cancellation token.
async fn with_cancel<T>(
    cancel: &CancellationToken,
    work: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(StratumError::Cancelled),
        result = work => result,
    }
}

/// Pooled SQL Server executor.
///
/// Substitutes the deployment prefix into statements and rewrites named
/// placeholders into positional binds before handing them to the client.
pub struct SqlServerExecutor {
    pool: Pool<TiberiusConnectionManager>,
    prefix: String,
}

impl SqlServerExecutor {
    /// Connect a pool using the given options and verify it with a probe
    /// query.
    pub async fn connect(options: DatabaseOptions) -> Result<Self> {
        options.validate()?;
        let prefix = options.prefix.clone();
        let max_size = options.max_connections;
        let manager = TiberiusConnectionManager { options };
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(1))
            .build(manager)
            .await
            .map_err(|e| StratumError::Pool(format!("failed to create pool: {}", e)))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| StratumError::Pool(format!("failed to get connection: {}", e)))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!("connected SQL Server pool (size={})", max_size);
        Ok(Self { pool, prefix })
    }

    fn prepare(&self, sql: &str, parameters: &Parameters) -> Result<(String, Vec<Value>)> {
        let sql = replace_prefix(sql, &self.prefix);
        rewrite_placeholders(&sql, parameters)
    }

    async fn client(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| StratumError::Pool(format!("failed to get connection: {}", e)))
    }
}

#[async_trait]
impl Executor for SqlServerExecutor {
    async fn execute(
        &self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let (sql, binds) = self.prepare(sql, parameters)?;
        debug!("execute: {}", sql);
        let mut client = self.client().await?;
        with_cancel(cancel, run_execute(&mut client, &sql, &binds)).await
    }

    async fn scalar(
        &self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        let (sql, binds) = self.prepare(sql, parameters)?;
        debug!("scalar: {}", sql);
        let mut client = self.client().await?;
        with_cancel(cancel, run_scalar(&mut client, &sql, &binds)).await
    }

    async fn query(
        &self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>> {
        let (sql, binds) = self.prepare(sql, parameters)?;
        debug!("query: {}", sql);
        let mut client = self.client().await?;
        with_cancel(cancel, run_query(&mut client, &sql, &binds)).await
    }

    async fn begin(&self) -> Result<Box<dyn ExecutorTransaction>> {
        let mut connection = self
            .pool
            .get_owned()
            .await
            .map_err(|e| StratumError::Pool(format!("failed to get connection: {}", e)))?;
        connection.execute("BEGIN TRANSACTION", &[]).await?;
        Ok(Box::new(SqlServerTransaction {
            connection,
            prefix: self.prefix.clone(),
        }))
    }
}

/// One open transaction on a dedicated pooled connection.
pub struct SqlServerTransaction {
    connection: PooledConnection<'static, TiberiusConnectionManager>,
    prefix: String,
}

impl SqlServerTransaction {
    fn prepare(&self, sql: &str, parameters: &Parameters) -> Result<(String, Vec<Value>)> {
        let sql = replace_prefix(sql, &self.prefix);
        rewrite_placeholders(&sql, parameters)
    }
}

#[async_trait]
impl ExecutorTransaction for SqlServerTransaction {
    async fn execute(
        &mut self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let (sql, binds) = self.prepare(sql, parameters)?;
        debug!("tx execute: {}", sql);
        with_cancel(cancel, run_execute(&mut self.connection, &sql, &binds)).await
    }

    async fn scalar(
        &mut self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        let (sql, binds) = self.prepare(sql, parameters)?;
        with_cancel(cancel, run_scalar(&mut self.connection, &sql, &binds)).await
    }

    async fn query(
        &mut self,
        sql: &str,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>> {
        let (sql, binds) = self.prepare(sql, parameters)?;
        with_cancel(cancel, run_query(&mut self.connection, &sql, &binds)).await
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.connection.execute("COMMIT TRANSACTION", &[]).await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.connection.execute("ROLLBACK TRANSACTION", &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_placeholders_in_order() {
        let mut parameters = Parameters::new();
        parameters.add("Name", "ab%");
        parameters.add("Id", 7i32);

        let (sql, binds) =
            rewrite_placeholders("UPDATE [T] SET [Name]=@Name WHERE [Id]=@Id", &parameters)
                .unwrap();
        assert_eq!(sql, "UPDATE [T] SET [Name]=@P1 WHERE [Id]=@P2");
        assert_eq!(
            binds,
            vec![Value::Text("ab%".to_string()), Value::I32(7)]
        );
    }

    #[test]
    fn test_rewrite_repeated_placeholder_rebinds() {
        let mut parameters = Parameters::new();
        parameters.add("Id", 7i32);

        let (sql, binds) =
            rewrite_placeholders("SELECT 1 WHERE [A]=@Id OR [B]=@Id", &parameters).unwrap();
        assert_eq!(sql, "SELECT 1 WHERE [A]=@P1 OR [B]=@P2");
        assert_eq!(binds, vec![Value::I32(7), Value::I32(7)]);
    }

    #[test]
    fn test_rewrite_skips_string_literals() {
        let mut parameters = Parameters::new();
        parameters.add("Id", 1i32);

        let (sql, binds) =
            rewrite_placeholders("SELECT '@NotAParam' WHERE [Id]=@Id", &parameters).unwrap();
        assert_eq!(sql, "SELECT '@NotAParam' WHERE [Id]=@P1");
        assert_eq!(binds.len(), 1);
    }

    #[test]
    fn test_rewrite_undeclared_parameter_fails() {
        let err =
            rewrite_placeholders("SELECT 1 WHERE [Id]=@Id", &Parameters::new()).unwrap_err();
        assert!(matches!(err, StratumError::Execution(_)));
    }
}
