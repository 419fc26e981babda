//! Oracle through the OCI client
//!
//! The client is blocking; calls run on the blocking pool with the
//! connection behind a mutex.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use oracle::sql_type::{OracleType, ToSql};
use serde_json::Value;

use super::sql::{self, SqlFlavor, SqlParam, Statement};
use super::{ConnectOptions, Connection, Connector, ReadQuery, WriteBatch};
use crate::error::{EtlError, Result};
use crate::pipeline::{DatabaseDescriptor, Dialect};
use crate::working_set::Row;

const DEFAULT_PORT: u16 = 1521;
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

type Shared = Arc<Mutex<Option<oracle::Connection>>>;

pub(super) struct OracleConnector;

#[async_trait]
impl Connector for OracleConnector {
    async fn connect(
        &self,
        descriptor: &DatabaseDescriptor,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>> {
        let username = descriptor.username.clone().unwrap_or_default();
        let password = descriptor.password.clone().unwrap_or_default();
        let connect_string = format!(
            "//{}:{}/{}",
            descriptor.host.as_deref().unwrap_or("localhost"),
            descriptor.port.unwrap_or(DEFAULT_PORT),
            descriptor.database.as_deref().unwrap_or_default()
        );

        let conn = tokio::task::spawn_blocking(move || {
            oracle::Connection::connect(&username, &password, &connect_string)
        })
        .await
        .map_err(EtlError::query)??;

        Ok(Box::new(OracleConnection {
            conn: Arc::new(Mutex::new(Some(conn))),
            flavor: SqlFlavor::native(Dialect::Oracle),
        }))
    }
}

struct OracleConnection {
    conn: Shared,
    flavor: SqlFlavor,
}

async fn with_conn<T, F>(shared: &Shared, task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&oracle::Connection) -> Result<T> + Send + 'static,
{
    let shared = shared.clone();
    tokio::task::spawn_blocking(move || {
        let guard = shared
            .lock()
            .map_err(|_| EtlError::query("connection lock poisoned"))?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| EtlError::query("connection is closed"))?;
        task(conn)
    })
    .await
    .map_err(EtlError::query)?
}

fn bind_values(statement: &Statement) -> Vec<Box<dyn ToSql + Send>> {
    statement
        .params
        .iter()
        .map(|param| -> Box<dyn ToSql + Send> {
            match param.clone() {
                SqlParam::Null => Box::new(Option::<String>::None),
                SqlParam::Bool(b) => Box::new(i64::from(b)),
                SqlParam::Int(i) => Box::new(i),
                SqlParam::Float(f) => Box::new(f),
                SqlParam::Text(s) => Box::new(s),
                SqlParam::Timestamp(t) => Box::new(t),
                SqlParam::TimestampUtc(t) => Box::new(t.naive_utc()),
                SqlParam::Date(d) => Box::new(d),
            }
        })
        .collect()
}

fn refs(values: &[Box<dyn ToSql + Send>]) -> Vec<&dyn ToSql> {
    values.iter().map(|b| b.as_ref() as &dyn ToSql).collect()
}

fn query_sync(conn: &oracle::Connection, statement: &Statement) -> Result<Vec<Row>> {
    let values = bind_values(statement);
    let result_set = conn.query(&statement.sql, &refs(&values))?;
    let columns: Vec<(String, OracleType)> = result_set
        .column_info()
        .iter()
        .map(|info| (info.name().to_string(), info.oracle_type().clone()))
        .collect();

    let mut rows = Vec::new();
    for fetched in result_set {
        let fetched = fetched?;
        let row: Row = columns
            .iter()
            .enumerate()
            .map(|(index, (name, kind))| (name.clone(), decode_cell(&fetched, index, kind)))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn decode_cell(row: &oracle::Row, index: usize, kind: &OracleType) -> Value {
    match kind {
        OracleType::Number(_, _) | OracleType::Int64 | OracleType::UInt64 => {
            if let Ok(Some(i)) = row.get::<usize, Option<i64>>(index) {
                return Value::from(i);
            }
            row.get::<usize, Option<f64>>(index)
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null)
        },
        OracleType::Float(_) | OracleType::BinaryFloat | OracleType::BinaryDouble => row
            .get::<usize, Option<f64>>(index)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        OracleType::Date
        | OracleType::Timestamp(_)
        | OracleType::TimestampTZ(_)
        | OracleType::TimestampLTZ(_) => row
            .get::<usize, Option<chrono::NaiveDateTime>>(index)
            .ok()
            .flatten()
            .map(|t| Value::String(t.format(DATETIME_FORMAT).to_string()))
            .unwrap_or(Value::Null),
        _ => row
            .get::<usize, Option<String>>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn execute_sync(conn: &oracle::Connection, statements: &[Statement]) -> Result<u64> {
    let run = || -> Result<u64> {
        let mut affected = 0;
        for statement in statements {
            let values = bind_values(statement);
            let executed = conn.execute(&statement.sql, &refs(&values))?;
            affected += executed.row_count()?;
        }
        Ok(affected)
    };

    match run() {
        Ok(affected) => {
            conn.commit()?;
            Ok(affected)
        },
        Err(e) => {
            conn.rollback()?;
            Err(e)
        },
    }
}

#[async_trait]
impl Connection for OracleConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Oracle
    }

    async fn fetch(&self, query: &ReadQuery) -> Result<Vec<Row>> {
        let statement = sql::select(&self.flavor, query);
        with_conn(&self.conn, move |conn| query_sync(conn, &statement)).await
    }

    async fn write(&self, batch: &WriteBatch<'_>) -> Result<u64> {
        let statements = sql::write_statements(&self.flavor, batch)?;
        with_conn(&self.conn, move |conn| execute_sync(conn, &statements)).await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let statement = sql::list_tables(&self.flavor, None);
        let rows = with_conn(&self.conn, move |conn| query_sync(conn, &statement)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|(_, v)| v.as_str().map(str::to_string))
            .collect())
    }

    async fn close(&self) -> Result<()> {
        let shared = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let taken = shared
                .lock()
                .map_err(|_| EtlError::query("connection lock poisoned"))?
                .take();
            if let Some(conn) = taken {
                conn.close()?;
            }
            Ok(())
        })
        .await
        .map_err(EtlError::query)?
    }
}
