//! Generic tabular bridge over ODBC
//!
//! The driver manager API is blocking, so each operation opens its own
//! handle inside `spawn_blocking`. Values cross the bridge as text.

use async_trait::async_trait;
use odbc_api::buffers::TextRowSet;
use odbc_api::{ConnectionOptions, Cursor, Environment, IntoParameter, ResultSetMetadata};
use serde_json::Value;

use super::sql::{self, SqlFlavor, SqlParam, Statement};
use super::{ConnectOptions, Connection, Connector, ReadQuery, WriteBatch};
use crate::error::{EtlError, Result};
use crate::pipeline::{DatabaseDescriptor, Dialect};
use crate::working_set::Row;

const FETCH_BATCH: usize = 256;
const MAX_TEXT_LEN: usize = 16_384;

pub(super) struct OdbcConnector;

#[async_trait]
impl Connector for OdbcConnector {
    async fn connect(
        &self,
        descriptor: &DatabaseDescriptor,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>> {
        let connection_string = descriptor.odbc_connection_string()?;

        let probe = connection_string.clone();
        blocking(move || {
            let env = Environment::new()?;
            env.connect_with_connection_string(&probe, ConnectionOptions::default())?;
            Ok(())
        })
        .await?;

        Ok(Box::new(OdbcConnection {
            connection_string,
            flavor: SqlFlavor::bridge(descriptor.dialect),
            schema: descriptor.schema.clone(),
        }))
    }
}

struct OdbcConnection {
    connection_string: String,
    flavor: SqlFlavor,
    schema: Option<String>,
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| EtlError::query(format!("bridge task failed: {}", e)))?
}

fn text_params(statement: &Statement) -> Vec<Option<String>> {
    statement
        .params
        .iter()
        .map(SqlParam::to_text)
        .collect()
}

fn query_sync(connection_string: &str, statement: &Statement) -> Result<Vec<Row>> {
    let env = Environment::new()?;
    let conn = env.connect_with_connection_string(connection_string, ConnectionOptions::default())?;

    let params = text_params(statement);
    let bound: Vec<_> = params.iter().map(|p| p.as_deref().into_parameter()).collect();
    let Some(mut cursor) = conn.execute(&statement.sql, bound.as_slice())? else {
        return Ok(Vec::new());
    };

    let column_count = cursor.num_result_cols()?;
    let mut names = Vec::with_capacity(column_count.max(0) as usize);
    for index in 1..=column_count {
        names.push(cursor.col_name(index as u16)?);
    }

    let buffers = TextRowSet::for_cursor(FETCH_BATCH, &mut cursor, Some(MAX_TEXT_LEN))?;
    let mut row_set = cursor.bind_buffer(buffers)?;

    let mut rows = Vec::new();
    while let Some(batch) = row_set.fetch()? {
        for row_index in 0..batch.num_rows() {
            let row: Row = names
                .iter()
                .enumerate()
                .map(|(col_index, name)| {
                    let value = batch
                        .at(col_index, row_index)
                        .map(|bytes| Value::String(String::from_utf8_lossy(bytes).into_owned()))
                        .unwrap_or(Value::Null);
                    (name.clone(), value)
                })
                .collect();
            rows.push(row);
        }
    }
    Ok(rows)
}

fn execute_sync(connection_string: &str, statements: &[Statement]) -> Result<u64> {
    let env = Environment::new()?;
    let conn = env.connect_with_connection_string(connection_string, ConnectionOptions::default())?;
    conn.set_autocommit(false)?;

    let run = || -> Result<u64> {
        for statement in statements {
            let params = text_params(statement);
            let bound: Vec<_> = params.iter().map(|p| p.as_deref().into_parameter()).collect();
            conn.execute(&statement.sql, bound.as_slice())?;
        }
        Ok(statements.len() as u64)
    };

    match run() {
        Ok(count) => {
            conn.commit()?;
            Ok(count)
        },
        Err(e) => {
            conn.rollback()?;
            Err(e)
        },
    }
}

#[async_trait]
impl Connection for OdbcConnection {
    fn dialect(&self) -> Dialect {
        self.flavor.dialect
    }

    async fn fetch(&self, query: &ReadQuery) -> Result<Vec<Row>> {
        let statement = sql::select(&self.flavor, query);
        let connection_string = self.connection_string.clone();
        blocking(move || query_sync(&connection_string, &statement)).await
    }

    async fn write(&self, batch: &WriteBatch<'_>) -> Result<u64> {
        let statements = sql::write_statements(&self.flavor, batch)?;
        let connection_string = self.connection_string.clone();
        blocking(move || execute_sync(&connection_string, &statements))
            .await
            .map(|_| batch.rows.len() as u64)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let statement = sql::list_tables(&self.flavor, self.schema.as_deref());
        let connection_string = self.connection_string.clone();
        let rows = blocking(move || query_sync(&connection_string, &statement)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|(_, v)| v.as_str().map(|s| s.trim().to_string()))
            .collect())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
