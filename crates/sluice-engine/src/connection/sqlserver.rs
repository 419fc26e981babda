//! SQL Server through tiberius

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, Query};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::warn;

use super::sql::{self, SqlFlavor, SqlParam, Statement};
use super::{ConnectOptions, Connection, Connector, ReadQuery, WriteBatch};
use crate::error::{EtlError, Result};
use crate::pipeline::{DatabaseDescriptor, Dialect};
use crate::working_set::Row;

const DEFAULT_PORT: u16 = 1433;
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

type TdsClient = Client<Compat<TcpStream>>;

pub(super) struct SqlServerConnector;

#[async_trait]
impl Connector for SqlServerConnector {
    async fn connect(
        &self,
        descriptor: &DatabaseDescriptor,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>> {
        let mut config = Config::new();
        config.host(descriptor.host.as_deref().unwrap_or("localhost"));
        config.port(descriptor.port.unwrap_or(DEFAULT_PORT));
        if let Some(database) = &descriptor.database {
            config.database(database);
        }
        config.authentication(AuthMethod::sql_server(
            descriptor.username.as_deref().unwrap_or_default(),
            descriptor.password.as_deref().unwrap_or_default(),
        ));
        if descriptor.option_bool("trust_server_certificate").unwrap_or(true) {
            config.trust_cert();
        }
        if descriptor.option_bool("encrypt") == Some(false) {
            config.encryption(EncryptionLevel::NotSupported);
        }

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(EtlError::query)?;
        tcp.set_nodelay(true).map_err(EtlError::query)?;
        let client = Client::connect(config, tcp.compat_write()).await?;

        Ok(Box::new(SqlServerConnection {
            client: Mutex::new(Some(client)),
            flavor: SqlFlavor::native(Dialect::Sqlserver),
        }))
    }
}

struct SqlServerConnection {
    client: Mutex<Option<TdsClient>>,
    flavor: SqlFlavor,
}

fn build_query(statement: &Statement) -> Query<'_> {
    let mut query = Query::new(statement.sql.as_str());
    for param in &statement.params {
        match param.clone() {
            SqlParam::Null => query.bind(Option::<String>::None),
            SqlParam::Bool(b) => query.bind(b),
            SqlParam::Int(i) => query.bind(i),
            SqlParam::Float(f) => query.bind(f),
            SqlParam::Text(s) => query.bind(s),
            SqlParam::Timestamp(t) => query.bind(t),
            SqlParam::TimestampUtc(t) => query.bind(t.naive_utc()),
            SqlParam::Date(d) => query.bind(d),
        }
    }
    query
}

fn decode_row(row: &tiberius::Row) -> Row {
    row.cells()
        .enumerate()
        .map(|(index, (column, data))| {
            let value = match data {
                ColumnData::U8(v) => v.map(Value::from),
                ColumnData::I16(v) => v.map(Value::from),
                ColumnData::I32(v) => v.map(Value::from),
                ColumnData::I64(v) => v.map(Value::from),
                ColumnData::F32(v) => v.map(|f| Value::from(f64::from(f))),
                ColumnData::F64(v) => v.map(Value::from),
                ColumnData::Bit(v) => v.map(Value::Bool),
                ColumnData::String(v) => v.as_ref().map(|s| Value::String(s.to_string())),
                ColumnData::Guid(v) => v.map(|g| Value::String(g.to_string())),
                ColumnData::Numeric(v) => v.map(|n| Value::String(n.to_string())),
                ColumnData::Binary(v) => v
                    .as_ref()
                    .map(|b| Value::String(String::from_utf8_lossy(b).into_owned())),
                ColumnData::Date(_) => row
                    .try_get::<NaiveDate, _>(index)
                    .ok()
                    .flatten()
                    .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
                ColumnData::Time(_) => row
                    .try_get::<NaiveTime, _>(index)
                    .ok()
                    .flatten()
                    .map(|t| Value::String(t.to_string())),
                ColumnData::DateTimeOffset(_) => row
                    .try_get::<DateTime<FixedOffset>, _>(index)
                    .ok()
                    .flatten()
                    .map(|t| Value::String(t.with_timezone(&Utc).format(DATETIME_FORMAT).to_string())),
                _ => row
                    .try_get::<NaiveDateTime, _>(index)
                    .ok()
                    .flatten()
                    .map(|t| Value::String(t.format(DATETIME_FORMAT).to_string())),
            };
            (column.name().to_string(), value.unwrap_or(Value::Null))
        })
        .collect()
}

impl SqlServerConnection {
    async fn query_rows(&self, statement: &Statement) -> Result<Vec<Row>> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| EtlError::query("connection is closed"))?;
        let rows = build_query(statement)
            .query(client)
            .await?
            .into_first_result()
            .await?;
        Ok(rows.iter().map(decode_row).collect())
    }
}

async fn run_in_transaction(client: &mut TdsClient, statements: &[Statement]) -> Result<u64> {
    client.simple_query("BEGIN TRAN").await?.into_results().await?;
    let mut affected = 0;
    for statement in statements {
        let result = build_query(statement).execute(&mut *client).await?;
        affected += result.rows_affected().iter().sum::<u64>();
    }
    client.simple_query("COMMIT TRAN").await?.into_results().await?;
    Ok(affected)
}

#[async_trait]
impl Connection for SqlServerConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlserver
    }

    async fn fetch(&self, query: &ReadQuery) -> Result<Vec<Row>> {
        self.query_rows(&sql::select(&self.flavor, query)).await
    }

    async fn write(&self, batch: &WriteBatch<'_>) -> Result<u64> {
        let statements = sql::write_statements(&self.flavor, batch)?;
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| EtlError::query("connection is closed"))?;

        match run_in_transaction(client, &statements).await {
            Ok(affected) => Ok(affected),
            Err(e) => {
                let rollback = match client.simple_query("IF @@TRANCOUNT > 0 ROLLBACK TRAN").await {
                    Ok(stream) => stream.into_results().await.map(|_| ()),
                    Err(e) => Err(e),
                };
                if let Err(rollback_err) = rollback {
                    warn!(table = %batch.table, error = %rollback_err, "Rollback failed");
                }
                Err(e)
            },
        }
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = self.query_rows(&sql::list_tables(&self.flavor, None)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|(_, v)| v.as_str().map(str::to_string))
            .collect())
    }

    async fn close(&self) -> Result<()> {
        if let Some(client) = self.client.lock().await.take() {
            client.close().await?;
        }
        Ok(())
    }
}
