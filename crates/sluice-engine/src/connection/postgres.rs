//! PostgreSQL through sqlx

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode, Postgres};
use sqlx::types::{BigDecimal, Uuid};
use sqlx::Row as _;

use super::sql::{self, SqlFlavor};
use super::sqlx_rows::{
    decode_rows, first_column_text, hex_text, prepare, DATETIME_FORMAT, DATE_FORMAT,
};
use super::{ConnectOptions, Connection, Connector, ReadQuery, WriteBatch};
use crate::error::Result;
use crate::pipeline::{DatabaseDescriptor, Dialect};
use crate::working_set::Row;

const DEFAULT_PORT: u16 = 5432;

pub(super) struct PostgresConnector;

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(
        &self,
        descriptor: &DatabaseDescriptor,
        options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>> {
        let mut connect = PgConnectOptions::new()
            .host(descriptor.host.as_deref().unwrap_or("localhost"))
            .port(descriptor.port.unwrap_or(DEFAULT_PORT));
        if let Some(user) = &descriptor.username {
            connect = connect.username(user);
        }
        if let Some(password) = &descriptor.password {
            connect = connect.password(password);
        }
        if let Some(database) = &descriptor.database {
            connect = connect.database(database);
        }
        if let Some(schema) = &descriptor.schema {
            connect = connect.options([("search_path", schema.as_str())]);
        }
        if descriptor.option_bool("ssl") == Some(true) {
            connect = connect.ssl_mode(PgSslMode::Require);
        }

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(options.timeout)
            .connect_with(connect)
            .await?;

        Ok(Box::new(PostgresConnection {
            pool,
            flavor: SqlFlavor::native(Dialect::Postgres),
            schema: descriptor.schema.clone(),
        }))
    }
}

struct PostgresConnection {
    pool: PgPool,
    flavor: SqlFlavor,
    schema: Option<String>,
}

fn decode_cell(row: &PgRow, index: usize) -> Option<Value> {
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Some(Value::from(v));
    }
    if let Ok(v) = row.try_get::<i32, _>(index) {
        return Some(Value::from(v));
    }
    if let Ok(v) = row.try_get::<i16, _>(index) {
        return Some(Value::from(v));
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return Some(Value::from(v));
    }
    if let Ok(v) = row.try_get::<f32, _>(index) {
        return Some(Value::from(f64::from(v)));
    }
    if let Ok(v) = row.try_get::<BigDecimal, _>(index) {
        return Some(Value::String(v.to_string()));
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return Some(Value::Bool(v));
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Some(Value::String(v));
    }
    if let Ok(v) = row.try_get::<NaiveDateTime, _>(index) {
        return Some(Value::String(v.format(DATETIME_FORMAT).to_string()));
    }
    if let Ok(v) = row.try_get::<DateTime<Utc>, _>(index) {
        return Some(Value::String(v.format(DATETIME_FORMAT).to_string()));
    }
    if let Ok(v) = row.try_get::<NaiveDate, _>(index) {
        return Some(Value::String(v.format(DATE_FORMAT).to_string()));
    }
    if let Ok(v) = row.try_get::<NaiveTime, _>(index) {
        return Some(Value::String(v.to_string()));
    }
    if let Ok(v) = row.try_get::<Value, _>(index) {
        return Some(v);
    }
    if let Ok(v) = row.try_get::<Uuid, _>(index) {
        return Some(Value::String(v.to_string()));
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        return Some(Value::String(hex_text(&v)));
    }
    if let Ok(v) = row.try_get::<Vec<String>, _>(index) {
        return Some(Value::from(v));
    }
    if let Ok(v) = row.try_get::<Vec<i64>, _>(index) {
        return Some(Value::from(v));
    }
    if let Ok(v) = row.try_get::<Vec<i32>, _>(index) {
        return Some(Value::from(v));
    }
    None
}

#[async_trait]
impl Connection for PostgresConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn fetch(&self, query: &ReadQuery) -> Result<Vec<Row>> {
        let statement = sql::select(&self.flavor, query);
        let rows = prepare::<Postgres>(&statement).fetch_all(&self.pool).await?;
        decode_rows(&rows, decode_cell)
    }

    async fn write(&self, batch: &WriteBatch<'_>) -> Result<u64> {
        let statements = sql::write_statements(&self.flavor, batch)?;
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for statement in &statements {
            affected += prepare::<Postgres>(statement)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let statement = sql::list_tables(&self.flavor, self.schema.as_deref());
        let rows = prepare::<Postgres>(&statement).fetch_all(&self.pool).await?;
        Ok(first_column_text(decode_rows(&rows, decode_cell)?))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
