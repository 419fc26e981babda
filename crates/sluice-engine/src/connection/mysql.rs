//! MySQL through sqlx

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::types::BigDecimal;
use sqlx::Row as _;

use super::sql::{self, SqlFlavor};
use super::sqlx_rows::{decode_rows, first_column_text, prepare, DATETIME_FORMAT, DATE_FORMAT};
use super::{ConnectOptions, Connection, Connector, ReadQuery, WriteBatch};
use crate::error::Result;
use crate::pipeline::{DatabaseDescriptor, Dialect};
use crate::working_set::Row;

const DEFAULT_PORT: u16 = 3306;

pub(super) struct MySqlConnector;

#[async_trait]
impl Connector for MySqlConnector {
    async fn connect(
        &self,
        descriptor: &DatabaseDescriptor,
        options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>> {
        let mut connect = MySqlConnectOptions::new()
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

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(options.timeout)
            .connect_with(connect)
            .await?;

        Ok(Box::new(MySqlConnection {
            pool,
            flavor: SqlFlavor::native(Dialect::Mysql),
        }))
    }
}

struct MySqlConnection {
    pool: MySqlPool,
    flavor: SqlFlavor,
}

fn decode_cell(row: &MySqlRow, index: usize) -> Option<Value> {
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Some(Value::from(v));
    }
    if let Ok(v) = row.try_get::<u64, _>(index) {
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
    if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        return Some(Value::String(String::from_utf8_lossy(&v).into_owned()));
    }
    None
}

#[async_trait]
impl Connection for MySqlConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    async fn fetch(&self, query: &ReadQuery) -> Result<Vec<Row>> {
        let statement = sql::select(&self.flavor, query);
        let rows = prepare::<MySql>(&statement).fetch_all(&self.pool).await?;
        decode_rows(&rows, decode_cell)
    }

    async fn write(&self, batch: &WriteBatch<'_>) -> Result<u64> {
        let statements = sql::write_statements(&self.flavor, batch)?;
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for statement in &statements {
            affected += prepare::<MySql>(statement)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let statement = sql::list_tables(&self.flavor, None);
        let rows = prepare::<MySql>(&statement).fetch_all(&self.pool).await?;
        Ok(first_column_text(decode_rows(&rows, decode_cell)?))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
