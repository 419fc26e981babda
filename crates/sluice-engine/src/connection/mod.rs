//! Connection handler
//!
//! A [`ConnectorRegistry`] maps each supported `(dialect, driver)` pair to a
//! [`Connector`]. Opening goes through the registry so that the connect
//! timeout and error wrapping are the same for every database. Connections
//! are used by exactly one run and released with [`close`] on every exit
//! path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EtlError, Result};
use crate::filter::Predicate;
use crate::pipeline::{DatabaseDescriptor, Dialect, Driver};
use crate::working_set::Row;

pub mod memory;
pub mod sql;

#[cfg(feature = "mongodb")]
mod mongo;
#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "odbc")]
mod odbc;
#[cfg(feature = "oracle")]
mod oci;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(any(feature = "mysql", feature = "postgres"))]
mod sqlx_rows;
#[cfg(feature = "sqlserver")]
mod sqlserver;

/// Read request for one table
#[derive(Debug, Clone)]
pub struct ReadQuery {
    pub table: String,
    /// Empty selects every column
    pub columns: Vec<String>,
    pub predicate: Option<Predicate>,
}

#[derive(Debug, Clone, Copy)]
pub enum WriteMode<'a> {
    Insert,
    /// Insert or update on conflict of `unique`
    Upsert { unique: &'a [String] },
}

/// One load batch
#[derive(Debug, Clone, Copy)]
pub struct WriteBatch<'a> {
    pub table: &'a str,
    pub columns: &'a [String],
    pub rows: &'a [Row],
    pub mode: WriteMode<'a>,
}

/// An open handle to a database
#[async_trait]
pub trait Connection: Send + Sync {
    fn dialect(&self) -> Dialect;

    async fn fetch(&self, query: &ReadQuery) -> Result<Vec<Row>>;

    /// Write a batch atomically, returning the affected row count
    async fn write(&self, batch: &WriteBatch<'_>) -> Result<u64>;

    async fn list_tables(&self) -> Result<Vec<String>>;

    async fn close(&self) -> Result<()>;
}

/// Settings every connector receives
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub timeout: Duration,
}

impl From<&EngineConfig> for ConnectOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            timeout: config.connect_timeout(),
        }
    }
}

/// Opens connections for one `(dialect, driver)` pair
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        descriptor: &DatabaseDescriptor,
        options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>>;
}

pub struct ConnectorRegistry {
    connectors: HashMap<(Dialect, Driver), Arc<dyn Connector>>,
    options: ConnectOptions,
}

impl ConnectorRegistry {
    /// Registry with no connectors
    pub fn new(options: ConnectOptions) -> Self {
        Self {
            connectors: HashMap::new(),
            options,
        }
    }

    /// Registry with every driver compiled into this build
    pub fn with_default_drivers(options: ConnectOptions) -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new(options);

        #[cfg(feature = "mysql")]
        registry.register(Dialect::Mysql, Driver::Native, Arc::new(mysql::MySqlConnector));
        #[cfg(feature = "postgres")]
        registry.register(
            Dialect::Postgres,
            Driver::Native,
            Arc::new(postgres::PostgresConnector),
        );
        #[cfg(feature = "sqlserver")]
        registry.register(
            Dialect::Sqlserver,
            Driver::Native,
            Arc::new(sqlserver::SqlServerConnector),
        );
        #[cfg(feature = "oracle")]
        registry.register(Dialect::Oracle, Driver::Native, Arc::new(oci::OracleConnector));
        #[cfg(feature = "mongodb")]
        registry.register(
            Dialect::Mongodb,
            Driver::Native,
            Arc::new(mongo::MongoConnector),
        );
        #[cfg(feature = "odbc")]
        {
            let bridge: Arc<dyn Connector> = Arc::new(odbc::OdbcConnector);
            for dialect in [
                Dialect::Mysql,
                Dialect::Postgres,
                Dialect::Sqlserver,
                Dialect::Oracle,
                Dialect::Sybase,
            ] {
                registry.register(dialect, Driver::Odbc, bridge.clone());
            }
        }

        registry
    }

    pub fn register(
        &mut self,
        dialect: Dialect,
        driver: Driver,
        connector: Arc<dyn Connector>,
    ) -> &mut Self {
        self.connectors.insert((dialect, driver), connector);
        self
    }

    /// Open a connection for `descriptor`
    ///
    /// Any failure to establish the connection, including a timeout, is
    /// reported as [`EtlError::ConnectFailed`]; a pair with no connector is
    /// [`EtlError::UnsupportedDialect`].
    pub async fn open(&self, descriptor: &DatabaseDescriptor) -> Result<Box<dyn Connection>> {
        let dialect = descriptor.dialect;
        let driver = descriptor.driver;
        let failed = |message: String| EtlError::ConnectFailed {
            dialect,
            driver,
            message,
        };

        match descriptor.validate() {
            Err(err @ EtlError::UnsupportedDialect { .. }) => return Err(err),
            Err(err) => return Err(failed(err.to_string())),
            Ok(()) => {},
        }

        let connector = self
            .connectors
            .get(&(dialect, driver))
            .ok_or(EtlError::UnsupportedDialect { dialect, driver })?;

        debug!(%dialect, %driver, host = ?descriptor.host, "Opening connection");
        match tokio::time::timeout(self.options.timeout, connector.connect(descriptor, &self.options))
            .await
        {
            Ok(Ok(connection)) => {
                info!(%dialect, %driver, "Connection established");
                Ok(connection)
            },
            Ok(Err(err @ EtlError::ConnectFailed { .. })) => Err(err),
            Ok(Err(err)) => Err(failed(err.to_string())),
            Err(_) => Err(failed(format!(
                "timed out after {}s",
                self.options.timeout.as_secs()
            ))),
        }
    }
}

/// Release a connection, logging rather than propagating close failures
pub async fn close(connection: &dyn Connection) {
    if let Err(e) = connection.close().await {
        warn!(dialect = %connection.dialect(), error = %e, "Error closing connection");
    }
}
