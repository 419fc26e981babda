//! In-memory database
//!
//! Backs the engine's tests and dry runs. Tables live in a shared
//! [`MemoryDatabase`]; every connection opened through [`MemoryConnector`]
//! sees the same data. Reads and writes can be told to fail so callers can
//! exercise error isolation.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ConnectOptions, Connection, Connector, ReadQuery, WriteBatch, WriteMode};
use crate::error::{EtlError, Result};
use crate::pipeline::{DatabaseDescriptor, Dialect};
use crate::value::loose_eq;
use crate::working_set::Row;

/// A write that reached the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub table: String,
    pub rows: usize,
    pub upsert: bool,
}

#[derive(Default)]
struct State {
    tables: BTreeMap<String, Vec<Row>>,
    writes: Vec<WriteRecord>,
    failing_reads: Vec<String>,
    /// table -> 1-based write calls that fail
    failing_writes: HashMap<String, Vec<usize>>,
    write_calls: HashMap<String, usize>,
}

#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl MemoryDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert_table(&self, table: &str, rows: Vec<Row>) {
        self.state.lock().await.tables.insert(table.to_string(), rows);
    }

    /// Current contents of `table`, empty when it does not exist
    pub async fn table(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .await
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn fail_reads(&self, table: &str) {
        self.state.lock().await.failing_reads.push(table.to_string());
    }

    /// Make the `nth` write call (1-based) against `table` fail
    pub async fn fail_write(&self, table: &str, nth: usize) {
        self.state
            .lock()
            .await
            .failing_writes
            .entry(table.to_string())
            .or_default()
            .push(nth);
    }

    pub async fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().await.writes.clone()
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MemoryConnector {
    database: Arc<MemoryDatabase>,
    refuse: bool,
}

impl MemoryConnector {
    pub fn new(database: Arc<MemoryDatabase>) -> Self {
        Self {
            database,
            refuse: false,
        }
    }

    /// A connector whose every connect attempt fails
    pub fn refusing() -> Self {
        Self {
            database: MemoryDatabase::new(),
            refuse: true,
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        descriptor: &DatabaseDescriptor,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>> {
        if self.refuse {
            return Err(EtlError::query("connection refused"));
        }
        self.database.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            database: self.database.clone(),
            dialect: descriptor.dialect,
        }))
    }
}

struct MemoryConnection {
    database: Arc<MemoryDatabase>,
    dialect: Dialect,
}

fn same_key(existing: &Row, incoming: &Row, unique: &[String]) -> bool {
    unique.iter().all(|key| match (existing.get(key), incoming.get(key)) {
        (Some(a), Some(b)) => loose_eq(a, b),
        _ => false,
    })
}

#[async_trait]
impl Connection for MemoryConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn fetch(&self, query: &ReadQuery) -> Result<Vec<Row>> {
        let state = self.database.state.lock().await;
        if state.failing_reads.contains(&query.table) {
            return Err(EtlError::query(format!("read of '{}' failed", query.table)));
        }
        let rows = state
            .tables
            .get(&query.table)
            .ok_or_else(|| EtlError::query(format!("table '{}' does not exist", query.table)))?;

        Ok(rows
            .iter()
            .filter(|row| query.predicate.as_ref().map_or(true, |p| p.matches(row)))
            .map(|row| {
                if query.columns.is_empty() {
                    row.clone()
                } else {
                    query
                        .columns
                        .iter()
                        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                        .collect()
                }
            })
            .collect())
    }

    async fn write(&self, batch: &WriteBatch<'_>) -> Result<u64> {
        let mut state = self.database.state.lock().await;

        let call = {
            let calls = state.write_calls.entry(batch.table.to_string()).or_default();
            *calls += 1;
            *calls
        };
        let fails = state
            .failing_writes
            .get(batch.table)
            .map_or(false, |calls| calls.contains(&call));
        if fails {
            return Err(EtlError::query(format!(
                "write {} to '{}' rejected",
                call, batch.table
            )));
        }

        let incoming: Vec<Row> = batch
            .rows
            .iter()
            .map(|row| {
                batch
                    .columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or_default()))
                    .collect()
            })
            .collect();

        let table = state.tables.entry(batch.table.to_string()).or_default();
        let upsert = match batch.mode {
            WriteMode::Insert => {
                table.extend(incoming);
                false
            },
            WriteMode::Upsert { unique } => {
                for row in incoming {
                    match table.iter_mut().find(|existing| same_key(existing, &row, unique)) {
                        Some(existing) => *existing = row,
                        None => table.push(row),
                    }
                }
                true
            },
        };

        state.writes.push(WriteRecord {
            table: batch.table.to_string(),
            rows: batch.rows.len(),
            upsert,
        });
        Ok(batch.rows.len() as u64)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.database.state.lock().await.tables.keys().cloned().collect())
    }

    async fn close(&self) -> Result<()> {
        self.database.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
