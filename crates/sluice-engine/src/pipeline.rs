//! Pipeline definition types
//!
//! A pipeline arrives fully resolved from the management layer: database
//! descriptors carry decrypted credentials and every config is plain data.
//! The types here only describe *what* to move; the extractor, transformer
//! and loader decide *how*.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_common::time::{self, TimeFormat};

use crate::error::{EtlError, Result};
use crate::working_set::TablePath;

// ============================================================================
// Database descriptors
// ============================================================================

/// Query language family of a database product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Mysql,
    Postgres,
    Sqlserver,
    Oracle,
    Sybase,
    Mongodb,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Mysql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Sqlserver => "sqlserver",
            Dialect::Oracle => "oracle",
            Dialect::Sybase => "sybase",
            Dialect::Mongodb => "mongodb",
        }
    }

    /// Document stores take native filter documents instead of SQL
    pub fn is_document(&self) -> bool {
        matches!(self, Dialect::Mongodb)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client transport used to reach a dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// The dialect's own client library
    #[default]
    Native,
    /// Generic tabular bridge addressed through a DSN
    #[serde(alias = "bridge", alias = "generic")]
    Odbc,
}

impl Driver {
    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Native => "native",
            Driver::Odbc => "odbc",
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a destination, which decides the load strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseRole {
    #[default]
    Operational,
    /// Append-only bulk insert
    Lake,
    /// Upsert on the declared unique columns
    Warehouse,
}

impl DatabaseRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseRole::Operational => "operational",
            DatabaseRole::Lake => "lake",
            DatabaseRole::Warehouse => "warehouse",
        }
    }
}

/// Everything needed to open a connection
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseDescriptor {
    pub dialect: Dialect,
    #[serde(default)]
    pub driver: Driver,
    #[serde(rename = "type", default)]
    pub role: DatabaseRole,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    /// Bridge data source name, required for the ODBC driver
    #[serde(default)]
    pub dsn: Option<String>,
    /// Single connection string, required for MongoDB
    #[serde(default)]
    pub connection_uri: Option<String>,
    /// Per-dialect connection options passed through to the client
    #[serde(default)]
    pub options: serde_json::Map<String, Value>,
}

impl fmt::Debug for DatabaseDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseDescriptor")
            .field("dialect", &self.dialect)
            .field("driver", &self.driver)
            .field("role", &self.role)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("schema", &self.schema)
            .field("dsn", &self.dsn)
            .field("connection_uri", &self.connection_uri.as_ref().map(|_| "***"))
            .finish()
    }
}

impl DatabaseDescriptor {
    /// Check the per-driver requirements before any socket is opened
    pub fn validate(&self) -> Result<()> {
        if self.dialect == Dialect::Mongodb && self.driver != Driver::Native {
            return Err(EtlError::UnsupportedDialect {
                dialect: self.dialect,
                driver: self.driver,
            });
        }
        if self.driver == Driver::Odbc && self.dsn.as_deref().map_or(true, str::is_empty) {
            return Err(EtlError::Config("ODBC connection requires 'dsn'".into()));
        }
        if self.dialect == Dialect::Mongodb
            && self.connection_uri.as_deref().map_or(true, str::is_empty)
        {
            return Err(EtlError::Config("MongoDB requires 'connection_uri'".into()));
        }
        Ok(())
    }

    /// Bridge connection string built from DSN and credentials
    pub fn odbc_connection_string(&self) -> Result<String> {
        let dsn = self
            .dsn
            .as_deref()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| EtlError::Config("ODBC connection requires 'dsn'".into()))?;

        let mut conn = format!("DSN={}", dsn);
        if let Some(user) = self.username.as_deref().filter(|u| !u.is_empty()) {
            conn.push_str(&format!(";UID={}", user));
        }
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            conn.push_str(&format!(";PWD={}", password));
        }
        Ok(conn)
    }

    pub fn option_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(Value::as_bool)
    }
}

/// HTTP API reachable as a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiDescriptor {
    pub base_url: String,
    /// One of `bearer`, `api_key`, `basic`
    pub auth_type: String,
    #[serde(default)]
    pub auth_key: String,
    /// Token endpoint for bearer authentication
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

// ============================================================================
// Filters
// ============================================================================

/// Where a dynamic filter value is taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkSource {
    TimeThreshold,
}

/// Placeholder substituted with the run's watermark
///
/// The shape of `default` picks the representation: an epoch number (or the
/// name `epoch_ms` / `epoch_s`) yields a number, a date string (or a pattern
/// name) yields the watermark formatted the same way. Without a watermark
/// the default itself is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicValue {
    pub source: WatermarkSource,
    pub default: Value,
}

impl DynamicValue {
    pub fn format(&self) -> Result<TimeFormat> {
        if let Value::String(name) = &self.default {
            if let Ok(format) = name.parse::<TimeFormat>() {
                return Ok(format);
            }
        }
        Ok(time::detect(&self.default)?)
    }

    pub fn resolve(&self, watermark: Option<i64>) -> Result<Value> {
        match watermark {
            Some(epoch_ms) => Ok(time::epoch_to_value(epoch_ms, self.format()?)?),
            None => Ok(self.default.clone()),
        }
    }
}

/// Right-hand side of a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Dynamic(DynamicValue),
    Literal(Value),
}

impl FilterValue {
    pub fn resolve(&self, watermark: Option<i64>) -> Result<Value> {
        match self {
            FilterValue::Dynamic(dynamic) => dynamic.resolve(watermark),
            FilterValue::Literal(value) => Ok(value.clone()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
struct RawFilterGroup {
    #[serde(alias = "fields")]
    columns: OneOrMany,
    operator: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    value: Value,
}

/// One filter entry: its columns are OR'd, entries are AND'd
///
/// Deserialization also accepts the older `{"type": "dynamic", "value": ..}`
/// spelling and turns it into a [`DynamicValue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawFilterGroup")]
pub struct FilterGroup {
    pub columns: Vec<String>,
    pub operator: String,
    pub value: FilterValue,
}

impl From<RawFilterGroup> for FilterGroup {
    fn from(raw: RawFilterGroup) -> Self {
        let columns = match raw.columns {
            OneOrMany::One(column) => vec![column],
            OneOrMany::Many(columns) => columns,
        };

        let structured = match &raw.value {
            Value::Object(map) if map.contains_key("source") => {
                serde_json::from_value::<DynamicValue>(raw.value.clone()).ok()
            },
            _ => None,
        };

        let value = match (structured, raw.kind.as_deref()) {
            (Some(dynamic), _) => FilterValue::Dynamic(dynamic),
            (None, Some("dynamic")) => FilterValue::Dynamic(DynamicValue {
                source: WatermarkSource::TimeThreshold,
                default: raw.value,
            }),
            (None, _) => FilterValue::Literal(raw.value),
        };

        Self {
            columns,
            operator: raw.operator,
            value,
        }
    }
}

// ============================================================================
// Source side
// ============================================================================

/// Read one table from a database source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    pub table: String,
    /// Name the rows are stored under in `src`; defaults to the table name
    #[serde(default)]
    pub alias: Option<String>,
    /// Columns to select; empty selects every column
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub filters: Vec<FilterGroup>,
}

impl ExtractConfig {
    pub fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

/// Read one endpoint of an HTTP source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiExtractConfig {
    /// Name the rows are stored under in `src`
    pub name: String,
    /// Path relative to the API base URL
    pub target: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub http_method: Option<String>,
    #[serde(default)]
    pub pagination: Option<Value>,
    #[serde(default)]
    pub filters: Vec<FilterGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceBinding {
    Database {
        database: DatabaseDescriptor,
        configs: Vec<ExtractConfig>,
    },
    Api {
        api: ApiDescriptor,
        configs: Vec<ApiExtractConfig>,
    },
}

impl SourceBinding {
    fn table_keys(&self) -> Vec<&str> {
        match self {
            SourceBinding::Database { configs, .. } => configs.iter().map(|c| c.key()).collect(),
            SourceBinding::Api { configs, .. } => configs.iter().map(|c| c.name.as_str()).collect(),
        }
    }
}

// ============================================================================
// Destination side
// ============================================================================

fn default_order() -> u32 {
    1
}

fn default_join_type() -> String {
    "inner".to_string()
}

/// One operation in a destination table's transform chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformStep {
    #[serde(default = "default_order")]
    pub order: u32,
    #[serde(flatten)]
    pub kind: StepKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepKind {
    Map {
        #[serde(alias = "field")]
        column: String,
        mapping: serde_json::Map<String, Value>,
    },
    Join {
        left: String,
        right: String,
        #[serde(default = "default_join_type")]
        join_type: String,
    },
    Filter {
        column: String,
        operator: String,
        value: Value,
    },
    Rename {
        #[serde(alias = "from")]
        rename_from: String,
        #[serde(alias = "to")]
        rename_to: String,
    },
    Formula {
        expression: String,
        #[serde(rename = "as")]
        output: String,
    },
    Aggregate {
        operation: String,
        target: String,
        group_by: String,
        #[serde(rename = "as")]
        output: String,
    },
    TimeFormat {
        columns: Vec<String>,
        /// Detected per value when absent
        #[serde(default)]
        old_format: Option<String>,
        new_format: String,
    },
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Map { .. } => "map",
            StepKind::Join { .. } => "join",
            StepKind::Filter { .. } => "filter",
            StepKind::Rename { .. } => "rename",
            StepKind::Formula { .. } => "formula",
            StepKind::Aggregate { .. } => "aggregate",
            StepKind::TimeFormat { .. } => "time-format",
        }
    }
}

/// Transform and load settings for one destination table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub table: String,
    /// Output columns; rows are projected to these after the last step
    #[serde(default)]
    pub columns: Vec<String>,
    /// Conflict key for warehouse upserts
    #[serde(default)]
    pub unique: Vec<String>,
    /// Priority across destination tables, lowest first
    #[serde(default = "default_order")]
    pub order: u32,
    /// Path of the starting row set, e.g. `src.orders`
    pub init_value: String,
    #[serde(default)]
    pub transforms: Vec<TransformStep>,
}

impl DestinationConfig {
    /// Structural checks that fail only this table
    pub fn validate(&self) -> Result<()> {
        if self.order < 1 {
            return Err(EtlError::Config(format!(
                "order of table '{}' must be at least 1",
                self.table
            )));
        }
        self.init_value.parse::<TablePath>()?;

        for step in &self.transforms {
            if step.order < 1 {
                return Err(EtlError::Config(format!(
                    "{} step order must be at least 1",
                    step.kind.name()
                )));
            }
            if let StepKind::Join { left, right, .. } = &step.kind {
                for path in [left, right] {
                    let parsed: TablePath = path.parse()?;
                    if parsed.column.is_none() {
                        return Err(EtlError::InvalidPath {
                            path: path.clone(),
                            message: "join paths must be scope.table.column".into(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Steps in execution order
    pub fn ordered_steps(&self) -> Vec<&TransformStep> {
        let mut steps: Vec<&TransformStep> = self.transforms.iter().collect();
        steps.sort_by_key(|step| step.order);
        steps
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationBinding {
    pub database: DatabaseDescriptor,
    pub configs: Vec<DestinationConfig>,
}

/// Configs sorted by `order`, ties kept in declaration order
pub(crate) fn ordered(configs: &[DestinationConfig]) -> Vec<&DestinationConfig> {
    let mut sorted: Vec<&DestinationConfig> = configs.iter().collect();
    sorted.sort_by_key(|config| config.order);
    sorted
}

/// A complete source-to-destination definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default)]
    pub pipeline_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source: SourceBinding,
    pub destination: DestinationBinding,
}

impl Pipeline {
    /// Pipeline-wide invariants: table names are unique within `src` and `dst`
    pub fn validate(&self) -> Result<()> {
        ensure_unique("source", self.source.table_keys())?;
        ensure_unique(
            "destination",
            self.destination.configs.iter().map(|c| c.table.as_str()).collect(),
        )?;
        Ok(())
    }
}

fn ensure_unique(side: &str, names: Vec<&str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(EtlError::Config(format!(
                "{} table '{}' is declared more than once",
                side, name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_requirements() {
        let odbc: DatabaseDescriptor = serde_json::from_value(json!({
            "dialect": "sybase", "driver": "odbc", "username": "etl", "password": "pw"
        }))
        .unwrap();
        assert!(matches!(odbc.validate(), Err(EtlError::Config(_))));

        let with_dsn = DatabaseDescriptor {
            dsn: Some("ase_prod".into()),
            ..odbc
        };
        assert!(with_dsn.validate().is_ok());
        assert_eq!(
            with_dsn.odbc_connection_string().unwrap(),
            "DSN=ase_prod;UID=etl;PWD=pw"
        );

        let mongo: DatabaseDescriptor =
            serde_json::from_value(json!({"dialect": "mongodb", "type": "lake"})).unwrap();
        assert_eq!(mongo.role, DatabaseRole::Lake);
        assert!(mongo.validate().is_err());

        let mongo_bridge: DatabaseDescriptor = serde_json::from_value(json!({
            "dialect": "mongodb", "driver": "bridge", "connection_uri": "mongodb://h/db", "dsn": "x"
        }))
        .unwrap();
        assert!(matches!(
            mongo_bridge.validate(),
            Err(EtlError::UnsupportedDialect { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let descriptor: DatabaseDescriptor = serde_json::from_value(json!({
            "dialect": "postgres", "password": "hunter2"
        }))
        .unwrap();
        let debug = format!("{:?}", descriptor);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_filter_value_conventions() {
        let structured: FilterGroup = serde_json::from_value(json!({
            "columns": ["updated_at"],
            "operator": "gte",
            "value": {"source": "time_threshold", "default": "2024-01-01 00:00:00"}
        }))
        .unwrap();
        let legacy: FilterGroup = serde_json::from_value(json!({
            "type": "dynamic",
            "fields": "updated_at",
            "operator": "gte",
            "value": "2024-01-01 00:00:00"
        }))
        .unwrap();
        assert_eq!(structured, legacy);

        let literal: FilterGroup = serde_json::from_value(json!({
            "fields": ["status"], "operator": "eq", "value": "paid"
        }))
        .unwrap();
        assert_eq!(literal.value, FilterValue::Literal(json!("paid")));
    }

    #[test]
    fn test_dynamic_value_resolution() {
        let watermark = Some(1_709_622_489_000);
        let by_shape = |default: Value| DynamicValue {
            source: WatermarkSource::TimeThreshold,
            default,
        };

        assert_eq!(
            by_shape(json!(1_700_000_000_000_i64)).resolve(watermark).unwrap(),
            json!(1_709_622_489_000_i64)
        );
        assert_eq!(
            by_shape(json!(1_700_000_000)).resolve(watermark).unwrap(),
            json!(1_709_622_489)
        );
        assert_eq!(
            by_shape(json!("01/01/2024 00:00:00")).resolve(watermark).unwrap(),
            json!("05/03/2024 07:08:09")
        );
        assert_eq!(
            by_shape(json!("YYYY-MM-DD")).resolve(watermark).unwrap(),
            json!("2024-03-05")
        );
        assert_eq!(
            by_shape(json!("2024-01-01")).resolve(None).unwrap(),
            json!("2024-01-01")
        );
        assert!(by_shape(json!("last tuesday")).resolve(watermark).is_err());
    }

    #[test]
    fn test_transform_step_tags() {
        let config: DestinationConfig = serde_json::from_value(json!({
            "table": "customer_totals",
            "columns": ["customer_id", "total"],
            "init_value": "src.orders",
            "transforms": [
                {"type": "aggregate", "order": 2, "operation": "sum", "target": "amount",
                 "group_by": "customer_id", "as": "total"},
                {"type": "time-format", "order": 1, "columns": ["paid_at"],
                 "old_format": "epoch_ms", "new_format": "YYYY-MM-DD"}
            ]
        }))
        .unwrap();

        let names: Vec<&str> = config.ordered_steps().iter().map(|s| s.kind.name()).collect();
        assert_eq!(names, vec!["time-format", "aggregate"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_destination_validation() {
        let bad_join: DestinationConfig = serde_json::from_value(json!({
            "table": "t", "init_value": "src.orders",
            "transforms": [{"type": "join", "left": "src.orders", "right": "src.customers.id"}]
        }))
        .unwrap();
        assert!(matches!(bad_join.validate(), Err(EtlError::InvalidPath { .. })));

        let zero_order: DestinationConfig = serde_json::from_value(json!({
            "table": "t", "init_value": "src.orders", "order": 0
        }))
        .unwrap();
        assert!(zero_order.validate().is_err());
    }
}
