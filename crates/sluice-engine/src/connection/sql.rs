//! SQL rendering shared by the relational connections
//!
//! Every value reaches the database as a bound parameter; only identifiers
//! are spliced into the text, and those are quoted per dialect.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use sluice_common::time::{self, TimeFormat};

use super::{ReadQuery, WriteBatch, WriteMode};
use crate::error::{EtlError, Result};
use crate::filter::{Predicate, Test};
use crate::pipeline::Dialect;
use crate::working_set::Row;

/// Bind marker style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `?`
    Question,
    /// `$1`
    Dollar,
    /// `@P1`
    AtP,
    /// `:1`
    Colon,
}

impl Placeholder {
    fn mark(&self, n: usize) -> String {
        match self {
            Placeholder::Question => "?".to_string(),
            Placeholder::Dollar => format!("${}", n),
            Placeholder::AtP => format!("@P{}", n),
            Placeholder::Colon => format!(":{}", n),
        }
    }
}

/// How a particular connection spells SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlFlavor {
    pub dialect: Dialect,
    pub placeholder: Placeholder,
    /// Bound parameters allowed in one statement
    pub max_params: usize,
    /// Rows allowed in one multi-row statement
    pub max_rows: usize,
}

impl SqlFlavor {
    /// Flavor of the dialect's own client library
    pub fn native(dialect: Dialect) -> Self {
        let (placeholder, max_params, max_rows) = match dialect {
            Dialect::Mysql => (Placeholder::Question, 65_535, usize::MAX),
            Dialect::Postgres => (Placeholder::Dollar, 65_535, usize::MAX),
            Dialect::Sqlserver => (Placeholder::AtP, 2_000, 1_000),
            Dialect::Oracle => (Placeholder::Colon, 32_767, 1_000),
            Dialect::Sybase | Dialect::Mongodb => (Placeholder::Question, 2_000, 1_000),
        };
        Self {
            dialect,
            placeholder,
            max_params,
            max_rows,
        }
    }

    /// Flavor when the dialect is reached through the ODBC bridge
    pub fn bridge(dialect: Dialect) -> Self {
        Self {
            placeholder: Placeholder::Question,
            ..Self::native(dialect)
        }
    }

    /// Quote an identifier; dotted names are quoted per segment
    pub fn quote(&self, ident: &str) -> String {
        ident
            .split('.')
            .map(|part| match self.dialect {
                Dialect::Mysql => format!("`{}`", part.replace('`', "``")),
                Dialect::Sqlserver | Dialect::Sybase => format!("[{}]", part.replace(']', "]]")),
                Dialect::Postgres | Dialect::Oracle | Dialect::Mongodb => {
                    format!("\"{}\"", part.replace('"', "\"\""))
                },
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    fn quote_all(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Collects bound values and hands out their markers
#[derive(Debug)]
pub struct Params {
    placeholder: Placeholder,
    values: Vec<SqlParam>,
}

impl Params {
    pub fn new(flavor: &SqlFlavor) -> Self {
        Self {
            placeholder: flavor.placeholder,
            values: Vec::new(),
        }
    }

    /// Bind a row cell, returning its marker; null is written inline as `NULL`
    ///
    /// Date-shaped strings bind as temporal types, see [`SqlParam::from_json`].
    pub fn bind(&mut self, value: Value) -> String {
        self.push(SqlParam::from_json(&value))
    }

    /// Bind a filter literal; strings always bind as text
    pub fn bind_literal(&mut self, value: Value) -> String {
        self.push(SqlParam::literal(&value))
    }

    fn push(&mut self, param: SqlParam) -> String {
        if param == SqlParam::Null {
            return "NULL".to_string();
        }
        self.values.push(param);
        self.placeholder.mark(self.values.len())
    }

    fn into_values(self) -> Vec<SqlParam> {
        self.values
    }
}

/// A JSON value converted to a driver-bindable value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    TimestampUtc(DateTime<Utc>),
    Date(NaiveDate),
}

impl SqlParam {
    /// Conversion for written cells and watermark values
    ///
    /// Strings written as ISO timestamps or dates bind as temporal types so
    /// they insert into and compare against typed columns.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => temporal(s).unwrap_or_else(|| SqlParam::Text(s.clone())),
            other => SqlParam::literal(other),
        }
    }

    /// Conversion that never reinterprets strings
    pub fn literal(value: &Value) -> Self {
        match value {
            Value::Null => SqlParam::Null,
            Value::Bool(b) => SqlParam::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlParam::Int(i),
                None => SqlParam::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => SqlParam::Text(s.clone()),
            other => SqlParam::Text(other.to_string()),
        }
    }

    /// Plain text rendering, for transports that only take strings
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlParam::Null => None,
            SqlParam::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            SqlParam::Int(i) => Some(i.to_string()),
            SqlParam::Float(f) => Some(f.to_string()),
            SqlParam::Text(s) => Some(s.clone()),
            SqlParam::Timestamp(t) => Some(t.format("%Y-%m-%d %H:%M:%S").to_string()),
            SqlParam::TimestampUtc(t) => Some(t.format("%Y-%m-%d %H:%M:%S").to_string()),
            SqlParam::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }
}

fn temporal(text: &str) -> Option<SqlParam> {
    let format = time::detect(&Value::String(text.to_string())).ok()?;
    let epoch = time::string_to_epoch(text, format).ok()?;
    let at = DateTime::<Utc>::from_timestamp_millis(epoch)?;
    match format {
        TimeFormat::IsoUtc => Some(SqlParam::TimestampUtc(at)),
        TimeFormat::DateTime => Some(SqlParam::Timestamp(at.naive_utc())),
        TimeFormat::Date => Some(SqlParam::Date(at.date_naive())),
        _ => None,
    }
}

/// SQL text plus its parameters in marker order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    pub fn plain(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

pub fn render_predicate(predicate: &Predicate, flavor: &SqlFlavor, params: &mut Params) -> String {
    match predicate {
        Predicate::All(parts) if parts.is_empty() => "1 = 1".to_string(),
        Predicate::Any(parts) if parts.is_empty() => "1 = 0".to_string(),
        Predicate::All(parts) => join_parts(parts, " AND ", flavor, params),
        Predicate::Any(parts) => join_parts(parts, " OR ", flavor, params),
        Predicate::Column { column, test } => render_test(&flavor.quote(column), test, flavor, params),
    }
}

fn join_parts(parts: &[Predicate], separator: &str, flavor: &SqlFlavor, params: &mut Params) -> String {
    parts
        .iter()
        .map(|part| format!("({})", render_predicate(part, flavor, params)))
        .collect::<Vec<_>>()
        .join(separator)
}

fn render_test(col: &str, test: &Test, flavor: &SqlFlavor, params: &mut Params) -> String {
    let not = |negated: bool| if negated { "NOT " } else { "" };

    match test {
        Test::Compare {
            op,
            value,
            from_watermark,
        } => {
            let mark = if *from_watermark {
                params.bind(value.clone())
            } else {
                params.bind_literal(value.clone())
            };
            format!("{} {} {}", col, op.sql(), mark)
        },
        Test::Null { negated } => format!("{} IS {}NULL", col, not(*negated)),
        Test::Bool { value, negated } => match flavor.dialect {
            Dialect::Mysql | Dialect::Postgres => format!(
                "{} IS {}{}",
                col,
                not(*negated),
                if *value { "TRUE" } else { "FALSE" }
            ),
            _ => {
                let bit = if *value { 1 } else { 0 };
                if *negated {
                    format!("({} IS NULL OR {} <> {})", col, col, bit)
                } else {
                    format!("{} = {}", col, bit)
                }
            },
        },
        Test::Like {
            pattern,
            negated,
            case_insensitive,
            ..
        } => {
            let keyword = if *case_insensitive && flavor.dialect == Dialect::Postgres {
                "ILIKE"
            } else {
                "LIKE"
            };
            format!(
                "{} {}{} {}",
                col,
                not(*negated),
                keyword,
                params.bind_literal(Value::String(pattern.clone()))
            )
        },
        Test::In { values, negated } if values.is_empty() => {
            let always = if *negated { "1 = 1" } else { "1 = 0" };
            always.to_string()
        },
        Test::In { values, negated } => {
            let marks: Vec<String> = values.iter().map(|v| params.bind_literal(v.clone())).collect();
            format!("{} {}IN ({})", col, not(*negated), marks.join(", "))
        },
        Test::Between { low, high, negated } => {
            let low = params.bind_literal(low.clone());
            let high = params.bind_literal(high.clone());
            format!("{} {}BETWEEN {} AND {}", col, not(*negated), low, high)
        },
    }
}

/// `SELECT` for an extract read
pub fn select(flavor: &SqlFlavor, query: &ReadQuery) -> Statement {
    let columns = if query.columns.is_empty() {
        "*".to_string()
    } else {
        flavor.quote_all(&query.columns)
    };

    let mut params = Params::new(flavor);
    let mut sql = format!("SELECT {} FROM {}", columns, flavor.quote(&query.table));
    if let Some(predicate) = &query.predicate {
        sql.push_str(" WHERE ");
        sql.push_str(&render_predicate(predicate, flavor, &mut params));
    }

    Statement {
        sql,
        params: params.into_values(),
    }
}

/// Statements that write one batch, split to respect the parameter limit
///
/// Connections run the returned statements inside one transaction.
pub fn write_statements(flavor: &SqlFlavor, batch: &WriteBatch<'_>) -> Result<Vec<Statement>> {
    if batch.columns.is_empty() {
        return Err(EtlError::Config(format!(
            "no columns to write for table {}",
            batch.table
        )));
    }

    let rows_per_statement = (flavor.max_params / batch.columns.len())
        .max(1)
        .min(flavor.max_rows);

    batch
        .rows
        .chunks(rows_per_statement)
        .map(|rows| match batch.mode {
            WriteMode::Insert => Ok(insert(flavor, batch.table, batch.columns, rows)),
            WriteMode::Upsert { unique } => upsert(flavor, batch.table, batch.columns, unique, rows),
        })
        .collect()
}

fn row_marks(params: &mut Params, row: &Row, columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .map(|c| params.bind(row.get(c).cloned().unwrap_or(Value::Null)))
        .collect()
}

fn values_list(params: &mut Params, rows: &[Row], columns: &[String]) -> String {
    rows.iter()
        .map(|row| format!("({})", row_marks(params, row, columns).join(", ")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `SELECT ? AS a, ? AS b UNION ALL ...`, with `FROM dual` on Oracle
fn select_rows(flavor: &SqlFlavor, params: &mut Params, rows: &[Row], columns: &[String]) -> String {
    let oracle = flavor.dialect == Dialect::Oracle;
    rows.iter()
        .map(|row| {
            let marks = row_marks(params, row, columns);
            let fields = marks
                .iter()
                .zip(columns)
                .map(|(mark, c)| {
                    if oracle {
                        format!("{} {}", mark, flavor.quote(c))
                    } else {
                        format!("{} AS {}", mark, flavor.quote(c))
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            if oracle {
                format!("SELECT {} FROM dual", fields)
            } else {
                format!("SELECT {}", fields)
            }
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ")
}

fn insert(flavor: &SqlFlavor, table: &str, columns: &[String], rows: &[Row]) -> Statement {
    let mut params = Params::new(flavor);
    let target = flavor.quote(table);
    let cols = flavor.quote_all(columns);

    let sql = match flavor.dialect {
        Dialect::Oracle => {
            let mut sql = String::from("INSERT ALL");
            for row in rows {
                let marks = row_marks(&mut params, row, columns);
                sql.push_str(&format!(" INTO {} ({}) VALUES ({})", target, cols, marks.join(", ")));
            }
            sql.push_str(" SELECT 1 FROM DUAL");
            sql
        },
        Dialect::Sybase => format!(
            "INSERT INTO {} ({}) {}",
            target,
            cols,
            select_rows(flavor, &mut params, rows, columns)
        ),
        _ => format!(
            "INSERT INTO {} ({}) VALUES {}",
            target,
            cols,
            values_list(&mut params, rows, columns)
        ),
    };

    Statement {
        sql,
        params: params.into_values(),
    }
}

/// Columns an upsert updates on conflict
pub fn update_columns<'a>(table: &str, columns: &'a [String], unique: &[String]) -> Result<Vec<&'a String>> {
    if unique.is_empty() {
        return Err(EtlError::MissingUniqueKey {
            table: table.to_string(),
            reason: "no unique columns declared".into(),
        });
    }
    let update: Vec<&String> = columns.iter().filter(|c| !unique.contains(c)).collect();
    if update.is_empty() {
        return Err(EtlError::EmptyUpdateSet(table.to_string()));
    }
    Ok(update)
}

fn upsert(
    flavor: &SqlFlavor,
    table: &str,
    columns: &[String],
    unique: &[String],
    rows: &[Row],
) -> Result<Statement> {
    let update = update_columns(table, columns, unique)?;
    let q = |c: &String| flavor.quote(c);
    let cols = flavor.quote_all(columns);
    let target = flavor.quote(table);

    let merge_on = unique
        .iter()
        .map(|u| format!("target.{} = source.{}", q(u), q(u)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let merge_set = update
        .iter()
        .map(|c| format!("target.{} = source.{}", q(c), q(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let merge_insert = columns
        .iter()
        .map(|c| format!("source.{}", q(c)))
        .collect::<Vec<_>>()
        .join(", ");

    let mut params = Params::new(flavor);
    let sql = match flavor.dialect {
        Dialect::Mysql => format!(
            "INSERT INTO {} ({}) VALUES {} ON DUPLICATE KEY UPDATE {}",
            target,
            cols,
            values_list(&mut params, rows, columns),
            update
                .iter()
                .map(|c| format!("{} = VALUES({})", q(c), q(c)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Dialect::Postgres => format!(
            "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) DO UPDATE SET {}",
            target,
            cols,
            values_list(&mut params, rows, columns),
            flavor.quote_all(unique),
            update
                .iter()
                .map(|c| format!("{} = EXCLUDED.{}", q(c), q(c)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Dialect::Sqlserver => format!(
            "MERGE INTO {} AS target USING (VALUES {}) AS source ({}) ON {} \
             WHEN MATCHED THEN UPDATE SET {} \
             WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});",
            target,
            values_list(&mut params, rows, columns),
            cols,
            merge_on,
            merge_set,
            cols,
            merge_insert
        ),
        Dialect::Sybase => format!(
            "MERGE INTO {} AS target USING ({}) AS source ON {} \
             WHEN MATCHED THEN UPDATE SET {} \
             WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            target,
            select_rows(flavor, &mut params, rows, columns),
            merge_on,
            merge_set,
            cols,
            merge_insert
        ),
        Dialect::Oracle => format!(
            "MERGE INTO {} target USING ({}) source ON ({}) \
             WHEN MATCHED THEN UPDATE SET {} \
             WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            target,
            select_rows(flavor, &mut params, rows, columns),
            merge_on,
            merge_set,
            cols,
            merge_insert
        ),
        Dialect::Mongodb => {
            return Err(EtlError::Config("document stores do not take SQL upserts".into()))
        },
    };

    Ok(Statement {
        sql,
        params: params.into_values(),
    })
}

/// Query listing the user tables visible to the connection
pub fn list_tables(flavor: &SqlFlavor, schema: Option<&str>) -> Statement {
    match (flavor.dialect, schema) {
        (Dialect::Mysql, _) => Statement::plain(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' ORDER BY table_name",
        ),
        (Dialect::Postgres, Some(schema)) => {
            let mut params = Params::new(flavor);
            let sql = format!(
                "SELECT tablename FROM pg_catalog.pg_tables WHERE schemaname = {} ORDER BY tablename",
                params.bind_literal(Value::String(schema.to_string()))
            );
            Statement {
                sql,
                params: params.into_values(),
            }
        },
        (Dialect::Postgres, None) => Statement::plain(
            "SELECT tablename FROM pg_catalog.pg_tables \
             WHERE schemaname = current_schema() ORDER BY tablename",
        ),
        (Dialect::Sqlserver, _) => Statement::plain(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
        ),
        (Dialect::Oracle, _) => Statement::plain("SELECT table_name FROM user_tables ORDER BY table_name"),
        (Dialect::Sybase, _) | (Dialect::Mongodb, _) => {
            Statement::plain("SELECT name FROM sysobjects WHERE type = 'U' ORDER BY name")
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::filter::compile;
    use crate::pipeline::FilterGroup;
    use serde_json::json;

    fn rows(values: Vec<serde_json::Value>) -> Vec<Row> {
        values.into_iter().map(|v| v.as_object().cloned().unwrap()).collect()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn read(dialect: Dialect, filters: serde_json::Value) -> Statement {
        let groups: Vec<FilterGroup> = serde_json::from_value(filters).unwrap();
        let query = ReadQuery {
            table: "sales.orders".into(),
            columns: cols(&["id", "amount"]),
            predicate: compile(&groups, None, dialect).unwrap(),
        };
        select(&SqlFlavor::native(dialect), &query)
    }

    #[test]
    fn test_select_quotes_and_binds() {
        let filters = json!([
            {"columns": ["status", "state"], "operator": "eq", "value": "paid"},
            {"columns": ["amount"], "operator": "between", "value": [10, 20]}
        ]);

        let pg = read(Dialect::Postgres, filters.clone());
        assert_eq!(
            pg.sql,
            "SELECT \"id\", \"amount\" FROM \"sales\".\"orders\" WHERE \
             ((\"status\" = $1) OR (\"state\" = $2)) AND (\"amount\" BETWEEN $3 AND $4)"
        );
        assert_eq!(
            pg.params,
            vec![
                SqlParam::Text("paid".into()),
                SqlParam::Text("paid".into()),
                SqlParam::Int(10),
                SqlParam::Int(20)
            ]
        );

        let mssql = read(Dialect::Sqlserver, filters);
        assert!(mssql.sql.starts_with("SELECT [id], [amount] FROM [sales].[orders]"));
        assert!(mssql.sql.contains("[amount] BETWEEN @P3 AND @P4"));
    }

    #[test]
    fn test_boolean_and_empty_list_rendering() {
        let filters = json!([
            {"columns": ["active"], "operator": "not", "value": true},
            {"columns": ["region"], "operator": "in", "value": []}
        ]);

        let mysql = read(Dialect::Mysql, filters.clone());
        assert!(mysql.sql.ends_with("WHERE (`active` IS NOT TRUE) AND (1 = 0)"));

        let oracle = read(Dialect::Oracle, filters);
        assert!(oracle
            .sql
            .ends_with("WHERE ((\"active\" IS NULL OR \"active\" <> 1)) AND (1 = 0)"));
        assert!(oracle.params.is_empty());
    }

    #[test]
    fn test_postgres_like_is_case_insensitive() {
        let stmt = read(
            Dialect::Postgres,
            json!([{"columns": ["name"], "operator": "notLike", "value": "a%"}]),
        );
        assert!(stmt.sql.ends_with("WHERE \"name\" NOT ILIKE $1"));
    }

    #[test]
    fn test_date_literal_binds_as_text() {
        let stmt = read(
            Dialect::Postgres,
            json!([{"columns": ["batch_label"], "operator": "eq", "value": "2024-01-01"}]),
        );
        assert!(stmt.sql.ends_with("WHERE \"batch_label\" = $1"));
        assert_eq!(stmt.params, vec![SqlParam::Text("2024-01-01".into())]);

        let stmt = read(
            Dialect::Postgres,
            json!([{"columns": ["day"], "operator": "between", "value": ["2024-01-01", "2024-02-01"]}]),
        );
        assert!(stmt.params.iter().all(|p| matches!(p, SqlParam::Text(_))));
    }

    #[test]
    fn test_watermark_value_binds_as_temporal() {
        let groups: Vec<FilterGroup> = serde_json::from_value(json!([{
            "columns": ["updated_on"],
            "operator": "gte",
            "value": {"source": "time_threshold", "default": "2020-01-01"}
        }]))
        .unwrap();
        let query = ReadQuery {
            table: "orders".into(),
            columns: Vec::new(),
            predicate: compile(&groups, Some(1_709_622_489_000), Dialect::Postgres).unwrap(),
        };
        let stmt = select(&SqlFlavor::native(Dialect::Postgres), &query);
        assert!(matches!(stmt.params.as_slice(), [SqlParam::Date(_)]));
    }

    #[test]
    fn test_upsert_per_dialect() {
        let columns = cols(&["id", "name"]);
        let unique = cols(&["id"]);
        let data = rows(vec![json!({"id": 1, "name": "a"}), json!({"id": 2})]);
        let batch = WriteBatch {
            table: "dim_customer",
            columns: &columns,
            rows: &data,
            mode: WriteMode::Upsert { unique: &unique },
        };

        let mysql = write_statements(&SqlFlavor::native(Dialect::Mysql), &batch).unwrap();
        assert_eq!(
            mysql[0].sql,
            "INSERT INTO `dim_customer` (`id`, `name`) VALUES (?, ?), (?, NULL) \
             ON DUPLICATE KEY UPDATE `name` = VALUES(`name`)"
        );
        assert_eq!(
            mysql[0].params,
            vec![SqlParam::Int(1), SqlParam::Text("a".into()), SqlParam::Int(2)]
        );

        let pg = write_statements(&SqlFlavor::native(Dialect::Postgres), &batch).unwrap();
        assert!(pg[0].sql.ends_with("ON CONFLICT (\"id\") DO UPDATE SET \"name\" = EXCLUDED.\"name\""));

        let mssql = write_statements(&SqlFlavor::native(Dialect::Sqlserver), &batch).unwrap();
        assert!(mssql[0].sql.starts_with(
            "MERGE INTO [dim_customer] AS target USING (VALUES (@P1, @P2), (@P3, NULL)) AS source ([id], [name])"
        ));

        let oracle = write_statements(&SqlFlavor::native(Dialect::Oracle), &batch).unwrap();
        assert!(oracle[0].sql.contains(
            "USING (SELECT :1 \"id\", :2 \"name\" FROM dual UNION ALL SELECT :3 \"id\", NULL \"name\" FROM dual) source"
        ));

        let sybase = write_statements(&SqlFlavor::bridge(Dialect::Sybase), &batch).unwrap();
        assert!(sybase[0].sql.contains("USING (SELECT ? AS [id], ? AS [name] UNION ALL"));
    }

    #[test]
    fn test_upsert_requires_update_columns() {
        let columns = cols(&["id"]);
        let data = rows(vec![json!({"id": 1})]);
        let batch = WriteBatch {
            table: "keys_only",
            columns: &columns,
            rows: &data,
            mode: WriteMode::Upsert { unique: &columns },
        };
        let err = write_statements(&SqlFlavor::native(Dialect::Postgres), &batch).unwrap_err();
        assert!(matches!(err, EtlError::EmptyUpdateSet(_)));
    }

    #[test]
    fn test_params_bind_dates_as_temporal_types() {
        assert!(matches!(
            SqlParam::from_json(&json!("2024-03-05 07:08:09")),
            SqlParam::Timestamp(_)
        ));
        assert!(matches!(SqlParam::from_json(&json!("2024-03-05")), SqlParam::Date(_)));
        assert_eq!(
            SqlParam::literal(&json!("2024-03-05")),
            SqlParam::Text("2024-03-05".into())
        );
        assert_eq!(
            SqlParam::from_json(&json!("05/03/2024")),
            SqlParam::Text("05/03/2024".into())
        );
        assert_eq!(SqlParam::from_json(&json!(3)), SqlParam::Int(3));
        assert_eq!(
            SqlParam::from_json(&json!({"a": 1})).to_text().as_deref(),
            Some("{\"a\":1}")
        );
    }

    #[test]
    fn test_insert_splits_on_parameter_limit() {
        let columns = cols(&["a", "b", "c", "d"]);
        let data = rows((0..1200).map(|i| json!({"a": i, "b": i, "c": i, "d": i})).collect());
        let batch = WriteBatch {
            table: "facts",
            columns: &columns,
            rows: &data,
            mode: WriteMode::Insert,
        };

        let statements = write_statements(&SqlFlavor::native(Dialect::Sqlserver), &batch).unwrap();
        assert_eq!(statements.len(), 3);
        assert!(statements.iter().all(|s| s.params.len() <= 2_000));
        assert_eq!(statements.iter().map(|s| s.params.len()).sum::<usize>(), 4_800);

        let oracle = write_statements(&SqlFlavor::native(Dialect::Oracle), &batch).unwrap();
        assert!(oracle[0].sql.starts_with("INSERT ALL INTO \"facts\""));
        assert!(oracle[0].sql.ends_with("SELECT 1 FROM DUAL"));
    }
}
