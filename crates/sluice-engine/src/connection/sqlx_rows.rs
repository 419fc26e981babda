//! Helpers shared by the sqlx-backed connections

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use sqlx::query::Query;
use sqlx::{Column, ColumnIndex, Database, Encode, Row as _, Type, TypeInfo, ValueRef};

use super::sql::{SqlParam, Statement};
use crate::error::{EtlError, Result};
use crate::working_set::Row;

pub(super) const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub(super) const DATE_FORMAT: &str = "%Y-%m-%d";

/// Build a query for `statement` with every parameter bound
pub(super) fn prepare<'q, DB>(statement: &'q Statement) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    String: Encode<'q, DB> + Type<DB>,
    Option<String>: Encode<'q, DB> + Type<DB>,
    NaiveDateTime: Encode<'q, DB> + Type<DB>,
    DateTime<Utc>: Encode<'q, DB> + Type<DB>,
    NaiveDate: Encode<'q, DB> + Type<DB>,
{
    statement
        .params
        .iter()
        .fold(sqlx::query(&statement.sql), |query, param| match param {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Bool(b) => query.bind(*b),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Float(f) => query.bind(*f),
            SqlParam::Text(s) => query.bind(s.clone()),
            SqlParam::Timestamp(t) => query.bind(*t),
            SqlParam::TimestampUtc(t) => query.bind(*t),
            SqlParam::Date(d) => query.bind(*d),
        })
}

/// Convert driver rows to JSON rows, asking `cell` for each non-null value
///
/// A column `cell` cannot decode fails the whole result instead of being
/// read as null.
pub(super) fn decode_rows<R>(rows: &[R], cell: impl Fn(&R, usize) -> Option<Value>) -> Result<Vec<Row>>
where
    R: sqlx::Row,
    usize: ColumnIndex<R>,
{
    rows.iter()
        .map(|row| {
            row.columns()
                .iter()
                .enumerate()
                .map(|(index, column)| {
                    let is_null = row
                        .try_get_raw(index)
                        .map(|raw| raw.is_null())
                        .unwrap_or(true);
                    let value = if is_null {
                        Value::Null
                    } else {
                        cell(row, index).ok_or_else(|| {
                            unsupported_column(column.name(), column.type_info().name())
                        })?
                    };
                    Ok((column.name().to_string(), value))
                })
                .collect()
        })
        .collect()
}

pub(super) fn unsupported_column(column: &str, type_name: &str) -> EtlError {
    EtlError::Query(format!(
        "column '{}' has unsupported type {}; cast it in the source query",
        column, type_name
    ))
}

/// Lowercase hex with a `\x` prefix, the way Postgres prints binary values
pub(super) fn hex_text(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(2 + bytes.len() * 2);
    text.push_str("\\x");
    for byte in bytes {
        text.push_str(&format!("{:02x}", byte));
    }
    text
}

/// First column of every row as text
pub(super) fn first_column_text(rows: Vec<Row>) -> Vec<String> {
    rows.into_iter()
        .filter_map(|row| row.into_iter().next().map(|(_, v)| v))
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .collect()
}
