//! Transform step implementations
//!
//! Every step takes the current rows by value and returns the new rows. A
//! step error fails the whole destination table.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use serde_json::Value;
use sluice_common::time::{self, TimeFormat};

use super::formula::Formula;
use crate::error::{EtlError, Result};
use crate::value::{self, as_number, key_text, loose_cmp, loose_eq};
use crate::working_set::{resolve_path, Row, TablePath, WorkingSet};

/// Replace `column` with its entry in `mapping`; unmapped values become null
pub fn map(rows: Vec<Row>, column: &str, mapping: &serde_json::Map<String, Value>) -> Vec<Row> {
    rows.into_iter()
        .map(|mut row| {
            let key = key_text(row.get(column).unwrap_or(&Value::Null));
            let mapped = mapping.get(&key).cloned().unwrap_or(Value::Null);
            row.insert(column.to_string(), mapped);
            row
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Outer,
}

impl FromStr for JoinKind {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inner" => Ok(JoinKind::Inner),
            "left" => Ok(JoinKind::Left),
            "right" => Ok(JoinKind::Right),
            "outer" => Ok(JoinKind::Outer),
            other => Err(EtlError::UnsupportedJoinKind(other.to_string())),
        }
    }
}

impl JoinKind {
    fn keeps_left(self) -> bool {
        matches!(self, JoinKind::Left | JoinKind::Outer)
    }

    fn keeps_right(self) -> bool {
        matches!(self, JoinKind::Right | JoinKind::Outer)
    }
}

/// Typed join key; `1` and `"1"` do not match
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum JoinKey {
    Text(String),
    Number(u64),
    Bool(bool),
}

impl JoinKey {
    /// Null, missing and structured values never match anything
    fn of(row: &Row, column: &str) -> Option<Self> {
        match row.get(column)? {
            Value::String(s) => Some(JoinKey::Text(s.clone())),
            Value::Number(n) => n.as_f64().map(|f| JoinKey::Number((f + 0.0).to_bits())),
            Value::Bool(b) => Some(JoinKey::Bool(*b)),
            _ => None,
        }
    }
}

/// Left row extended with the right row; right keys already present are
/// stored as `right_<key>`
fn merge(left: &Row, right: &Row) -> Row {
    let mut merged = left.clone();
    for (key, value) in right {
        if left.contains_key(key) {
            merged.insert(format!("right_{}", key), value.clone());
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Join the row sets at `left` and `right`, each `scope.table.column`
///
/// The result replaces the current rows. Matched pairs come in left order,
/// followed by unmatched right rows for right and outer joins.
pub fn join(working_set: &WorkingSet, left: &str, right: &str, join_type: &str) -> Result<Vec<Row>> {
    let kind: JoinKind = join_type.parse()?;
    let left_key = join_column(left)?;
    let right_key = join_column(right)?;
    let left_rows = resolve_path(working_set, left)?;
    let right_rows = resolve_path(working_set, right)?;

    let mut index: HashMap<JoinKey, Vec<usize>> = HashMap::new();
    for (i, row) in right_rows.iter().enumerate() {
        if let Some(key) = JoinKey::of(row, &right_key) {
            index.entry(key).or_default().push(i);
        }
    }

    let mut result = Vec::new();
    let mut matched_right: HashSet<usize> = HashSet::new();

    for left_row in left_rows {
        let matches = JoinKey::of(left_row, &left_key)
            .and_then(|key| index.get(&key))
            .map(Vec::as_slice)
            .unwrap_or_default();

        if matches.is_empty() {
            if kind.keeps_left() {
                result.push(left_row.clone());
            }
            continue;
        }
        for &i in matches {
            result.push(merge(left_row, &right_rows[i]));
            matched_right.insert(i);
        }
    }

    if kind.keeps_right() {
        result.extend(
            right_rows
                .iter()
                .enumerate()
                .filter(|(i, _)| !matched_right.contains(i))
                .map(|(_, row)| row.clone()),
        );
    }

    Ok(result)
}

fn join_column(path: &str) -> Result<String> {
    let parsed: TablePath = path.parse()?;
    parsed.column.ok_or_else(|| EtlError::InvalidPath {
        path: path.to_string(),
        message: "join paths must be scope.table.column".into(),
    })
}

/// Keep rows whose `column` compares true against `value`
pub fn filter(rows: Vec<Row>, column: &str, operator: &str, value: &Value) -> Result<Vec<Row>> {
    let test: fn(&Value, &Value) -> bool = match operator {
        "==" => |a, b| loose_eq(a, b),
        "!=" => |a, b| !loose_eq(a, b),
        ">" => |a, b| loose_cmp(a, b).map_or(false, |o| o.is_gt()),
        "<" => |a, b| loose_cmp(a, b).map_or(false, |o| o.is_lt()),
        ">=" => |a, b| loose_cmp(a, b).map_or(false, |o| o.is_ge()),
        "<=" => |a, b| loose_cmp(a, b).map_or(false, |o| o.is_le()),
        other => return Err(EtlError::UnsupportedOperator(other.to_string())),
    };

    Ok(rows
        .into_iter()
        .filter(|row| test(row.get(column).unwrap_or(&Value::Null), value))
        .collect())
}

/// Move `from` to `to`; fails before touching any row if `to` already exists
pub fn rename(rows: Vec<Row>, from: &str, to: &str) -> Result<Vec<Row>> {
    if from == to {
        return Ok(rows);
    }
    if rows.iter().any(|row| row.contains_key(to)) {
        return Err(EtlError::Step(format!("column '{}' already exists", to)));
    }

    Ok(rows
        .into_iter()
        .map(|mut row| {
            let value = row.remove(from).unwrap_or(Value::Null);
            row.insert(to.to_string(), value);
            row
        })
        .collect())
}

/// Evaluate `expression` per row into `output`
pub fn formula(rows: Vec<Row>, expression: &str, output: &str) -> Result<Vec<Row>> {
    let formula = Formula::parse(expression)?;
    rows.into_iter()
        .map(|mut row| {
            let value = formula.evaluate(&row)?;
            row.insert(output.to_string(), value);
            Ok(row)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Count,
    Avg,
    Max,
    Min,
}

impl FromStr for Aggregation {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(Aggregation::Sum),
            "count" => Ok(Aggregation::Count),
            "avg" => Ok(Aggregation::Avg),
            "max" => Ok(Aggregation::Max),
            "min" => Ok(Aggregation::Min),
            other => Err(EtlError::Step(format!(
                "unsupported aggregate operation '{}' (expected sum, count, avg, max or min)",
                other
            ))),
        }
    }
}

impl Aggregation {
    fn reduce(self, values: &[f64]) -> f64 {
        match self {
            Aggregation::Sum => values.iter().sum(),
            Aggregation::Count => values.len() as f64,
            Aggregation::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }
}

/// One row per distinct `group_by` value, in first-seen order
///
/// Each output row is the group's first row plus `output`. Values of
/// `target` that are missing or not numeric count as zero.
pub fn aggregate(
    rows: Vec<Row>,
    operation: &str,
    target: &str,
    group_by: &str,
    output: &str,
) -> Result<Vec<Row>> {
    let operation: Aggregation = operation.parse()?;

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Row, Vec<f64>)> = HashMap::new();
    for row in rows {
        let key = key_text(row.get(group_by).unwrap_or(&Value::Null));
        let number = row.get(target).and_then(as_number).unwrap_or(0.0);
        match groups.get_mut(&key) {
            Some((_, values)) => values.push(number),
            None => {
                order.push(key.clone());
                groups.insert(key, (row, vec![number]));
            },
        }
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .map(|(mut first, values)| {
            let result = value::number(operation.reduce(&values)).ok_or_else(|| {
                EtlError::Step(format!("{} of '{}' is not a finite number", output, target))
            })?;
            first.insert(output.to_string(), result);
            Ok(first)
        })
        .collect()
}

/// Convert time columns between representations; null and missing cells are skipped
pub fn time_format(
    rows: Vec<Row>,
    columns: &[String],
    old_format: Option<&str>,
    new_format: &str,
) -> Result<Vec<Row>> {
    let target: TimeFormat = new_format.parse()?;
    let source: Option<TimeFormat> = old_format.map(str::parse::<TimeFormat>).transpose()?;

    rows.into_iter()
        .map(|mut row| {
            for column in columns {
                let Some(cell) = row.get(column).filter(|v| !v.is_null()) else {
                    continue;
                };
                let from = match source {
                    Some(format) => format,
                    None => time::detect(cell)?,
                };
                let converted = time::convert(cell, from, target)?;
                row.insert(column.clone(), converted);
            }
            Ok(row)
        })
        .collect()
}
