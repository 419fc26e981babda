//! Per-run row store shared by the transform steps

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::error::{EtlError, Result};

/// A row is an ordered map of column name to value
pub type Row = serde_json::Map<String, Value>;

/// Named row sets
pub type Tables = BTreeMap<String, Vec<Row>>;

/// Extracted (`src`) and transformed (`dst`) tables of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkingSet {
    pub src: Tables,
    pub dst: Tables,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Src,
    Dst,
}

/// Parsed `scope.table[.column]` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePath {
    pub scope: Scope,
    pub table: String,
    pub column: Option<String>,
}

impl FromStr for TablePath {
    type Err = EtlError;

    fn from_str(path: &str) -> Result<Self> {
        let invalid = |message: &str| EtlError::InvalidPath {
            path: path.to_string(),
            message: message.to_string(),
        };

        let parts: Vec<&str> = path.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(invalid("expected scope.table or scope.table.column"));
        }
        if parts.iter().any(|part| part.trim().is_empty()) {
            return Err(invalid("empty path segment"));
        }

        let scope = match parts[0] {
            "src" => Scope::Src,
            "dst" => Scope::Dst,
            other => {
                return Err(invalid(&format!(
                    "invalid scope '{}' (expected 'src' or 'dst')",
                    other
                )))
            },
        };

        Ok(Self {
            scope,
            table: parts[1].to_string(),
            column: parts.get(2).map(|c| c.to_string()),
        })
    }
}

impl WorkingSet {
    pub fn tables(&self, scope: Scope) -> &Tables {
        match scope {
            Scope::Src => &self.src,
            Scope::Dst => &self.dst,
        }
    }
}

/// Rows of the table a path points at
///
/// A trailing column segment is accepted and ignored; it only matters to
/// callers that need a key, such as joins.
pub fn resolve_path<'a>(working_set: &'a WorkingSet, path: &str) -> Result<&'a [Row]> {
    let parsed: TablePath = path.parse()?;
    working_set
        .tables(parsed.scope)
        .get(&parsed.table)
        .map(Vec::as_slice)
        .ok_or_else(|| EtlError::InvalidPath {
            path: path.to_string(),
            message: format!("table '{}' is not in the working set", parsed.table),
        })
}

/// Keep only `columns` in each row, in column order
///
/// Requested columns a row does not have stay absent. An empty column list
/// leaves rows untouched.
pub fn project(rows: Vec<Row>, columns: &[String]) -> Vec<Row> {
    if columns.is_empty() {
        return rows;
    }
    rows.into_iter()
        .map(|mut row| {
            columns
                .iter()
                .filter_map(|column| row.remove(column).map(|value| (column.clone(), value)))
                .collect()
        })
        .collect()
}

/// Union of column names over `rows`, in first-seen order
pub fn columns_of(rows: &[Row]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}
