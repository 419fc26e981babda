//! Filter compiler
//!
//! Turns declarative [`FilterGroup`]s into a dialect-neutral [`Predicate`].
//! SQL connections render the predicate to a parameterized `WHERE` clause,
//! the document store renders it to a filter document, and the in-memory
//! connector evaluates it directly with [`Predicate::matches`].
//!
//! Columns inside one group are OR'd; groups are AND'd. Dynamic values are
//! resolved against the run's watermark before anything is rendered.

use std::str::FromStr;

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::error::{EtlError, Result};
use crate::pipeline::{Dialect, FilterGroup, FilterValue};
use crate::value::{loose_cmp, loose_eq};
use crate::working_set::Row;

/// Operator names accepted in filter groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    In,
    NotIn,
    Between,
    NotBetween,
    Is,
    Not,
}

impl FromStr for Operator {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "eq" => Operator::Eq,
            "ne" => Operator::Ne,
            "gt" => Operator::Gt,
            "gte" => Operator::Gte,
            "lt" => Operator::Lt,
            "lte" => Operator::Lte,
            "like" => Operator::Like,
            "notLike" | "not_like" => Operator::NotLike,
            "in" => Operator::In,
            "notIn" | "not_in" => Operator::NotIn,
            "between" => Operator::Between,
            "notBetween" | "not_between" => Operator::NotBetween,
            "is" => Operator::Is,
            "not" => Operator::Not,
            other => return Err(EtlError::UnsupportedOperator(other.to_string())),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

/// Test applied to a single column
#[derive(Debug, Clone, PartialEq)]
pub enum Test {
    /// `from_watermark` marks a value resolved from the run's watermark
    Compare {
        op: CompareOp,
        value: Value,
        from_watermark: bool,
    },
    Null { negated: bool },
    Bool { value: bool, negated: bool },
    Like {
        pattern: String,
        negated: bool,
        case_insensitive: bool,
        matcher: LikeMatcher,
    },
    In { values: Vec<Value>, negated: bool },
    Between { low: Value, high: Value, negated: bool },
}

/// A `LIKE` pattern compiled for in-memory evaluation
#[derive(Debug, Clone)]
pub struct LikeMatcher(Regex);

impl LikeMatcher {
    pub fn new(pattern: &str, case_insensitive: bool) -> Result<Self> {
        RegexBuilder::new(&like_to_regex(pattern))
            .case_insensitive(case_insensitive)
            .dot_matches_new_line(true)
            .build()
            .map(LikeMatcher)
            .map_err(|e| EtlError::Config(format!("invalid LIKE pattern '{}': {}", pattern, e)))
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for LikeMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Column { column: String, test: Test },
}

/// Compile filter groups into one predicate
///
/// Returns `None` when there are no groups, meaning "select everything".
pub fn compile(
    groups: &[FilterGroup],
    watermark: Option<i64>,
    dialect: Dialect,
) -> Result<Option<Predicate>> {
    let mut compiled = groups
        .iter()
        .map(|group| compile_group(group, watermark, dialect))
        .collect::<Result<Vec<_>>>()?;

    Ok(match compiled.len() {
        0 => None,
        1 => compiled.pop(),
        _ => Some(Predicate::All(compiled)),
    })
}

fn compile_group(group: &FilterGroup, watermark: Option<i64>, dialect: Dialect) -> Result<Predicate> {
    let operator: Operator = group.operator.parse()?;
    if group.columns.is_empty() {
        return Err(EtlError::Config(format!(
            "filter '{}' names no columns",
            group.operator
        )));
    }

    let value = group.value.resolve(watermark)?;
    let from_watermark = matches!(group.value, FilterValue::Dynamic(_));
    let test = build_test(operator, &group.operator, value, from_watermark, dialect)?;

    let mut tests: Vec<Predicate> = group
        .columns
        .iter()
        .map(|column| Predicate::Column {
            column: column.clone(),
            test: test.clone(),
        })
        .collect();

    Ok(if tests.len() == 1 {
        tests.remove(0)
    } else {
        Predicate::Any(tests)
    })
}

fn build_test(
    operator: Operator,
    name: &str,
    value: Value,
    from_watermark: bool,
    dialect: Dialect,
) -> Result<Test> {
    let shape = |expected: &str| {
        EtlError::Config(format!("operator '{}' expects {}", name, expected))
    };

    let compare = |op: CompareOp, value: Value| -> Result<Test> {
        if value.is_null() {
            return Err(shape("a non-null value"));
        }
        Ok(Test::Compare {
            op,
            value,
            from_watermark,
        })
    };

    match operator {
        Operator::Eq if value.is_null() => Ok(Test::Null { negated: false }),
        Operator::Ne if value.is_null() => Ok(Test::Null { negated: true }),
        Operator::Eq => compare(CompareOp::Eq, value),
        Operator::Ne => compare(CompareOp::Ne, value),
        Operator::Gt => compare(CompareOp::Gt, value),
        Operator::Gte => compare(CompareOp::Gte, value),
        Operator::Lt => compare(CompareOp::Lt, value),
        Operator::Lte => compare(CompareOp::Lte, value),
        Operator::Like | Operator::NotLike => match value {
            Value::String(pattern) => {
                let case_insensitive = dialect == Dialect::Postgres;
                Ok(Test::Like {
                    matcher: LikeMatcher::new(&pattern, case_insensitive)?,
                    pattern,
                    negated: operator == Operator::NotLike,
                    case_insensitive,
                })
            },
            _ => Err(shape("a string pattern")),
        },
        Operator::In | Operator::NotIn => match value {
            Value::Array(values) => Ok(Test::In {
                values,
                negated: operator == Operator::NotIn,
            }),
            _ => Err(shape("an array")),
        },
        Operator::Between | Operator::NotBetween => match value {
            Value::Array(mut bounds) if bounds.len() == 2 => {
                let high = bounds.pop().unwrap_or(Value::Null);
                let low = bounds.pop().unwrap_or(Value::Null);
                Ok(Test::Between {
                    low,
                    high,
                    negated: operator == Operator::NotBetween,
                })
            },
            _ => Err(shape("an array of exactly two bounds")),
        },
        Operator::Is | Operator::Not => {
            let negated = operator == Operator::Not;
            match value {
                Value::Null => Ok(Test::Null { negated }),
                Value::Bool(value) => Ok(Test::Bool { value, negated }),
                _ => Err(shape("null, true or false")),
            }
        },
    }
}

/// Anchored regular expression equivalent to a SQL `LIKE` pattern
pub fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            other => regex.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    regex.push('$');
    regex
}

impl Predicate {
    /// Evaluate against a row; a missing column reads as null
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Predicate::All(parts) => parts.iter().all(|p| p.matches(row)),
            Predicate::Any(parts) => parts.iter().any(|p| p.matches(row)),
            Predicate::Column { column, test } => {
                test.matches(row.get(column).unwrap_or(&Value::Null))
            },
        }
    }
}

impl Test {
    fn matches(&self, cell: &Value) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};

        match self {
            Test::Compare { op, value, .. } => match op {
                CompareOp::Eq => loose_eq(cell, value),
                CompareOp::Ne => !cell.is_null() && !loose_eq(cell, value),
                CompareOp::Gt => loose_cmp(cell, value) == Some(Greater),
                CompareOp::Gte => matches!(loose_cmp(cell, value), Some(Greater | Equal)),
                CompareOp::Lt => loose_cmp(cell, value) == Some(Less),
                CompareOp::Lte => matches!(loose_cmp(cell, value), Some(Less | Equal)),
            },
            Test::Null { negated } => cell.is_null() != *negated,
            Test::Bool { value, negated } => {
                let is = match cell {
                    Value::Bool(b) => b == value,
                    Value::Number(n) => n.as_f64() == Some(if *value { 1.0 } else { 0.0 }),
                    _ => false,
                };
                is != *negated
            },
            Test::Like {
                negated, matcher, ..
            } => {
                let Value::String(text) = cell else {
                    return false;
                };
                matcher.is_match(text) != *negated
            },
            Test::In { values, negated } => {
                if cell.is_null() {
                    return false;
                }
                values.iter().any(|v| loose_eq(cell, v)) != *negated
            },
            Test::Between { low, high, negated } => {
                let inside = matches!(loose_cmp(cell, low), Some(Greater | Equal))
                    && matches!(loose_cmp(cell, high), Some(Less | Equal));
                if cell.is_null() {
                    return false;
                }
                inside != *negated
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group(value: Value) -> FilterGroup {
        serde_json::from_value(value).unwrap()
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_no_groups_selects_everything() {
        assert_eq!(compile(&[], None, Dialect::Mysql).unwrap(), None);
    }

    #[test]
    fn test_columns_or_groups_and() {
        let groups = vec![
            group(json!({"columns": ["status", "state"], "operator": "eq", "value": "paid"})),
            group(json!({"columns": ["amount"], "operator": "gt", "value": 10})),
        ];
        let predicate = compile(&groups, None, Dialect::Mysql).unwrap().unwrap();

        assert!(predicate.matches(&row(json!({"status": "paid", "amount": 20}))));
        assert!(predicate.matches(&row(json!({"state": "paid", "amount": "11"}))));
        assert!(!predicate.matches(&row(json!({"status": "paid", "amount": 5}))));
        assert!(!predicate.matches(&row(json!({"status": "open", "amount": 50}))));
    }

    #[test]
    fn test_null_equality_becomes_null_test() {
        let eq_null = compile(
            &[group(json!({"columns": ["deleted_at"], "operator": "eq", "value": null}))],
            None,
            Dialect::Postgres,
        )
        .unwrap()
        .unwrap();

        assert_eq!(
            eq_null,
            Predicate::Column {
                column: "deleted_at".into(),
                test: Test::Null { negated: false }
            }
        );
        assert!(eq_null.matches(&row(json!({"id": 1}))));
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let err = compile(
            &[group(json!({"columns": ["a"], "operator": "regex", "value": "x"}))],
            None,
            Dialect::Mysql,
        )
        .unwrap_err();
        assert!(matches!(err, EtlError::UnsupportedOperator(op) if op == "regex"));
    }

    #[test]
    fn test_value_shapes_are_validated() {
        let bad = [
            json!({"columns": ["a"], "operator": "in", "value": 3}),
            json!({"columns": ["a"], "operator": "between", "value": [1]}),
            json!({"columns": ["a"], "operator": "is", "value": "yes"}),
            json!({"columns": ["a"], "operator": "gt", "value": null}),
            json!({"columns": [], "operator": "eq", "value": 1}),
        ];
        for value in bad {
            assert!(compile(&[group(value)], None, Dialect::Mysql).is_err());
        }
    }

    #[test]
    fn test_like_case_folding_follows_dialect() {
        let filter = [group(json!({"columns": ["name"], "operator": "like", "value": "ali%"}))];
        let alice = row(json!({"name": "ALICE"}));

        let pg = compile(&filter, None, Dialect::Postgres).unwrap().unwrap();
        let my = compile(&filter, None, Dialect::Mysql).unwrap().unwrap();
        assert!(pg.matches(&alice));
        assert!(!my.matches(&alice));
        assert_eq!(like_to_regex("a_b.%"), "^a.b\\..*$");
    }

    #[test]
    fn test_like_pattern_compiled_with_predicate() {
        let filter = [group(json!({"columns": ["sku"], "operator": "like", "value": "a.b%"}))];
        let predicate = compile(&filter, None, Dialect::Mysql).unwrap().unwrap();
        let Predicate::Column {
            test: Test::Like { matcher, .. },
            ..
        } = &predicate
        else {
            panic!("expected a LIKE test, got {:?}", predicate);
        };
        assert!(matcher.is_match("a.b-long"));
        assert!(!matcher.is_match("axb"));

        let hits = (0..1000)
            .map(|i| row(json!({"sku": if i % 2 == 0 { "a.b1" } else { "axb1" }})))
            .filter(|r| predicate.matches(r))
            .count();
        assert_eq!(hits, 500);
    }

    #[test]
    fn test_only_watermark_values_are_marked() {
        let literal = compile(
            &[group(json!({"columns": ["day"], "operator": "eq", "value": "2024-01-01"}))],
            Some(1_709_596_800_000),
            Dialect::Postgres,
        )
        .unwrap()
        .unwrap();
        assert!(matches!(
            literal,
            Predicate::Column { test: Test::Compare { from_watermark: false, .. }, .. }
        ));

        let dynamic = compile(
            &[group(json!({
                "columns": ["day"],
                "operator": "gte",
                "value": {"source": "time_threshold", "default": "2024-01-01"}
            }))],
            Some(1_709_596_800_000),
            Dialect::Postgres,
        )
        .unwrap()
        .unwrap();
        assert!(matches!(
            dynamic,
            Predicate::Column { test: Test::Compare { from_watermark: true, .. }, .. }
        ));
    }

    #[test]
    fn test_dynamic_value_uses_watermark() {
        let filter = [group(json!({
            "columns": ["updated_at"],
            "operator": "gte",
            "value": {"source": "time_threshold", "default": "2024-01-01 00:00:00"}
        }))];

        let first_run = compile(&filter, None, Dialect::Mysql).unwrap().unwrap();
        let later = compile(&filter, Some(1_709_596_800_000), Dialect::Mysql)
            .unwrap()
            .unwrap();

        let february = row(json!({"updated_at": "2024-02-01 00:00:00"}));
        assert!(first_run.matches(&february));
        assert!(!later.matches(&february));
        assert!(later.matches(&row(json!({"updated_at": "2024-03-05 00:00:00"}))));
    }

    #[test]
    fn test_in_between_and_booleans() {
        let groups = vec![
            group(json!({"columns": ["region"], "operator": "notIn", "value": ["eu", "us"]})),
            group(json!({"columns": ["score"], "operator": "between", "value": [1, 5]})),
            group(json!({"columns": ["active"], "operator": "is", "value": true})),
        ];
        let predicate = compile(&groups, None, Dialect::Sqlserver).unwrap().unwrap();

        assert!(predicate.matches(&row(json!({"region": "apac", "score": 5, "active": 1}))));
        assert!(!predicate.matches(&row(json!({"region": "eu", "score": 3, "active": true}))));
        assert!(!predicate.matches(&row(json!({"region": "apac", "score": 6, "active": true}))));
        assert!(!predicate.matches(&row(json!({"region": "apac", "score": 2, "active": false}))));
    }
}
