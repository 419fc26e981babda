//! Terminal rendering of run logs and row sets

use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde_json::Value;
use sluice_engine::run_log::{LogEntry, RunLog, StageStatus};
use sluice_engine::working_set::{columns_of, Row};

/// Truncate string to max length with ellipsis
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn status_label(status: StageStatus) -> String {
    match status {
        StageStatus::Success => status.as_str().green().to_string(),
        StageStatus::Partial => status.as_str().yellow().to_string(),
        StageStatus::Error => status.as_str().red().to_string(),
    }
}

/// Cell text for one JSON value; strings are shown unquoted
pub fn cell(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => truncate_string(s, 40),
        other => truncate_string(&other.to_string(), 40),
    }
}

/// Stage-by-stage table of a run log
pub fn log_table(log: &RunLog) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Stage", "Table", "Status", "Rows", "Errors"]);

    let stages: [(&str, &[LogEntry]); 3] = [
        ("extract", &log.extract_log),
        ("transform", &log.transform_log),
        ("load", &log.load_log),
    ];
    for (stage, entries) in stages {
        for entry in entries {
            table.add_row(vec![
                stage.to_string(),
                entry.name.clone(),
                status_label(entry.status),
                entry.count.to_string(),
                entry.errors.join("\n"),
            ]);
        }
    }
    table
}

pub fn print_log(log: &RunLog) {
    println!();
    println!("{}", log_table(log));
    let elapsed = log.end_time - log.start_time;
    if log.error_count() == 0 {
        println!("{} ({} ms)", log.message.green().bold(), elapsed);
    } else {
        println!("{} ({} ms)", log.message.yellow().bold(), elapsed);
    }
}

/// Rows as a table, columns in first-seen order
pub fn rows_table(rows: &[Row]) -> Table {
    let columns = columns_of(rows);
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(columns.clone());

    for row in rows {
        table.add_row(
            columns
                .iter()
                .map(|c| row.get(c).map(cell).unwrap_or_default())
                .collect::<Vec<_>>(),
        );
    }
    table
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use sluice_engine::run_log::Stage;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("a much longer value", 10), "a much ...");
    }

    #[test]
    fn test_cell() {
        assert_eq!(cell(&json!(null)), "-");
        assert_eq!(cell(&json!("paid")), "paid");
        assert_eq!(cell(&json!(12.5)), "12.5");
    }

    #[test]
    fn test_log_table_lists_every_entry() {
        let mut log = RunLog::starting_at(0);
        log.push(Stage::Extract, LogEntry::new(Stage::Extract, "orders", 3, &[]));
        log.push(Stage::Load, LogEntry::new(Stage::Load, "orders_copy", 3, &[]));

        let rendered = log_table(&log).to_string();
        assert!(rendered.contains("orders_copy"));
        assert!(rendered.contains("extract"));
    }

    #[test]
    fn test_rows_table_fills_missing_cells() {
        let rows: Vec<Row> =
            serde_json::from_value(json!([{"id": 1, "name": "Ada"}, {"id": 2}])).unwrap();
        let rendered = rows_table(&rows).to_string();
        assert!(rendered.contains("Ada"));
        assert!(rendered.contains("name"));
    }
}
