use std::borrow::Cow;
use std::fmt::Write as _;

use crate::batch::{BatchSummary, FileOutcome};

const SUMMARY_HEADERS: [&str; 6] = ["file", "table", "status", "rows", "attempts", "detail"];

/// Renders one line per file: where it went, how many rows, and how many attempts.
pub fn render_summary(summary: &BatchSummary) -> String {
    let headers = SUMMARY_HEADERS.map(str::to_string);
    let rows = summary
        .outcomes
        .iter()
        .map(|outcome| {
            let file = outcome
                .file()
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            match outcome {
                FileOutcome::Loaded(report) => vec![
                    file,
                    report.table.clone(),
                    "loaded".to_string(),
                    report.rows.to_string(),
                    report.attempts.to_string(),
                    if report.overrides.is_empty() {
                        report.encoding.clone()
                    } else {
                        format!("{} {}", report.encoding, report.overrides)
                    },
                ],
                FileOutcome::Failed { error, .. } => vec![
                    file,
                    String::new(),
                    "failed".to_string(),
                    String::new(),
                    String::new(),
                    error.clone(),
                ],
            }
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| h.chars().count()).collect::<Vec<_>>();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(sanitize_cell(cell).chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let separator = widths
        .iter()
        .map(|w| "-".repeat((*w).max(3)))
        .collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let cell = sanitize_cell(value);
            let padding = width.saturating_sub(cell.chars().count());
            format!("{cell}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    while line.ends_with(' ') {
        line.pop();
    }
    line
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
