//! Report exporter: one CSV row per issue, in report order.

use crate::models::MergedReport;

/// Column order of the tabular export.
pub const CSV_COLUMNS: [&str; 7] = [
    "repository",
    "file_path",
    "unit_index",
    "severity",
    "rule_id",
    "message",
    "remediation_available",
];

/// Longer fields are cut and suffixed with `...`.
pub const MAX_FIELD_CHARS: usize = 10_000;

pub fn to_csv(report: &MergedReport) -> String {
    let mut out = String::new();
    push_row(&mut out, CSV_COLUMNS.iter().map(|c| c.to_string()));
    for row in &report.issues {
        let issue = &row.issue;
        push_row(
            &mut out,
            [
                row.repository_id.clone(),
                issue.file_path.clone(),
                issue.unit_index.to_string(),
                issue.severity.to_string(),
                issue.rule_id.clone(),
                issue.message.clone(),
                issue.remediation_available.to_string(),
            ],
        );
    }
    out
}

fn push_row(out: &mut String, fields: impl IntoIterator<Item = String>) {
    let mut first = true;
    for field in fields {
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(&quote(&truncate(field)));
    }
    out.push_str("\r\n");
}

fn truncate(field: String) -> String {
    if field.chars().count() <= MAX_FIELD_CHARS {
        return field;
    }
    let mut cut: String = field.chars().take(MAX_FIELD_CHARS).collect();
    cut.push_str("...");
    cut
}

/// RFC 4180 quoting: only when needed, with doubled inner quotes.
fn quote(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
