//! Small shared helpers for terminal output.

use owo_colors::OwoColorize;

/// Colors are used for human output unless `NO_COLOR` is set.
pub fn use_colors(output: &str) -> bool {
    output == "human" && std::env::var_os("NO_COLOR").is_none()
}

fn prefix(label: &str, paint: fn(&str) -> String) -> String {
    if std::env::var_os("NO_COLOR").is_none() {
        paint(label)
    } else {
        label.to_string()
    }
}

pub fn error_prefix() -> String {
    prefix("error:", |s| s.red().bold().to_string())
}

pub fn note_prefix() -> String {
    prefix("note:", |s| s.yellow().bold().to_string())
}

pub fn info_prefix() -> String {
    prefix("info:", |s| s.cyan().bold().to_string())
}

/// Parse a `scan` operand: `path` or `id=path`.
pub fn split_repo_arg(arg: &str) -> (Option<&str>, &str) {
    match arg.split_once('=') {
        Some((id, path)) if !id.is_empty() && !path.is_empty() => (Some(id), path),
        _ => (None, arg),
    }
}
