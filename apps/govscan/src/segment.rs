//! Tokenizer / segmenter.
//!
//! Splits a classified file into units that issues and rewrites address:
//! - script: one unit per line (terminator excluded)
//! - notebook: one unit per cell; header and `COMMAND` separator lines
//!   belong to no cell, so a cell can be replaced without touching siblings
//! - sql: one unit per statement, split on `;` outside literals/comments
//! - other: a single unit spanning the whole file
//!
//! Segmentation is pure and total: any text yields a unit sequence.

use crate::models::{ByteRange, ContentType, Dialect, Unit};
use crate::walk::SourceFile;

const NOTEBOOK_HEADER: &str = "Databricks notebook source";
const CELL_SEPARATOR: &str = "COMMAND ----------";
const NOTEBOOK_PREFIXES: [&str; 3] = ["#", "--", "//"];

/// Comment prefix of a notebook document (`#`, `--`, `//`), if `text`
/// starts with the notebook header line.
pub fn notebook_comment_prefix(text: &str) -> Option<&'static str> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let first = text.lines().next()?.trim();
    NOTEBOOK_PREFIXES.into_iter().find(|prefix| {
        first
            .strip_prefix(prefix)
            .map(|rest| rest.trim() == NOTEBOOK_HEADER)
            .unwrap_or(false)
    })
}

pub fn segment(file: &SourceFile) -> Vec<Unit> {
    segment_text(&file.rel_path, file.content_type, &file.text)
}

/// Segment raw text for the given content type.
pub fn segment_text(file_path: &str, content_type: ContentType, text: &str) -> Vec<Unit> {
    match content_type {
        ContentType::Script => segment_lines(file_path, text),
        ContentType::Notebook => segment_cells(file_path, text),
        ContentType::Sql => segment_statements(file_path, text),
        ContentType::Other => vec![Unit {
            file_path: file_path.to_string(),
            unit_index: 0,
            byte_range: ByteRange::new(0, text.len()),
            line: 1,
            content_type,
            dialect: Dialect::Code,
            magic_prefix: None,
            text: text.to_string(),
        }],
    }
}

/// Find the unit that fully contains `range`.
pub fn unit_containing<'a>(units: &'a [Unit], range: &ByteRange) -> Option<&'a Unit> {
    units.iter().find(|u| u.byte_range.contains(range))
}

/// Lines with their byte offset and 1-based line number.
fn lines_with_offsets(text: &str) -> impl Iterator<Item = (usize, usize, &str, &str)> {
    let mut offset = 0;
    text.split_inclusive('\n')
        .enumerate()
        .map(move |(idx, piece)| {
            let start = offset;
            offset += piece.len();
            let content = piece.trim_end_matches('\n').trim_end_matches('\r');
            (start, idx + 1, content, piece)
        })
}

fn segment_lines(file_path: &str, text: &str) -> Vec<Unit> {
    lines_with_offsets(text)
        .map(|(start, line, content, _)| Unit {
            file_path: file_path.to_string(),
            unit_index: line - 1,
            byte_range: ByteRange::new(start, start + content.len()),
            line,
            content_type: ContentType::Script,
            dialect: Dialect::Code,
            magic_prefix: None,
            text: content.to_string(),
        })
        .collect()
}

fn segment_cells(file_path: &str, text: &str) -> Vec<Unit> {
    let prefix = notebook_comment_prefix(text).unwrap_or("#");
    let magic = magic_prefix(prefix);
    let default_dialect = if prefix == "--" {
        Dialect::Sql
    } else {
        Dialect::Code
    };
    let mut units = Vec::new();
    let mut cell_start = 0;
    let mut cell_line = 1;
    let push_cell = |units: &mut Vec<Unit>, start: usize, end: usize, line: usize| {
        let body = &text[start..end];
        let dialect = match cell_magic(body, magic) {
            Some("sql") => Dialect::Sql,
            Some("python" | "scala" | "r") => Dialect::Code,
            Some(_) => Dialect::Text,
            None => default_dialect,
        };
        units.push(Unit {
            file_path: file_path.to_string(),
            unit_index: units.len(),
            byte_range: ByteRange::new(start, end),
            line,
            content_type: ContentType::Notebook,
            dialect,
            magic_prefix: Some(magic),
            text: body.to_string(),
        });
    };
    for (start, line, content, piece) in lines_with_offsets(text) {
        let trimmed = content.trim_start_matches('\u{feff}').trim();
        if line == 1 && trimmed.strip_prefix(prefix).map(str::trim) == Some(NOTEBOOK_HEADER) {
            cell_start = start + piece.len();
            cell_line = 2;
            continue;
        }
        if trimmed.strip_prefix(prefix).map(str::trim) == Some(CELL_SEPARATOR) {
            push_cell(&mut units, cell_start, start, cell_line);
            cell_start = start + piece.len();
            cell_line = line + 1;
        }
    }
    push_cell(&mut units, cell_start, text.len(), cell_line);
    units
}

/// Prefix of magic lines in a notebook whose comment prefix is `comment`.
pub fn magic_prefix(comment: &str) -> &'static str {
    match comment {
        "--" => "-- MAGIC",
        "//" => "// MAGIC",
        _ => "# MAGIC",
    }
}

/// Magic command (`sql`, `md`, `sh`, ...) opening a cell, if any.
pub fn cell_magic<'a>(body: &'a str, magic_prefix: &str) -> Option<&'a str> {
    let first = body.lines().map(str::trim).find(|l| !l.is_empty())?;
    let command = first.strip_prefix(magic_prefix)?.trim_start().strip_prefix('%')?;
    Some(command.split_whitespace().next().unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlState {
    Normal,
    InSingleQuote,
    InDoubleQuote,
    InLineComment,
    InBlockComment,
}

/// Raw statement ranges: split on `;` that is not inside a string literal
/// or a comment. Ranges exclude the terminator and are not trimmed.
pub fn split_sql_statements(text: &str) -> Vec<ByteRange> {
    let bytes = text.as_bytes();
    let mut ranges = Vec::new();
    let mut state = SqlState::Normal;
    let mut stmt_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            SqlState::Normal => match b {
                b'\'' => state = SqlState::InSingleQuote,
                b'"' => state = SqlState::InDoubleQuote,
                b'-' if next == Some(b'-') => {
                    state = SqlState::InLineComment;
                    i += 1;
                }
                b'/' if next == Some(b'*') => {
                    state = SqlState::InBlockComment;
                    i += 1;
                }
                b';' => {
                    ranges.push(ByteRange::new(stmt_start, i));
                    stmt_start = i + 1;
                }
                _ => {}
            },
            SqlState::InSingleQuote | SqlState::InDoubleQuote => {
                let quote = if state == SqlState::InSingleQuote {
                    b'\''
                } else {
                    b'"'
                };
                if b == b'\\' {
                    i += 1;
                } else if b == quote {
                    state = SqlState::Normal;
                }
            }
            SqlState::InLineComment => {
                if b == b'\n' {
                    state = SqlState::Normal;
                }
            }
            SqlState::InBlockComment => {
                if b == b'*' && next == Some(b'/') {
                    state = SqlState::Normal;
                    i += 1;
                }
            }
        }
        i += 1;
    }
    if stmt_start < bytes.len() {
        ranges.push(ByteRange::new(stmt_start, bytes.len()));
    }
    ranges
}

fn segment_statements(file_path: &str, text: &str) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut line = 1;
    let mut counted_to = 0;
    for raw in split_sql_statements(text) {
        let slice = &text[raw.start..raw.end];
        let lead = slice.len() - slice.trim_start().len();
        let body = slice.trim();
        if body.is_empty() {
            continue;
        }
        let start = raw.start + lead;
        line += text[counted_to..start].matches('\n').count();
        counted_to = start;
        units.push(Unit {
            file_path: file_path.to_string(),
            unit_index: units.len(),
            byte_range: ByteRange::new(start, start + body.len()),
            line,
            content_type: ContentType::Sql,
            dialect: Dialect::Sql,
            magic_prefix: None,
            text: body.to_string(),
        });
    }
    units
}
