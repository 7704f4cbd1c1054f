//! Structural matchers.
//!
//! A small lexer turns a unit into tokens (identifiers, quoted identifiers,
//! string literals, numbers, punctuation) with comments dropped, and two
//! matchers walk the token stream:
//! - `two_level_table`: `schema.table` references in SQL contexts
//! - `mount_path`: string literals that point into `/mnt/...`
//!
//! Match ranges are byte offsets relative to the lexed text.

use crate::error::ParseError;
use crate::models::{ByteRange, ContentType, Dialect, Unit};
use crate::segment::cell_magic;
use std::collections::BTreeMap;
use std::path::Path;

const TABLE_KEYWORDS: &[&str] = &["FROM", "JOIN", "INTO", "TABLE", "UPDATE"];
const FILE_FORMATS: &[&str] = &[
    "delta",
    "parquet",
    "json",
    "csv",
    "orc",
    "avro",
    "text",
    "binaryfile",
];
const SYSTEM_SCHEMAS: &[&str] = &["global_temp", "information_schema"];
const TABLE_CALLS: &[&str] = &["table", "saveAsTable", "insertInto"];
const SQL_LEADING_WORDS: &[&str] = &[
    "SELECT", "WITH", "INSERT", "CREATE", "UPDATE", "DELETE", "MERGE", "ALTER", "DROP",
    "TRUNCATE", "REPLACE", "DESCRIBE", "OPTIMIZE", "VACUUM", "REFRESH", "CACHE", "UNCACHE",
    "MSCK", "COPY", "SHOW", "ANALYZE",
];
const MOUNT_SCHEMES: &[&str] = &["dbfs:", "/dbfs", ""];
const SLASH_COMMENT_EXTENSIONS: &[&str] = &["scala", "sc", "java", "kt", "js", "ts"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    /// Backtick-quoted identifier.
    QuotedIdent,
    Str,
    Number,
    Punct(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Full token range, quotes included.
    pub range: ByteRange,
    /// Content range, quotes excluded. Equals `range` for unquoted tokens.
    pub inner: ByteRange,
}

impl Token {
    fn simple(kind: TokenKind, start: usize, end: usize) -> Self {
        let range = ByteRange::new(start, end);
        Self {
            kind,
            range,
            inner: range,
        }
    }

    fn quoted(kind: TokenKind, start: usize, end: usize, quote_len: usize) -> Self {
        Self {
            kind,
            range: ByteRange::new(start, end),
            inner: ByteRange::new(start + quote_len, end - quote_len),
        }
    }

    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.range.start..self.range.end]
    }

    pub fn inner_text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.inner.start..self.inner.end]
    }

    fn is_keyword(&self, src: &str, kw: &str) -> bool {
        self.kind == TokenKind::Ident && self.text(src).eq_ignore_ascii_case(kw)
    }

    fn is_name_part(&self) -> bool {
        matches!(self.kind, TokenKind::Ident | TokenKind::QuotedIdent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Lexer settings for one unit.
pub struct LexOptions {
    pub dialect: Dialect,
    /// Unterminated literals and comments are errors instead of being
    /// dropped up to the end of the line.
    pub strict: bool,
    /// Treat `//` as a line comment in code.
    pub slash_comments: bool,
    /// Notebook magic prefix stripped from the start of each line.
    pub magic: Option<&'static str>,
}

impl LexOptions {
    pub fn for_unit(unit: &Unit) -> Self {
        let ext = Path::new(&unit.file_path)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let scala_cell = unit
            .magic_prefix
            .and_then(|magic| cell_magic(&unit.text, magic))
            == Some("scala");
        Self {
            dialect: unit.dialect,
            strict: unit.content_type != ContentType::Script && unit.dialect != Dialect::Text,
            slash_comments: scala_cell || SLASH_COMMENT_EXTENSIONS.contains(&ext.as_str()),
            magic: unit.magic_prefix,
        }
    }

    fn embedded_sql() -> Self {
        Self {
            dialect: Dialect::Sql,
            strict: false,
            slash_comments: false,
            magic: None,
        }
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

fn line_end(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| from + p)
        .unwrap_or(bytes.len())
}

/// Tokenize `text`. Comments and whitespace are dropped.
pub fn tokenize(text: &str, opts: LexOptions) -> Result<Vec<Token>, ParseError> {
    let bytes = text.as_bytes();
    let sql = opts.dialect == Dialect::Sql;
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut at_line_start = true;
    while i < bytes.len() {
        if at_line_start {
            at_line_start = false;
            let indent = bytes[i..]
                .iter()
                .take_while(|b| **b == b' ' || **b == b'\t')
                .count();
            if let Some(magic) = opts.magic.filter(|m| text[i + indent..].starts_with(m)) {
                i += indent + magic.len();
                if bytes.get(i) == Some(&b' ') {
                    i += 1;
                }
                continue;
            }
        }
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match b {
            b'\n' => {
                at_line_start = true;
                i += 1;
            }
            _ if b.is_ascii_whitespace() => i += 1,
            b'-' if sql && next == Some(b'-') => i = line_end(bytes, i),
            b'#' if !sql => i = line_end(bytes, i),
            b'/' if !sql && opts.slash_comments && next == Some(b'/') => i = line_end(bytes, i),
            b'/' if (sql || opts.slash_comments) && next == Some(b'*') => {
                match text[i + 2..].find("*/") {
                    Some(p) => i = i + 2 + p + 2,
                    None if opts.strict => return Err(ParseError::UnterminatedComment(i)),
                    None => i = bytes.len(),
                }
            }
            b'`' => match scan_backtick(bytes, i) {
                Some(end) => {
                    tokens.push(Token::quoted(TokenKind::QuotedIdent, i, end, 1));
                    i = end;
                }
                None if opts.strict => return Err(ParseError::UnterminatedIdentifier(i)),
                None => i = line_end(bytes, i),
            },
            b'\'' | b'"' => {
                let triple = !sql && bytes[i..].starts_with(&[b, b, b]);
                let quote_len = if triple { 3 } else { 1 };
                match scan_string(bytes, i, b, quote_len) {
                    Some(end) => {
                        tokens.push(Token::quoted(TokenKind::Str, i, end, quote_len));
                        i = end;
                    }
                    None if opts.strict => return Err(ParseError::UnterminatedString(i)),
                    None => i = line_end(bytes, i),
                }
            }
            _ if b.is_ascii_digit() => {
                let len = bytes[i..]
                    .iter()
                    .take_while(|c| c.is_ascii_alphanumeric() || **c == b'.' || **c == b'_')
                    .count();
                tokens.push(Token::simple(TokenKind::Number, i, i + len));
                i += len;
            }
            _ if is_ident_start(b) => {
                let len = bytes[i..].iter().take_while(|c| is_ident_continue(**c)).count();
                tokens.push(Token::simple(TokenKind::Ident, i, i + len));
                i += len;
            }
            _ => {
                tokens.push(Token::simple(TokenKind::Punct(b as char), i, i + 1));
                i += 1;
            }
        }
    }
    Ok(tokens)
}

/// End offset (exclusive) of a backtick identifier; doubled backticks escape.
fn scan_backtick(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'`' if bytes.get(i + 1) == Some(&b'`') => i += 2,
            b'`' => return Some(i + 1),
            b'\n' => return None,
            _ => i += 1,
        }
    }
    None
}

/// End offset (exclusive) of a string literal. Single-quoted forms may not
/// cross a newline; triple-quoted forms may.
fn scan_string(bytes: &[u8], start: usize, quote: u8, quote_len: usize) -> Option<usize> {
    let mut i = start + quote_len;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' if quote_len == 1 => return None,
            c if c == quote => {
                if quote_len == 1 {
                    return Some(i + 1);
                }
                if bytes[i..].starts_with(&[quote, quote, quote]) {
                    return Some(i + 3);
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Which structural matcher a rule uses.
pub enum StructuralKind {
    TwoLevelTable,
    MountPath {
        /// Restrict to one mount point (e.g. `/mnt/raw`).
        mount_point: Option<String>,
        /// Longer configured mount points that take precedence over this one.
        shadowed_by: Vec<String>,
    },
}

impl StructuralKind {
    pub fn from_name(name: &str, mount_point: Option<String>) -> Option<Self> {
        match name {
            "two_level_table" => Some(StructuralKind::TwoLevelTable),
            "mount_path" => Some(StructuralKind::MountPath {
                mount_point,
                shadowed_by: Vec::new(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralMatch {
    pub range: ByteRange,
    pub captures: BTreeMap<String, String>,
}

/// Run a structural matcher over an already tokenized text.
pub fn find_matches(
    kind: &StructuralKind,
    text: &str,
    tokens: &[Token],
    dialect: Dialect,
) -> Vec<StructuralMatch> {
    if dialect == Dialect::Text {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut visit = |src: &str, toks: &[Token], offset: usize, sql: bool| {
        let found = match kind {
            StructuralKind::TwoLevelTable if sql => sql_table_refs(src, toks),
            StructuralKind::TwoLevelTable => code_table_refs(src, toks),
            StructuralKind::MountPath {
                mount_point,
                shadowed_by,
            } => mount_literals(src, toks, mount_point.as_deref(), shadowed_by),
        };
        out.extend(found.into_iter().map(|mut m| {
            m.range = m.range.shift(offset);
            m
        }));
    };
    visit(text, tokens, 0, dialect == Dialect::Sql);
    if dialect == Dialect::Code {
        for tok in tokens.iter().filter(|t| t.kind == TokenKind::Str) {
            let inner = tok.inner_text(text);
            if !looks_like_sql(inner) {
                continue;
            }
            if let Ok(sub) = tokenize(inner, LexOptions::embedded_sql()) {
                visit(inner, &sub, tok.inner.start, true);
            }
        }
    }
    out.sort_by_key(|m| m.range);
    out.dedup_by(|a, b| a.range == b.range);
    out
}

fn looks_like_sql(s: &str) -> bool {
    let first = s
        .trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or("");
    SQL_LEADING_WORDS
        .iter()
        .any(|w| first.eq_ignore_ascii_case(w))
}

/// Dotted name starting at `start`: parts must touch their dots.
/// Returns the part tokens and the index after the name.
fn parse_name(tokens: &[Token], start: usize) -> Option<(Vec<&Token>, usize)> {
    let first = tokens.get(start).filter(|t| t.is_name_part())?;
    let mut parts = vec![first];
    let mut i = start + 1;
    while let (Some(dot), Some(part)) = (tokens.get(i), tokens.get(i + 1)) {
        let prev = parts[parts.len() - 1];
        if dot.kind != TokenKind::Punct('.')
            || !part.is_name_part()
            || prev.range.end != dot.range.start
            || dot.range.end != part.range.start
        {
            break;
        }
        parts.push(part);
        i += 2;
    }
    Some((parts, i))
}

fn table_match(src: &str, range: ByteRange, schema: &str, table: &str) -> StructuralMatch {
    let mut captures = BTreeMap::new();
    captures.insert("schema".to_string(), schema.to_string());
    captures.insert("table".to_string(), table.to_string());
    captures.insert("name".to_string(), src[range.start..range.end].to_string());
    StructuralMatch { range, captures }
}

fn sql_table_refs(src: &str, tokens: &[Token]) -> Vec<StructuralMatch> {
    let mut out = Vec::new();
    for (idx, tok) in tokens.iter().enumerate() {
        if !TABLE_KEYWORDS.iter().any(|kw| tok.is_keyword(src, kw)) {
            continue;
        }
        let is_from = tok.is_keyword(src, "FROM");
        let reads = is_from || tok.is_keyword(src, "JOIN");
        let mut j = idx + 1;
        if tokens.get(j).map(|t| t.is_keyword(src, "IF")).unwrap_or(false) {
            j += 1;
            if tokens.get(j).map(|t| t.is_keyword(src, "NOT")).unwrap_or(false) {
                j += 1;
            }
            if tokens.get(j).map(|t| t.is_keyword(src, "EXISTS")).unwrap_or(false) {
                j += 1;
            }
        }
        while let Some((parts, after)) = parse_name(tokens, j) {
            if let Some(m) = two_part_ref(src, tokens, &parts, after, reads) {
                out.push(m);
            }
            if !is_from {
                break;
            }
            // FROM a.b [AS] x, c.d
            let mut k = after;
            if tokens.get(k).map(|t| t.is_keyword(src, "AS")).unwrap_or(false) {
                k += 1;
            }
            let alias_then_comma = tokens.get(k).map(Token::is_name_part).unwrap_or(false)
                && tokens.get(k + 1).map(|t| t.kind == TokenKind::Punct(',')).unwrap_or(false);
            if alias_then_comma {
                k += 1;
            }
            if tokens.get(k).map(|t| t.kind == TokenKind::Punct(',')) != Some(true) {
                break;
            }
            j = k + 1;
        }
    }
    out
}

fn two_part_ref(
    src: &str,
    tokens: &[Token],
    parts: &[&Token],
    after: usize,
    reads: bool,
) -> Option<StructuralMatch> {
    let [schema, table] = parts else {
        return None;
    };
    // Table-valued function call, e.g. `FROM db.fn(...)`. After TABLE/INTO a
    // parenthesis opens a column list instead.
    if reads && tokens.get(after).map(|t| t.kind == TokenKind::Punct('(')) == Some(true) {
        return None;
    }
    let schema_name = schema.inner_text(src);
    let table_name = table.inner_text(src);
    if table.kind == TokenKind::QuotedIdent
        && (table_name.starts_with('/') || table_name.contains(":/"))
    {
        return None;
    }
    if FILE_FORMATS.iter().any(|f| schema_name.eq_ignore_ascii_case(f))
        && table.kind == TokenKind::QuotedIdent
    {
        return None;
    }
    if SYSTEM_SCHEMAS.iter().any(|s| schema_name.eq_ignore_ascii_case(s)) {
        return None;
    }
    let range = ByteRange::new(schema.range.start, table.range.end);
    Some(table_match(src, range, schema_name, table_name))
}

fn code_table_refs(src: &str, tokens: &[Token]) -> Vec<StructuralMatch> {
    let mut out = Vec::new();
    for window in tokens.windows(3) {
        let [call, paren, arg] = window else {
            continue;
        };
        if call.kind != TokenKind::Ident
            || !TABLE_CALLS.contains(&call.text(src))
            || paren.kind != TokenKind::Punct('(')
            || arg.kind != TokenKind::Str
        {
            continue;
        }
        let name = arg.inner_text(src);
        let mut pieces = name.split('.');
        let (Some(schema), Some(table), None) = (pieces.next(), pieces.next(), pieces.next())
        else {
            continue;
        };
        if is_plain_ident(schema)
            && is_plain_ident(table)
            && !SYSTEM_SCHEMAS.iter().any(|s| schema.eq_ignore_ascii_case(s))
        {
            out.push(table_match(src, arg.inner, schema, table));
        }
    }
    out
}

fn is_plain_ident(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty() && is_ident_start(bytes[0]) && bytes.iter().all(|b| is_ident_continue(*b))
}

/// Split a mount reference into `(scheme, path)` where path starts `/mnt/`.
fn split_mount_scheme(literal: &str) -> Option<(&'static str, &str)> {
    MOUNT_SCHEMES.iter().find_map(|scheme| {
        let path = literal.strip_prefix(scheme)?;
        let name = path.strip_prefix("/mnt/")?;
        if name.is_empty() || name.starts_with('/') {
            return None;
        }
        Some((*scheme, path))
    })
}

fn under_mount(path: &str, mount_point: &str) -> bool {
    match path.strip_prefix(mount_point) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn mount_literals(
    src: &str,
    tokens: &[Token],
    mount_point: Option<&str>,
    shadowed_by: &[String],
) -> Vec<StructuralMatch> {
    let mut out = Vec::new();
    for tok in tokens {
        if !matches!(tok.kind, TokenKind::Str | TokenKind::QuotedIdent) {
            continue;
        }
        let literal = tok.inner_text(src);
        let Some((scheme, path)) = split_mount_scheme(literal) else {
            continue;
        };
        let mount = match mount_point {
            Some(mp) => {
                let mp = mp.trim_end_matches('/');
                if !under_mount(path, mp) || shadowed_by.iter().any(|s| under_mount(path, s)) {
                    continue;
                }
                mp
            }
            None => {
                let name_end = path["/mnt/".len()..]
                    .find('/')
                    .map(|p| p + "/mnt/".len())
                    .unwrap_or(path.len());
                &path[..name_end]
            }
        };
        let rest = &path[mount.len()..];
        // With a mount filter only the prefix is addressed, so a rewrite
        // keeps the rest of the path.
        let end = if mount_point.is_some() {
            tok.inner.start + scheme.len() + mount.len()
        } else {
            tok.inner.end
        };
        let mut captures = BTreeMap::new();
        captures.insert("scheme".to_string(), scheme.to_string());
        captures.insert("mount".to_string(), mount.to_string());
        captures.insert("rest".to_string(), rest.to_string());
        captures.insert("path".to_string(), literal.to_string());
        out.push(StructuralMatch {
            range: ByteRange::new(tok.inner.start, end),
            captures,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn opts(dialect: Dialect, strict: bool) -> LexOptions {
        LexOptions {
            dialect,
            strict,
            slash_comments: false,
            magic: Some("# MAGIC"),
        }
    }

    fn names(kind: &StructuralKind, text: &str, dialect: Dialect) -> Vec<String> {
        let tokens = tokenize(text, opts(dialect, true)).unwrap();
        find_matches(kind, text, &tokens, dialect)
            .into_iter()
            .map(|m| text[m.range.start..m.range.end].to_string())
            .collect()
    }

    #[test]
    fn test_lexer_skips_comments_and_magic() {
        let text = "# MAGIC %sql\n# MAGIC SELECT 'a' -- note\n/* x */ FROM `t`";
        let toks = tokenize(text, opts(Dialect::Sql, true)).unwrap();
        let kinds: Vec<TokenKind> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Punct('%'),
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Str,
                TokenKind::Ident,
                TokenKind::QuotedIdent,
            ]
        );
        assert_eq!(toks[5].inner_text(text), "t");
    }

    #[test]
    fn test_magic_prefix_follows_notebook() {
        use crate::segment::segment_text;
        for (p, ext) in [("--", "sql"), ("//", "scala"), ("#", "py")] {
            let text = format!(
                "{p} Databricks notebook source\n{p} MAGIC %python\n{p} MAGIC df = spark.read.load(\"/mnt/raw/x\")\n"
            );
            let units = segment_text(&format!("nb.{ext}"), ContentType::Notebook, &text);
            let unit = &units[0];
            let tokens = tokenize(&unit.text, LexOptions::for_unit(unit)).unwrap();
            let kind = StructuralKind::MountPath {
                mount_point: None,
                shadowed_by: Vec::new(),
            };
            let found = find_matches(&kind, &unit.text, &tokens, unit.dialect);
            assert_eq!(found.len(), 1, "{p}");
            // the prefix never reaches the token stream
            assert_eq!(tokens[0].text(&unit.text), "%");
            assert_eq!(tokens[1].text(&unit.text), "python");
        }
    }

    #[test]
    fn test_text_cells_lex_leniently() {
        use crate::segment::segment_text;
        let text = "# Databricks notebook source\n# MAGIC %md\n# MAGIC It's `odd\n";
        let units = segment_text("nb.py", ContentType::Notebook, text);
        assert_eq!(units[0].dialect, Dialect::Text);
        let opts = LexOptions::for_unit(&units[0]);
        assert!(!opts.strict);
        let tokens = tokenize(&units[0].text, opts).unwrap();
        assert!(find_matches(&StructuralKind::TwoLevelTable, &units[0].text, &tokens, Dialect::Text)
            .is_empty());
    }

    #[test]
    fn test_strict_vs_lenient() {
        let text = "x = 'open\ny = \"a.b\"";
        assert_eq!(
            tokenize(text, opts(Dialect::Code, true)),
            Err(ParseError::UnterminatedString(4))
        );
        let toks = tokenize(text, opts(Dialect::Code, false)).unwrap();
        assert!(toks.iter().any(|t| t.kind == TokenKind::Str));
        assert!(matches!(
            tokenize("/* open", opts(Dialect::Sql, true)),
            Err(ParseError::UnterminatedComment(0))
        ));
    }

    #[test]
    fn test_triple_quoted_strings_span_lines() {
        let text = "q = \"\"\"\nSELECT * FROM sales.orders\n\"\"\"";
        let toks = tokenize(text, opts(Dialect::Code, true)).unwrap();
        assert_eq!(toks.len(), 3);
        assert_eq!(
            names(&StructuralKind::TwoLevelTable, text, Dialect::Code),
            vec!["sales.orders"]
        );
    }

    #[test]
    fn test_sql_two_level_references() {
        let text = "INSERT INTO db.t1 SELECT a.x FROM db.t2 a, `db`.`t3` b JOIN cat.db.t4 ON 1=1 \
                    JOIN global_temp.v ON 1=1 JOIN delta.`/mnt/x` ON 1=1 JOIN db.fn(1) ON 1=1";
        assert_eq!(
            names(&StructuralKind::TwoLevelTable, text, Dialect::Sql),
            vec!["db.t1", "db.t2", "`db`.`t3`"]
        );
        let ddl = "CREATE TABLE IF NOT EXISTS s.t (id INT)";
        assert_eq!(
            names(&StructuralKind::TwoLevelTable, ddl, Dialect::Sql),
            vec!["s.t"]
        );
        // spaced dots are not a qualified name
        assert!(names(&StructuralKind::TwoLevelTable, "SELECT 1 FROM a . b", Dialect::Sql).is_empty());
    }

    #[test]
    fn test_code_table_calls() {
        let text = "df = spark.table(\"sales.orders\")\ndf.write.saveAsTable('x.y.z')\nspark.sql(f\"SELECT * FROM {db}.t\")";
        let tokens = tokenize(text, opts(Dialect::Code, true)).unwrap();
        let found = find_matches(&StructuralKind::TwoLevelTable, text, &tokens, Dialect::Code);
        assert_eq!(found.len(), 1);
        assert_eq!(&text[found[0].range.start..found[0].range.end], "sales.orders");
        assert_eq!(found[0].captures["schema"], "sales");
        assert_eq!(found[0].captures["table"], "orders");
    }

    #[test]
    fn test_mount_literals() {
        let text = "a = \"/mnt/raw/x.csv\"\nb = 'dbfs:/mnt/raw'\nc = \"/dbfs/mnt/gold/y\"\nd = \"/mnt/\"\ne = \"/tmp/mnt/z\"";
        let kind = StructuralKind::MountPath {
            mount_point: None,
            shadowed_by: Vec::new(),
        };
        let tokens = tokenize(text, opts(Dialect::Code, true)).unwrap();
        let found = find_matches(&kind, text, &tokens, Dialect::Code);
        let mounts: Vec<(&str, &str)> = found
            .iter()
            .map(|m| (m.captures["scheme"].as_str(), m.captures["mount"].as_str()))
            .collect();
        assert_eq!(
            mounts,
            vec![("", "/mnt/raw"), ("dbfs:", "/mnt/raw"), ("/dbfs", "/mnt/gold")]
        );
        assert_eq!(found[0].captures["rest"], "/x.csv");
    }

    #[test]
    fn test_mount_point_filter_and_shadowing() {
        let text = "a = \"dbfs:/mnt/raw/in/x\"\nb = \"/mnt/raw/deep/y\"\nc = \"/mnt/rawest\"";
        let kind = StructuralKind::MountPath {
            mount_point: Some("/mnt/raw".to_string()),
            shadowed_by: vec!["/mnt/raw/deep".to_string()],
        };
        let tokens = tokenize(text, opts(Dialect::Code, true)).unwrap();
        let found = find_matches(&kind, text, &tokens, Dialect::Code);
        assert_eq!(found.len(), 1);
        assert_eq!(&text[found[0].range.start..found[0].range.end], "dbfs:/mnt/raw");
        assert_eq!(found[0].captures["rest"], "/in/x");
    }

    #[test]
    fn test_embedded_sql_path_query() {
        let text = "spark.sql(\"SELECT * FROM json.`/mnt/landing/a`\")";
        let kind = StructuralKind::MountPath {
            mount_point: None,
            shadowed_by: Vec::new(),
        };
        let tokens = tokenize(text, opts(Dialect::Code, true)).unwrap();
        let found = find_matches(&kind, text, &tokens, Dialect::Code);
        assert_eq!(found.len(), 1);
        assert_eq!(&text[found[0].range.start..found[0].range.end], "/mnt/landing/a");
        assert!(names(&StructuralKind::TwoLevelTable, text, Dialect::Code).is_empty());
    }
}
