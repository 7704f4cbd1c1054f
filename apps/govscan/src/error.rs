//! Error taxonomy.
//!
//! - `LoadError` / `ConfigError`: session start failures, fatal.
//! - `ParseError`: a structural matcher could not lex a unit; degraded to a
//!   `ParseWarning` issue by the engine.
//! - `RewriteError`: per-file rewrite failure; that file is skipped or
//!   marked failed and the session continues.
//! - `SessionError`: anything that aborts a whole scan or rewrite session.

use crate::models::IssueId;
use std::path::PathBuf;

/// Invalid rule configuration.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read rule file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rule file {origin} is not valid TOML: {message}")]
    Parse { origin: String, message: String },

    #[error("rule id '{id}' is defined in both {first} and {second}")]
    DuplicateRuleId {
        id: String,
        first: String,
        second: String,
    },

    #[error("rule '{rule}': unknown content type '{value}' (expected script|notebook|sql|other)")]
    UnknownContentType { rule: String, value: String },

    #[error("rule '{rule}': content_types must not be empty")]
    NoContentTypes { rule: String },

    #[error("rule '{rule}': unknown severity '{value}' (expected info|warning|blocker)")]
    UnknownSeverity { rule: String, value: String },

    #[error("rule '{rule}': invalid regex: {source}")]
    InvalidRegex {
        rule: String,
        #[source]
        source: regex::Error,
    },

    #[error("rule '{rule}': invalid glob: {source}")]
    InvalidGlob {
        rule: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("rule '{rule}': unknown structural matcher '{name}' (expected two_level_table|mount_path)")]
    UnknownMatcher { rule: String, name: String },

    #[error("rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
}

impl LoadError {
    pub fn invalid(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule: rule.into(),
            reason: reason.into(),
        }
    }
}

/// Invalid project configuration (`govscan.toml|yaml`).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config {path} is invalid: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid value '{value}' for {key}: expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: String,
    },

    #[error("invalid exclude glob '{pattern}': {source}")]
    InvalidExclude {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Structural lexer failure on a single unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unterminated string literal starting at byte {0}")]
    UnterminatedString(usize),

    #[error("unterminated quoted identifier starting at byte {0}")]
    UnterminatedIdentifier(usize),

    #[error("unterminated block comment starting at byte {0}")]
    UnterminatedComment(usize),
}

/// Per-file rewrite failure.
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("conflicting plans {first} and {second} overlap")]
    Conflict { first: IssueId, second: IssueId },

    #[error("stale issue {issue_id}: expected {expected:?}, found {found:?}")]
    StaleIssue {
        issue_id: IssueId,
        expected: String,
        found: String,
    },

    #[error("plan {issue_id} spans more than one unit")]
    UnsupportedSpan { issue_id: IssueId },

    #[error("plan {issue_id} does not target {file_path}")]
    ForeignPlan { issue_id: IssueId, file_path: String },

    #[error("refusing to rewrite {file_path:?}: {reason}")]
    UnsafePath {
        file_path: String,
        reason: &'static str,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RewriteError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures that abort a whole session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot create temporary file next to {path}: {source}")]
    TempFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot start worker pool: {0}")]
    Pool(String),

    #[error("cannot read plans from {path}: {message}")]
    Plans { path: PathBuf, message: String },
}
