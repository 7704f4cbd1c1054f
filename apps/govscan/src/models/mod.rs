//! Shared data models for scan and rewrite outputs.
//!
//! Everything here is a plain value type: units and issues are produced
//! fresh on each scan pass and never mutated after creation.

pub mod rewrite;
pub mod rules;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Content kind assigned to a file once, at classification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Script,
    Notebook,
    Sql,
    Other,
}

impl ContentType {
    pub const ALL: [ContentType; 4] = [
        ContentType::Script,
        ContentType::Notebook,
        ContentType::Sql,
        ContentType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Script => "script",
            ContentType::Notebook => "notebook",
            ContentType::Sql => "sql",
            ContentType::Other => "other",
        }
    }

    /// Parse a content type token as written in rule files.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "script" => Some(ContentType::Script),
            "notebook" | "notebook_cell_document" => Some(ContentType::Notebook),
            "sql" => Some(ContentType::Sql),
            "other" => Some(ContentType::Other),
            _ => None,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issue severity. Reports list blockers first, then warnings, then infos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Blocker,
}

impl Severity {
    /// Sort rank: lower ranks are reported first.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Blocker => 0,
            Severity::Warning => 1,
            Severity::Info => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Blocker => "blocker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Severity::Info),
            "warning" | "warn" => Some(Severity::Warning),
            "blocker" => Some(Severity::Blocker),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open byte range `[start, end)` into a file's raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Two ranges overlap when they share a byte or are anchored at the same
    /// offset (two insertions at one point cannot both be applied).
    pub fn overlaps(&self, other: &ByteRange) -> bool {
        if self.start == other.start {
            return true;
        }
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &ByteRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn shift(&self, offset: usize) -> ByteRange {
        ByteRange::new(self.start + offset, self.end + offset)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Lexical flavour of a unit, used by structural matchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Code,
    Sql,
    /// Prose or shell cells (`%md`, `%sh`, `%pip`, `%run`, ...). Only text
    /// matchers apply.
    Text,
}

/// An addressable sub-region of a source file: a line, a notebook cell,
/// or a SQL statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unit {
    pub file_path: String,
    pub unit_index: usize,
    pub byte_range: ByteRange,
    /// 1-based line number of the first byte of the unit.
    pub line: usize,
    pub content_type: ContentType,
    pub dialect: Dialect,
    /// Line prefix of notebook magic lines (`# MAGIC`, `-- MAGIC`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magic_prefix: Option<&'static str>,
    pub text: String,
}

/// Identity of an issue. Two issues with the same id are the same finding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssueId {
    pub rule_id: String,
    pub file_path: String,
    pub byte_range: ByteRange,
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}[{}]", self.rule_id, self.file_path, self.byte_range)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A single governance finding with location, severity and remediation.
pub struct Issue {
    pub rule_id: String,
    pub file_path: String,
    pub unit_index: usize,
    pub byte_range: ByteRange,
    /// 1-based line of the match start.
    pub line: usize,
    pub severity: Severity,
    pub message: String,
    pub matched_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    pub remediation_available: bool,
}

impl Issue {
    pub fn id(&self) -> IssueId {
        IssueId {
            rule_id: self.rule_id.clone(),
            file_path: self.file_path.clone(),
            byte_range: self.byte_range,
        }
    }
}

/// Why a file (or unit) did not contribute normally to a report.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind")]
pub enum DiagnosticKind {
    SkippedOversize { size: u64, limit: u64 },
    SkippedUnreadable { reason: String },
    SkippedBinary,
    SkippedTimeout,
    SkippedCancelled,
    ParseWarning {
        rule_id: String,
        unit_index: usize,
        reason: String,
    },
}

impl DiagnosticKind {
    pub fn label(&self) -> &'static str {
        match self {
            DiagnosticKind::SkippedOversize { .. } => "SkippedOversize",
            DiagnosticKind::SkippedUnreadable { .. } => "SkippedUnreadable",
            DiagnosticKind::SkippedBinary => "SkippedBinary",
            DiagnosticKind::SkippedTimeout => "SkippedTimeout",
            DiagnosticKind::SkippedCancelled => "SkippedCancelled",
            DiagnosticKind::ParseWarning { .. } => "ParseWarning",
        }
    }

    /// True when the whole file was left out of the scan.
    pub fn is_skip(&self) -> bool {
        !matches!(self, DiagnosticKind::ParseWarning { .. })
    }

    pub fn detail(&self) -> String {
        match self {
            DiagnosticKind::SkippedOversize { size, limit } => {
                format!("{} bytes exceeds limit of {} bytes", size, limit)
            }
            DiagnosticKind::SkippedUnreadable { reason } => reason.clone(),
            DiagnosticKind::SkippedBinary => "binary content".to_string(),
            DiagnosticKind::SkippedTimeout => "session timed out before this file".to_string(),
            DiagnosticKind::SkippedCancelled => "session cancelled before this file".to_string(),
            DiagnosticKind::ParseWarning {
                rule_id,
                unit_index,
                reason,
            } => format!("rule {} on unit {}: {}", rule_id, unit_index, reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
/// A non-fatal event surfaced alongside the report.
pub struct Diagnostic {
    pub file_path: String,
    #[serde(flatten)]
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    pub fn new(file_path: impl Into<String>, kind: DiagnosticKind) -> Self {
        Self {
            file_path: file_path.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Aggregated counts used by printers.
pub struct Summary {
    pub blockers: usize,
    pub warnings: usize,
    pub infos: usize,
    pub files_scanned: usize,
    pub files_skipped: usize,
}

impl Summary {
    pub fn count(&mut self, severity: Severity) {
        match severity {
            Severity::Blocker => self.blockers += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Info => self.infos += 1,
        }
    }

    pub fn absorb(&mut self, other: &Summary) {
        self.blockers += other.blockers;
        self.warnings += other.warnings;
        self.infos += other.infos;
        self.files_scanned += other.files_scanned;
        self.files_skipped += other.files_skipped;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Deduplicated, deterministically ordered findings for one repository.
pub struct Report {
    pub repository_id: String,
    pub issues: Vec<Issue>,
    pub diagnostics: Vec<Diagnostic>,
    pub summary: Summary,
}

impl Report {
    /// True when at least one file was skipped, so an empty issue list does
    /// not mean the repository is clean.
    pub fn is_partial(&self) -> bool {
        self.diagnostics.iter().any(|d| d.kind.is_skip())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoIssue {
    pub repository_id: String,
    #[serde(flatten)]
    pub issue: Issue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoDiagnostic {
    pub repository_id: String,
    #[serde(flatten)]
    pub diagnostic: Diagnostic,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Cross-repository report. Issues from different repositories are never
/// deduplicated against each other.
pub struct MergedReport {
    pub issues: Vec<RepoIssue>,
    pub diagnostics: Vec<RepoDiagnostic>,
    pub summary: Summary,
}

impl MergedReport {
    pub fn is_partial(&self) -> bool {
        self.diagnostics.iter().any(|d| d.diagnostic.kind.is_skip())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_rank_puts_blockers_first() {
        assert!(Severity::Blocker.rank() < Severity::Warning.rank());
        assert!(Severity::Warning.rank() < Severity::Info.rank());
    }

    #[test]
    fn byte_range_overlap_rules() {
        let a = ByteRange::new(0, 5);
        assert!(a.overlaps(&ByteRange::new(4, 8)));
        assert!(!a.overlaps(&ByteRange::new(5, 8)));
        assert!(ByteRange::new(3, 3).overlaps(&ByteRange::new(3, 3)));
        assert!(ByteRange::new(2, 2).overlaps(&a));
    }

    #[test]
    fn content_type_parse_accepts_long_notebook_name() {
        assert_eq!(
            ContentType::parse("notebook_cell_document"),
            Some(ContentType::Notebook)
        );
        assert_eq!(ContentType::parse("python"), None);
    }
}
