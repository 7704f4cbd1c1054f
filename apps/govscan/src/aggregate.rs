//! Issue aggregator.
//!
//! Deduplicates issues by identity and orders them blockers first, then
//! by file path and byte offset. The ordering is part of the output
//! contract, so every tie is broken explicitly.

use crate::models::{
    Diagnostic, Issue, IssueId, MergedReport, RepoDiagnostic, RepoIssue, Report, Severity,
    Summary,
};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

fn issue_order(a: &Issue, b: &Issue) -> Ordering {
    a.severity
        .rank()
        .cmp(&b.severity.rank())
        .then_with(|| a.file_path.cmp(&b.file_path))
        .then_with(|| a.byte_range.start.cmp(&b.byte_range.start))
        .then_with(|| a.byte_range.end.cmp(&b.byte_range.end))
        .then_with(|| a.rule_id.cmp(&b.rule_id))
}

/// Deduplicate (first occurrence wins) and sort.
pub fn aggregate<I>(issues: I) -> Report
where
    I: IntoIterator<Item = Issue>,
{
    build_report("", issues, Vec::new(), 0)
}

/// Full report for one repository, with its diagnostics and counts.
pub fn build_report<I>(
    repository_id: &str,
    issues: I,
    mut diagnostics: Vec<Diagnostic>,
    files_scanned: usize,
) -> Report
where
    I: IntoIterator<Item = Issue>,
{
    let mut seen: HashSet<IssueId> = HashSet::new();
    let mut issues: Vec<Issue> = issues
        .into_iter()
        .filter(|issue| seen.insert(issue.id()))
        .collect();
    issues.sort_by(issue_order);

    diagnostics.sort();
    diagnostics.dedup();

    let mut summary = Summary {
        files_scanned,
        ..Summary::default()
    };
    for issue in &issues {
        summary.count(issue.severity);
    }
    summary.files_skipped = diagnostics
        .iter()
        .filter(|d| d.kind.is_skip())
        .map(|d| d.file_path.as_str())
        .collect::<BTreeSet<_>>()
        .len();

    Report {
        repository_id: repository_id.to_string(),
        issues,
        diagnostics,
        summary,
    }
}

/// Combine per-repository reports. Issues are never deduplicated across
/// repositories; equal keys are ordered by repository id.
pub fn merge(reports: Vec<Report>) -> MergedReport {
    let mut merged = MergedReport::default();
    for report in reports {
        merged.summary.absorb(&report.summary);
        let repo = report.repository_id;
        merged
            .issues
            .extend(report.issues.into_iter().map(|issue| RepoIssue {
                repository_id: repo.clone(),
                issue,
            }));
        merged
            .diagnostics
            .extend(report.diagnostics.into_iter().map(|diagnostic| RepoDiagnostic {
                repository_id: repo.clone(),
                diagnostic,
            }));
    }
    merged.issues.sort_by(|a, b| {
        issue_order(&a.issue, &b.issue).then_with(|| a.repository_id.cmp(&b.repository_id))
    });
    merged.diagnostics.sort_by(|a, b| {
        a.repository_id
            .cmp(&b.repository_id)
            .then_with(|| a.diagnostic.cmp(&b.diagnostic))
    });
    merged
}

impl Report {
    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    pub fn for_rule<'a>(&'a self, rule_id: &'a str) -> impl Iterator<Item = &'a Issue> {
        self.issues.iter().filter(move |i| i.rule_id == rule_id)
    }

    pub fn for_file<'a>(&'a self, file_path: &'a str) -> impl Iterator<Item = &'a Issue> {
        self.issues.iter().filter(move |i| i.file_path == file_path)
    }

    pub fn has_blockers(&self) -> bool {
        self.summary.blockers > 0
    }
}

impl MergedReport {
    pub fn has_blockers(&self) -> bool {
        self.summary.blockers > 0
    }
}
