//! Rewrite plans and per-file outcomes.

use super::{Issue, IssueId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One accepted remediation: replace `original_text` at the issue's byte
/// range with `replacement_text`. Consumed exactly once.
pub struct RewritePlan {
    pub issue_id: IssueId,
    pub original_text: String,
    pub replacement_text: String,
}

impl RewritePlan {
    /// Build a plan from an issue's suggested remediation, if it has one.
    pub fn from_issue(issue: &Issue) -> Option<Self> {
        if !issue.remediation_available {
            return None;
        }
        let replacement = issue.replacement.clone()?;
        Some(Self {
            issue_id: issue.id(),
            original_text: issue.matched_text.clone(),
            replacement_text: replacement,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Plan file exchanged between `plan` and `apply`.
pub struct PlanSet {
    pub plans: Vec<RewritePlan>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
/// Terminal state of a single file's rewrite.
pub enum RewriteStatus {
    Applied,
    /// Dry run: validated and diffed, disk untouched.
    Previewed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteResult {
    pub file_path: String,
    pub applied: bool,
    pub status: RewriteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_if_skipped: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    pub plans: usize,
}

impl RewriteResult {
    pub fn applied(file_path: impl Into<String>, plans: usize) -> Self {
        Self {
            file_path: file_path.into(),
            applied: true,
            status: RewriteStatus::Applied,
            reason_if_skipped: None,
            diff: None,
            plans,
        }
    }

    pub fn previewed(file_path: impl Into<String>, diff: String, plans: usize) -> Self {
        Self {
            file_path: file_path.into(),
            applied: false,
            status: RewriteStatus::Previewed,
            reason_if_skipped: None,
            diff: Some(diff),
            plans,
        }
    }

    pub fn skipped(file_path: impl Into<String>, reason: impl Into<String>, plans: usize) -> Self {
        Self {
            file_path: file_path.into(),
            applied: false,
            status: RewriteStatus::Skipped,
            reason_if_skipped: Some(reason.into()),
            diff: None,
            plans,
        }
    }

    pub fn failed(file_path: impl Into<String>, reason: impl Into<String>, plans: usize) -> Self {
        Self {
            file_path: file_path.into(),
            applied: false,
            status: RewriteStatus::Failed,
            reason_if_skipped: Some(reason.into()),
            diff: None,
            plans,
        }
    }
}
