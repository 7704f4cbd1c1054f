//! Output rendering for scan, rewrite and rule listing commands.
//!
//! Supports `human` (default), `json` and `csv` (reports only). The JSON
//! forms include per-item fields and a top-level summary.

use crate::export::to_csv;
use crate::models::rewrite::{PlanSet, RewritePlan, RewriteResult, RewriteStatus};
use crate::models::{MergedReport, Severity};
use crate::rules::{Remediation, RuleSet};
use crate::utils::{error_prefix, note_prefix, use_colors};
use owo_colors::OwoColorize;
use serde_json::json;
use serde_json::Value as JsonVal;

fn print_json(value: &JsonVal) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("{} cannot render JSON: {}", error_prefix(), e),
    }
}

fn severity_tag(severity: Severity, color: bool) -> (String, String) {
    let (tag, icon) = match severity {
        Severity::Blocker => ("⟦blocker⟧", "✖"),
        Severity::Warning => ("⟦warn⟧", "▲"),
        Severity::Info => ("⟦info⟧", "◆"),
    };
    if !color {
        return (tag.to_string(), icon.to_string());
    }
    match severity {
        Severity::Blocker => (tag.red().bold().to_string(), icon.red().to_string()),
        Severity::Warning => (tag.yellow().bold().to_string(), icon.yellow().to_string()),
        Severity::Info => (tag.blue().bold().to_string(), icon.blue().to_string()),
    }
}

/// Print a (possibly multi-repository) report in the requested format.
pub fn print_report(report: &MergedReport, output: &str) {
    match output {
        "json" => print_json(&compose_report_json(report)),
        "csv" => print!("{}", to_csv(report)),
        _ => {
            let color = use_colors(output);
            let multi = report
                .issues
                .iter()
                .map(|i| &i.repository_id)
                .collect::<std::collections::BTreeSet<_>>()
                .len()
                > 1;
            for row in &report.issues {
                let is = &row.issue;
                let (sev, icon) = severity_tag(is.severity, color);
                let mut loc = format!("{}:{}", is.file_path, is.line);
                if multi {
                    loc = format!("{}/{}", row.repository_id, loc);
                }
                let loc = if color { loc.bold().to_string() } else { loc };
                let fix = if is.remediation_available { " [fixable]" } else { "" };
                println!("{} {} {} ❲{}❳ — {}{}", icon, sev, loc, is.rule_id, is.message, fix);
            }
            for d in &report.diagnostics {
                let kind = d.diagnostic.kind.label();
                let kind = if color {
                    kind.bright_black().to_string()
                } else {
                    kind.to_string()
                };
                println!(
                    "  {} {} — {}",
                    kind,
                    d.diagnostic.file_path,
                    d.diagnostic.kind.detail()
                );
            }
            let s = &report.summary;
            let summary = format!(
                "— Summary — blockers={} warnings={} infos={} files={} skipped={}",
                s.blockers, s.warnings, s.infos, s.files_scanned, s.files_skipped
            );
            if color {
                println!("{}", summary.bold());
            } else {
                println!("{}", summary);
            }
            if report.is_partial() {
                eprintln!(
                    "{} scan was partial: {} file(s) skipped",
                    note_prefix(),
                    s.files_skipped
                );
            }
        }
    }
}

/// Print per-file rewrite outcomes, with diffs in dry-run mode.
pub fn print_rewrite(results: &[RewriteResult], output: &str) {
    match output {
        "json" => print_json(&compose_rewrite_json(results)),
        _ => {
            let color = use_colors(output);
            for r in results {
                match r.status {
                    RewriteStatus::Applied => {
                        if color {
                            println!("{} {} ({} change(s))", "✏️  rewrote:".green().bold(), r.file_path.bold(), r.plans);
                        } else {
                            println!("✏️  rewrote: {} ({} change(s))", r.file_path, r.plans);
                        }
                    }
                    RewriteStatus::Previewed => {
                        if let Some(d) = &r.diff {
                            if color {
                                println!("{} {}\n{}", "---".cyan().bold(), r.file_path.bold(), d);
                            } else {
                                println!("--- {}\n{}", r.file_path, d);
                            }
                        }
                    }
                    RewriteStatus::Skipped | RewriteStatus::Failed => {
                        let label = if r.status == RewriteStatus::Skipped {
                            "⏭️  skipped:"
                        } else {
                            "✖ failed:"
                        };
                        let reason = r.reason_if_skipped.as_deref().unwrap_or("");
                        if color {
                            println!("{} {} ({})", label.yellow().bold(), r.file_path, reason);
                        } else {
                            println!("{} {} ({})", label, r.file_path, reason);
                        }
                    }
                }
            }
        }
    }
}

/// Print the outcome of `fix`: rewrite results, then what remains of the
/// selected rules. JSON combines both into one document; CSV lists only
/// the remaining issues.
pub fn print_fix(results: &[RewriteResult], remaining: &MergedReport, output: &str) {
    match output {
        "json" => print_json(&json!({
            "rewrite": compose_rewrite_json(results),
            "remaining": compose_report_json(remaining),
        })),
        "csv" => print!("{}", to_csv(remaining)),
        _ => {
            print_rewrite(results, output);
            print_report(remaining, output);
        }
    }
}

/// Plans are always emitted as JSON so they can be reviewed and fed back
/// to `apply --plans`.
pub fn print_plans(plans: &[RewritePlan]) {
    print_json(&compose_plans_json(plans));
}

/// Print the effective rule set.
pub fn print_rules(rules: &RuleSet, output: &str) {
    match output {
        "json" => print_json(&compose_rules_json(rules)),
        _ => {
            let color = use_colors(output);
            for r in rules.rules() {
                let (sev, _) = severity_tag(r.severity, color);
                let types: Vec<&str> = r.content_types.iter().map(|c| c.as_str()).collect();
                let id = if color { r.id.clone().bold().to_string() } else { r.id.clone() };
                println!(
                    "{} {} {} [{}] ({})",
                    id,
                    sev,
                    r.kind_label(),
                    types.join(","),
                    r.origin
                );
            }
            println!("{} rule(s)", rules.len());
        }
    }
}

/// Compose report JSON object (pure) for testing/snapshot purposes.
pub fn compose_report_json(report: &MergedReport) -> JsonVal {
    json!({
        "issues": report.issues,
        "diagnostics": report.diagnostics,
        "summary": report.summary,
        "partial": report.is_partial(),
    })
}

/// Compose rewrite JSON object (pure) for testing/snapshot purposes.
pub fn compose_rewrite_json(results: &[RewriteResult]) -> JsonVal {
    let count = |s: RewriteStatus| results.iter().filter(|r| r.status == s).count();
    let summary = json!({
        "applied": count(RewriteStatus::Applied),
        "previewed": count(RewriteStatus::Previewed),
        "skipped": count(RewriteStatus::Skipped),
        "failed": count(RewriteStatus::Failed),
        "total": results.len(),
    });
    json!({"results": results, "summary": summary})
}

pub fn compose_plans_json(plans: &[RewritePlan]) -> JsonVal {
    let set = PlanSet {
        plans: plans.to_vec(),
    };
    serde_json::to_value(&set).unwrap_or_else(|_| json!({ "plans": [] }))
}

pub fn compose_rules_json(rules: &RuleSet) -> JsonVal {
    let items: Vec<_> = rules
        .rules()
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "severity": r.severity,
                "content_types": r.content_types,
                "matcher": r.kind_label(),
                "remediation": match &r.remediation {
                    Some(Remediation::Template(t)) => Some(t.clone()),
                    Some(Remediation::MountTarget { source }) => Some(source.clone()),
                    None => None,
                },
                "origin": r.origin,
            })
        })
        .collect();
    json!({"rules": items, "total": rules.len()})
}
