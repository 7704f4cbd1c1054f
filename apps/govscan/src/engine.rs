//! Rule engine.
//!
//! Evaluates rules against segmented units. Rules run in id order and are
//! never short-circuited: every eligible rule sees every unit. Structural
//! rules share one token stream per unit; a unit that cannot be lexed
//! yields an info-level `ParseWarning` issue for that rule instead of
//! failing the file.

use crate::error::ParseError;
use crate::models::{ByteRange, Diagnostic, DiagnosticKind, Issue, Severity, Unit};
use crate::rules::{Matcher, Rule, RuleSet};
use crate::structural::{find_matches, tokenize, LexOptions, Token};
use std::cell::OnceCell;
use std::collections::BTreeMap;

/// A match on a line carrying this marker is not reported.
pub const SKIP_MARKER: &str = "govscan:skip";
/// Rule id used for structural parse failures.
pub const PARSE_WARNING_RULE: &str = "ParseWarning";

type TokenCache = OnceCell<Result<Vec<Token>, ParseError>>;

#[derive(Debug, Default, Clone)]
pub struct FileFindings {
    pub issues: Vec<Issue>,
    pub diagnostics: Vec<Diagnostic>,
}

struct RawMatch {
    /// Relative to the unit text.
    range: ByteRange,
    captures: BTreeMap<String, String>,
}

struct Evaluation {
    issues: Vec<Issue>,
    parse_error: Option<ParseError>,
}

/// First issue `rule` raises on `unit`, if any.
pub fn evaluate(unit: &Unit, rule: &Rule) -> Option<Issue> {
    evaluate_all(unit, rule).into_iter().next()
}

/// All issues `rule` raises on `unit` (one unless the rule reports every
/// match), including a `ParseWarning` issue when the unit cannot be lexed.
pub fn evaluate_all(unit: &Unit, rule: &Rule) -> Vec<Issue> {
    let cache = TokenCache::new();
    let eval = evaluate_cached(unit, rule, &cache);
    let mut issues = eval.issues;
    if let Some(err) = eval.parse_error {
        issues.push(parse_warning_issue(unit, rule, &err));
    }
    issues
}

/// Evaluate the whole rule set against one file's units.
pub fn evaluate_file(file_path: &str, units: &[Unit], rules: &RuleSet) -> FileFindings {
    let caches: Vec<TokenCache> = units.iter().map(|_| TokenCache::new()).collect();
    let mut findings = FileFindings::default();
    for rule in rules.rules() {
        for (unit, cache) in units.iter().zip(&caches) {
            let eval = evaluate_cached(unit, rule, cache);
            findings.issues.extend(eval.issues);
            if let Some(err) = eval.parse_error {
                tracing::debug!(file = file_path, rule = %rule.id, unit = unit.unit_index, error = %err, "structural parse failed");
                findings.issues.push(parse_warning_issue(unit, rule, &err));
                findings.diagnostics.push(Diagnostic::new(
                    file_path,
                    DiagnosticKind::ParseWarning {
                        rule_id: rule.id.clone(),
                        unit_index: unit.unit_index,
                        reason: err.to_string(),
                    },
                ));
            }
        }
    }
    tracing::trace!(file = file_path, issues = findings.issues.len(), "evaluated file");
    findings
}

fn evaluate_cached(unit: &Unit, rule: &Rule, cache: &TokenCache) -> Evaluation {
    let mut eval = Evaluation {
        issues: Vec::new(),
        parse_error: None,
    };
    if !rule.applies_to(unit.content_type) {
        return eval;
    }
    if let Matcher::Path(pattern) = &rule.matcher {
        if unit.unit_index == 0 && pattern.matches(&unit.file_path) {
            eval.issues.push(path_issue(unit, rule));
        }
        return eval;
    }
    let matches = match raw_matches(unit, rule, cache) {
        Ok(m) => m,
        Err(err) => {
            eval.parse_error = Some(err);
            return eval;
        }
    };
    for m in matches {
        if let Some(issue) = build_issue(unit, rule, m) {
            eval.issues.push(issue);
            if !rule.every_match {
                break;
            }
        }
    }
    eval
}

fn raw_matches(unit: &Unit, rule: &Rule, cache: &TokenCache) -> Result<Vec<RawMatch>, ParseError> {
    let text = unit.text.as_str();
    let found = match &rule.matcher {
        Matcher::Substring(needle) => text
            .match_indices(needle.as_str())
            .map(|(pos, s)| RawMatch {
                range: ByteRange::new(pos, pos + s.len()),
                captures: BTreeMap::new(),
            })
            .collect(),
        Matcher::Regex(re) => {
            let names: Vec<Option<&str>> = re.capture_names().collect();
            re.captures_iter(text)
                .filter_map(|caps| {
                    let whole = caps.get(0)?;
                    let mut captures = BTreeMap::new();
                    for (idx, name) in names.iter().enumerate().skip(1) {
                        if let Some(g) = caps.get(idx) {
                            captures.insert(idx.to_string(), g.as_str().to_string());
                            if let Some(name) = name {
                                captures.insert(name.to_string(), g.as_str().to_string());
                            }
                        }
                    }
                    Some(RawMatch {
                        range: ByteRange::new(whole.start(), whole.end()),
                        captures,
                    })
                })
                .collect()
        }
        Matcher::Structural(kind) => {
            let tokens = cache
                .get_or_init(|| tokenize(text, LexOptions::for_unit(unit)))
                .as_ref()
                .map_err(Clone::clone)?;
            find_matches(kind, text, tokens, unit.dialect)
                .into_iter()
                .map(|m| RawMatch {
                    range: m.range,
                    captures: m.captures,
                })
                .collect()
        }
        Matcher::Path(_) => Vec::new(),
    };
    Ok(found)
}

/// Bounds of the line within `text` that contains byte `pos`.
fn line_around(text: &str, pos: usize) -> &str {
    let start = text[..pos].rfind('\n').map(|p| p + 1).unwrap_or(0);
    let end = text[pos..].find('\n').map(|p| pos + p).unwrap_or(text.len());
    &text[start..end]
}

fn build_issue(unit: &Unit, rule: &Rule, m: RawMatch) -> Option<Issue> {
    let text = unit.text.as_str();
    if line_around(text, m.range.start).contains(SKIP_MARKER) {
        return None;
    }
    let matched = &text[m.range.start..m.range.end];
    let replacement = rule.render_replacement(matched, &m.captures);
    Some(Issue {
        rule_id: rule.id.clone(),
        file_path: unit.file_path.clone(),
        unit_index: unit.unit_index,
        byte_range: m.range.shift(unit.byte_range.start),
        line: unit.line + text[..m.range.start].matches('\n').count(),
        severity: rule.severity,
        message: rule.render_message(matched, &m.captures),
        matched_text: matched.to_string(),
        remediation_available: replacement.is_some(),
        replacement,
    })
}

/// File-level finding anchored at offset 0.
fn path_issue(unit: &Unit, rule: &Rule) -> Issue {
    Issue {
        rule_id: rule.id.clone(),
        file_path: unit.file_path.clone(),
        unit_index: unit.unit_index,
        byte_range: ByteRange::new(0, 0),
        line: 1,
        severity: rule.severity,
        message: rule.render_message(&unit.file_path, &BTreeMap::new()),
        matched_text: String::new(),
        replacement: None,
        remediation_available: false,
    }
}

fn parse_warning_issue(unit: &Unit, rule: &Rule, err: &ParseError) -> Issue {
    Issue {
        rule_id: PARSE_WARNING_RULE.to_string(),
        file_path: unit.file_path.clone(),
        unit_index: unit.unit_index,
        byte_range: unit.byte_range,
        line: unit.line,
        severity: Severity::Info,
        message: format!("rule {} could not parse this unit: {}", rule.id, err),
        matched_text: String::new(),
        replacement: None,
        remediation_available: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentType;
    use crate::segment::segment_text;
    use pretty_assertions::assert_eq;

    fn rules(text: &str) -> RuleSet {
        RuleSet::from_sources(&[("t.toml".to_string(), text.to_string())]).unwrap()
    }

    const R1: &str = r#"
[rules.R1]
content_types = ["script"]
severity = "blocker"
message = "legacy mount {match}"
[rules.R1.pattern]
kind = "regex"
regex = 'legacy_mount_path\("/mnt/(?P<p>[^"]*)"\)'
[rules.R1.remediation]
replace = 'managed_path("/$p")'
"#;

    #[test]
    fn test_regex_rule_on_script_line() {
        let text = "import os\n\n\n# load\ndf = legacy_mount_path(\"/mnt/data\")\n";
        let units = segment_text("job.py", ContentType::Script, text);
        let set = rules(R1);
        let rule = set.get("R1").unwrap();
        let hits: Vec<Issue> = units.iter().filter_map(|u| evaluate(u, rule)).collect();
        assert_eq!(hits.len(), 1);
        let issue = &hits[0];
        assert_eq!(issue.unit_index, 4);
        assert_eq!(issue.line, 5);
        assert_eq!(issue.severity, Severity::Blocker);
        assert_eq!(
            &text[issue.byte_range.start..issue.byte_range.end],
            "legacy_mount_path(\"/mnt/data\")"
        );
        assert_eq!(issue.replacement.as_deref(), Some("managed_path(\"/data\")"));
        assert!(issue.remediation_available);
    }

    #[test]
    fn test_content_type_filter_and_skip_marker() {
        let set = rules(R1);
        let rule = set.get("R1").unwrap();
        let sql = segment_text("q.sql", ContentType::Sql, "SELECT legacy_mount_path(\"/mnt/x\")");
        assert!(evaluate(&sql[0], rule).is_none());
        let skipped = segment_text(
            "a.py",
            ContentType::Script,
            "legacy_mount_path(\"/mnt/x\")  # govscan:skip",
        );
        assert!(evaluate(&skipped[0], rule).is_none());
    }

    #[test]
    fn test_every_match_and_line_numbers_in_cells() {
        let text = "# Databricks notebook source\nspark.table(\"a.b\")\nspark.table(\"c.d\")\n";
        let units = segment_text("nb.py", ContentType::Notebook, text);
        let set = RuleSet::builtin().unwrap();
        let rule = set.get("TBL001").unwrap();
        let issues = evaluate_all(&units[0], rule);
        let lines: Vec<usize> = issues.iter().map(|i| i.line).collect();
        assert_eq!(lines, vec![2, 3]);
        assert_eq!(issues[1].replacement.as_deref(), Some("hive_metastore.c.d"));
        let r = issues[1].byte_range;
        assert_eq!(&text[r.start..r.end], "c.d");
    }

    #[test]
    fn test_parse_failure_degrades_to_warning() {
        let text = "# Databricks notebook source\nx = 'unterminated\n\n# COMMAND ----------\nspark.table(\"s.t\")\n";
        let units = segment_text("nb.py", ContentType::Notebook, text);
        let set = RuleSet::builtin().unwrap();
        let findings = evaluate_file("nb.py", &units, &set);
        let warnings: Vec<&Issue> = findings
            .issues
            .iter()
            .filter(|i| i.rule_id == PARSE_WARNING_RULE)
            .collect();
        assert!(!warnings.is_empty());
        assert!(warnings.iter().all(|i| i.severity == Severity::Info && i.unit_index == 0));
        assert!(findings
            .issues
            .iter()
            .any(|i| i.rule_id == "TBL001" && i.unit_index == 1));
        assert!(findings
            .diagnostics
            .iter()
            .all(|d| matches!(d.kind, DiagnosticKind::ParseWarning { unit_index: 0, .. })));
    }

    #[test]
    fn test_path_rule_fires_once_per_file() {
        let set = RuleSet::builtin().unwrap();
        let units = segment_text("src/Job.scala", ContentType::Script, "val a = 1\nval b = 2\n");
        let findings = evaluate_file("src/Job.scala", &units, &set);
        let scala: Vec<&Issue> = findings
            .issues
            .iter()
            .filter(|i| i.rule_id == "SCALA002")
            .collect();
        assert_eq!(scala.len(), 1);
        assert_eq!(scala[0].byte_range, ByteRange::new(0, 0));
    }

    #[test]
    fn test_non_code_cells_raise_no_parse_warnings() {
        let text = "# Databricks notebook source\n# MAGIC %md\n# MAGIC It's the `raw layer\n\n# COMMAND ----------\n# MAGIC %sh\n# MAGIC echo 'unterminated\n\n# COMMAND ----------\n# MAGIC %pip install 'pkg\n\n# COMMAND ----------\n# MAGIC %run ./lib's\n";
        let units = segment_text("nb.py", ContentType::Notebook, text);
        assert_eq!(units.len(), 4);
        let set = RuleSet::builtin().unwrap();
        let findings = evaluate_file("nb.py", &units, &set);
        assert!(findings.issues.iter().all(|i| i.rule_id != PARSE_WARNING_RULE));
        assert!(findings.diagnostics.is_empty());
    }

    #[test]
    fn test_sql_notebook_magic_cells() {
        let text = "-- Databricks notebook source\nSELECT * FROM s.t\n\n-- COMMAND ----------\n-- MAGIC %python\n-- MAGIC df = spark.table(\"a.b\")\n";
        let units = segment_text("nb.sql", ContentType::Notebook, text);
        let set = RuleSet::builtin().unwrap();
        let findings = evaluate_file("nb.sql", &units, &set);
        let tables: Vec<&str> = findings
            .issues
            .iter()
            .filter(|i| i.rule_id == "TBL001")
            .map(|i| &text[i.byte_range.start..i.byte_range.end])
            .collect();
        assert_eq!(tables, vec!["s.t", "a.b"]);
        assert!(findings.diagnostics.is_empty());
    }

    #[test]
    fn test_builtin_udf_rules() {
        let set = RuleSet::builtin().unwrap();
        let hits = |path: &str, text: &str| -> Vec<String> {
            let units = segment_text(path, ContentType::Script, text);
            let mut ids: Vec<String> = evaluate_file(path, &units, &set)
                .issues
                .into_iter()
                .map(|i| i.rule_id)
                .filter(|id| id.starts_with("UDF"))
                .collect();
            ids.sort();
            ids
        };
        assert_eq!(hits("a.py", "@pandas_udf(\"long\")\ndef f(s): return s\n"), vec!["UDF001"]);
        assert_eq!(hits("a.py", "g = udf(lambda x: x)\n"), vec!["UDF001"]);
        assert!(hits("a.py", "my_udf(1)\n").is_empty());
        assert_eq!(
            hits("Job.scala", "import org.apache.spark.sql.functions.{col, udf}\n"),
            vec!["UDF004"]
        );
        assert!(hits("Job.scala", "import org.apache.spark.sql.functions.col\n").is_empty());
    }
}
