use govscan::aggregate::merge;
use govscan::error::LoadError;
use govscan::export::{to_csv, CSV_COLUMNS};
use govscan::models::rewrite::{RewritePlan, RewriteStatus};
use govscan::models::{DiagnosticKind, Severity};
use govscan::rewrite::{plans_for_rules, RewriteEngine, TempFileWriter};
use govscan::rules::RuleSet;
use govscan::scan::{scan_repositories, scan_repository, ScanOptions};
use govscan::session::SessionControl;
use govscan::walk::Repository;
use pretty_assertions::assert_eq;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const LEGACY_RULES: &str = r#"
[rules.R1]
content_types = ["script"]
severity = "blocker"
message = "legacy mount accessor {match}"
[rules.R1.pattern]
kind = "regex"
regex = 'legacy_mount_path\("/mnt/([^"]+)"\)'
[rules.R1.remediation]
replace = 'managed_path("/$1")'
"#;

const LEGACY_JOB: &str = "import os\nfrom lib import legacy_mount_path, managed_path\n\ndef load():\n    return legacy_mount_path(\"/mnt/data\")\n";

fn legacy_rules() -> RuleSet {
    RuleSet::from_sources(&[("legacy.toml".to_string(), LEGACY_RULES.to_string())]).unwrap()
}

fn opts(workers: usize) -> ScanOptions {
    ScanOptions {
        workers,
        queue_bound: 2,
    }
}

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn legacy_repo() -> (tempfile::TempDir, Repository) {
    let td = tempfile::tempdir().unwrap();
    write(td.path(), "jobs/etl.py", LEGACY_JOB);
    let repo = Repository::new(td.path()).with_id("core");
    (td, repo)
}

#[test]
fn legacy_mount_is_found_rewritten_and_gone_on_rescan() {
    let (td, repo) = legacy_repo();
    let rules = legacy_rules();
    let control = SessionControl::unbounded();

    let report = scan_repository(&repo, &rules, &opts(2), &control).unwrap();
    assert_eq!(report.issues.len(), 1);
    let issue = &report.issues[0];
    assert_eq!(issue.rule_id, "R1");
    assert_eq!(issue.file_path, "jobs/etl.py");
    assert_eq!(issue.unit_index, 4);
    assert_eq!(issue.line, 5);
    assert_eq!(issue.severity, Severity::Blocker);
    assert_eq!(issue.matched_text, "legacy_mount_path(\"/mnt/data\")");
    assert_eq!(issue.replacement.as_deref(), Some("managed_path(\"/data\")"));

    let plans = plans_for_rules(&report, Some(&["R1".to_string()]));
    assert_eq!(plans.len(), 1);
    let results = RewriteEngine::new(td.path())
        .apply_all(plans, &control)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, RewriteStatus::Applied);

    let text = fs::read_to_string(td.path().join("jobs/etl.py")).unwrap();
    assert_eq!(text, LEGACY_JOB.replace("legacy_mount_path(\"/mnt/data\")", "managed_path(\"/data\")"));

    let rescan = scan_repository(&repo, &rules, &opts(2), &control).unwrap();
    assert_eq!(rescan.for_rule("R1").count(), 0);
}

#[test]
fn dry_run_previews_without_touching_disk() {
    let (td, repo) = legacy_repo();
    let rules = legacy_rules();
    let control = SessionControl::unbounded();
    let report = scan_repository(&repo, &rules, &opts(1), &control).unwrap();

    let results = RewriteEngine::new(td.path())
        .dry_run(true)
        .apply_all(plans_for_rules(&report, None), &control)
        .unwrap();
    assert_eq!(results[0].status, RewriteStatus::Previewed);
    assert!(!results[0].applied);
    let diff = results[0].diff.as_deref().unwrap();
    assert!(diff.starts_with("--- a/jobs/etl.py\n+++ b/jobs/etl.py\n"));
    assert!(diff.contains("\n-    return legacy_mount_path(\"/mnt/data\")\n"));
    assert!(diff.contains("\n+    return managed_path(\"/data\")\n"));
    assert_eq!(fs::read_to_string(td.path().join("jobs/etl.py")).unwrap(), LEGACY_JOB);
}

#[test]
fn overlapping_plans_leave_the_file_untouched() {
    let (td, repo) = legacy_repo();
    let rules = legacy_rules();
    let control = SessionControl::unbounded();
    let report = scan_repository(&repo, &rules, &opts(1), &control).unwrap();

    let first = plans_for_rules(&report, None).remove(0);
    let mut second: RewritePlan = first.clone();
    second.issue_id.rule_id = "R2".into();
    second.replacement_text = "other()".into();

    let results = RewriteEngine::new(td.path())
        .apply_all(vec![first, second], &control)
        .unwrap();
    assert_eq!(results[0].status, RewriteStatus::Skipped);
    assert!(results[0]
        .reason_if_skipped
        .as_deref()
        .unwrap()
        .contains("overlap"));
    assert_eq!(fs::read_to_string(td.path().join("jobs/etl.py")).unwrap(), LEGACY_JOB);
}

#[test]
fn edited_file_makes_plans_stale() {
    let (td, repo) = legacy_repo();
    let rules = legacy_rules();
    let control = SessionControl::unbounded();
    let report = scan_repository(&repo, &rules, &opts(1), &control).unwrap();
    let plans = plans_for_rules(&report, None);

    let edited = format!("# touched after the scan\n{}", LEGACY_JOB);
    write(td.path(), "jobs/etl.py", &edited);

    let results = RewriteEngine::new(td.path())
        .apply_all(plans, &control)
        .unwrap();
    assert_eq!(results[0].status, RewriteStatus::Skipped);
    assert!(results[0]
        .reason_if_skipped
        .as_deref()
        .unwrap()
        .starts_with("stale issue"));
    assert_eq!(fs::read_to_string(td.path().join("jobs/etl.py")).unwrap(), edited);
}

/// Accepts `budget` bytes, then reports a full disk.
struct FillsUp<'a> {
    inner: &'a mut fs::File,
    budget: usize,
    dir: PathBuf,
    temps_at_failure: Arc<AtomicUsize>,
}

impl Write for FillsUp<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.budget == 0 {
            self.temps_at_failure.store(temp_files(&self.dir).len(), Ordering::SeqCst);
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        let n = self.inner.write(&buf[..buf.len().min(self.budget)])?;
        self.budget -= n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn temp_files(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(".govscan-") && name.ends_with(".tmp"))
        .collect()
}

#[test]
fn failed_write_keeps_original_content() {
    let (td, repo) = legacy_repo();
    let rules = legacy_rules();
    let control = SessionControl::unbounded();
    let report = scan_repository(&repo, &rules, &opts(1), &control).unwrap();

    let dir = td.path().join("jobs");
    let seen = Arc::new(AtomicUsize::new(0));
    let writer = {
        let (dir, seen) = (dir.clone(), seen.clone());
        TempFileWriter::with_sink(move |file| {
            Box::new(FillsUp {
                inner: file,
                budget: 16,
                dir: dir.clone(),
                temps_at_failure: seen.clone(),
            })
        })
    };
    let results = RewriteEngine::new(td.path())
        .with_writer(Arc::new(writer))
        .apply_all(plans_for_rules(&report, None), &control)
        .unwrap();
    assert_eq!(results[0].status, RewriteStatus::Failed);
    assert!(!results[0].applied);
    assert!(results[0].reason_if_skipped.as_deref().unwrap().contains("disk full"));
    // The partial temp file existed mid-write and is gone afterwards.
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(temp_files(&dir).is_empty());
    assert_eq!(fs::read(dir.join("etl.py")).unwrap(), LEGACY_JOB.as_bytes());
}

fn mixed_repo(root: &Path) {
    write(
        root,
        "etl/load.py",
        "df = spark.table(\"sales.orders\")\nraw = spark.read.csv(\"/mnt/raw/orders.csv\")\n",
    );
    write(
        root,
        "etl/udfs.py",
        "from pyspark.sql.functions import udf\nspark.udf.register(\"f\", f)\n",
    );
    write(
        root,
        "sql/report.sql",
        "SELECT * FROM finance.ledger;\nINSERT INTO finance.summary SELECT 1;\n",
    );
    write(root, "README.md", "nothing to see at /mnt/raw here\n");
}

#[test]
fn reports_do_not_depend_on_worker_count() {
    let td = tempfile::tempdir().unwrap();
    mixed_repo(td.path());
    let repo = Repository::new(td.path()).with_id("r");
    let rules = RuleSet::builtin().unwrap();
    let control = SessionControl::unbounded();

    let one = scan_repository(&repo, &rules, &opts(1), &control).unwrap();
    let many = scan_repository(&repo, &rules, &opts(8), &control).unwrap();
    assert_eq!(one, many);
    assert_eq!(
        serde_json::to_string(&one).unwrap(),
        serde_json::to_string(&many).unwrap()
    );
    assert_eq!(one.summary.files_scanned, 4);
    assert!(one.has_blockers());
}

#[test]
fn issues_are_ordered_blockers_first_then_by_location() {
    let td = tempfile::tempdir().unwrap();
    mixed_repo(td.path());
    let repo = Repository::new(td.path()).with_id("r");
    let report =
        scan_repository(&repo, &RuleSet::builtin().unwrap(), &opts(3), &SessionControl::unbounded())
            .unwrap();

    assert!(!report.issues.is_empty());
    assert_eq!(report.issues[0].severity, Severity::Blocker);
    for pair in report.issues.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let key_a = (a.severity.rank(), &a.file_path, a.byte_range.start);
        let key_b = (b.severity.rank(), &b.file_path, b.byte_range.start);
        assert!(key_a <= key_b, "{:?} before {:?}", a, b);
    }
}

#[test]
fn merged_report_keeps_issues_per_repository() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    write(a.path(), "job.py", "df = spark.table(\"s.t\")\n");
    write(b.path(), "job.py", "df = spark.table(\"s.t\")\n");
    let repos = vec![
        Repository::new(b.path()).with_id("beta"),
        Repository::new(a.path()).with_id("alpha"),
    ];
    let merged = scan_repositories(
        &repos,
        &RuleSet::builtin().unwrap(),
        &opts(2),
        &SessionControl::unbounded(),
    )
    .unwrap();

    let ids: Vec<(&str, &str)> = merged
        .issues
        .iter()
        .map(|r| (r.repository_id.as_str(), r.issue.rule_id.as_str()))
        .collect();
    assert_eq!(ids, vec![("alpha", "TBL001"), ("beta", "TBL001")]);
    assert_eq!(merged.summary.warnings, 2);
    assert_eq!(merged.summary.files_scanned, 2);

    let csv = to_csv(&merged);
    let mut lines = csv.split("\r\n");
    assert_eq!(lines.next().unwrap(), CSV_COLUMNS.join(","));
    let first = lines.next().unwrap();
    assert!(first.starts_with("alpha,job.py,0,warning,TBL001,"));
    assert!(first.ends_with(",true"));
}

#[test]
fn expired_or_cancelled_sessions_skip_files() {
    let td = tempfile::tempdir().unwrap();
    mixed_repo(td.path());
    let repo = Repository::new(td.path()).with_id("r");
    let rules = RuleSet::builtin().unwrap();

    let expired = SessionControl::new(Some(Duration::ZERO));
    let report = scan_repository(&repo, &rules, &opts(2), &expired).unwrap();
    assert!(report.issues.is_empty());
    assert_eq!(report.summary.files_scanned, 0);
    assert_eq!(report.summary.files_skipped, 4);
    assert!(report.is_partial());
    assert!(report
        .diagnostics
        .iter()
        .all(|d| d.kind == DiagnosticKind::SkippedTimeout));

    let cancelled = SessionControl::unbounded();
    cancelled.cancel_token().cancel();
    let report = scan_repository(&repo, &rules, &opts(2), &cancelled).unwrap();
    assert_eq!(report.summary.files_skipped, 4);
    assert!(report
        .diagnostics
        .iter()
        .all(|d| d.kind == DiagnosticKind::SkippedCancelled));

    let merged = merge(vec![report]);
    assert!(merged.is_partial());
}

#[test]
fn one_session_spans_scan_and_rewrite() {
    let rules = legacy_rules();

    // The deadline is fixed when the session starts, not per phase.
    let (td, repo) = legacy_repo();
    let control = SessionControl::new(Some(Duration::from_secs(1)));
    let report = scan_repository(&repo, &rules, &opts(1), &control).unwrap();
    assert_eq!(report.summary.files_scanned, 1);
    std::thread::sleep(Duration::from_millis(1100));
    let results = RewriteEngine::new(td.path())
        .apply_all(plans_for_rules(&report, None), &control)
        .unwrap();
    assert_eq!(results[0].status, RewriteStatus::Skipped);
    assert_eq!(results[0].reason_if_skipped.as_deref(), Some("SkippedTimeout"));
    assert_eq!(fs::read_to_string(td.path().join("jobs/etl.py")).unwrap(), LEGACY_JOB);

    // A token handed out before the scan still stops the rewrite.
    let (td, repo) = legacy_repo();
    let control = SessionControl::unbounded();
    let token = control.cancel_token();
    let report = scan_repository(&repo, &rules, &opts(1), &control).unwrap();
    token.cancel();
    let results = RewriteEngine::new(td.path())
        .apply_all(plans_for_rules(&report, None), &control)
        .unwrap();
    assert_eq!(results[0].reason_if_skipped.as_deref(), Some("SkippedCancelled"));
    assert_eq!(fs::read_to_string(td.path().join("jobs/etl.py")).unwrap(), LEGACY_JOB);
}

#[test]
fn duplicate_rule_ids_fail_the_whole_set() {
    let err = RuleSet::from_sources(&[
        ("a.toml".to_string(), LEGACY_RULES.to_string()),
        ("b.toml".to_string(), LEGACY_RULES.to_string()),
    ])
    .unwrap_err();
    match err {
        LoadError::DuplicateRuleId { id, first, second } => {
            assert_eq!(id, "R1");
            assert_eq!(first, "a.toml");
            assert_eq!(second, "b.toml");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn mount_table_rewrites_to_external_location() {
    let td = tempfile::tempdir().unwrap();
    write(
        td.path(),
        "ingest.py",
        "df = spark.read.csv(\"dbfs:/mnt/raw/orders/2024.csv\")\n",
    );
    let rules = RuleSet::from_sources(&[(
        "mounts.toml".to_string(),
        "[[mounts]]\nmount_point = \"/mnt/raw\"\nsource = \"abfss://raw@acct.dfs.core.windows.net/\"\n"
            .to_string(),
    )])
    .unwrap();
    let repo = Repository::new(td.path());
    let control = SessionControl::unbounded();
    let report = scan_repository(&repo, &rules, &opts(1), &control).unwrap();
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].rule_id, "MOUNT:/mnt/raw");
    assert_eq!(report.issues[0].matched_text, "dbfs:/mnt/raw");

    let results = RewriteEngine::new(td.path())
        .apply_all(plans_for_rules(&report, None), &control)
        .unwrap();
    assert_eq!(results[0].status, RewriteStatus::Applied);
    assert_eq!(
        fs::read_to_string(td.path().join("ingest.py")).unwrap(),
        "df = spark.read.csv(\"abfss://raw@acct.dfs.core.windows.net/orders/2024.csv\")\n"
    );
}
