//! Govscan CLI binary entry point.
//! Resolves configuration, runs scan/plan/apply/fix and maps outcomes to exit codes:
//! 0 clean, 1 findings or unfinished rewrites, 2 fatal errors.
//!
//! The binary only enforces `--timeout`. Interrupting the process kills it
//! outright; in-flight rewrites still land whole or not at all because every
//! file goes through a temp file and rename. Embedders that need cooperative
//! cancellation hold a `SessionControl::cancel_token()` themselves.

use clap::Parser;
use govscan::aggregate::{build_report, merge};
use govscan::cli::{Cli, Commands, CommonArgs, RuleSelection};
use govscan::config::{self, CliOverrides, Effective};
use govscan::error::SessionError;
use govscan::models::rewrite::{PlanSet, RewriteResult, RewriteStatus};
use govscan::models::Report;
use govscan::output;
use govscan::rewrite::{plans_for_rules, RewriteEngine};
use govscan::scan::{scan_repositories, scan_repository};
use govscan::session::SessionControl;
use govscan::utils::{error_prefix, info_prefix, note_prefix, split_repo_arg};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let code = match run(cli.cmd) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", error_prefix(), e);
            2
        }
    };
    std::process::exit(code);
}

/// Logs go to stderr so stdout stays machine readable. `RUST_LOG` wins
/// over `-v`.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cmd: Commands) -> Result<i32, SessionError> {
    match cmd {
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
        Commands::Scan { repos, common } => {
            let repos = if repos.is_empty() {
                vec![".".to_string()]
            } else {
                repos
            };
            // Config is discovered from the first repository.
            let (_, first) = split_repo_arg(&repos[0]);
            let eff = effective(&common, Some(PathBuf::from(first)), None)?;
            let rules = eff.load_rules()?;
            let targets = repos
                .iter()
                .map(|arg| {
                    let (id, path) = split_repo_arg(arg);
                    eff.repository(Path::new(path), id)
                })
                .collect::<Result<Vec<_>, _>>()?;
            let report = scan_repositories(&targets, &rules, &eff.scan_options(), &eff.session())?;
            output::print_report(&report, &eff.output);
            Ok(if report.has_blockers() { 1 } else { 0 })
        }
        Commands::Plan {
            repo,
            select,
            common,
        } => {
            let root = repo.unwrap_or_else(|| PathBuf::from("."));
            let eff = effective(&common, Some(root.clone()), None)?;
            let report = scan_one(&eff, &root, &eff.session())?;
            let plans = plans_for_rules(&report, select.ids());
            if eff.output != "json" {
                eprintln!(
                    "{} {} plan(s) for {} issue(s)",
                    info_prefix(),
                    plans.len(),
                    report.issues.len()
                );
            }
            output::print_plans(&plans);
            Ok(0)
        }
        Commands::Apply {
            plans,
            repo_root,
            dry_run,
            common,
        } => {
            let root = repo_root.unwrap_or_else(|| PathBuf::from("."));
            let eff = effective(&common, Some(root.clone()), dry_run.then_some(true))?;
            let set = read_plans(&plans)?;
            let engine = RewriteEngine::new(root)
                .dry_run(eff.dry_run)
                .with_workers(eff.rewrite_workers);
            let results = engine.apply_all(set.plans, &eff.session())?;
            output::print_rewrite(&results, &eff.output);
            Ok(if unfinished(&results) { 1 } else { 0 })
        }
        Commands::Fix {
            repo,
            select,
            dry_run,
            common,
        } => {
            let root = repo.unwrap_or_else(|| PathBuf::from("."));
            let eff = effective(&common, Some(root.clone()), dry_run.then_some(true))?;
            // One deadline covers the scan, the rewrites and the rescan.
            let control = eff.session();
            let before = scan_one(&eff, &root, &control)?;
            let plans = plans_for_rules(&before, select.ids());
            let engine = RewriteEngine::new(&root)
                .dry_run(eff.dry_run)
                .with_workers(eff.rewrite_workers);
            let results = engine.apply_all(plans, &control)?;
            let after = if eff.dry_run {
                before
            } else {
                scan_one(&eff, &root, &control)?
            };
            let remaining = selected_only(after, &select);
            output::print_fix(&results, &remaining, &eff.output);
            Ok(if unfinished(&results) || !remaining.issues.is_empty() {
                1
            } else {
                0
            })
        }
        Commands::Rules { repo_root, common } => {
            let eff = effective(&common, repo_root, None)?;
            let rules = eff.load_rules()?;
            output::print_rules(&rules, &eff.output);
            Ok(0)
        }
    }
}

fn effective(
    common: &CommonArgs,
    repo_root: Option<PathBuf>,
    dry_run: Option<bool>,
) -> Result<Effective, SessionError> {
    let eff = config::resolve_effective(&CliOverrides {
        repo_root,
        config: common.config.clone(),
        rules: common.rules.clone(),
        no_builtin: common.no_builtin,
        exclude: common.exclude.clone(),
        output: common.output.clone(),
        timeout_secs: common.timeout,
        workers: common.workers,
        dry_run,
    })?;
    if eff.config_path.is_none() && eff.output == "human" {
        eprintln!(
            "{} No govscan.toml found; using defaults.",
            note_prefix()
        );
    }
    tracing::debug!(
        root = %eff.repo_root.display(),
        rules = eff.rule_files.len(),
        builtin = eff.builtin_rules,
        workers = eff.workers,
        "effective configuration"
    );
    Ok(eff)
}

fn scan_one(
    eff: &Effective,
    root: &Path,
    control: &SessionControl,
) -> Result<Report, SessionError> {
    let rules = eff.load_rules()?;
    let repo = eff.repository(root, None)?;
    scan_repository(&repo, &rules, &eff.scan_options(), control)
}

fn read_plans(path: &Path) -> Result<PlanSet, SessionError> {
    let text = fs::read_to_string(path).map_err(|e| SessionError::Plans {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|e| SessionError::Plans {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn unfinished(results: &[RewriteResult]) -> bool {
    results
        .iter()
        .any(|r| matches!(r.status, RewriteStatus::Skipped | RewriteStatus::Failed))
}

/// Keep only the issues of the selected rules; diagnostics stay.
fn selected_only(report: Report, select: &RuleSelection) -> govscan::models::MergedReport {
    let Report {
        repository_id,
        issues,
        diagnostics,
        summary,
    } = report;
    let issues = issues
        .into_iter()
        .filter(|i| select.ids().map_or(true, |ids| ids.contains(&i.rule_id)));
    merge(vec![build_report(
        &repository_id,
        issues,
        diagnostics,
        summary.files_scanned,
    )])
}
