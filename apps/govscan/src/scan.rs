//! Scan driver.
//!
//! The walker runs on the calling thread and feeds file descriptors into a
//! bounded channel; a fixed pool of scoped workers loads, segments and
//! evaluates each file into worker-local buffers. The walker blocks once
//! the backlog bound is reached, which caps memory on large repositories.
//! Ordering across workers is arbitrary; the aggregator restores it.

use crate::aggregate::{build_report, merge};
use crate::engine::evaluate_file;
use crate::error::SessionError;
use crate::models::{Diagnostic, DiagnosticKind, Issue, MergedReport, Report};
use crate::rules::RuleSet;
use crate::segment::segment;
use crate::session::SessionControl;
use crate::walk::{load, FileDescriptor, Repository, WalkEntry};
use std::thread;

pub const DEFAULT_QUEUE_BOUND: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub workers: usize,
    /// Capacity of the walker-to-worker channel.
    pub queue_bound: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_bound: DEFAULT_QUEUE_BOUND,
        }
    }
}

pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Default)]
struct WorkerOutput {
    issues: Vec<Issue>,
    diagnostics: Vec<Diagnostic>,
    files_scanned: usize,
}

impl WorkerOutput {
    fn process(&mut self, desc: FileDescriptor, rules: &RuleSet, control: &SessionControl) {
        if let Some(reason) = control.stop_reason() {
            self.diagnostics.push(Diagnostic::new(desc.rel_path, reason));
            return;
        }
        match load(&desc) {
            Ok(file) => {
                let units = segment(&file);
                let findings = evaluate_file(&file.rel_path, &units, rules);
                self.issues.extend(findings.issues);
                self.diagnostics.extend(findings.diagnostics);
                self.files_scanned += 1;
            }
            Err(kind) => {
                tracing::debug!(file = %desc.rel_path, reason = kind.label(), "skipping file");
                self.diagnostics.push(Diagnostic::new(desc.rel_path, kind));
            }
        }
    }
}

/// Scan one repository into a deterministic report.
pub fn scan_repository(
    repo: &Repository,
    rules: &RuleSet,
    opts: &ScanOptions,
    control: &SessionControl,
) -> Result<Report, SessionError> {
    let workers = opts.workers.max(1);
    let (file_tx, file_rx) = crossbeam_channel::bounded::<FileDescriptor>(opts.queue_bound.max(1));
    let mut walk_diagnostics = Vec::new();

    let outputs = thread::scope(|scope| -> Result<Vec<WorkerOutput>, SessionError> {
        let mut handles = Vec::with_capacity(workers);
        for worker_idx in 0..workers {
            let rx = file_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("govscan-scan-{worker_idx}"))
                .spawn_scoped(scope, move || {
                    let mut out = WorkerOutput::default();
                    for desc in rx.iter() {
                        out.process(desc, rules, control);
                    }
                    out
                })
                .map_err(|e| SessionError::Pool(e.to_string()))?;
            handles.push(handle);
        }
        // Workers hold the only receivers now.
        drop(file_rx);

        for entry in repo.walker().walk() {
            match entry {
                WalkEntry::Skipped(diag) => walk_diagnostics.push(diag),
                WalkEntry::File(desc) => {
                    if let Some(reason) = control.stop_reason() {
                        walk_diagnostics.push(Diagnostic::new(desc.rel_path, reason));
                        continue;
                    }
                    if let Err(crossbeam_channel::SendError(desc)) = file_tx.send(desc) {
                        // Every worker is gone; record the file instead of losing it.
                        walk_diagnostics
                            .push(Diagnostic::new(desc.rel_path, DiagnosticKind::SkippedCancelled));
                    }
                }
            }
        }
        drop(file_tx);

        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .map_err(|_| SessionError::Pool("scan worker panicked".to_string()))
            })
            .collect()
    })?;

    let mut issues = Vec::new();
    let mut diagnostics = walk_diagnostics;
    let mut files_scanned = 0;
    for out in outputs {
        issues.extend(out.issues);
        diagnostics.extend(out.diagnostics);
        files_scanned += out.files_scanned;
    }
    let report = build_report(&repo.id, issues, diagnostics, files_scanned);
    tracing::info!(
        repository = %report.repository_id,
        files = report.summary.files_scanned,
        skipped = report.summary.files_skipped,
        blockers = report.summary.blockers,
        warnings = report.summary.warnings,
        infos = report.summary.infos,
        "scan finished"
    );
    Ok(report)
}

/// Scan several repositories (one after another) into a merged report.
pub fn scan_repositories(
    repos: &[Repository],
    rules: &RuleSet,
    opts: &ScanOptions,
    control: &SessionControl,
) -> Result<MergedReport, SessionError> {
    let reports = repos
        .iter()
        .map(|repo| scan_repository(repo, rules, opts, control))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(merge(reports))
}
