//! Rewrite engine.
//!
//! Applies accepted `RewritePlan`s file by file. Per file the engine moves
//! through `Pending -> Validating -> Applying -> Applied | Failed`, or stops
//! at `Validating -> Skipped` (or `Previewed` in dry-run mode). A file is
//! either fully rewritten through a same-directory temp file and an atomic
//! rename, or left untouched.
//!
//! Files are processed in parallel; a per-path lock guarantees a single
//! writer per file.

use crate::error::{RewriteError, SessionError};
use crate::models::rewrite::{RewritePlan, RewriteResult};
use crate::models::Report;
use crate::segment::{segment_text, unit_containing};
use crate::session::SessionControl;
use crate::walk::classify;
use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

const DIFF_CONTEXT: usize = 2;

#[derive(Debug)]
/// Where an atomic write broke down.
pub enum WriteFailure {
    /// No temp file could be created next to the target.
    CreateTemp(io::Error),
    Write(io::Error),
    Persist(io::Error),
}

/// Replaces a file's contents all at once or not at all.
pub trait AtomicWriter: Send + Sync {
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), WriteFailure>;
}

/// Wraps the temp file before the contents are written to it.
pub type SinkWrap = Arc<dyn for<'a> Fn(&'a mut fs::File) -> Box<dyn Write + 'a> + Send + Sync>;

#[derive(Default, Clone)]
/// Temp file in the target's directory, fsync, then rename over the target.
pub struct TempFileWriter {
    sink: Option<SinkWrap>,
}

impl TempFileWriter {
    /// Route the contents through `wrap` instead of straight into the temp
    /// file. A failing sink fails the write and drops the temp file.
    pub fn with_sink(
        wrap: impl for<'a> Fn(&'a mut fs::File) -> Box<dyn Write + 'a> + Send + Sync + 'static,
    ) -> Self {
        Self {
            sink: Some(Arc::new(wrap)),
        }
    }
}

impl AtomicWriter for TempFileWriter {
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), WriteFailure> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(".govscan-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(WriteFailure::CreateTemp)?;
        match &self.sink {
            Some(wrap) => {
                let mut out = wrap(tmp.as_file_mut());
                out.write_all(contents).map_err(WriteFailure::Write)?;
                out.flush().map_err(WriteFailure::Write)?;
            }
            None => tmp.write_all(contents).map_err(WriteFailure::Write)?,
        }
        tmp.as_file().sync_all().map_err(WriteFailure::Write)?;
        if let Ok(meta) = fs::metadata(path) {
            fs::set_permissions(tmp.path(), meta.permissions()).map_err(WriteFailure::Write)?;
        }
        tmp.persist(path).map_err(|e| WriteFailure::Persist(e.error))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
/// One exclusive lock per target path. Entries live only while some
/// rewrite holds them.
pub struct PathLocks {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl PathLocks {
    pub fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks.entry(path.to_path_buf()).or_default().clone()
    }

    /// Drop the entry for `path` once no caller still holds its lock.
    pub fn release(&self, path: &Path) {
        self.locks.remove_if(path, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Repository-relative form of a plan path: `/`-separated, no `.` parts.
/// Absolute paths and `..` are rejected so a plan can never reach outside
/// the engine root.
pub fn normalize_plan_path(file_path: &str) -> Result<String, RewriteError> {
    let unsafe_path = |reason| RewriteError::UnsafePath {
        file_path: file_path.to_string(),
        reason,
    };
    let mut parts = Vec::new();
    for component in Path::new(file_path).components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) => parts.push(part),
                None => return Err(unsafe_path("path is not valid UTF-8")),
            },
            Component::CurDir => {}
            Component::ParentDir => return Err(unsafe_path("path leaves the repository root")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path("path is absolute"))
            }
        }
    }
    if parts.is_empty() {
        return Err(unsafe_path("path names no file"));
    }
    Ok(parts.join("/"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteState {
    Pending,
    Validating,
    Applying,
    Applied,
    Previewed,
    Skipped,
    Failed,
}

impl RewriteState {
    fn can_enter(self, next: RewriteState) -> bool {
        use RewriteState::*;
        matches!(
            (self, next),
            (Pending, Validating)
                | (Validating, Applying)
                | (Validating, Skipped)
                | (Validating, Previewed)
                | (Applying, Applied)
                | (Applying, Failed)
        )
    }
}

struct FileRewrite<'a> {
    file_path: &'a str,
    state: RewriteState,
}

impl<'a> FileRewrite<'a> {
    fn new(file_path: &'a str) -> Self {
        Self {
            file_path,
            state: RewriteState::Pending,
        }
    }

    fn enter(&mut self, next: RewriteState) {
        debug_assert!(
            self.state.can_enter(next),
            "illegal rewrite transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!(file = self.file_path, from = ?self.state, to = ?next, "rewrite state");
        self.state = next;
    }
}

/// Validated outcome of a file's plans: fresh content and its rewrite.
struct Validated {
    before: String,
    after: String,
}

pub struct RewriteEngine {
    root: PathBuf,
    dry_run: bool,
    writer: Arc<dyn AtomicWriter>,
    locks: PathLocks,
    workers: Option<usize>,
}

impl RewriteEngine {
    /// Engine for files under `root`; plan file paths are relative to it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dry_run: false,
            writer: Arc::new(TempFileWriter::default()),
            locks: PathLocks::default(),
            workers: None,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_writer(mut self, writer: Arc<dyn AtomicWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Size of the file-level worker pool; `None` uses rayon's global pool.
    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        self.workers = workers;
        self
    }

    /// Apply all plans for one file. Validation problems skip the file and
    /// write failures fail it; only a missing temp file aborts the session.
    pub fn apply(
        &self,
        file_path: &str,
        plans: &[RewritePlan],
    ) -> Result<RewriteResult, SessionError> {
        let rel = match normalize_plan_path(file_path) {
            Ok(rel) => rel,
            Err(err) => {
                tracing::warn!(file = file_path, reason = %err, "rewrite skipped");
                return Ok(RewriteResult::skipped(file_path, err.to_string(), plans.len()));
            }
        };
        let abs = self.root.join(&rel);
        let lock = self.locks.lock_for(&abs);
        let result = {
            let _guard = lock.lock();
            self.apply_locked(&rel, &abs, plans)
        };
        drop(lock);
        self.locks.release(&abs);
        result
    }

    fn apply_locked(
        &self,
        file_path: &str,
        abs: &Path,
        plans: &[RewritePlan],
    ) -> Result<RewriteResult, SessionError> {
        let mut job = FileRewrite::new(file_path);
        job.enter(RewriteState::Validating);
        let checked =
            reject_links(&self.root, file_path).and_then(|()| validate(abs, file_path, plans));
        let validated = match checked {
            Ok(v) => v,
            Err(err) => {
                job.enter(RewriteState::Skipped);
                tracing::info!(file = file_path, reason = %err, "rewrite skipped");
                return Ok(RewriteResult::skipped(file_path, err.to_string(), plans.len()));
            }
        };

        if self.dry_run {
            job.enter(RewriteState::Previewed);
            let diff = render_diff(file_path, &validated.before, &validated.after);
            return Ok(RewriteResult::previewed(file_path, diff, plans.len()));
        }

        job.enter(RewriteState::Applying);
        match self.writer.write_atomic(abs, validated.after.as_bytes()) {
            Ok(()) => {
                job.enter(RewriteState::Applied);
                Ok(RewriteResult::applied(file_path, plans.len()))
            }
            Err(WriteFailure::CreateTemp(source)) => {
                job.enter(RewriteState::Failed);
                Err(SessionError::TempFile {
                    path: abs.to_path_buf(),
                    source,
                })
            }
            Err(WriteFailure::Write(e)) | Err(WriteFailure::Persist(e)) => {
                job.enter(RewriteState::Failed);
                let err = RewriteError::io(abs, e);
                tracing::warn!(file = file_path, error = %err, "rewrite failed");
                Ok(RewriteResult::failed(file_path, err.to_string(), plans.len()))
            }
        }
    }

    pub fn locks(&self) -> &PathLocks {
        &self.locks
    }

    /// Group plans by normalized file path and apply each group, files in
    /// parallel. Results are ordered by file path. Files not started before
    /// the session stops are reported as skipped.
    pub fn apply_all(
        &self,
        plans: Vec<RewritePlan>,
        control: &SessionControl,
    ) -> Result<Vec<RewriteResult>, SessionError> {
        let mut by_file: BTreeMap<String, Vec<RewritePlan>> = BTreeMap::new();
        for mut plan in plans {
            // Unsafe paths keep their raw key; `apply` skips them.
            let key = normalize_plan_path(&plan.issue_id.file_path)
                .unwrap_or_else(|_| plan.issue_id.file_path.clone());
            plan.issue_id.file_path = key.clone();
            by_file.entry(key).or_default().push(plan);
        }
        let groups: Vec<(String, Vec<RewritePlan>)> = by_file.into_iter().collect();
        let run = || {
            groups
                .par_iter()
                .map(|(file, file_plans)| match control.stop_reason() {
                    Some(reason) => Ok(RewriteResult::skipped(
                        file.as_str(),
                        reason.label(),
                        file_plans.len(),
                    )),
                    None => self.apply(file, file_plans),
                })
                .collect::<Result<Vec<_>, _>>()
        };
        match self.workers {
            Some(n) => rayon::ThreadPoolBuilder::new()
                .num_threads(n.max(1))
                .thread_name(|i| format!("govscan-rewrite-{i}"))
                .build()
                .map_err(|e| SessionError::Pool(e.to_string()))?
                .install(run),
            None => run(),
        }
    }
}

/// Apply one file's plans with the default engine rooted at `root`.
pub fn apply(
    root: &Path,
    file_path: &str,
    plans: &[RewritePlan],
) -> Result<RewriteResult, SessionError> {
    RewriteEngine::new(root).apply(file_path, plans)
}

/// Plans for every remediable issue of the selected rules (all when `None`).
pub fn plans_for_rules(report: &Report, rule_ids: Option<&[String]>) -> Vec<RewritePlan> {
    report
        .issues
        .iter()
        .filter(|i| rule_ids.map_or(true, |ids| ids.iter().any(|id| *id == i.rule_id)))
        .filter_map(RewritePlan::from_issue)
        .collect()
}

fn validate(abs: &Path, file_path: &str, plans: &[RewritePlan]) -> Result<Validated, RewriteError> {
    let foreign = plans.iter().find(|p| {
        normalize_plan_path(&p.issue_id.file_path).map_or(true, |rel| rel != file_path)
    });
    if let Some(foreign) = foreign {
        return Err(RewriteError::ForeignPlan {
            issue_id: foreign.issue_id.clone(),
            file_path: file_path.to_string(),
        });
    }
    let mut ordered: Vec<&RewritePlan> = plans.iter().collect();
    ordered.sort_by_key(|p| (p.issue_id.byte_range, p.issue_id.rule_id.clone()));
    check_overlaps(&ordered)?;

    let raw = fs::read(abs).map_err(|e| RewriteError::io(abs, e))?;
    let before = String::from_utf8(raw)
        .map_err(|e| RewriteError::io(abs, io::Error::new(io::ErrorKind::InvalidData, e)))?;

    for plan in &ordered {
        let range = plan.issue_id.byte_range;
        let found = before.get(range.start..range.end);
        if found != Some(plan.original_text.as_str()) {
            return Err(RewriteError::StaleIssue {
                issue_id: plan.issue_id.clone(),
                expected: plan.original_text.clone(),
                found: found.unwrap_or_default().to_string(),
            });
        }
    }

    let units = segment_text(file_path, classify(Path::new(file_path), &before), &before);
    for plan in &ordered {
        if unit_containing(&units, &plan.issue_id.byte_range).is_none() {
            return Err(RewriteError::UnsupportedSpan {
                issue_id: plan.issue_id.clone(),
            });
        }
    }

    let mut after = before.clone();
    for plan in ordered.iter().rev() {
        let range = plan.issue_id.byte_range;
        after.replace_range(range.start..range.end, &plan.replacement_text);
    }
    Ok(Validated { before, after })
}

/// A symbolic link anywhere below the root could point outside it.
fn reject_links(root: &Path, rel: &str) -> Result<(), RewriteError> {
    let mut path = root.to_path_buf();
    for part in rel.split('/') {
        path.push(part);
        if let Ok(meta) = fs::symlink_metadata(&path) {
            if meta.file_type().is_symlink() {
                return Err(RewriteError::UnsafePath {
                    file_path: rel.to_string(),
                    reason: "path goes through a symbolic link",
                });
            }
        }
    }
    Ok(())
}

/// Plans must be sorted by range. Any overlap rejects the whole file.
fn check_overlaps(ordered: &[&RewritePlan]) -> Result<(), RewriteError> {
    let Some((first, rest)) = ordered.split_first() else {
        return Ok(());
    };
    let mut reach = *first;
    let mut prev = *first;
    for &plan in rest {
        let range = &plan.issue_id.byte_range;
        for other in [prev, reach] {
            if other.issue_id.byte_range.overlaps(range) {
                return Err(RewriteError::Conflict {
                    first: other.issue_id.clone(),
                    second: plan.issue_id.clone(),
                });
            }
        }
        if range.end > reach.issue_id.byte_range.end {
            reach = plan;
        }
        prev = plan;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiffOp<'a> {
    Same(&'a str),
    Del(&'a str),
    Add(&'a str),
}

fn diff_ops<'a>(old: &'a str, new: &'a str) -> Vec<DiffOp<'a>> {
    let a: Vec<&str> = old.lines().collect();
    let b: Vec<&str> = new.lines().collect();
    let mut ops = Vec::with_capacity(a.len().max(b.len()));
    if a.len() == b.len() {
        // In-place edits: pair lines up and group changed runs.
        let mut i = 0;
        while i < a.len() {
            if a[i] == b[i] {
                ops.push(DiffOp::Same(a[i]));
                i += 1;
                continue;
            }
            let start = i;
            while i < a.len() && a[i] != b[i] {
                i += 1;
            }
            ops.extend(a[start..i].iter().copied().map(DiffOp::Del));
            ops.extend(b[start..i].iter().copied().map(DiffOp::Add));
        }
        return ops;
    }
    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    ops.extend(a[..prefix].iter().copied().map(DiffOp::Same));
    ops.extend(a[prefix..a.len() - suffix].iter().copied().map(DiffOp::Del));
    ops.extend(b[prefix..b.len() - suffix].iter().copied().map(DiffOp::Add));
    ops.extend(a[a.len() - suffix..].iter().copied().map(DiffOp::Same));
    ops
}

/// Unified-style diff with a few lines of context around each change.
pub fn render_diff(file_path: &str, old: &str, new: &str) -> String {
    let ops = diff_ops(old, new);
    let mut out = format!("--- a/{}\n+++ b/{}\n", file_path, file_path);

    let mut hunks: Vec<(usize, usize)> = Vec::new();
    for (i, op) in ops.iter().enumerate() {
        if matches!(op, DiffOp::Same(_)) {
            continue;
        }
        let lo = i.saturating_sub(DIFF_CONTEXT);
        let hi = (i + 1 + DIFF_CONTEXT).min(ops.len());
        match hunks.last_mut() {
            Some(h) if lo <= h.1 => h.1 = h.1.max(hi),
            _ => hunks.push((lo, hi)),
        }
    }

    // Old/new line numbers before each op.
    let mut old_no = Vec::with_capacity(ops.len() + 1);
    let mut new_no = Vec::with_capacity(ops.len() + 1);
    let (mut o, mut n) = (0usize, 0usize);
    for op in &ops {
        old_no.push(o);
        new_no.push(n);
        match op {
            DiffOp::Same(_) => {
                o += 1;
                n += 1;
            }
            DiffOp::Del(_) => o += 1,
            DiffOp::Add(_) => n += 1,
        }
    }
    old_no.push(o);
    new_no.push(n);

    for (lo, hi) in hunks {
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            old_no[lo] + 1,
            old_no[hi] - old_no[lo],
            new_no[lo] + 1,
            new_no[hi] - new_no[lo]
        ));
        for op in &ops[lo..hi] {
            let (mark, line) = match op {
                DiffOp::Same(l) => (' ', l),
                DiffOp::Del(l) => ('-', l),
                DiffOp::Add(l) => ('+', l),
            };
            out.push(mark);
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
