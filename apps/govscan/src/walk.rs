//! Source walker.
//!
//! Enumerates regular files under a repository root, lazily and from
//! scratch on every call. Symlinks are never followed and `.git` is pruned.
//! Oversize and unreadable files become diagnostics; the walk itself never
//! fails.

use crate::models::{ContentType, Diagnostic, DiagnosticKind};
use crate::segment::notebook_comment_prefix;
use glob::Pattern;
use ignore::WalkBuilder;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;
const SNIFF_LEN: usize = 8 * 1024;

const SCRIPT_EXTENSIONS: &[&str] = &[
    "py", "pyw", "scala", "sc", "r", "sh", "bash", "java", "kt", "js", "ts", "ps1",
];

#[derive(Debug, Clone)]
/// A checked-out repository to scan. Read-only to the scanner.
pub struct Repository {
    pub id: String,
    pub root: PathBuf,
    pub exclude: Vec<Pattern>,
    pub max_file_bytes: u64,
}

impl Repository {
    /// Repository rooted at `root`, identified by its directory name.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let id = root
            .canonicalize()
            .ok()
            .as_deref()
            .and_then(Path::file_name)
            .or_else(|| root.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "repo".to_string());
        Self {
            id,
            root,
            exclude: Vec::new(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_exclude(mut self, exclude: Vec<Pattern>) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn with_max_file_bytes(mut self, limit: u64) -> Self {
        self.max_file_bytes = limit;
        self
    }

    pub fn walker(&self) -> Walker<'_> {
        Walker { repo: self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    Utf8,
    Utf8Bom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A discovered file, before its content is read.
pub struct FileDescriptor {
    pub path: PathBuf,
    /// Path relative to the repository root, `/`-separated.
    pub rel_path: String,
    pub size: u64,
    pub max_bytes: u64,
}

#[derive(Debug, Clone)]
/// Immutable snapshot of one file for the duration of a scan pass.
pub struct SourceFile {
    pub path: PathBuf,
    pub rel_path: String,
    pub content_type: ContentType,
    pub encoding: Encoding,
    /// Decoded content; byte offsets into it equal offsets into the file.
    pub text: String,
}

impl SourceFile {
    pub fn raw_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }
}

#[derive(Debug)]
pub enum WalkEntry {
    File(FileDescriptor),
    Skipped(Diagnostic),
}

/// Restartable file enumeration for one repository.
pub struct Walker<'a> {
    repo: &'a Repository,
}

impl<'a> Walker<'a> {
    /// Start a fresh walk. Entries come in path order.
    pub fn walk(&self) -> impl Iterator<Item = WalkEntry> + 'a {
        let repo = self.repo;
        let root = repo.root.clone();
        let exclude = repo.exclude.clone();
        let mut builder = WalkBuilder::new(&repo.root);
        builder
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_path(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                if entry.file_name() == ".git" {
                    return false;
                }
                let rel = rel_path(&root, entry.path());
                rel.is_empty() || !exclude.iter().any(|p| p.matches(&rel))
            });
        builder
            .build()
            .filter_map(move |res| match res {
                Ok(entry) => describe(repo, &entry),
                Err(err) => {
                    let path = error_path(&err)
                        .map(|p| rel_path(&repo.root, p))
                        .unwrap_or_default();
                    tracing::warn!(path = %path, error = %err, "walk error");
                    Some(WalkEntry::Skipped(Diagnostic::new(
                        path,
                        DiagnosticKind::SkippedUnreadable {
                            reason: err.to_string(),
                        },
                    )))
                }
            })
    }
}

/// Convenience for `repo.walker().walk()`.
pub fn walk(repo: &Repository) -> impl Iterator<Item = WalkEntry> + '_ {
    repo.walker().walk()
}

fn describe(repo: &Repository, entry: &ignore::DirEntry) -> Option<WalkEntry> {
    let file_type = entry.file_type()?;
    if file_type.is_symlink() {
        tracing::debug!(path = %entry.path().display(), "symlink not followed");
        return None;
    }
    if !file_type.is_file() {
        return None;
    }
    let rel = rel_path(&repo.root, entry.path());
    let size = match entry.metadata() {
        Ok(m) => m.len(),
        Err(err) => {
            return Some(WalkEntry::Skipped(Diagnostic::new(
                rel,
                DiagnosticKind::SkippedUnreadable {
                    reason: err.to_string(),
                },
            )))
        }
    };
    if size > repo.max_file_bytes {
        tracing::debug!(path = %rel, size, "file over size ceiling");
        return Some(WalkEntry::Skipped(Diagnostic::new(
            rel,
            DiagnosticKind::SkippedOversize {
                size,
                limit: repo.max_file_bytes,
            },
        )));
    }
    Some(WalkEntry::File(FileDescriptor {
        path: entry.path().to_path_buf(),
        rel_path: rel,
        size,
        max_bytes: repo.max_file_bytes,
    }))
}

fn error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child),
        _ => None,
    }
}

/// Read, sniff and classify a discovered file.
pub fn load(desc: &FileDescriptor) -> Result<SourceFile, DiagnosticKind> {
    let raw = fs::read(&desc.path).map_err(|e| DiagnosticKind::SkippedUnreadable {
        reason: e.to_string(),
    })?;
    // The file may have grown since it was listed.
    if raw.len() as u64 > desc.max_bytes {
        return Err(DiagnosticKind::SkippedOversize {
            size: raw.len() as u64,
            limit: desc.max_bytes,
        });
    }
    if raw[..raw.len().min(SNIFF_LEN)].contains(&0) {
        return Err(DiagnosticKind::SkippedBinary);
    }
    let encoding = if raw.starts_with(&[0xEF, 0xBB, 0xBF]) {
        Encoding::Utf8Bom
    } else {
        Encoding::Utf8
    };
    let text = String::from_utf8(raw).map_err(|e| DiagnosticKind::SkippedUnreadable {
        reason: format!("not valid UTF-8: {}", e.utf8_error()),
    })?;
    let content_type = classify(Path::new(&desc.rel_path), &text);
    Ok(SourceFile {
        path: desc.path.clone(),
        rel_path: desc.rel_path.clone(),
        content_type,
        encoding,
        text,
    })
}

/// Classify by content sniff first (notebook marker), then by extension.
pub fn classify(path: &Path, text: &str) -> ContentType {
    if notebook_comment_prefix(text).is_some() {
        return ContentType::Notebook;
    }
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if ext == "sql" {
        ContentType::Sql
    } else if SCRIPT_EXTENSIONS.contains(&ext.as_str()) {
        ContentType::Script
    } else {
        ContentType::Other
    }
}

/// Repository-relative, `/`-separated path.
pub fn rel_path(root: &Path, path: &Path) -> String {
    let rel = pathdiff::diff_paths(path, root).unwrap_or_else(|| path.to_path_buf());
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn files(repo: &Repository) -> Vec<String> {
        walk(repo)
            .filter_map(|e| match e {
                WalkEntry::File(d) => Some(d.rel_path),
                WalkEntry::Skipped(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_walk_skips_git_and_excluded() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join(".git/config"), "x").unwrap();
        fs::write(root.join("src/a.py"), "print(1)\n").unwrap();
        fs::write(root.join("build/b.py"), "print(2)\n").unwrap();
        let repo = Repository::new(root).with_exclude(vec![Pattern::new("build").unwrap()]);
        assert_eq!(files(&repo), vec!["src/a.py".to_string()]);
        // restartable: a second walk sees the same files
        assert_eq!(files(&repo), vec!["src/a.py".to_string()]);
    }

    #[test]
    fn test_oversize_becomes_diagnostic() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("big.sql"), "x".repeat(64)).unwrap();
        let repo = Repository::new(dir.path()).with_max_file_bytes(10);
        let entries: Vec<_> = walk(&repo).collect();
        assert_eq!(entries.len(), 1);
        match &entries[0] {
            WalkEntry::Skipped(d) => {
                assert_eq!(d.file_path, "big.sql");
                assert_eq!(
                    d.kind,
                    DiagnosticKind::SkippedOversize { size: 64, limit: 10 }
                );
            }
            other => panic!("unexpected entry {:?}", other),
        }
    }

    #[test]
    fn test_load_classifies_and_rejects_binary() {
        let dir = tempdir().unwrap();
        let nb = dir.path().join("etl.txt");
        fs::write(&nb, "# Databricks notebook source\nprint(1)\n").unwrap();
        let bin = dir.path().join("blob.py");
        fs::write(&bin, [0u8, 1, 2, 3]).unwrap();
        let repo = Repository::new(dir.path());
        let mut loaded = Vec::new();
        for entry in walk(&repo) {
            if let WalkEntry::File(d) = entry {
                loaded.push((d.rel_path.clone(), load(&d).map(|f| f.content_type)));
            }
        }
        assert_eq!(
            loaded,
            vec![
                ("blob.py".to_string(), Err(DiagnosticKind::SkippedBinary)),
                ("etl.txt".to_string(), Ok(ContentType::Notebook)),
            ]
        );
    }

    #[test]
    fn test_invalid_utf8_is_unreadable() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bad.py"), [b'a', 0xC3, 0x28]).unwrap();
        let repo = Repository::new(dir.path());
        let desc = walk(&repo)
            .find_map(|e| match e {
                WalkEntry::File(d) => Some(d),
                WalkEntry::Skipped(_) => None,
            })
            .unwrap();
        assert!(matches!(
            load(&desc),
            Err(DiagnosticKind::SkippedUnreadable { .. })
        ));
    }

    #[test]
    fn test_classify_by_extension() {
        assert_eq!(classify(Path::new("a/b.SQL"), "select 1"), ContentType::Sql);
        assert_eq!(classify(Path::new("job.scala"), "object A"), ContentType::Script);
        assert_eq!(classify(Path::new("README.md"), "# Title"), ContentType::Other);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_not_followed() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("real")).unwrap();
        fs::write(root.join("real/a.py"), "x = 1\n").unwrap();
        std::os::unix::fs::symlink(root, root.join("real/loop")).unwrap();
        let repo = Repository::new(root);
        assert_eq!(files(&repo), vec!["real/a.py".to_string()]);
    }
}
