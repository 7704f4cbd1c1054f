//! Configuration discovery and effective settings resolution.
//!
//! Govscan reads `govscan.toml|yaml|yml` from the repository root (or the
//! closest ancestor) and merges it with CLI flags to produce an `Effective`
//! config. Defaults:
//! - `rules`: none (builtin rules only)
//! - `builtin_rules`: true
//! - `output`: `human`
//! - `scan.max_file_bytes`: 2 MiB
//! - `scan.workers`: available parallelism
//! - `scan.queue_bound`: 64
//! - `rewrite.dry_run`: false
//!
//! Overrides precedence: CLI > config file > defaults. A config file that
//! exists but does not parse is an error, never a silent fallback.

use crate::error::{ConfigError, LoadError};
use crate::rules::RuleSet;
use crate::scan::{default_workers, ScanOptions, DEFAULT_QUEUE_BOUND};
use crate::session::SessionControl;
use crate::walk::{Repository, DEFAULT_MAX_FILE_BYTES};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_NAMES: [&str; 3] = ["govscan.toml", "govscan.yaml", "govscan.yml"];
pub const OUTPUT_FORMATS: [&str; 3] = ["human", "json", "csv"];

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
/// Scan settings under `[scan]`.
pub struct ScanCfg {
    pub max_file_bytes: Option<u64>,
    pub workers: Option<usize>,
    pub queue_bound: Option<usize>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
/// Rewrite settings under `[rewrite]`.
pub struct RewriteCfg {
    pub dry_run: Option<bool>,
    pub workers: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
/// Root configuration loaded from `govscan.toml|yaml`.
pub struct GovscanConfig {
    /// Rule files, relative to the config file's directory.
    pub rules: Option<Vec<String>>,
    pub builtin_rules: Option<bool>,
    pub exclude: Option<Vec<String>>,
    pub output: Option<String>,
    pub scan: Option<ScanCfg>,
    pub rewrite: Option<RewriteCfg>,
}

#[derive(Debug, Default, Clone)]
/// Values given on the command line; `None`/empty means "not given".
pub struct CliOverrides {
    pub repo_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub rules: Vec<PathBuf>,
    pub no_builtin: bool,
    pub exclude: Vec<String>,
    pub output: Option<String>,
    pub timeout_secs: Option<u64>,
    pub workers: Option<usize>,
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone)]
/// Fully-resolved configuration used by commands after applying precedence.
pub struct Effective {
    pub repo_root: PathBuf,
    pub config_path: Option<PathBuf>,
    pub rule_files: Vec<PathBuf>,
    pub builtin_rules: bool,
    pub exclude: Vec<String>,
    pub output: String,
    pub max_file_bytes: u64,
    pub workers: usize,
    pub queue_bound: usize,
    pub timeout: Option<Duration>,
    pub dry_run: bool,
    pub rewrite_workers: Option<usize>,
}

/// Walk upward from `start` to detect the repository root.
///
/// Stops when a `govscan.toml|yaml|yml` or a `.git` directory is found.
pub fn detect_repo_root(start: &Path) -> PathBuf {
    let mut cur = start;
    loop {
        if CONFIG_NAMES.iter().any(|n| cur.join(n).exists()) || cur.join(".git").exists() {
            return cur.to_path_buf();
        }
        match cur.parent() {
            Some(p) => cur = p,
            None => return start.to_path_buf(),
        }
    }
}

/// Parse one config file; the format follows the extension.
pub fn load_config_file(path: &Path) -> Result<GovscanConfig, ConfigError> {
    let s = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        serde_yaml::from_str(&s).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    } else {
        toml::from_str(&s).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Load `GovscanConfig` from `govscan.toml` or `govscan.yaml|yml` if present.
pub fn load_config(root: &Path) -> Result<Option<(PathBuf, GovscanConfig)>, ConfigError> {
    for name in CONFIG_NAMES {
        let p = root.join(name);
        if p.exists() {
            let cfg = load_config_file(&p)?;
            return Ok(Some((p, cfg)));
        }
    }
    Ok(None)
}

/// Resolve `Effective` by merging CLI flags, discovered config, and defaults.
pub fn resolve_effective(cli: &CliOverrides) -> Result<Effective, ConfigError> {
    let start = cli.repo_root.clone().unwrap_or_else(|| PathBuf::from("."));
    let repo_root = detect_repo_root(&start);
    let loaded = match cli.config.as_ref() {
        Some(path) => Some((path.clone(), load_config_file(path)?)),
        None => load_config(&repo_root)?,
    };
    let (config_path, cfg) = match loaded {
        Some((p, c)) => (Some(p), c),
        None => (None, GovscanConfig::default()),
    };
    let config_dir = config_path
        .as_ref()
        .and_then(|p| p.parent())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| repo_root.clone());

    // CLI rule files replace the configured list.
    let rule_files = if cli.rules.is_empty() {
        cfg.rules
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|r| config_dir.join(r))
            .collect()
    } else {
        cli.rules.clone()
    };
    let builtin_rules = !cli.no_builtin && cfg.builtin_rules.unwrap_or(true);

    // Excludes accumulate.
    let mut exclude = cfg.exclude.clone().unwrap_or_default();
    for pat in &cli.exclude {
        if !exclude.contains(pat) {
            exclude.push(pat.clone());
        }
    }

    let output = cli
        .output
        .clone()
        .or(cfg.output.clone())
        .unwrap_or_else(|| "human".to_string());
    if !OUTPUT_FORMATS.contains(&output.as_str()) {
        return Err(ConfigError::InvalidValue {
            key: "output".into(),
            value: output,
            expected: OUTPUT_FORMATS.join("|"),
        });
    }

    let scan = cfg.scan.clone().unwrap_or_default();
    let rewrite = cfg.rewrite.clone().unwrap_or_default();
    let workers = cli.workers.or(scan.workers).unwrap_or_else(default_workers);
    if workers == 0 {
        return Err(ConfigError::InvalidValue {
            key: "workers".into(),
            value: "0".into(),
            expected: "a positive number".into(),
        });
    }

    Ok(Effective {
        repo_root,
        config_path,
        rule_files,
        builtin_rules,
        exclude,
        output,
        max_file_bytes: scan.max_file_bytes.unwrap_or(DEFAULT_MAX_FILE_BYTES),
        workers,
        queue_bound: scan.queue_bound.unwrap_or(DEFAULT_QUEUE_BOUND).max(1),
        timeout: cli
            .timeout_secs
            .or(scan.timeout_secs)
            .map(Duration::from_secs),
        dry_run: cli.dry_run.or(rewrite.dry_run).unwrap_or(false),
        rewrite_workers: cli.workers.or(rewrite.workers),
    })
}

impl Effective {
    pub fn exclude_patterns(&self) -> Result<Vec<glob::Pattern>, ConfigError> {
        self.exclude
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|source| ConfigError::InvalidExclude {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect()
    }

    /// Repository at `root` with the effective exclusions and size limit.
    pub fn repository(&self, root: &Path, id: Option<&str>) -> Result<Repository, ConfigError> {
        let mut repo = Repository::new(root)
            .with_exclude(self.exclude_patterns()?)
            .with_max_file_bytes(self.max_file_bytes);
        if let Some(id) = id {
            repo = repo.with_id(id);
        }
        Ok(repo)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            workers: self.workers,
            queue_bound: self.queue_bound,
        }
    }

    /// Fresh session control; the timeout clock starts now.
    pub fn session(&self) -> SessionControl {
        SessionControl::new(self.timeout)
    }

    pub fn load_rules(&self) -> Result<RuleSet, LoadError> {
        RuleSet::load(&self.rule_files, self.builtin_rules)
    }
}
