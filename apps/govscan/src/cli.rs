//! CLI argument parsing via `clap`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "govscan",
    version,
    about = "Governance migration scanner",
    long_about = "govscan — scan repositories for storage/governance patterns that block a migration, and apply reviewed rewrites atomically.\n\nConfiguration precedence: CLI > govscan.toml > defaults.",
    after_help = "Examples:\n  govscan scan .\n  govscan scan core=../core etl=../etl --output csv\n  govscan plan . --rule TBL001 > plans.json\n  govscan apply --plans plans.json --dry-run\n  govscan fix . --all",
    arg_required_else_help = true
)]
/// Top-level CLI options and subcommands.
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG wins when set.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Args, Debug, Clone, Default)]
/// Flags shared by every command that loads rules or walks a repository.
pub struct CommonArgs {
    #[arg(long, help = "Config file (default: discovered govscan.toml|yaml)")]
    pub config: Option<PathBuf>,
    #[arg(long = "rules", help = "Rule file (repeatable; replaces configured rule files)")]
    pub rules: Vec<PathBuf>,
    #[arg(long, action = clap::ArgAction::SetTrue, help = "Do not load the builtin rules")]
    pub no_builtin: bool,
    #[arg(long, help = "Exclude glob, relative to the repository root (repeatable)")]
    pub exclude: Vec<String>,
    #[arg(long, help = "Output mode: human|json|csv (default: human)")]
    pub output: Option<String>,
    #[arg(long, help = "Abandon unstarted files after this many seconds")]
    pub timeout: Option<u64>,
    #[arg(long, help = "Worker count (default: available parallelism)")]
    pub workers: Option<usize>,
}

#[derive(Args, Debug, Clone, Default)]
#[group(required = true, multiple = false)]
/// Rule selection for `plan` and `fix`; one of `--rule` or `--all` is required.
pub struct RuleSelection {
    #[arg(long = "rule", help = "Rule id to remediate (repeatable)")]
    pub rule: Vec<String>,
    #[arg(long, action = clap::ArgAction::SetTrue, help = "Remediate every rule with a fix")]
    pub all: bool,
}

impl RuleSelection {
    /// `None` selects every rule.
    pub fn ids(&self) -> Option<&[String]> {
        if self.all {
            None
        } else {
            Some(&self.rule)
        }
    }
}

#[derive(Subcommand)]
/// Supported subcommands for scanning and rewriting.
pub enum Commands {
    /// Show version
    #[command(about = "Show version", long_about = "Print the current govscan version.")]
    Version,
    /// Scan repositories
    #[command(
        about = "Scan repositories",
        long_about = "Walk each repository, evaluate the rule set and print one merged report, blockers first. Exits 1 when any blocker is found.",
        after_help = "Examples:\n  govscan scan\n  govscan scan core=../core ../etl --output json"
    )]
    Scan {
        #[arg(help = "Repository roots as PATH or ID=PATH (default: current dir)")]
        repos: Vec<String>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Emit rewrite plans for review
    #[command(
        about = "Emit rewrite plans",
        long_about = "Scan one repository and print the rewrite plans (JSON) for remediable issues of the selected rules.",
        after_help = "Examples:\n  govscan plan . --rule TBL001 > plans.json"
    )]
    Plan {
        #[arg(help = "Repository root (default: current dir)")]
        repo: Option<PathBuf>,
        #[command(flatten)]
        select: RuleSelection,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Apply reviewed rewrite plans
    #[command(
        about = "Apply rewrite plans",
        long_about = "Apply a reviewed plan file. Each file is rewritten atomically or left untouched; stale or overlapping plans skip their file.",
        after_help = "Examples:\n  govscan apply --plans plans.json --dry-run\n  govscan apply --plans plans.json --repo-root ../core"
    )]
    Apply {
        #[arg(long, help = "Plan file produced by `govscan plan`")]
        plans: PathBuf,
        #[arg(long, help = "Repository root the plans refer to (default: current dir)")]
        repo_root: Option<PathBuf>,
        #[arg(long, action = clap::ArgAction::SetTrue, help = "Validate and print diffs without writing")]
        dry_run: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Plan, apply and re-scan
    #[command(
        about = "Fix and verify",
        long_about = "Scan, apply every available remediation of the selected rules, then re-scan and report what remains of those rules.",
        after_help = "Examples:\n  govscan fix . --rule TBL001\n  govscan fix . --all --dry-run"
    )]
    Fix {
        #[arg(help = "Repository root (default: current dir)")]
        repo: Option<PathBuf>,
        #[command(flatten)]
        select: RuleSelection,
        #[arg(long, action = clap::ArgAction::SetTrue, help = "Validate and print diffs without writing")]
        dry_run: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Validate and list the effective rule set
    #[command(
        about = "List rules",
        long_about = "Load builtin and configured rule files, fail on any invalid definition, and list the result."
    )]
    Rules {
        #[arg(long, help = "Repository root (default: current dir)")]
        repo_root: Option<PathBuf>,
        #[command(flatten)]
        common: CommonArgs,
    },
}
