//! Govscan core library.
//!
//! This crate scans checked-out repositories for code that is incompatible
//! with a governed data catalog (legacy mount paths, two-level table names,
//! unsupported UDF registration) and applies reviewed rewrites atomically.
//!
//! High-level modules:
//! - `walk`: Repository traversal, exclusion, size limits and decoding.
//! - `segment`: Splits files into units (lines, notebook cells, SQL statements).
//! - `structural`: Tokenizer and structural matchers for table and path literals.
//! - `rules`: Rule definitions, loading and validation.
//! - `engine`: Evaluates rules against units and produces issues.
//! - `aggregate`: Deduplicates, orders and merges issues into reports.
//! - `scan`: Bounded-queue worker pool driving a whole repository scan.
//! - `rewrite`: Validated, atomic per-file rewrites and dry-run diffs.
//! - `export`: CSV export of merged reports.
//! - `session`: Cancellation and timeout control shared by scan and rewrite.
//! - `config`: Discovery and effective configuration resolution.
//! - `cli`, `output`, `utils`: Command-line surface and printers.
//! - `models`, `error`: Shared data types and error enums.
pub mod aggregate;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod models;
pub mod output;
pub mod rewrite;
pub mod rules;
pub mod scan;
pub mod segment;
pub mod session;
pub mod structural;
pub mod utils;
pub mod walk;
