//! `modswap` finds JavaScript modules that have native or lighter replacements.
//!
//! It provides the core logic for the `modswap` command-line tool but can also
//! be used as a standalone library. The main components are:
//!
//! - `rules`: The replacement catalog, grouped into named manifests.
//! - `coordinator`: Distributes file scans over a bounded pool of worker
//!   threads and aggregates their results, failures and progress.
//! - `matcher`: Locates `import`/`require` sites of a module in source text.
//! - `deps`: Checks `package.json` dependencies against the catalog.
//! - `fixer`: Applies codemods to scanned files, with backups and undo.
//! - `output_formatter`: Renders reports as text, JSON, CSV or SARIF.
//!
//! Files are scanned on dedicated threads driven by a single control loop;
//! the fix stage runs on Rayon. Directory traversal uses the `ignore` crate.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod deps;
pub mod discover;
pub mod errors;
pub mod fixer;
pub mod matcher;
pub mod outcome;
pub mod output_formatter;
pub mod package_manager;
pub mod rules;
pub mod scanner;
mod worker;

// Re-export main types for easier access by library users.
pub use coordinator::{CancelToken, CoordinatorConfig, JobStatus, ProgressEvent, ScanCoordinator};
pub use errors::{Error, Result};
pub use matcher::{EsImportMatcher, ImportMatcher};
pub use outcome::{FileScanFailure, FileScanResult, Occurrence, RuleMatch, ScanOutcome};
pub use output_formatter::{OutputFormat, OutputFormatter, Report};
pub use rules::{ReplacementKind, ReplacementRule, RuleCatalog};
