//! Result model shared by the scan workers, the coordinator and the reporters.

use crate::rules::ReplacementRule;
use serde::Serialize;
use std::path::PathBuf;

/// One import/require site of a replaceable module.
///
/// `line` and `column` are zero-based. `snippet` holds the surrounding lines,
/// each prefixed with its one-based line number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    pub line: usize,
    pub column: usize,
    pub snippet: String,
}

/// A rule that matched a file, with every site where it matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMatch {
    pub rule: ReplacementRule,
    pub occurrences: Vec<Occurrence>,
}

/// The findings for a file with at least one match.
///
/// Files without matches never produce one of these; they are counted as
/// clean by the coordinator instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileScanResult {
    pub path: PathBuf,
    /// Matches in rule order.
    pub matches: Vec<RuleMatch>,
    /// The text that was scanned, kept only when the caller asked for it.
    #[serde(skip)]
    pub contents: Option<String>,
}

impl FileScanResult {
    /// Total number of occurrences across all rules.
    pub fn occurrence_count(&self) -> usize {
        self.matches.iter().map(|m| m.occurrences.len()).sum()
    }
}

/// A file that could not be scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileScanFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// The aggregate of one coordinator run.
///
/// Every input path is accounted for exactly once: in `results`, in
/// `failures`, in the `clean` count, or (after cancellation) in `unscanned`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanOutcome {
    pub results: Vec<FileScanResult>,
    pub failures: Vec<FileScanFailure>,
    /// Files that were scanned and had no match.
    pub clean: usize,
    /// Paths never assigned because the run was cancelled.
    pub unscanned: Vec<PathBuf>,
    pub cancelled: bool,
}

impl ScanOutcome {
    /// Number of paths that went through a worker.
    pub fn processed(&self) -> usize {
        self.results.len() + self.failures.len() + self.clean
    }

    /// Total number of occurrences across all results.
    pub fn occurrence_count(&self) -> usize {
        self.results.iter().map(FileScanResult::occurrence_count).sum()
    }
}
