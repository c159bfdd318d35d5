//! Per-archive outcome records and the run-level summary.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Outcome of the extraction decision for one logical archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExtractionStatus {
    Extracted,
    SkippedExisting,
    SkippedWhatIf,
    SkippedMissingDependency,
    Failed,
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractionStatus::Extracted => "extracted",
            ExtractionStatus::SkippedExisting => "skipped (exists)",
            ExtractionStatus::SkippedWhatIf => "skipped (what-if)",
            ExtractionStatus::SkippedMissingDependency => "skipped (missing tool)",
            ExtractionStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Immutable record of one logical archive's outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    /// Representative path, the first part of the set.
    pub archive: PathBuf,
    pub destination: PathBuf,
    pub status: ExtractionStatus,
    /// Populated iff status is SkippedMissingDependency or Failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate outcome of one orchestrator run.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub results: Vec<ExtractionResult>,
    pub total: usize,
    pub extracted: usize,
    pub skipped_existing: usize,
    pub skipped_what_if: usize,
    pub skipped_missing_dependency: usize,
    pub failed: usize,
    /// Number of discovery/extraction passes (> 1 only with nested extraction).
    pub passes: usize,
    /// Roots that could not be scanned at all.
    pub root_errors: Vec<String>,
}

impl RunSummary {
    /// True when every archive reached Extracted or an intentional skip and
    /// every root was scannable.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped_missing_dependency == 0 && self.root_errors.is_empty()
    }

    /// Human-readable per-archive table plus totals.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        for result in &self.results {
            out.push_str(&format!(
                "{:<24} {} -> {}",
                result.status.to_string(),
                result.archive.display(),
                result.destination.display()
            ));
            if let Some(err) = &result.error {
                out.push_str(&format!("  [{}]", err));
            }
            out.push('\n');
        }
        for err in &self.root_errors {
            out.push_str(&format!("root error: {err}\n"));
        }
        out.push_str(&format!(
            "{} archives in {} pass(es): {} extracted, {} existing, {} what-if, {} missing tool, {} failed\n",
            self.total,
            self.passes,
            self.extracted,
            self.skipped_existing,
            self.skipped_what_if,
            self.skipped_missing_dependency,
            self.failed,
        ));
        out
    }
}

/// Append-only collector for one run. Results are recorded in decision
/// order; counters stay in lockstep with the result sequence.
#[derive(Debug, Default)]
pub struct Reporter {
    results: Vec<ExtractionResult>,
    root_errors: Vec<String>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: ExtractionResult) {
        self.results.push(result);
    }

    pub fn record_root_error(&mut self, message: String) {
        self.root_errors.push(message);
    }

    /// Count of results with the given status recorded so far.
    pub fn count(&self, status: ExtractionStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn finish(self, passes: usize) -> RunSummary {
        let total = self.results.len();
        let extracted = self.count(ExtractionStatus::Extracted);
        let skipped_existing = self.count(ExtractionStatus::SkippedExisting);
        let skipped_what_if = self.count(ExtractionStatus::SkippedWhatIf);
        let skipped_missing_dependency = self.count(ExtractionStatus::SkippedMissingDependency);
        let failed = self.count(ExtractionStatus::Failed);
        RunSummary {
            total,
            extracted,
            skipped_existing,
            skipped_what_if,
            skipped_missing_dependency,
            failed,
            passes,
            root_errors: self.root_errors,
            results: self.results,
        }
    }
}
