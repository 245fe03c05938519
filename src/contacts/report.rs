//! Aggregate outcome of a bulk job.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Counts plus the ordered account of everything that went wrong.
///
/// `success` counts created contacts for an import and deleted contacts for a
/// delete. Linking failures during an import only append to `errors`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AggregateReport {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    /// Set when the job stopped early; skipped rows are in neither count.
    #[serde(default)]
    pub cancelled: bool,
}

impl AggregateReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record_success(&mut self) {
        self.success += 1;
    }

    pub fn record_failure(&mut self, message: String) {
        self.failed += 1;
        self.errors.push(message);
    }

    /// Append an error line without touching the counts.
    pub fn note_error(&mut self, message: String) {
        self.errors.push(message);
    }

    pub fn processed(&self) -> usize {
        self.success + self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.processed() == self.total
    }
}
