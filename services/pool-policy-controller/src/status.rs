//! Policy status aggregation.

use fma_api::LauncherPoolPolicyStatus;

/// Collects per-cell failures of one pass, in pass order.
#[derive(Debug, Default)]
pub struct StatusAggregator {
    errors: Vec<String>,
}

impl StatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failure.
    pub fn record(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Failures recorded so far.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Candidate status for a pass over the given policy generation.
    pub fn finish(self, generation: i64) -> LauncherPoolPolicyStatus {
        LauncherPoolPolicyStatus {
            observed_generation: generation,
            errors: self.errors,
        }
    }
}

/// Returns true if `candidate` differs from the stored status.
///
/// Only the generation and the error list are compared; an absent status
/// compares like an empty one.
pub fn needs_update(
    previous: Option<&LauncherPoolPolicyStatus>,
    candidate: &LauncherPoolPolicyStatus,
) -> bool {
    let default = LauncherPoolPolicyStatus::default();
    let previous = previous.unwrap_or(&default);
    previous.observed_generation != candidate.observed_generation
        || previous.errors != candidate.errors
}
