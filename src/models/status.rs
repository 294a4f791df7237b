use serde::{Deserialize, Serialize};

/// Read-only progress view over one partition, combining the catalog total,
/// the compacted ledger counts and the not-yet-merged slot count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionStatus {
    pub partition: String,
    pub total: usize,
    pub completed: usize,
    pub accepted: usize,
    pub needs_review: usize,
    pub failed: usize,
    pub pending_merge: usize,
    pub remaining: usize,
}

/// Per-class counts of folded slot records that actually landed in the
/// ledger tables, after recency and priority resolution. A slot superseded
/// during its own merge is consumed but counted nowhere. A repeated run
/// with no new slots reports all zeroes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub accepted: usize,
    pub needs_review: usize,
    pub failed: usize,
}

impl MergeStats {
    pub fn total(&self) -> usize {
        self.accepted + self.needs_review + self.failed
    }
}

/// Outcome counts recorded by one worker batch run. `lost` counts items
/// whose slot write failed; they stay pending and are reissued later.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub processed: usize,
    pub accepted: usize,
    pub failed: usize,
    pub lost: usize,
}
