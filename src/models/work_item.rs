use serde::{Deserialize, Serialize};

/// One unit of translation work: a natural-language question plus the query
/// it was originally answered with. The pipeline never inspects the payload
/// semantically; it only carries it from the master input to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkPayload {
    pub question: String,
    pub source_query: String,
}

/// A work item identified stably within a dataset partition.
///
/// Identities are assigned once, at first discovery, and persisted in the
/// partition's identity-assignment table; they are never reassigned even if
/// the master input is edited afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub identity: u64,
    pub partition: String,
    pub payload: WorkPayload,
}

#[derive(Debug, Deserialize)]
pub struct PendingQueryParams {
    pub limit: Option<usize>,
}

/// `source` selects the work pool: `"pending"` (default) drives never-slotted
/// items, `"failed"` re-drives already-ledgered failures.
#[derive(Debug, Deserialize)]
pub struct ConvertBatchRequest {
    pub limit: Option<usize>,
    pub source: Option<String>,
}
