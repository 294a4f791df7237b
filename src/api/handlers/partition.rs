use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::api::middleware::AppError;
use crate::config::Config;
use crate::models::{
    BatchOutcome, ConvertBatchRequest, MergeStats, Outcome, PartitionStatus, PendingQueryParams,
    ResultRecord, WorkItem,
};
use crate::services::{MergeEngine, WorkCatalog, Worker};
use crate::storage::{LedgerStore, SlotStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<WorkCatalog>,
    pub slots: Arc<SlotStore>,
    pub ledger: Arc<LedgerStore>,
    pub merge: Arc<MergeEngine>,
    pub worker: Arc<Worker>,
    pub config: Config,
}

const DEFAULT_BATCH_LIMIT: usize = 10;

/// Progress view for one partition. Always answers, with best-effort counts
/// even while a merge is in flight.
pub async fn get_status(
    State(state): State<AppState>,
    Path(partition): Path<String>,
) -> Json<PartitionStatus> {
    let total = state.catalog.total(&partition).unwrap_or(0);
    let accepted = state
        .ledger
        .count(&partition, crate::models::OutcomeClass::Accepted)
        .unwrap_or(0);
    let needs_review = state
        .ledger
        .count(&partition, crate::models::OutcomeClass::NeedsReview)
        .unwrap_or(0);
    let failed = state
        .ledger
        .count(&partition, crate::models::OutcomeClass::Failed)
        .unwrap_or(0);
    let pending_merge = state.slots.pending_count(&partition).unwrap_or(0);
    let completed = state
        .catalog
        .completed_identities(&partition)
        .map(|ids| ids.len())
        .unwrap_or(0);

    Json(PartitionStatus {
        partition,
        total,
        completed,
        accepted,
        needs_review,
        failed,
        pending_merge,
        remaining: total.saturating_sub(completed),
    })
}

/// List the work items still needing conversion.
pub async fn list_pending(
    State(state): State<AppState>,
    Path(partition): Path<String>,
    Query(params): Query<PendingQueryParams>,
) -> Result<Json<Vec<WorkItem>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_BATCH_LIMIT);
    let items = state.catalog.pending(&partition, limit)?;
    Ok(Json(items))
}

/// Fold every pending slot into the ledger tables.
pub async fn merge_pending(
    State(state): State<AppState>,
    Path(partition): Path<String>,
) -> Result<Json<MergeStats>, AppError> {
    tracing::info!("Merging pending slots for partition: {}", partition);
    let stats = state.merge.merge_pending(&partition)?;
    Ok(Json(stats))
}

/// Run a worker batch over the next pending items, or over ledgered
/// failures when the request asks for the `failed` source.
pub async fn convert_batch(
    State(state): State<AppState>,
    Path(partition): Path<String>,
    Json(payload): Json<ConvertBatchRequest>,
) -> Result<Json<BatchOutcome>, AppError> {
    let limit = payload.limit.unwrap_or(DEFAULT_BATCH_LIMIT);
    let source = payload.source.as_deref().unwrap_or("pending");
    tracing::info!(
        "Converting up to {} {} items for partition: {}",
        limit,
        source,
        partition
    );
    let outcome = match source {
        "pending" => state.worker.run_batch(&partition, limit).await?,
        "failed" => state.worker.run_retry_batch(&partition, limit).await?,
        other => {
            return Err(AppError::Validation(format!(
                "unknown work source '{}', expected 'pending' or 'failed'",
                other
            )))
        }
    };
    Ok(Json(outcome))
}

/// Manually recorded outcome, e.g. a reviewer moving an item to
/// needs-review or rejecting it outright.
#[derive(Debug, Deserialize)]
pub struct RecordRequest {
    pub identity: u64,
    pub outcome: String,
    pub translation: Option<String>,
    pub reason: Option<String>,
}

impl RecordRequest {
    fn into_outcome(self) -> Result<(u64, Outcome), AppError> {
        let outcome = match self.outcome.as_str() {
            "accepted" => Outcome::Accepted {
                translation: self.translation.ok_or_else(|| {
                    AppError::Validation("accepted outcome requires a translation".to_string())
                })?,
            },
            "needs_review" => Outcome::NeedsReview {
                translation: self.translation.ok_or_else(|| {
                    AppError::Validation("needs_review outcome requires a translation".to_string())
                })?,
                reason: self.reason.ok_or_else(|| {
                    AppError::Validation("needs_review outcome requires a reason".to_string())
                })?,
            },
            "failed" => Outcome::Failed {
                reason: self.reason.ok_or_else(|| {
                    AppError::Validation("failed outcome requires a reason".to_string())
                })?,
            },
            other => {
                return Err(AppError::Validation(format!(
                    "unknown outcome class '{}'",
                    other
                )))
            }
        };
        Ok((self.identity, outcome))
    }
}

/// Record a definitive outcome for one item directly (reviewer workflow).
pub async fn record_outcome(
    State(state): State<AppState>,
    Path(partition): Path<String>,
    Json(payload): Json<RecordRequest>,
) -> Result<Json<ResultRecord>, AppError> {
    let (identity, outcome) = payload.into_outcome()?;
    let item = state
        .catalog
        .find(&partition, identity)?
        .ok_or_else(|| {
            AppError::NotFound(format!("item {}/{} not found", partition, identity))
        })?;

    let record = ResultRecord::new(identity, item.payload, outcome);
    state.slots.record(&partition, &record)?;
    Ok(Json(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request_requires_class_fields() {
        let request = RecordRequest {
            identity: 3,
            outcome: "needs_review".to_string(),
            translation: Some("match $m isa movie;".to_string()),
            reason: None,
        };
        assert!(request.into_outcome().is_err());

        let request = RecordRequest {
            identity: 3,
            outcome: "needs_review".to_string(),
            translation: Some("match $m isa movie;".to_string()),
            reason: Some("uncertain aggregation".to_string()),
        };
        let (identity, outcome) = request.into_outcome().unwrap();
        assert_eq!(identity, 3);
        assert_eq!(outcome.class(), crate::models::OutcomeClass::NeedsReview);
    }

    #[test]
    fn test_record_request_rejects_unknown_class() {
        let request = RecordRequest {
            identity: 0,
            outcome: "maybe".to_string(),
            translation: None,
            reason: None,
        };
        assert!(request.into_outcome().is_err());
    }
}
