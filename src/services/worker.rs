use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{BatchOutcome, Outcome, ResultRecord, WorkItem};
use crate::services::catalog::WorkCatalog;
use crate::services::converter::{Convert, PriorAttempt};
use crate::services::retry::{with_retry, RetryPolicy};
use crate::services::rules::RuleSet;
use crate::services::validator::Validate;
use crate::storage::SlotStore;

/// One convert-then-validate attempt that did not stick. Carried into the
/// next attempt so the converter can correct its own output.
#[derive(Debug, Clone)]
struct AttemptFailure {
    translation: Option<String>,
    reason: String,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Owns one work item at a time end to end: obtain a candidate, rewrite it,
/// validate it, retry within the configured budget, record exactly one
/// definitive outcome in the item's slot.
///
/// Workers share nothing but the slot namespace, so any number of them may
/// run concurrently. A worker killed mid-attempt leaves no slot behind and
/// the item is simply reissued by the catalog on the next scan.
pub struct Worker {
    catalog: Arc<WorkCatalog>,
    slots: Arc<SlotStore>,
    converter: Arc<dyn Convert>,
    validator: Arc<dyn Validate>,
    rules: Arc<RuleSet>,
    policy: RetryPolicy,
}

impl Worker {
    pub fn new(
        catalog: Arc<WorkCatalog>,
        slots: Arc<SlotStore>,
        converter: Arc<dyn Convert>,
        validator: Arc<dyn Validate>,
        rules: Arc<RuleSet>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            catalog,
            slots,
            converter,
            validator,
            rules,
            policy,
        }
    }

    /// Run the bounded convert/validate loop and record the outcome. The
    /// slot write is the only side effect; if it fails the outcome is lost
    /// and the item stays pending, which is safe because re-processing is
    /// idempotent.
    pub async fn process_item(&self, item: &WorkItem) -> Result<Outcome, AppError> {
        self.process_item_with_prior(item, None).await
    }

    /// Same loop, but the first attempt already carries a known failure,
    /// e.g. the ledgered reason when re-driving an old failure.
    async fn process_item_with_prior(
        &self,
        item: &WorkItem,
        initial_prior: Option<PriorAttempt>,
    ) -> Result<Outcome, AppError> {
        let mut initial_prior = initial_prior;
        let attempt_result = with_retry(&self.policy, |attempt, prev: Option<AttemptFailure>| {
            let prior = match prev {
                Some(failure) => Some(PriorAttempt {
                    translation: failure.translation,
                    error: failure.reason,
                }),
                None => initial_prior.take(),
            };
            async move {
                let candidate = self
                    .converter
                    .convert(&item.partition, &item.payload, prior.as_ref())
                    .await
                    .map_err(|e| AttemptFailure {
                        translation: None,
                        reason: e.to_string(),
                    })?;

                let (candidate, fired) = self.rules.apply(&candidate);
                if !fired.is_empty() {
                    tracing::debug!(
                        "Rewrite rules {:?} fired for {}/{} (attempt {})",
                        fired,
                        item.partition,
                        item.identity,
                        attempt
                    );
                }

                match self.validator.validate(&item.partition, &candidate).await {
                    Ok(()) => Ok(candidate),
                    Err(reason) => Err(AttemptFailure {
                        translation: Some(candidate),
                        reason,
                    }),
                }
            }
        })
        .await;

        let outcome = match attempt_result {
            Ok(translation) => Outcome::Accepted { translation },
            Err(failure) => Outcome::Failed {
                reason: failure.reason,
            },
        };

        self.slots.record(
            &item.partition,
            &ResultRecord::new(item.identity, item.payload.clone(), outcome.clone()),
        )?;
        Ok(outcome)
    }

    /// Process one item into the batch tally. A failed slot write loses
    /// this item's outcome but never aborts the rest of the batch; the item
    /// stays pending and is reissued later.
    async fn drive(&self, item: &WorkItem, prior: Option<PriorAttempt>, tally: &mut BatchOutcome) {
        match self.process_item_with_prior(item, prior).await {
            Ok(Outcome::Accepted { .. }) => {
                tally.accepted += 1;
                tally.processed += 1;
            }
            Ok(_) => {
                tally.failed += 1;
                tally.processed += 1;
            }
            Err(e) => {
                tally.lost += 1;
                tracing::warn!(
                    "Outcome for {}/{} was not recorded: {}",
                    item.partition,
                    item.identity,
                    e
                );
            }
        }
    }

    /// Fetch up to `limit` pending items and process them in order. Callers
    /// may run several batches concurrently; the per-item slots keep them
    /// from colliding.
    pub async fn run_batch(&self, partition: &str, limit: usize) -> Result<BatchOutcome, AppError> {
        let items = self.catalog.pending(partition, limit)?;
        let mut outcome = BatchOutcome::default();
        for item in &items {
            tracing::info!("Converting {}/{}", partition, item.identity);
            self.drive(item, None, &mut outcome).await;
        }
        tracing::info!(
            "Batch for '{}' done: {} accepted, {} failed of {} processed ({} lost)",
            partition,
            outcome.accepted,
            outcome.failed,
            outcome.processed,
            outcome.lost
        );
        Ok(outcome)
    }

    /// Re-drive up to `limit` already-ledgered failures, feeding each
    /// stored failure reason into the first conversion attempt. A success
    /// supersedes the old failure at the next merge.
    pub async fn run_retry_batch(
        &self,
        partition: &str,
        limit: usize,
    ) -> Result<BatchOutcome, AppError> {
        let items = self.catalog.pending_failed(partition, limit)?;
        let mut outcome = BatchOutcome::default();
        for (item, reason) in &items {
            tracing::info!("Retrying {}/{}: {}", partition, item.identity, reason);
            let prior = Some(PriorAttempt {
                translation: None,
                error: reason.clone(),
            });
            self.drive(item, prior, &mut outcome).await;
        }
        tracing::info!(
            "Retry batch for '{}' done: {} accepted, {} failed of {} processed ({} lost)",
            partition,
            outcome.accepted,
            outcome.failed,
            outcome.processed,
            outcome.lost
        );
        Ok(outcome)
    }
}
