use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::api::middleware::AppError;
use crate::models::{OutcomeClass, WorkItem, WorkPayload};
use crate::storage::{atomic_write, LedgerStore, SlotStore};

/// One row of the master input table. Read-only to this subsystem.
#[derive(Debug, Deserialize)]
struct MasterRow {
    partition: String,
    question: String,
    source_query: String,
    #[serde(default)]
    invalid: String,
}

impl MasterRow {
    fn is_invalid(&self) -> bool {
        matches!(
            self.invalid.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes"
        )
    }
}

/// Derives the work still needing conversion for a partition.
///
/// Identities are assigned at first discovery, in filtered master-row order,
/// and persisted to `<data>/<partition>/identities.csv`. Later scans reuse
/// the stored assignment keyed by the payload, so editing the master input
/// does not silently renumber items that were already processed: a row that
/// no longer matches any assignment gets a fresh identity and stale
/// assignments are kept.
pub struct WorkCatalog {
    master_path: PathBuf,
    data_dir: PathBuf,
    slots: Arc<SlotStore>,
    ledger: Arc<LedgerStore>,
}

impl WorkCatalog {
    pub fn new(
        master_path: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
        slots: Arc<SlotStore>,
        ledger: Arc<LedgerStore>,
    ) -> Self {
        Self {
            master_path: master_path.into(),
            data_dir: data_dir.into(),
            slots,
            ledger,
        }
    }

    fn identities_path(&self, partition: &str) -> PathBuf {
        self.data_dir.join(partition).join("identities.csv")
    }

    /// Valid master payloads for the partition, in file order.
    fn master_payloads(&self, partition: &str) -> Result<Vec<WorkPayload>, AppError> {
        if !self.master_path.exists() {
            return Err(AppError::Catalog(format!(
                "master input {} not found",
                self.master_path.display()
            )));
        }
        let mut reader = csv::Reader::from_path(&self.master_path)?;
        let mut payloads = Vec::new();
        for row in reader.deserialize() {
            let row: MasterRow = row?;
            if row.partition != partition || row.is_invalid() {
                continue;
            }
            payloads.push(WorkPayload {
                question: row.question,
                source_query: row.source_query,
            });
        }
        Ok(payloads)
    }

    fn load_assignments(&self, partition: &str) -> Result<HashMap<WorkPayload, u64>, AppError> {
        let path = self.identities_path(partition);
        let mut assignments = HashMap::new();
        if !path.exists() {
            return Ok(assignments);
        }
        let mut reader = csv::Reader::from_path(&path)?;
        for row in reader.deserialize() {
            let (identity, question, source_query): (u64, String, String) = row?;
            assignments.insert(
                WorkPayload {
                    question,
                    source_query,
                },
                identity,
            );
        }
        Ok(assignments)
    }

    fn save_assignments(
        &self,
        partition: &str,
        assignments: &HashMap<WorkPayload, u64>,
    ) -> Result<(), AppError> {
        let mut rows: Vec<(&WorkPayload, u64)> =
            assignments.iter().map(|(p, id)| (p, *id)).collect();
        rows.sort_by_key(|(_, id)| *id);

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["identity", "question", "source_query"])?;
        for (payload, identity) in rows {
            let identity = identity.to_string();
            writer.write_record([
                identity.as_str(),
                payload.question.as_str(),
                payload.source_query.as_str(),
            ])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| AppError::Storage(e.to_string()))?;
        atomic_write(&self.identities_path(partition), &bytes)?;
        Ok(())
    }

    /// Every valid master row with its stable identity, in identity order.
    /// Newly discovered rows are assigned the next sequence numbers and the
    /// assignment table is persisted before they are handed out.
    pub fn assigned_items(&self, partition: &str) -> Result<Vec<WorkItem>, AppError> {
        let payloads = self.master_payloads(partition)?;
        let mut assignments = self.load_assignments(partition)?;
        let mut next_identity = assignments.values().max().map_or(0, |max| max + 1);

        let mut new_assignments = false;
        let mut items = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let identity = match assignments.get(&payload) {
                Some(id) => *id,
                None => {
                    let id = next_identity;
                    next_identity += 1;
                    assignments.insert(payload.clone(), id);
                    new_assignments = true;
                    id
                }
            };
            items.push(WorkItem {
                identity,
                partition: partition.to_string(),
                payload,
            });
        }
        if new_assignments {
            self.save_assignments(partition, &assignments)?;
        }

        items.sort_by_key(|item| item.identity);
        items.dedup_by_key(|item| item.identity);
        Ok(items)
    }

    /// Total number of distinct work items in the partition. Duplicate
    /// master rows collapse onto one identity, so the total matches what
    /// `pending` can ever hand out and `remaining` can reach zero.
    pub fn total(&self, partition: &str) -> Result<usize, AppError> {
        Ok(self.assigned_items(partition)?.len())
    }

    /// Identities already accounted for: present in any compacted ledger
    /// class or owning an uncompacted slot.
    pub fn completed_identities(&self, partition: &str) -> Result<HashSet<u64>, AppError> {
        let mut completed: HashSet<u64> =
            self.ledger.all_identities(partition)?.into_iter().collect();
        completed.extend(self.slots.pending_identities(partition)?);
        Ok(completed)
    }

    /// The ordered work items still needing conversion, up to `limit`.
    pub fn pending(&self, partition: &str, limit: usize) -> Result<Vec<WorkItem>, AppError> {
        let completed = self.completed_identities(partition)?;
        Ok(self
            .assigned_items(partition)?
            .into_iter()
            .filter(|item| !completed.contains(&item.identity))
            .take(limit)
            .collect())
    }

    /// Already-ledgered failures eligible for another automated pass,
    /// paired with the recorded failure reason. Items that already own an
    /// uncompacted slot are skipped until the next merge folds them.
    pub fn pending_failed(
        &self,
        partition: &str,
        limit: usize,
    ) -> Result<Vec<(WorkItem, String)>, AppError> {
        let slotted = self.slots.pending_identities(partition)?;
        let mut rows = self.ledger.read_all(partition, OutcomeClass::Failed)?;
        rows.sort_by_key(|row| row.identity);
        Ok(rows
            .into_iter()
            .filter(|row| !slotted.contains(&row.identity))
            .take(limit)
            .map(|row| {
                let reason = row.outcome.reason().unwrap_or_default().to_string();
                let item = WorkItem {
                    identity: row.identity,
                    partition: partition.to_string(),
                    payload: row.payload,
                };
                (item, reason)
            })
            .collect())
    }

    /// Look one item up by identity, whether or not it is still pending.
    pub fn find(&self, partition: &str, identity: u64) -> Result<Option<WorkItem>, AppError> {
        Ok(self
            .assigned_items(partition)?
            .into_iter()
            .find(|item| item.identity == identity))
    }
}
