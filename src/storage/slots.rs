use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::api::middleware::AppError;
use crate::models::{OutcomeClass, ResultRecord};

use super::atomic_write;

/// One enumerated slot file. `record` is `None` when the file exists but
/// does not parse; the merge engine skips those and leaves them on disk.
#[derive(Debug)]
pub struct SlotFile {
    pub path: PathBuf,
    pub identity: u64,
    pub record: Option<ResultRecord>,
}

/// Durable per-item result slots.
///
/// Each slot is a JSON file named deterministically by
/// `(partition, identity, outcome class)`:
/// `<data>/<partition>/result_<id>.json`, `review_<id>.json` or
/// `failed_<id>.json`. A worker writes its slot exactly once per definitive
/// outcome (atomic create-or-replace), so concurrent workers never contend
/// on a shared file. Slots are consumed exclusively by the merge engine.
pub struct SlotStore {
    data_dir: PathBuf,
}

fn class_prefix(class: OutcomeClass) -> &'static str {
    match class {
        OutcomeClass::Accepted => "result",
        OutcomeClass::NeedsReview => "review",
        OutcomeClass::Failed => "failed",
    }
}

impl SlotStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn partition_dir(&self, partition: &str) -> PathBuf {
        self.data_dir.join(partition)
    }

    pub fn slot_path(&self, partition: &str, identity: u64, class: OutcomeClass) -> PathBuf {
        self.partition_dir(partition)
            .join(format!("{}_{}.json", class_prefix(class), identity))
    }

    /// Record one definitive outcome. The write is atomic; a crash mid-write
    /// leaves no visible slot and the item simply stays pending.
    pub fn record(&self, partition: &str, record: &ResultRecord) -> Result<(), AppError> {
        let path = self.slot_path(partition, record.identity, record.class());
        let json = serde_json::to_vec_pretty(record)?;
        atomic_write(&path, &json)?;
        tracing::debug!(
            "Recorded {} slot for {}/{}",
            record.class().as_str(),
            partition,
            record.identity
        );
        Ok(())
    }

    /// Enumerate every slot file in the partition, parsing each one.
    /// Unparseable files are reported with `record: None` rather than
    /// aborting the enumeration.
    pub fn enumerate(&self, partition: &str) -> Result<Vec<SlotFile>, AppError> {
        let dir = self.partition_dir(partition);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut slots = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(identity) = slot_identity(&path) else {
                continue;
            };
            let record = match fs::read_to_string(&path)
                .map_err(AppError::from)
                .and_then(|text| serde_json::from_str::<ResultRecord>(&text).map_err(AppError::from))
            {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!("Unparseable slot {}: {}", path.display(), e);
                    None
                }
            };
            slots.push(SlotFile {
                path,
                identity,
                record,
            });
        }
        slots.sort_by_key(|s| s.identity);
        Ok(slots)
    }

    /// Identities that own an uncompacted slot, readable or not.
    /// Derived from file names so corrupt slots still count as taken.
    pub fn pending_identities(&self, partition: &str) -> Result<HashSet<u64>, AppError> {
        Ok(self
            .enumerate(partition)?
            .into_iter()
            .map(|s| s.identity)
            .collect())
    }

    pub fn pending_count(&self, partition: &str) -> Result<usize, AppError> {
        Ok(self.enumerate(partition)?.len())
    }

    pub fn remove(&self, path: &Path) -> Result<(), AppError> {
        fs::remove_file(path)?;
        Ok(())
    }
}

/// Parse the identity out of a slot file name; `None` for anything that is
/// not a slot (temp files, the ledger tables, the identity table).
fn slot_identity(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".json")?;
    let rest = ["result_", "review_", "failed_"]
        .iter()
        .find_map(|prefix| stem.strip_prefix(prefix))?;
    rest.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Outcome, WorkPayload};
    use tempfile::TempDir;

    fn record(identity: u64, outcome: Outcome) -> ResultRecord {
        ResultRecord::new(
            identity,
            WorkPayload {
                question: format!("question {}", identity),
                source_query: format!("MATCH (n) RETURN n // {}", identity),
            },
            outcome,
        )
    }

    #[test]
    fn test_record_and_enumerate() {
        let dir = TempDir::new().unwrap();
        let store = SlotStore::new(dir.path());

        store
            .record(
                "movies",
                &record(
                    0,
                    Outcome::Accepted {
                        translation: "match $m isa movie;".to_string(),
                    },
                ),
            )
            .unwrap();
        store
            .record(
                "movies",
                &record(
                    3,
                    Outcome::Failed {
                        reason: "timeout".to_string(),
                    },
                ),
            )
            .unwrap();

        let slots = store.enumerate("movies").unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].identity, 0);
        assert_eq!(slots[1].identity, 3);
        assert!(slots.iter().all(|s| s.record.is_some()));

        let pending = store.pending_identities("movies").unwrap();
        assert!(pending.contains(&0) && pending.contains(&3));
    }

    #[test]
    fn test_rerecord_same_identity_same_class_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = SlotStore::new(dir.path());

        for reason in ["first", "second"] {
            store
                .record(
                    "movies",
                    &record(
                        5,
                        Outcome::Failed {
                            reason: reason.to_string(),
                        },
                    ),
                )
                .unwrap();
        }

        let slots = store.enumerate("movies").unwrap();
        assert_eq!(slots.len(), 1);
        let rec = slots[0].record.as_ref().unwrap();
        assert_eq!(rec.outcome.reason(), Some("second"));
    }

    #[test]
    fn test_unparseable_slot_is_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let store = SlotStore::new(dir.path());

        store
            .record(
                "movies",
                &record(
                    1,
                    Outcome::Accepted {
                        translation: "match $m isa movie;".to_string(),
                    },
                ),
            )
            .unwrap();
        std::fs::write(dir.path().join("movies/result_2.json"), "{not json").unwrap();

        let slots = store.enumerate("movies").unwrap();
        assert_eq!(slots.len(), 2);
        assert!(slots[0].record.is_some());
        assert!(slots[1].record.is_none());
        // Corrupt slots still block re-issuing the identity.
        assert!(store.pending_identities("movies").unwrap().contains(&2));
    }

    #[test]
    fn test_concurrent_writers_never_publish_a_torn_slot() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(SlotStore::new(dir.path()));

        let mut handles = Vec::new();
        for writer in 0..8u64 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for round in 0..20 {
                    store
                        .record(
                            "movies",
                            &record(
                                0,
                                Outcome::Failed {
                                    reason: format!("writer {} round {}", writer, round),
                                },
                            ),
                        )
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Whichever rename won last, the published slot is complete and
        // parseable, and no temporary siblings are left behind.
        let slots = store.enumerate("movies").unwrap();
        assert_eq!(slots.len(), 1);
        assert!(slots[0].record.is_some());
        let entries = std::fs::read_dir(dir.path().join("movies")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_empty_partition_has_no_slots() {
        let dir = TempDir::new().unwrap();
        let store = SlotStore::new(dir.path());
        assert_eq!(store.pending_count("nothing").unwrap(), 0);
    }

    #[test]
    fn test_slot_identity_ignores_other_files() {
        assert_eq!(slot_identity(Path::new("x/result_12.json")), Some(12));
        assert_eq!(slot_identity(Path::new("x/review_0.json")), Some(0));
        assert_eq!(slot_identity(Path::new("x/accepted.csv")), None);
        assert_eq!(slot_identity(Path::new("x/result_12.tmp")), None);
        assert_eq!(slot_identity(Path::new("x/identities.csv")), None);
    }
}
