use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::api::middleware::AppError;
use crate::models::{MergeStats, OutcomeClass, ResultRecord};
use crate::services::resolver::resolve;
use crate::storage::{LedgerStore, SlotStore};

/// Folds pending slots into the ledger tables and deletes the consumed
/// slots.
///
/// The merge is idempotent: re-running it with no new slots rewrites nothing
/// and reports zero counts. It must not run concurrently with itself on the
/// same partition (single-runner compaction step); running it while workers
/// are still producing slots is fine, a slot created after enumeration is
/// picked up by the next merge.
pub struct MergeEngine {
    slots: Arc<SlotStore>,
    ledger: Arc<LedgerStore>,
}

impl MergeEngine {
    pub fn new(slots: Arc<SlotStore>, ledger: Arc<LedgerStore>) -> Self {
        Self { slots, ledger }
    }

    pub fn merge_pending(&self, partition: &str) -> Result<MergeStats, AppError> {
        // 1. Enumerate and parse every slot. Unparseable slots are skipped
        //    and left on disk for inspection; they must not block the rest.
        let slot_files = self.slots.enumerate(partition)?;
        let mut folded: Vec<(std::path::PathBuf, ResultRecord)> = Vec::new();
        let mut skipped = 0usize;
        for slot in slot_files {
            match slot.record {
                Some(record) => folded.push((slot.path, record)),
                None => skipped += 1,
            }
        }
        if folded.is_empty() {
            if skipped > 0 {
                tracing::warn!(
                    "No mergeable slots for '{}' ({} unparseable left in place)",
                    partition,
                    skipped
                );
            }
            return Ok(MergeStats::default());
        }

        // 2. Partition parsed records by outcome class.
        let mut by_class: HashMap<OutcomeClass, Vec<ResultRecord>> = HashMap::new();
        for (_, record) in &folded {
            by_class
                .entry(record.class())
                .or_default()
                .push(record.clone());
        }

        // 3. Union each class with the current ledger contents, keyed by
        //    identity, last write wins within the class.
        let mut merged: HashMap<OutcomeClass, Vec<ResultRecord>> = HashMap::new();
        for class in OutcomeClass::ALL {
            let mut by_identity: HashMap<u64, ResultRecord> = self
                .ledger
                .read_all(partition, class)?
                .into_iter()
                .map(|r| (r.identity, r))
                .collect();
            for record in by_class.remove(&class).unwrap_or_default() {
                match by_identity.get(&record.identity) {
                    Some(existing) if existing.produced_at > record.produced_at => {}
                    _ => {
                        by_identity.insert(record.identity, record);
                    }
                }
            }
            merged.insert(class, by_identity.into_values().collect());
        }

        // 4. Resolve cross-class duplicates by class priority.
        let (accepted, needs_review, failed) = resolve(
            merged.remove(&OutcomeClass::Accepted).unwrap_or_default(),
            merged.remove(&OutcomeClass::NeedsReview).unwrap_or_default(),
            merged.remove(&OutcomeClass::Failed).unwrap_or_default(),
        );

        // 5. Count the folded records that survived resolution. A slot
        //    superseded by a newer record or a higher class is consumed
        //    without landing anywhere and must not inflate the stats.
        let slot_keys: HashSet<(u64, OutcomeClass, DateTime<Utc>)> = folded
            .iter()
            .map(|(_, record)| (record.identity, record.class(), record.produced_at))
            .collect();
        let landed = |rows: &[ResultRecord], class: OutcomeClass| {
            rows.iter()
                .filter(|r| slot_keys.contains(&(r.identity, class, r.produced_at)))
                .count()
        };
        let stats = MergeStats {
            accepted: landed(&accepted, OutcomeClass::Accepted),
            needs_review: landed(&needs_review, OutcomeClass::NeedsReview),
            failed: landed(&failed, OutcomeClass::Failed),
        };

        // 6. Rewrite all three tables. If any rewrite fails the merge aborts
        //    without deleting a single slot, so the next run retries from a
        //    consistent state.
        self.ledger
            .replace_all(partition, OutcomeClass::Accepted, &accepted)?;
        self.ledger
            .replace_all(partition, OutcomeClass::NeedsReview, &needs_review)?;
        self.ledger
            .replace_all(partition, OutcomeClass::Failed, &failed)?;

        // 7. Delete the consumed slots. A slot that refuses to delete is
        //    only a wasted re-fold on the next run, never lost data.
        for (path, _) in &folded {
            if let Err(e) = self.slots.remove(path) {
                tracing::warn!("Could not delete merged slot {}: {}", path.display(), e);
            }
        }

        tracing::info!(
            "Consumed {} slots for '{}', landed {} accepted, {} needs review, {} failed ({} unparseable skipped)",
            folded.len(),
            partition,
            stats.accepted,
            stats.needs_review,
            stats.failed,
            skipped
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Outcome, WorkPayload};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        slots: Arc<SlotStore>,
        ledger: Arc<LedgerStore>,
        engine: MergeEngine,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let slots = Arc::new(SlotStore::new(dir.path()));
        let ledger = Arc::new(LedgerStore::new(dir.path()));
        let engine = MergeEngine::new(slots.clone(), ledger.clone());
        Fixture {
            _dir: dir,
            slots,
            ledger,
            engine,
        }
    }

    fn record(identity: u64, outcome: Outcome, age_minutes: i64) -> ResultRecord {
        let mut r = ResultRecord::new(
            identity,
            WorkPayload {
                question: format!("q{}", identity),
                source_query: "MATCH (n) RETURN n".to_string(),
            },
            outcome,
        );
        r.produced_at = Utc::now() - Duration::minutes(age_minutes);
        r
    }

    fn ids(rows: &[ResultRecord]) -> Vec<u64> {
        rows.iter().map(|r| r.identity).collect()
    }

    #[test]
    fn test_merge_folds_slots_and_deletes_them() {
        let f = fixture();
        f.slots
            .record(
                "movies",
                &record(
                    0,
                    Outcome::Accepted {
                        translation: "t0".to_string(),
                    },
                    0,
                ),
            )
            .unwrap();
        f.slots
            .record(
                "movies",
                &record(
                    1,
                    Outcome::Failed {
                        reason: "timeout".to_string(),
                    },
                    0,
                ),
            )
            .unwrap();

        let stats = f.engine.merge_pending("movies").unwrap();
        assert_eq!(
            stats,
            MergeStats {
                accepted: 1,
                needs_review: 0,
                failed: 1
            }
        );
        assert_eq!(
            ids(&f.ledger.read_all("movies", OutcomeClass::Accepted).unwrap()),
            vec![0]
        );
        assert_eq!(
            ids(&f.ledger.read_all("movies", OutcomeClass::Failed).unwrap()),
            vec![1]
        );
        assert_eq!(f.slots.pending_count("movies").unwrap(), 0);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let f = fixture();
        f.slots
            .record(
                "movies",
                &record(
                    0,
                    Outcome::Accepted {
                        translation: "t0".to_string(),
                    },
                    0,
                ),
            )
            .unwrap();

        let first = f.engine.merge_pending("movies").unwrap();
        assert_eq!(first.total(), 1);
        let before = std::fs::read_to_string(f.ledger.table_path("movies", OutcomeClass::Accepted))
            .unwrap();

        let second = f.engine.merge_pending("movies").unwrap();
        assert_eq!(second, MergeStats::default());
        let after = std::fs::read_to_string(f.ledger.table_path("movies", OutcomeClass::Accepted))
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_newer_accepted_supersedes_older_failed() {
        let f = fixture();
        f.slots
            .record(
                "movies",
                &record(
                    7,
                    Outcome::Failed {
                        reason: "timeout".to_string(),
                    },
                    10,
                ),
            )
            .unwrap();
        f.slots
            .record(
                "movies",
                &record(
                    7,
                    Outcome::Accepted {
                        translation: "t7".to_string(),
                    },
                    0,
                ),
            )
            .unwrap();

        let stats = f.engine.merge_pending("movies").unwrap();
        // The superseded failure was consumed without landing anywhere.
        assert_eq!(
            stats,
            MergeStats {
                accepted: 1,
                needs_review: 0,
                failed: 0
            }
        );

        let accepted = f.ledger.read_all("movies", OutcomeClass::Accepted).unwrap();
        assert_eq!(ids(&accepted), vec![7]);
        assert_eq!(accepted[0].outcome.translation(), Some("t7"));
        assert!(f
            .ledger
            .read_all("movies", OutcomeClass::Failed)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_accepted_slot_removes_prior_ledger_failure() {
        let f = fixture();
        f.ledger
            .replace_all(
                "movies",
                OutcomeClass::Failed,
                &[record(
                    3,
                    Outcome::Failed {
                        reason: "old failure".to_string(),
                    },
                    60,
                )],
            )
            .unwrap();
        f.slots
            .record(
                "movies",
                &record(
                    3,
                    Outcome::Accepted {
                        translation: "fixed".to_string(),
                    },
                    0,
                ),
            )
            .unwrap();

        f.engine.merge_pending("movies").unwrap();
        assert_eq!(
            ids(&f.ledger.read_all("movies", OutcomeClass::Accepted).unwrap()),
            vec![3]
        );
        assert!(f
            .ledger
            .read_all("movies", OutcomeClass::Failed)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_recency_within_class_during_merge() {
        let f = fixture();
        f.ledger
            .replace_all(
                "movies",
                OutcomeClass::NeedsReview,
                &[record(
                    2,
                    Outcome::NeedsReview {
                        translation: "t2".to_string(),
                        reason: "older reason".to_string(),
                    },
                    30,
                )],
            )
            .unwrap();
        f.slots
            .record(
                "movies",
                &record(
                    2,
                    Outcome::NeedsReview {
                        translation: "t2b".to_string(),
                        reason: "newer reason".to_string(),
                    },
                    0,
                ),
            )
            .unwrap();

        f.engine.merge_pending("movies").unwrap();
        let rows = f
            .ledger
            .read_all("movies", OutcomeClass::NeedsReview)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome.reason(), Some("newer reason"));
    }

    #[test]
    fn test_unparseable_slot_does_not_block_the_rest() {
        let f = fixture();
        for identity in 0..3 {
            f.slots
                .record(
                    "movies",
                    &record(
                        identity,
                        Outcome::Accepted {
                            translation: format!("t{}", identity),
                        },
                        0,
                    ),
                )
                .unwrap();
        }
        let bad = f
            .slots
            .slot_path("movies", 9, OutcomeClass::Accepted);
        std::fs::write(&bad, "{definitely not json").unwrap();

        let stats = f.engine.merge_pending("movies").unwrap();
        assert_eq!(stats.accepted, 3);
        assert_eq!(
            ids(&f.ledger.read_all("movies", OutcomeClass::Accepted).unwrap()),
            vec![0, 1, 2]
        );
        // Exactly the bad slot survives for manual inspection.
        let remaining = f.slots.enumerate("movies").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].path, bad);
    }

    #[test]
    fn test_merge_with_no_slots_reports_zero() {
        let f = fixture();
        assert_eq!(f.engine.merge_pending("movies").unwrap(), MergeStats::default());
    }
}
