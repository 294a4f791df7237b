use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::api::middleware::AppError;
use crate::models::{Outcome, OutcomeClass, ResultRecord, WorkPayload};

use super::atomic_write;

/// The canonical tabular record of all processed work items.
///
/// Three CSV tables per partition, one per outcome class. All mutation is a
/// whole-table rewrite through a temp file and rename, so a reader never
/// sees a partial table. Rows are always written sorted by identity so the
/// tables diff deterministically across runs. Headers are written even for
/// empty tables.
pub struct LedgerStore {
    data_dir: PathBuf,
}

fn class_file(class: OutcomeClass) -> &'static str {
    match class {
        OutcomeClass::Accepted => "accepted.csv",
        OutcomeClass::NeedsReview => "needs_review.csv",
        OutcomeClass::Failed => "failed.csv",
    }
}

fn class_header(class: OutcomeClass) -> &'static [&'static str] {
    match class {
        OutcomeClass::Accepted => &[
            "identity",
            "question",
            "source_query",
            "translation",
            "produced_at",
        ],
        OutcomeClass::NeedsReview => &[
            "identity",
            "question",
            "source_query",
            "translation",
            "reason",
            "produced_at",
        ],
        OutcomeClass::Failed => &[
            "identity",
            "question",
            "source_query",
            "reason",
            "produced_at",
        ],
    }
}

impl LedgerStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn table_path(&self, partition: &str, class: OutcomeClass) -> PathBuf {
        self.data_dir.join(partition).join(class_file(class))
    }

    /// Read the whole table for one class. A missing file is an empty table.
    pub fn read_all(
        &self,
        partition: &str,
        class: OutcomeClass,
    ) -> Result<Vec<ResultRecord>, AppError> {
        let path = self.table_path(partition, class);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let headers = reader.headers()?.clone();
        let column = |name: &str| -> Result<usize, AppError> {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                AppError::Storage(format!("{}: missing column '{}'", path.display(), name))
            })
        };

        let identity_col = column("identity")?;
        let question_col = column("question")?;
        let source_query_col = column("source_query")?;
        let produced_at_col = column("produced_at")?;
        let translation_col = match class {
            OutcomeClass::Failed => None,
            _ => Some(column("translation")?),
        };
        let reason_col = match class {
            OutcomeClass::Accepted => None,
            _ => Some(column("reason")?),
        };

        let field = |row: &csv::StringRecord, idx: usize| -> String {
            row.get(idx).unwrap_or_default().to_string()
        };

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            let identity: u64 = field(&row, identity_col).parse().map_err(|_| {
                AppError::Storage(format!("{}: bad identity field", path.display()))
            })?;
            let produced_at = parse_timestamp(&field(&row, produced_at_col), &path)?;
            let payload = WorkPayload {
                question: field(&row, question_col),
                source_query: field(&row, source_query_col),
            };
            let outcome = match class {
                OutcomeClass::Accepted => Outcome::Accepted {
                    translation: field(&row, translation_col.unwrap_or_default()),
                },
                OutcomeClass::NeedsReview => Outcome::NeedsReview {
                    translation: field(&row, translation_col.unwrap_or_default()),
                    reason: field(&row, reason_col.unwrap_or_default()),
                },
                OutcomeClass::Failed => Outcome::Failed {
                    reason: field(&row, reason_col.unwrap_or_default()),
                },
            };
            records.push(ResultRecord {
                identity,
                payload,
                outcome,
                produced_at,
            });
        }
        Ok(records)
    }

    /// Atomically replace the whole table for one class. Rows are sorted by
    /// identity before writing; the header row is always present.
    pub fn replace_all(
        &self,
        partition: &str,
        class: OutcomeClass,
        rows: &[ResultRecord],
    ) -> Result<(), AppError> {
        let mut sorted: Vec<&ResultRecord> = rows.iter().collect();
        sorted.sort_by_key(|r| r.identity);

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(class_header(class))?;
        for record in sorted {
            let identity = record.identity.to_string();
            let produced_at = record.produced_at.to_rfc3339();
            let translation = record.outcome.translation().unwrap_or_default();
            let reason = record.outcome.reason().unwrap_or_default();
            let payload = &record.payload;
            match class {
                OutcomeClass::Accepted => writer.write_record([
                    identity.as_str(),
                    payload.question.as_str(),
                    payload.source_query.as_str(),
                    translation,
                    produced_at.as_str(),
                ])?,
                OutcomeClass::NeedsReview => writer.write_record([
                    identity.as_str(),
                    payload.question.as_str(),
                    payload.source_query.as_str(),
                    translation,
                    reason,
                    produced_at.as_str(),
                ])?,
                OutcomeClass::Failed => writer.write_record([
                    identity.as_str(),
                    payload.question.as_str(),
                    payload.source_query.as_str(),
                    reason,
                    produced_at.as_str(),
                ])?,
            }
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| AppError::Storage(e.to_string()))?;

        atomic_write(&self.table_path(partition, class), &bytes)?;
        Ok(())
    }

    /// Fold a batch into the table: union with the current rows keyed by
    /// identity (last write wins), then rewrite.
    pub fn append_batch(
        &self,
        partition: &str,
        class: OutcomeClass,
        rows: &[ResultRecord],
    ) -> Result<(), AppError> {
        let mut by_identity: HashMap<u64, ResultRecord> = self
            .read_all(partition, class)?
            .into_iter()
            .map(|r| (r.identity, r))
            .collect();
        for row in rows {
            match by_identity.get(&row.identity) {
                Some(existing) if existing.produced_at > row.produced_at => {}
                _ => {
                    by_identity.insert(row.identity, row.clone());
                }
            }
        }
        let merged: Vec<ResultRecord> = by_identity.into_values().collect();
        self.replace_all(partition, class, &merged)
    }

    /// Identities across all three classes, for catalog exclusion and status.
    pub fn all_identities(&self, partition: &str) -> Result<Vec<u64>, AppError> {
        let mut identities = Vec::new();
        for class in OutcomeClass::ALL {
            identities.extend(self.read_all(partition, class)?.iter().map(|r| r.identity));
        }
        Ok(identities)
    }

    pub fn count(&self, partition: &str, class: OutcomeClass) -> Result<usize, AppError> {
        Ok(self.read_all(partition, class)?.len())
    }
}

fn parse_timestamp(text: &str, path: &std::path::Path) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Storage(format!("{}: bad produced_at '{}': {}", path.display(), text, e)))
}
