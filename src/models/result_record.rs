use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::work_item::WorkPayload;

/// Outcome class of a processed work item.
///
/// When the same identity shows up in more than one class, the highest
/// precedence wins: `Accepted > NeedsReview > Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    Accepted,
    NeedsReview,
    Failed,
}

impl OutcomeClass {
    pub const ALL: [OutcomeClass; 3] = [
        OutcomeClass::Accepted,
        OutcomeClass::NeedsReview,
        OutcomeClass::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeClass::Accepted => "accepted",
            OutcomeClass::NeedsReview => "needs_review",
            OutcomeClass::Failed => "failed",
        }
    }
}

/// The definitive result of one conversion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Accepted { translation: String },
    NeedsReview { translation: String, reason: String },
    Failed { reason: String },
}

impl Outcome {
    pub fn class(&self) -> OutcomeClass {
        match self {
            Outcome::Accepted { .. } => OutcomeClass::Accepted,
            Outcome::NeedsReview { .. } => OutcomeClass::NeedsReview,
            Outcome::Failed { .. } => OutcomeClass::Failed,
        }
    }

    pub fn translation(&self) -> Option<&str> {
        match self {
            Outcome::Accepted { translation } => Some(translation),
            Outcome::NeedsReview { translation, .. } => Some(translation),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Accepted { .. } => None,
            Outcome::NeedsReview { reason, .. } => Some(reason),
            Outcome::Failed { reason } => Some(reason),
        }
    }
}

/// Durable record of one work item's outcome.
///
/// Exactly one record per identity survives in the compacted ledger; during
/// active processing the same identity may transiently own several
/// uncompacted records (a retry after a failure, for example) and the merge
/// reconciles them by class precedence and recency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub identity: u64,
    pub payload: WorkPayload,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub produced_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn new(identity: u64, payload: WorkPayload, outcome: Outcome) -> Self {
        Self {
            identity,
            payload,
            outcome,
            produced_at: Utc::now(),
        }
    }

    pub fn class(&self) -> OutcomeClass {
        self.outcome.class()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> WorkPayload {
        WorkPayload {
            question: "How many movies are there?".to_string(),
            source_query: "MATCH (m:Movie) RETURN count(m)".to_string(),
        }
    }

    #[test]
    fn test_record_json_round_trip() {
        let record = ResultRecord::new(
            7,
            payload(),
            Outcome::Accepted {
                translation: "match $m isa movie; reduce $c = count($m);".to_string(),
            },
        );

        let json = serde_json::to_string(&record).unwrap();
        let back: ResultRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.class(), OutcomeClass::Accepted);
    }

    #[test]
    fn test_outcome_accessors() {
        let failed = Outcome::Failed {
            reason: "timeout".to_string(),
        };
        assert_eq!(failed.translation(), None);
        assert_eq!(failed.reason(), Some("timeout"));

        let review = Outcome::NeedsReview {
            translation: "match $m isa movie;".to_string(),
            reason: "semantic mismatch".to_string(),
        };
        assert_eq!(review.translation(), Some("match $m isa movie;"));
        assert_eq!(review.class(), OutcomeClass::NeedsReview);
    }
}
