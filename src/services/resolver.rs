//! Cross-class deduplication.
//!
//! When the same identity lands in more than one outcome class (a retry
//! that succeeded after an earlier failure, or two overlapping runs), the
//! ledger must keep it in exactly one. The rule is a fixed class priority,
//! `Accepted > NeedsReview > Failed`, with last-write-wins inside a class.
//! A later accepted conversion supersedes an earlier failure; a reviewer
//! moving an item out of accepted is newer ledger state and is never
//! resurrected by a stale accepted row, because that row was already
//! removed from the accepted table when the reviewer moved it.

use std::collections::{HashMap, HashSet};

use crate::models::ResultRecord;

/// Resolve cross-class duplicates. Pure function, no I/O.
///
/// Each identity survives only in its highest-priority class; within a
/// class, duplicate identities keep the most recently produced row. Output
/// vectors are sorted by identity.
pub fn resolve(
    accepted: Vec<ResultRecord>,
    needs_review: Vec<ResultRecord>,
    failed: Vec<ResultRecord>,
) -> (Vec<ResultRecord>, Vec<ResultRecord>, Vec<ResultRecord>) {
    let accepted = dedup_within_class(accepted);
    let mut needs_review = dedup_within_class(needs_review);
    let mut failed = dedup_within_class(failed);

    let accepted_ids: HashSet<u64> = accepted.iter().map(|r| r.identity).collect();
    needs_review.retain(|r| !accepted_ids.contains(&r.identity));

    let review_ids: HashSet<u64> = needs_review.iter().map(|r| r.identity).collect();
    failed.retain(|r| !accepted_ids.contains(&r.identity) && !review_ids.contains(&r.identity));

    (accepted, needs_review, failed)
}

/// Keep the most recently produced row per identity. Step 3 of the merge
/// already does this, but the resolver re-checks so it is safe on ledger
/// tables that were written by older runs.
fn dedup_within_class(rows: Vec<ResultRecord>) -> Vec<ResultRecord> {
    let mut by_identity: HashMap<u64, ResultRecord> = HashMap::new();
    for row in rows {
        match by_identity.get(&row.identity) {
            Some(existing) if existing.produced_at > row.produced_at => {}
            _ => {
                by_identity.insert(row.identity, row);
            }
        }
    }
    let mut rows: Vec<ResultRecord> = by_identity.into_values().collect();
    rows.sort_by_key(|r| r.identity);
    rows
}
