use super::subject::{RefreshReason, SubjectKey, SubjectType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pending "this subject's cache is stale" signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub key: SubjectKey,
    /// Latest reason seen for the subject (coalesced enqueues overwrite it)
    pub reason: RefreshReason,
    /// First enqueue time; kept across coalesced enqueues
    pub enqueued_at: DateTime<Utc>,
    /// Bumped on every coalesced enqueue, compared on ack
    pub generation: u64,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Retry gate set after a failed refresh
    pub not_before: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claim_token: Option<String>,
}

impl QueueEntry {
    pub fn is_claimed(&self) -> bool {
        self.claim_token.is_some()
    }
}

/// How a single refresh attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// Computed and written by this caller
    Refreshed,
    /// Another worker held the claim; its result was returned
    Coalesced,
    /// Subject no longer exists; queue entry and row removed
    Dropped,
    /// Subject busy elsewhere; left for a later tick
    Deferred,
    /// Source, store or computation failure; nothing written
    Failed,
}

/// Per-subject failure surfaced to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshFailure {
    pub key: SubjectKey,
    /// Error taxonomy name (`source_unavailable`, `computation_error`, ...)
    pub kind: String,
    pub message: String,
}

/// Result of one scheduler tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    /// Refresh claims force-released because they outlived the claim timeout
    pub expired_claims: usize,
    /// Queue entries whose claim outlived the claim timeout
    pub expired_queue_claims: usize,
    pub queue_drained: usize,
    pub queue_refreshed: usize,
    pub queue_dropped: usize,
    pub queue_deferred: usize,
    pub queue_failed: usize,
    pub sweep_candidates: usize,
    pub sweep_refreshed: usize,
    pub sweep_failed: usize,
    pub failures: Vec<RefreshFailure>,
}

impl TickSummary {
    pub fn record(&mut self, from_queue: bool, outcome: RefreshOutcome) {
        match (from_queue, outcome) {
            (true, RefreshOutcome::Refreshed | RefreshOutcome::Coalesced) => {
                self.queue_refreshed += 1
            }
            (true, RefreshOutcome::Dropped) => self.queue_dropped += 1,
            (true, RefreshOutcome::Deferred) => self.queue_deferred += 1,
            (true, RefreshOutcome::Failed) => self.queue_failed += 1,
            (false, RefreshOutcome::Refreshed | RefreshOutcome::Coalesced) => {
                self.sweep_refreshed += 1
            }
            (false, RefreshOutcome::Failed) => self.sweep_failed += 1,
            (false, RefreshOutcome::Dropped | RefreshOutcome::Deferred) => {}
        }
    }

    pub fn total_refreshed(&self) -> usize {
        self.queue_refreshed + self.sweep_refreshed
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Result of a bulk operator refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshAllSummary {
    pub subject_type: SubjectType,
    pub total: usize,
    pub refreshed: usize,
    pub coalesced: usize,
    pub not_found: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    pub failures: Vec<RefreshFailure>,
}

impl RefreshAllSummary {
    pub fn new(subject_type: SubjectType) -> Self {
        Self {
            subject_type,
            total: 0,
            refreshed: 0,
            coalesced: 0,
            not_found: 0,
            failed: 0,
            elapsed_ms: 0,
            failures: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.refreshed + self.coalesced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_summary_record() {
        let mut summary = TickSummary::default();
        summary.record(true, RefreshOutcome::Refreshed);
        summary.record(true, RefreshOutcome::Dropped);
        summary.record(true, RefreshOutcome::Failed);
        summary.record(false, RefreshOutcome::Coalesced);
        summary.record(false, RefreshOutcome::Deferred);

        assert_eq!(summary.queue_refreshed, 1);
        assert_eq!(summary.queue_dropped, 1);
        assert_eq!(summary.queue_failed, 1);
        assert_eq!(summary.sweep_refreshed, 1);
        assert_eq!(summary.total_refreshed(), 2);
    }
}
