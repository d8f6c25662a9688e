//! Durable update queue
//!
//! One pending entry per subject key. Producers (mutation hooks, operators)
//! enqueue; the scheduler drains oldest-first under a queue claim and then
//! acks, retries, defers or drops each entry.

use super::db::Database;
use crate::clock::{from_millis, to_millis, Clock};
use anyhow::{Context, Result};
use chrono::Duration;
use mentorboard_types::{QueueEntry, RefreshReason, SubjectKey, SubjectType};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const ENTRY_COLUMNS: &str = "subject_type, subject_id, reason, enqueued_at, generation, \
                             attempts, last_error, not_before, claimed_at, claim_token";

/// What `ack` did with an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckResult {
    /// Entry deleted
    Removed,
    /// Re-enqueued while being refreshed; released back to pending
    Requeued,
    /// Our queue claim was gone (expired and re-drained, or entry removed)
    Lost,
}

pub struct UpdateQueue {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    claim_timeout: Duration,
}

impl UpdateQueue {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, claim_timeout: Duration) -> Self {
        Self {
            db,
            clock,
            claim_timeout,
        }
    }

    /// Mark `key` stale. Returns `true` if a new entry was created, `false`
    /// if it collapsed into an already pending one.
    pub fn enqueue(&self, key: &SubjectKey, reason: RefreshReason) -> Result<bool> {
        let now = to_millis(self.clock.now());
        let mut conn = self.db.lock();
        let tx = conn.transaction().context("Failed to begin enqueue")?;

        let exists = tx
            .query_row(
                "SELECT 1 FROM refresh_queue WHERE subject_type = ?1 AND subject_id = ?2",
                params![key.subject_type.as_str(), key.subject_id],
                |_| Ok(()),
            )
            .optional()
            .context("Failed to look up queue entry")?
            .is_some();

        tx.execute(
            "INSERT INTO refresh_queue (subject_type, subject_id, reason, enqueued_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(subject_type, subject_id) DO UPDATE
             SET reason = excluded.reason, generation = generation + 1",
            params![key.subject_type.as_str(), key.subject_id, reason.as_str(), now],
        )
        .context("Failed to enqueue subject")?;
        tx.commit().context("Failed to commit enqueue")?;

        debug!(subject = %key, reason = %reason, coalesced = exists, "Subject enqueued");
        Ok(!exists)
    }

    /// Claim up to `batch_size` oldest due entries
    pub fn drain(&self, batch_size: usize) -> Result<Vec<QueueEntry>> {
        let now = self.clock.now();
        let expired_before = to_millis(now - self.claim_timeout);

        let mut conn = self.db.lock();
        let tx = conn.transaction().context("Failed to begin drain")?;

        let raw = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM refresh_queue
                     WHERE (claim_token IS NULL OR claimed_at < ?1)
                       AND (not_before IS NULL OR not_before <= ?2)
                     ORDER BY enqueued_at ASC, subject_type, subject_id
                     LIMIT ?3"
                ))
                .context("Failed to prepare drain query")?;
            let rows = stmt
                .query_map(
                    params![expired_before, to_millis(now), batch_size as i64],
                    RawEntry::from_row,
                )
                .context("Failed to query due entries")?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read queue entry")?
        };

        let mut entries = Vec::with_capacity(raw.len());
        for raw_entry in raw {
            let mut entry = raw_entry.into_entry()?;
            if entry.is_claimed() {
                warn!(subject = %entry.key, "Reclaiming queue entry with expired claim");
            }
            let token = Uuid::new_v4().to_string();
            tx.execute(
                "UPDATE refresh_queue SET claimed_at = ?3, claim_token = ?4
                 WHERE subject_type = ?1 AND subject_id = ?2",
                params![
                    entry.key.subject_type.as_str(),
                    entry.key.subject_id,
                    to_millis(now),
                    token
                ],
            )
            .context("Failed to claim queue entry")?;
            entry.claimed_at = Some(now);
            entry.claim_token = Some(token);
            entries.push(entry);
        }
        tx.commit().context("Failed to commit drain")?;

        if !entries.is_empty() {
            debug!(count = entries.len(), "Queue entries drained");
        }
        Ok(entries)
    }

    /// Finish a successfully refreshed entry
    pub fn ack(&self, entry: &QueueEntry) -> Result<AckResult> {
        let Some(token) = entry.claim_token.as_deref() else {
            return Ok(AckResult::Lost);
        };
        let key = &entry.key;
        let mut conn = self.db.lock();
        let tx = conn.transaction().context("Failed to begin ack")?;

        let removed = tx
            .execute(
                "DELETE FROM refresh_queue
                 WHERE subject_type = ?1 AND subject_id = ?2 AND claim_token = ?3 AND generation = ?4",
                params![
                    key.subject_type.as_str(),
                    key.subject_id,
                    token,
                    entry.generation as i64
                ],
            )
            .context("Failed to delete acked entry")?;

        let result = if removed > 0 {
            AckResult::Removed
        } else {
            let released = tx
                .execute(
                    "UPDATE refresh_queue SET claimed_at = NULL, claim_token = NULL
                     WHERE subject_type = ?1 AND subject_id = ?2 AND claim_token = ?3",
                    params![key.subject_type.as_str(), key.subject_id, token],
                )
                .context("Failed to release requeued entry")?;
            if released > 0 {
                AckResult::Requeued
            } else {
                AckResult::Lost
            }
        };
        tx.commit().context("Failed to commit ack")?;

        debug!(subject = %key, result = ?result, "Queue entry acked");
        Ok(result)
    }

    /// Release after a failure; the entry is not due again before `now + delay`
    pub fn retry_later(&self, entry: &QueueEntry, error: &str, delay: Duration) -> Result<bool> {
        let not_before = to_millis(self.clock.now() + delay);
        self.release_with(
            "attempts = attempts + 1, last_error = ?4, not_before = ?5",
            params![
                entry.key.subject_type.as_str(),
                entry.key.subject_id,
                entry.claim_token.as_deref().unwrap_or_default(),
                error,
                not_before
            ],
        )
    }

    /// Release without counting an attempt (subject busy elsewhere)
    pub fn defer(&self, entry: &QueueEntry, delay: Duration) -> Result<bool> {
        let not_before = to_millis(self.clock.now() + delay);
        self.release_with(
            "not_before = ?4",
            params![
                entry.key.subject_type.as_str(),
                entry.key.subject_id,
                entry.claim_token.as_deref().unwrap_or_default(),
                not_before
            ],
        )
    }

    fn release_with(
        &self,
        assignments: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<bool> {
        let updated = self
            .db
            .lock()
            .execute(
                &format!(
                    "UPDATE refresh_queue
                     SET claimed_at = NULL, claim_token = NULL, {assignments}
                     WHERE subject_type = ?1 AND subject_id = ?2 AND claim_token = ?3"
                ),
                params,
            )
            .context("Failed to release queue entry")?;
        Ok(updated > 0)
    }

    /// Remove a drained entry regardless of generation (subject gone)
    pub fn drop_entry(&self, entry: &QueueEntry) -> Result<bool> {
        self.remove(&entry.key)
    }

    /// Remove whatever is pending for `key`
    pub fn remove(&self, key: &SubjectKey) -> Result<bool> {
        let removed = self
            .db
            .lock()
            .execute(
                "DELETE FROM refresh_queue WHERE subject_type = ?1 AND subject_id = ?2",
                params![key.subject_type.as_str(), key.subject_id],
            )
            .context("Failed to remove queue entry")?;
        Ok(removed > 0)
    }

    /// Force-release queue claims older than the claim timeout
    pub fn release_expired_claims(&self) -> Result<usize> {
        let cutoff = to_millis(self.clock.now() - self.claim_timeout);
        let released = self
            .db
            .lock()
            .execute(
                "UPDATE refresh_queue SET claimed_at = NULL, claim_token = NULL
                 WHERE claim_token IS NOT NULL AND claimed_at < ?1",
                params![cutoff],
            )
            .context("Failed to release expired queue claims")?;

        if released > 0 {
            warn!(released, "Queue claims timed out, entries returned to pending");
        }
        Ok(released)
    }

    pub fn get(&self, key: &SubjectKey) -> Result<Option<QueueEntry>> {
        let raw = self
            .db
            .lock()
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM refresh_queue
                     WHERE subject_type = ?1 AND subject_id = ?2"
                ),
                params![key.subject_type.as_str(), key.subject_id],
                RawEntry::from_row,
            )
            .optional()
            .context("Failed to query queue entry")?;
        raw.map(RawEntry::into_entry).transpose()
    }

    /// Entries still waiting (claimed ones included)
    pub fn pending_count(&self) -> Result<usize> {
        let count: i64 = self
            .db
            .lock()
            .query_row("SELECT COUNT(*) FROM refresh_queue", [], |row| row.get(0))
            .context("Failed to count queue entries")?;
        Ok(count as usize)
    }

    /// Oldest entries first
    pub fn list(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM refresh_queue
                 ORDER BY enqueued_at ASC, subject_type, subject_id
                 LIMIT ?1"
            ))
            .context("Failed to prepare queue listing")?;
        let rows = stmt
            .query_map(params![limit as i64], RawEntry::from_row)
            .context("Failed to list queue")?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.context("Failed to read queue entry")?.into_entry()?);
        }
        Ok(entries)
    }
}

/// Column values before timestamp and enum conversion
struct RawEntry {
    subject_type: String,
    subject_id: String,
    reason: String,
    enqueued_at: i64,
    generation: i64,
    attempts: i64,
    last_error: Option<String>,
    not_before: Option<i64>,
    claimed_at: Option<i64>,
    claim_token: Option<String>,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            subject_type: row.get(0)?,
            subject_id: row.get(1)?,
            reason: row.get(2)?,
            enqueued_at: row.get(3)?,
            generation: row.get(4)?,
            attempts: row.get(5)?,
            last_error: row.get(6)?,
            not_before: row.get(7)?,
            claimed_at: row.get(8)?,
            claim_token: row.get(9)?,
        })
    }

    fn into_entry(self) -> Result<QueueEntry> {
        let subject_type: SubjectType = self
            .subject_type
            .parse()
            .with_context(|| format!("Corrupt queue row for '{}'", self.subject_id))?;
        let reason: RefreshReason = self
            .reason
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .with_context(|| format!("Corrupt queue row for '{}'", self.subject_id))?;

        Ok(QueueEntry {
            key: SubjectKey::new(subject_type, self.subject_id),
            reason,
            enqueued_at: from_millis(self.enqueued_at)?,
            generation: self.generation as u64,
            attempts: self.attempts as u32,
            last_error: self.last_error,
            not_before: self.not_before.map(from_millis).transpose()?,
            claimed_at: self.claimed_at.map(from_millis).transpose()?,
            claim_token: self.claim_token,
        })
    }
}
