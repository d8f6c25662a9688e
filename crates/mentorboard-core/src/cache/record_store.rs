//! Cache record store
//!
//! One row per subject. Rows are only ever replaced whole, and only while the
//! writer still holds the subject's refresh claim (checked in the same
//! transaction as the replace).

use super::db::Database;
use crate::clock::{from_millis, to_millis};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mentorboard_types::{CacheRecord, DashboardMetrics, SubjectKey, SubjectType};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Store for precomputed dashboard rows
pub struct CacheStore {
    db: Arc<Database>,
}

impl CacheStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Get the last written record for a subject
    pub fn get(&self, key: &SubjectKey) -> Result<Option<CacheRecord>> {
        let conn = self.db.lock();
        let row = conn
            .query_row(
                "SELECT cache_updated_at, schema_version, data FROM dashboard_cache
                 WHERE subject_type = ?1 AND subject_id = ?2",
                params![key.subject_type.as_str(), key.subject_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query cache record")?;

        match row {
            Some((updated_ms, schema_version, data)) => {
                let metrics: DashboardMetrics =
                    bincode::deserialize(&data).context("Failed to deserialize cached metrics")?;
                debug!(subject = %key, "Cache record hit");
                Ok(Some(CacheRecord {
                    key: key.clone(),
                    metrics,
                    cache_updated_at: from_millis(updated_ms)?,
                    schema_version,
                }))
            }
            None => {
                debug!(subject = %key, "Cache record miss");
                Ok(None)
            }
        }
    }

    /// Replace the record if `claim_token` still holds the subject's claim at `now`
    ///
    /// Returns `false` (and writes nothing) when the claim expired or was taken over.
    pub fn replace_if_claimed(
        &self,
        record: &CacheRecord,
        claim_token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let key = &record.key;
        let data = bincode::serialize(&record.metrics).context("Failed to serialize metrics")?;

        let mut conn = self.db.lock();
        let tx = conn.transaction().context("Failed to begin record write")?;

        let holds_claim = tx
            .query_row(
                "SELECT 1 FROM refresh_claims
                 WHERE subject_type = ?1 AND subject_id = ?2 AND token = ?3 AND expires_at >= ?4",
                params![
                    key.subject_type.as_str(),
                    key.subject_id,
                    claim_token,
                    to_millis(now)
                ],
                |_| Ok(()),
            )
            .optional()
            .context("Failed to verify refresh claim")?
            .is_some();

        if !holds_claim {
            debug!(subject = %key, "Claim lost before write, record not replaced");
            return Ok(false);
        }

        tx.execute(
            "INSERT OR REPLACE INTO dashboard_cache
             (subject_type, subject_id, cache_updated_at, schema_version, data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.subject_type.as_str(),
                key.subject_id,
                to_millis(record.cache_updated_at),
                record.schema_version,
                data,
            ],
        )
        .context("Failed to write cache record")?;
        tx.commit().context("Failed to commit cache record")?;

        debug!(subject = %key, "Cache record replaced");
        Ok(true)
    }

    /// Remove a subject's row (subject deleted upstream)
    pub fn delete(&self, key: &SubjectKey) -> Result<bool> {
        let conn = self.db.lock();
        conn.execute(
            "DELETE FROM sweep_attempts WHERE subject_type = ?1 AND subject_id = ?2",
            params![key.subject_type.as_str(), key.subject_id],
        )
        .context("Failed to delete sweep attempt")?;
        let removed = conn
            .execute(
                "DELETE FROM dashboard_cache WHERE subject_type = ?1 AND subject_id = ?2",
                params![key.subject_type.as_str(), key.subject_id],
            )
            .context("Failed to delete cache record")?;
        Ok(removed > 0)
    }

    /// Remember that a sweep refresh of `key` failed at `at`
    ///
    /// The row keeps its old `cache_updated_at`; the attempt only moves it
    /// behind other stale rows in [`stale_keys`](Self::stale_keys).
    pub fn record_sweep_failure(&self, key: &SubjectKey, at: DateTime<Utc>) -> Result<()> {
        self.db
            .lock()
            .execute(
                "INSERT OR REPLACE INTO sweep_attempts (subject_type, subject_id, attempted_at)
                 VALUES (?1, ?2, ?3)",
                params![key.subject_type.as_str(), key.subject_id, to_millis(at)],
            )
            .context("Failed to record sweep attempt")?;
        Ok(())
    }

    /// Rows last refreshed before `cutoff`, least recently tried first
    ///
    /// A failed sweep attempt newer than the row counts as its last try, so a
    /// row that keeps failing rotates to the back instead of holding the batch.
    pub fn stale_keys(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(SubjectKey, DateTime<Utc>)>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare(
                "SELECT c.subject_type, c.subject_id, c.cache_updated_at
                 FROM dashboard_cache c
                 LEFT JOIN sweep_attempts a
                   ON a.subject_type = c.subject_type AND a.subject_id = c.subject_id
                 WHERE c.cache_updated_at < ?1
                 ORDER BY MAX(c.cache_updated_at, COALESCE(a.attempted_at, 0)) ASC,
                          c.subject_type, c.subject_id
                 LIMIT ?2",
            )
            .context("Failed to prepare stale query")?;

        let rows = stmt
            .query_map(params![to_millis(cutoff), limit as i64], |row| {
                Ok((read_key(row, 0)?, row.get::<_, i64>(2)?))
            })
            .context("Failed to query stale rows")?;

        let mut stale = Vec::new();
        for row in rows {
            let (key, updated_ms) = row.context("Failed to read stale row")?;
            stale.push((key, from_millis(updated_ms)?));
        }
        Ok(stale)
    }

    /// All cached keys of one subject type
    pub fn keys(&self, subject_type: SubjectType) -> Result<Vec<SubjectKey>> {
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare(
                "SELECT subject_type, subject_id FROM dashboard_cache
                 WHERE subject_type = ?1 ORDER BY subject_id",
            )
            .context("Failed to prepare key query")?;

        let rows = stmt
            .query_map(params![subject_type.as_str()], |row| read_key(row, 0))
            .context("Failed to query keys")?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.context("Failed to read key")?);
        }
        Ok(keys)
    }

    /// Get cache statistics
    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.db.lock();

        let mut by_type = BTreeMap::new();
        let mut stmt = conn
            .prepare("SELECT subject_type, COUNT(*) FROM dashboard_cache GROUP BY subject_type")
            .context("Failed to prepare stats query")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .context("Failed to count rows by type")?;
        for row in rows {
            let (subject_type, count) = row.context("Failed to read count")?;
            if let Ok(subject_type) = subject_type.parse::<SubjectType>() {
                by_type.insert(subject_type, count as usize);
            }
        }

        let (total_size, oldest, newest): (Option<i64>, Option<i64>, Option<i64>) = conn
            .query_row(
                "SELECT SUM(LENGTH(data)), MIN(cache_updated_at), MAX(cache_updated_at)
                 FROM dashboard_cache",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .context("Failed to aggregate cache stats")?;

        Ok(CacheStats {
            total_entries: by_type.values().sum(),
            total_size_bytes: total_size.unwrap_or(0) as usize,
            by_type,
            oldest_update: oldest.map(from_millis).transpose()?,
            newest_update: newest.map(from_millis).transpose()?,
        })
    }

    /// Clear all rows (operator rebuild)
    pub fn clear(&self) -> Result<usize> {
        let conn = self.db.lock();
        conn.execute("DELETE FROM sweep_attempts", [])
            .context("Failed to clear sweep attempts")?;
        let removed = conn
            .execute("DELETE FROM dashboard_cache", [])
            .context("Failed to clear cache")?;
        debug!(removed, "Cache cleared");
        Ok(removed)
    }
}

pub(crate) fn read_key(row: &Row<'_>, idx: usize) -> rusqlite::Result<SubjectKey> {
    let subject_type: String = row.get(idx)?;
    let subject_id: String = row.get(idx + 1)?;
    let subject_type = subject_type.parse::<SubjectType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(SubjectKey::new(subject_type, subject_id))
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_bytes: usize,
    pub by_type: BTreeMap<SubjectType, usize>,
    pub oldest_update: Option<DateTime<Utc>>,
    pub newest_update: Option<DateTime<Utc>>,
}

impl CacheStats {
    pub fn count(&self, subject_type: SubjectType) -> usize {
        self.by_type.get(&subject_type).copied().unwrap_or(0)
    }
}
