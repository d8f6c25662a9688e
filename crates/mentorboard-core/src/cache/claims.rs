//! Per-subject refresh claims
//!
//! A claim is a lease row in `refresh_claims`: at most one live claim per
//! subject key, expiring after the claim timeout so a crashed or hung worker
//! cannot block a subject forever. Expired claims can be taken over by the
//! next caller or force-released by the scheduler.
//!
//! Claims live in SQLite rather than memory so `serve` and one-off CLI
//! refreshes against the same data directory exclude each other too.

use super::db::Database;
use super::record_store::read_key;
use crate::clock::{from_millis, to_millis};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use mentorboard_types::SubjectKey;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

/// Current holder of a subject's claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimInfo {
    pub token: String,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Registry of refresh claims (cheap to clone)
#[derive(Clone)]
pub struct ClaimRegistry {
    inner: Arc<ClaimInner>,
}

struct ClaimInner {
    db: Arc<Database>,
    /// In-process waiters, woken when a claim on the key is released
    waiters: DashMap<SubjectKey, Arc<Notify>>,
}

impl ClaimRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            inner: Arc::new(ClaimInner {
                db,
                waiters: DashMap::new(),
            }),
        }
    }

    /// Try to claim `key` for `ttl`; `None` if a live claim exists
    pub fn try_acquire(
        &self,
        key: &SubjectKey,
        owner: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Option<ClaimGuard>> {
        let token = Uuid::new_v4().to_string();
        let expires_at = now + ttl;

        let mut conn = self.inner.db.lock();
        let tx = conn.transaction().context("Failed to begin claim")?;

        let existing: Option<(String, i64)> = tx
            .query_row(
                "SELECT owner, expires_at FROM refresh_claims
                 WHERE subject_type = ?1 AND subject_id = ?2",
                params![key.subject_type.as_str(), key.subject_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to query claim")?;

        match existing {
            Some((holder, expires_ms)) if expires_ms >= to_millis(now) => {
                debug!(subject = %key, holder = %holder, "Claim held elsewhere");
                return Ok(None);
            }
            Some((holder, _)) => {
                warn!(subject = %key, holder = %holder, "Taking over expired claim");
            }
            None => {}
        }

        tx.execute(
            "INSERT OR REPLACE INTO refresh_claims
             (subject_type, subject_id, token, owner, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                key.subject_type.as_str(),
                key.subject_id,
                token,
                owner,
                to_millis(now),
                to_millis(expires_at)
            ],
        )
        .context("Failed to write claim")?;
        tx.commit().context("Failed to commit claim")?;

        debug!(subject = %key, owner, "Claim acquired");
        Ok(Some(ClaimGuard {
            registry: self.clone(),
            key: key.clone(),
            token,
            expires_at,
            released: false,
        }))
    }

    /// Who holds `key`, if anyone (expired claims included)
    pub fn holder(&self, key: &SubjectKey) -> Result<Option<ClaimInfo>> {
        let conn = self.inner.db.lock();
        let row: Option<(String, String, i64, i64)> = conn
            .query_row(
                "SELECT token, owner, acquired_at, expires_at FROM refresh_claims
                 WHERE subject_type = ?1 AND subject_id = ?2",
                params![key.subject_type.as_str(), key.subject_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .context("Failed to query claim holder")?;

        row.map(|(token, owner, acquired, expires)| {
            Ok(ClaimInfo {
                token,
                owner,
                acquired_at: from_millis(acquired)?,
                expires_at: from_millis(expires)?,
            })
        })
        .transpose()
    }

    /// Force-release claims that expired before `now`; returns their keys
    pub fn release_expired(&self, now: DateTime<Utc>) -> Result<Vec<SubjectKey>> {
        let expired = {
            let mut conn = self.inner.db.lock();
            let tx = conn.transaction().context("Failed to begin claim sweep")?;

            let mut keys = Vec::new();
            {
                let mut stmt = tx
                    .prepare(
                        "SELECT subject_type, subject_id FROM refresh_claims WHERE expires_at < ?1",
                    )
                    .context("Failed to prepare expired claim query")?;
                let rows = stmt
                    .query_map(params![to_millis(now)], |row| read_key(row, 0))
                    .context("Failed to query expired claims")?;
                for row in rows {
                    keys.push(row.context("Failed to read expired claim")?);
                }
            }

            tx.execute(
                "DELETE FROM refresh_claims WHERE expires_at < ?1",
                params![to_millis(now)],
            )
            .context("Failed to delete expired claims")?;
            tx.commit().context("Failed to commit claim sweep")?;
            keys
        };

        for key in &expired {
            warn!(subject = %key, "Refresh claim timed out, force-released");
            self.wake(key);
        }
        Ok(expired)
    }

    /// Number of claim rows (live or expired)
    pub fn held_count(&self) -> Result<usize> {
        let count: i64 = self
            .inner
            .db
            .lock()
            .query_row("SELECT COUNT(*) FROM refresh_claims", [], |row| row.get(0))
            .context("Failed to count claims")?;
        Ok(count as usize)
    }

    /// Notifier woken when a claim on `key` is released in this process
    pub fn waiter(&self, key: &SubjectKey) -> Arc<Notify> {
        self.inner
            .waiters
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn release(&self, key: &SubjectKey, token: &str) -> Result<bool> {
        let removed = self
            .inner
            .db
            .lock()
            .execute(
                "DELETE FROM refresh_claims
                 WHERE subject_type = ?1 AND subject_id = ?2 AND token = ?3",
                params![key.subject_type.as_str(), key.subject_id, token],
            )
            .context("Failed to release claim")?;

        self.wake(key);
        Ok(removed > 0)
    }

    fn wake(&self, key: &SubjectKey) {
        if let Some(notify) = self.inner.waiters.get(key) {
            notify.notify_waiters();
        }
        // Drop the notifier once nobody but the map references it
        self.inner
            .waiters
            .remove_if(key, |_, notify| Arc::strong_count(notify) == 1);
    }
}

/// Held claim; released on drop
pub struct ClaimGuard {
    registry: ClaimRegistry,
    key: SubjectKey,
    token: String,
    expires_at: DateTime<Utc>,
    released: bool,
}

impl ClaimGuard {
    pub fn key(&self) -> &SubjectKey {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Release now; returns `false` if the claim had already been taken over
    pub fn release(mut self) -> Result<bool> {
        self.released = true;
        self.registry.release(&self.key, &self.token)
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.registry.release(&self.key, &self.token) {
            warn!(subject = %self.key, error = %e, "Failed to release claim on drop");
        }
    }
}

impl std::fmt::Debug for ClaimGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimGuard")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn registry() -> ClaimRegistry {
        ClaimRegistry::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_second_acquire_is_refused_until_release() {
        let claims = registry();
        let key = SubjectKey::director("director_7");

        let first = claims
            .try_acquire(&key, "scheduler", t0(), Duration::minutes(2))
            .unwrap()
            .unwrap();
        assert!(claims
            .try_acquire(&key, "operator", t0(), Duration::minutes(2))
            .unwrap()
            .is_none());

        assert!(first.release().unwrap());
        assert!(claims
            .try_acquire(&key, "operator", t0(), Duration::minutes(2))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_drop_releases_claim() {
        let claims = registry();
        let key = SubjectKey::student("s1");
        {
            let _guard = claims
                .try_acquire(&key, "worker", t0(), Duration::minutes(2))
                .unwrap()
                .unwrap();
            assert_eq!(claims.held_count().unwrap(), 1);
        }
        assert_eq!(claims.held_count().unwrap(), 0);
    }

    #[test]
    fn test_expired_claim_can_be_taken_over() {
        let claims = registry();
        let key = SubjectKey::student("s1");

        let stale = claims
            .try_acquire(&key, "crashed", t0(), Duration::seconds(30))
            .unwrap()
            .unwrap();
        let later = t0() + Duration::seconds(31);
        let fresh = claims
            .try_acquire(&key, "worker", later, Duration::seconds(30))
            .unwrap()
            .unwrap();

        assert_eq!(claims.holder(&key).unwrap().unwrap().owner, "worker");
        // The stale holder's release must not remove the new claim
        assert!(!stale.release().unwrap());
        assert_eq!(claims.holder(&key).unwrap().unwrap().token, fresh.token());
    }

    #[test]
    fn test_release_expired_returns_keys() {
        let claims = registry();
        let stuck = claims
            .try_acquire(&SubjectKey::student("stuck"), "w", t0(), Duration::seconds(10))
            .unwrap()
            .unwrap();
        let _live = claims
            .try_acquire(&SubjectKey::student("live"), "w", t0(), Duration::minutes(10))
            .unwrap()
            .unwrap();

        let expired = claims.release_expired(t0() + Duration::minutes(1)).unwrap();
        assert_eq!(expired, vec![SubjectKey::student("stuck")]);
        assert_eq!(claims.held_count().unwrap(), 1);
        std::mem::forget(stuck);
    }

    #[tokio::test]
    async fn test_release_wakes_waiters() {
        let claims = registry();
        let key = SubjectKey::sponsor("org1");
        let guard = claims
            .try_acquire(&key, "w", t0(), Duration::minutes(1))
            .unwrap()
            .unwrap();

        let notify = claims.waiter(&key);
        let notified = notify.notified();
        guard.release().unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), notified)
            .await
            .expect("waiter should be woken");
    }
}
