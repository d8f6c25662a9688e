//! Aggregation service: claim, compute, write
//!
//! Every refresh (queue, sweep, operator) goes through here so the claim
//! discipline is the same for all of them:
//!
//! 1. acquire the subject's refresh claim (or report/wait if held)
//! 2. stamp the computation start time
//! 3. run the subject type's computator against the sources
//! 4. replace the row, conditional on still holding the claim
//! 5. release the claim
//!
//! A failure at any step leaves the previous row untouched.

use crate::aggregation::{ComputeError, Computators};
use crate::cache::{CacheLayer, ClaimGuard, SCHEMA_VERSION};
use crate::clock::Clock;
use crate::config::RefreshConfig;
use crate::error::RefreshError;
use crate::event::{DataEvent, EventBus};
use crate::sources::SourceAggregates;
use mentorboard_types::{CacheRecord, RefreshOutcome, SubjectKey};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Fallback poll while waiting on a claim held by another process
const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A record returned by a refresh, and whether this caller computed it
#[derive(Debug, Clone)]
pub struct Refreshed {
    pub record: Arc<CacheRecord>,
    /// `Refreshed` or `Coalesced`
    pub outcome: RefreshOutcome,
}

pub struct AggregationService {
    sources: Arc<dyn SourceAggregates>,
    computators: Computators,
    cache: CacheLayer,
    clock: Arc<dyn Clock>,
    events: EventBus,
    claim_timeout: chrono::Duration,
    owner: String,
}

impl AggregationService {
    pub fn new(
        sources: Arc<dyn SourceAggregates>,
        cache: CacheLayer,
        clock: Arc<dyn Clock>,
        events: EventBus,
        config: &RefreshConfig,
    ) -> Self {
        Self {
            sources,
            computators: Computators::default(),
            cache,
            clock,
            events,
            claim_timeout: config.claim_timeout(),
            owner: format!("mentorboard-{}", std::process::id()),
        }
    }

    /// Swap the computator set (custom metrics, tests)
    pub fn with_computators(mut self, computators: Computators) -> Self {
        self.computators = computators;
        self
    }

    /// Name written into claims taken by this service
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Refresh one subject; fails with `ClaimHeld` if it is being refreshed elsewhere
    pub async fn refresh(&self, key: &SubjectKey) -> Result<Arc<CacheRecord>, RefreshError> {
        self.try_refresh(key).await.map(|r| r.record)
    }

    pub async fn try_refresh(&self, key: &SubjectKey) -> Result<Refreshed, RefreshError> {
        match self.acquire(key)? {
            Some(guard) => self.run_claimed(key, guard).await.map(|record| Refreshed {
                record,
                outcome: RefreshOutcome::Refreshed,
            }),
            None => Err(self.claim_held(key)),
        }
    }

    /// Refresh one subject, waiting up to `wait` for a concurrent refresh to finish
    ///
    /// If the concurrent refresh wrote a new row, that row is returned as
    /// `Coalesced` instead of computing again.
    pub async fn refresh_or_wait(
        &self,
        key: &SubjectKey,
        wait: Duration,
    ) -> Result<Refreshed, RefreshError> {
        let deadline = tokio::time::Instant::now() + wait;
        let before = self.last_written_at(key)?;
        let mut waited = false;

        loop {
            let notify = self.cache.claims.waiter(key);
            let released = notify.notified();

            if let Some(guard) = self.acquire(key)? {
                drop(released);
                drop(notify);

                if waited {
                    if let Some(record) = self.coalesced_record(key, before).await? {
                        debug!(subject = %key, "Coalesced with concurrent refresh");
                        return Ok(Refreshed {
                            record,
                            outcome: RefreshOutcome::Coalesced,
                        });
                    }
                }
                return self.run_claimed(key, guard).await.map(|record| Refreshed {
                    record,
                    outcome: RefreshOutcome::Refreshed,
                });
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(self.claim_held(key));
            }
            if !waited {
                debug!(subject = %key, "Refresh claim held, waiting");
                waited = true;
            }

            tokio::select! {
                _ = released => {}
                _ = tokio::time::sleep((deadline - now).min(CLAIM_POLL_INTERVAL)) => {}
            }
        }
    }

    /// Remove a subject's row and pending queue entry
    pub async fn purge(&self, key: &SubjectKey) -> Result<bool, RefreshError> {
        let removed = self
            .cache
            .store
            .delete(key)
            .map_err(|e| RefreshError::store(key, e))?;
        self.cache
            .queue
            .remove(key)
            .map_err(|e| RefreshError::store(key, e))?;
        self.cache.hot.invalidate(key).await;

        info!(subject = %key, removed, "Subject purged from dashboard cache");
        self.events.publish(DataEvent::SubjectPurged(key.clone()));
        Ok(removed)
    }

    fn acquire(&self, key: &SubjectKey) -> Result<Option<ClaimGuard>, RefreshError> {
        self.cache
            .claims
            .try_acquire(key, &self.owner, self.clock.now(), self.claim_timeout)
            .map_err(|e| RefreshError::store(key, e))
    }

    fn claim_held(&self, key: &SubjectKey) -> RefreshError {
        let holder = match self.cache.claims.holder(key) {
            Ok(Some(claim)) => claim.owner,
            _ => "unknown".to_string(),
        };
        RefreshError::ClaimHeld {
            key: key.clone(),
            holder,
        }
    }

    fn last_written_at(
        &self,
        key: &SubjectKey,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, RefreshError> {
        self.cache
            .store
            .get(key)
            .map(|record| record.map(|r| r.cache_updated_at))
            .map_err(|e| RefreshError::store(key, e))
    }

    /// The row written since `before`, if any
    async fn coalesced_record(
        &self,
        key: &SubjectKey,
        before: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Option<Arc<CacheRecord>>, RefreshError> {
        let current = self
            .cache
            .store
            .get(key)
            .map_err(|e| RefreshError::store(key, e))?;

        match current {
            Some(record) if Some(record.cache_updated_at) != before => {
                let record = Arc::new(record);
                self.cache.hot.insert(record.clone()).await;
                Ok(Some(record))
            }
            _ => Ok(None),
        }
    }

    async fn run_claimed(
        &self,
        key: &SubjectKey,
        guard: ClaimGuard,
    ) -> Result<Arc<CacheRecord>, RefreshError> {
        let timer = Instant::now();
        let result = self.compute_and_write(key, &guard).await;

        match guard.release() {
            Ok(true) => {}
            Ok(false) => warn!(subject = %key, "Refresh claim was taken over before release"),
            Err(e) => warn!(subject = %key, error = %e, "Failed to release refresh claim"),
        }

        let elapsed_ms = timer.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(
                subject_type = %key.subject_type,
                subject_id = %key.subject_id,
                elapsed_ms,
                "Dashboard refreshed"
            ),
            Err(e) => self.report_failure(e, elapsed_ms),
        }
        result
    }

    async fn compute_and_write(
        &self,
        key: &SubjectKey,
        guard: &ClaimGuard,
    ) -> Result<Arc<CacheRecord>, RefreshError> {
        let started_at = self.clock.now();
        let computator = self.computators.get(key.subject_type).ok_or_else(|| {
            RefreshError::computation(key, format!("no computator for {}", key.subject_type))
        })?;

        let metrics = match computator
            .compute(self.sources.as_ref(), &key.subject_id)
            .await
        {
            Ok(Some(metrics)) => metrics,
            Ok(None) => {
                self.purge(key).await?;
                return Err(RefreshError::SubjectNotFound { key: key.clone() });
            }
            Err(ComputeError::Source(e)) => return Err(RefreshError::from_source(key, e)),
            Err(ComputeError::Invariant(message)) => {
                return Err(RefreshError::computation(key, message))
            }
        };

        if metrics.subject_type() != key.subject_type {
            return Err(RefreshError::computation(
                key,
                format!("computator produced {} metrics", metrics.subject_type()),
            ));
        }

        let record = CacheRecord {
            key: key.clone(),
            metrics,
            cache_updated_at: started_at,
            schema_version: SCHEMA_VERSION,
        };

        let written = self
            .cache
            .store
            .replace_if_claimed(&record, guard.token(), self.clock.now())
            .map_err(|e| RefreshError::store(key, e))?;
        if !written {
            return Err(RefreshError::ClaimTimeout { key: key.clone() });
        }

        let record = Arc::new(record);
        self.cache.hot.insert(record.clone()).await;
        self.events
            .publish(DataEvent::RecordRefreshed(key.clone()));
        Ok(record)
    }

    fn report_failure(&self, err: &RefreshError, elapsed_ms: u64) {
        let key = err.key();
        match err {
            RefreshError::SubjectNotFound { .. } => {
                info!(subject = %key, "Subject no longer exists, refresh dropped");
                return;
            }
            RefreshError::Computation { message, .. } => {
                error!(subject = %key, elapsed_ms, message = %message, "Dashboard computation failed")
            }
            _ => warn!(subject = %key, elapsed_ms, kind = err.kind(), error = %err, "Dashboard refresh failed"),
        }
        self.events.publish(DataEvent::RefreshFailed {
            key: key.clone(),
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}
