//! Dashboard service: the read path plus the operator entry points
//!
//! Bundles the cache layer, the aggregation service, the scheduler and the
//! mutation hooks behind one handle shared by the web crate and the CLI.

use crate::cache::{CacheLayer, CacheStats, UpdateQueue};
use crate::clock::{Clock, SystemClock};
use crate::config::RefreshConfig;
use crate::error::{CoreError, DegradedState, RefreshError};
use crate::event::{DataEvent, EventBus};
use crate::hooks::MutationHooks;
use crate::refresh::{AggregationService, Refreshed};
use crate::scheduler::RefreshScheduler;
use crate::sources::{SourceAggregates, SqliteSources, TimedSources};
use crate::subject::validate_key;
use mentorboard_types::{
    CacheRecord, RefreshAllSummary, RefreshFailure, RefreshOutcome, RefreshReason, SubjectKey,
    SubjectType, TickSummary,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Snapshot for `stats` and `/api/health`
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub cache: CacheStats,
    pub pending_queue: usize,
    pub held_claims: usize,
    pub hot_entries: u64,
    pub state: &'static str,
    pub last_tick: Option<TickSummary>,
}

pub struct DashboardService {
    cache: CacheLayer,
    sources: Arc<dyn SourceAggregates>,
    aggregation: Arc<AggregationService>,
    scheduler: Arc<RefreshScheduler>,
    hooks: MutationHooks,
    events: EventBus,
    config: RefreshConfig,
}

impl DashboardService {
    /// Wire every component around `sources` and `cache`
    pub fn new(
        sources: Arc<dyn SourceAggregates>,
        cache: CacheLayer,
        clock: Arc<dyn Clock>,
        config: RefreshConfig,
    ) -> Self {
        let events = EventBus::default_capacity();
        let aggregation = Arc::new(AggregationService::new(
            sources.clone(),
            cache.clone(),
            clock.clone(),
            events.clone(),
            &config,
        ));
        let scheduler = Arc::new(RefreshScheduler::new(
            aggregation.clone(),
            cache.clone(),
            clock,
            events.clone(),
            config.clone(),
        ));
        let hooks = MutationHooks::new(
            cache.queue.clone(),
            sources.clone(),
            aggregation.clone(),
            events.clone(),
        );

        Self {
            cache,
            sources,
            aggregation,
            scheduler,
            hooks,
            events,
            config,
        }
    }

    /// Open the cache in `data_dir` and the SQLite sources at `sources_db`
    ///
    /// Source reads are bounded by `source_read_timeout_secs`.
    pub fn open(
        data_dir: &Path,
        sources_db: &Path,
        config: RefreshConfig,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = CacheLayer::open(data_dir, clock.clone(), &config)?;
        let sqlite = SqliteSources::open(sources_db)?;
        let sources = Arc::new(TimedSources::new(
            Arc::new(sqlite),
            config.source_read_timeout(),
        ));

        info!(
            data_dir = %data_dir.display(),
            sources = %sources_db.display(),
            "Dashboard service opened"
        );
        Ok(Self::new(sources, cache, clock, config))
    }

    /// Cached record for `key`; never computes
    pub async fn get_cache_record(&self, key: &SubjectKey) -> Result<Arc<CacheRecord>, CoreError> {
        validate_key(key)?;

        if let Some(record) = self.cache.hot.get(key).await {
            debug!(subject = %key, "Hot cache hit");
            return Ok(record);
        }

        debug!(subject = %key, "Hot cache miss");
        match self.cache.store.get(key)? {
            Some(record) => {
                let record = Arc::new(record);
                self.cache.hot.insert(record.clone()).await;
                Ok(record)
            }
            None => Err(CoreError::RecordNotFound { key: key.clone() }),
        }
    }

    /// Refresh `key` now, waiting for a concurrent refresh if one is running
    pub async fn refresh_now(&self, key: &SubjectKey) -> Result<Refreshed, CoreError> {
        validate_key(key)?;
        let refreshed = self
            .aggregation
            .refresh_or_wait(key, self.config.claim_wait_timeout())
            .await?;
        Ok(refreshed)
    }

    pub async fn refresh_all(&self, subject_type: SubjectType) -> Result<RefreshAllSummary, CoreError> {
        self.refresh_all_with_progress(subject_type, |_, _| {}).await
    }

    /// Refresh every existing subject of `subject_type`
    ///
    /// `on_done` runs once per subject, in listing order, as results come in.
    pub async fn refresh_all_with_progress<F>(
        &self,
        subject_type: SubjectType,
        mut on_done: F,
    ) -> Result<RefreshAllSummary, CoreError>
    where
        F: FnMut(&SubjectKey, &Result<Refreshed, RefreshError>),
    {
        let timer = Instant::now();
        let ids = self.sources.list_subjects(subject_type).await?;
        let mut summary = RefreshAllSummary::new(subject_type);
        summary.total = ids.len();
        info!(subject_type = %subject_type, total = ids.len(), "Refreshing all dashboards");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_refreshes));
        let wait = self.config.claim_wait_timeout();
        let mut handles = Vec::with_capacity(ids.len());

        for id in ids {
            let key = SubjectKey::new(subject_type, id);
            let sem = semaphore.clone();
            let aggregation = self.aggregation.clone();
            let task_key = key.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.map_err(|e| {
                    RefreshError::computation(&task_key, format!("worker pool closed: {}", e))
                })?;
                aggregation.refresh_or_wait(&task_key, wait).await
            });
            handles.push((key, handle));
        }

        for (key, handle) in handles {
            let result = handle.await.unwrap_or_else(|e| {
                Err(RefreshError::computation(
                    &key,
                    format!("refresh task panicked: {}", e),
                ))
            });
            on_done(&key, &result);

            match result {
                Ok(Refreshed {
                    outcome: RefreshOutcome::Coalesced,
                    ..
                }) => summary.coalesced += 1,
                Ok(_) => summary.refreshed += 1,
                Err(RefreshError::SubjectNotFound { .. }) => summary.not_found += 1,
                Err(err) => {
                    summary.failed += 1;
                    summary.failures.push(RefreshFailure {
                        key: err.key().clone(),
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        summary.elapsed_ms = timer.elapsed().as_millis() as u64;
        info!(
            subject_type = %subject_type,
            refreshed = summary.refreshed,
            coalesced = summary.coalesced,
            not_found = summary.not_found,
            failed = summary.failed,
            elapsed_ms = summary.elapsed_ms,
            "Refresh-all completed"
        );
        Ok(summary)
    }

    /// Mark `key` stale by hand (operator)
    pub fn enqueue(&self, key: &SubjectKey, reason: RefreshReason) -> Result<bool, CoreError> {
        validate_key(key)?;
        let created = self.cache.queue.enqueue(key, reason)?;
        self.events.publish(DataEvent::Enqueued {
            key: key.clone(),
            reason,
        });
        Ok(created)
    }

    /// Drop every cached row; dashboards read as not ready until refreshed
    pub fn clear_cache(&self) -> Result<usize, CoreError> {
        let removed = self.cache.store.clear()?;
        self.cache.hot.invalidate_all();
        info!(removed, "Dashboard cache cleared");
        Ok(removed)
    }

    pub fn stats(&self) -> Result<StatsReport, CoreError> {
        Ok(StatsReport {
            cache: self.cache.store.stats()?,
            pending_queue: self.cache.queue.pending_count()?,
            held_claims: self.cache.claims.held_count()?,
            hot_entries: self.cache.hot.entry_count(),
            state: self.scheduler.degraded_state().label(),
            last_tick: self.scheduler.last_tick(),
        })
    }

    pub fn degraded_state(&self) -> DegradedState {
        self.scheduler.degraded_state()
    }

    pub fn hooks(&self) -> &MutationHooks {
        &self.hooks
    }

    pub fn queue(&self) -> &Arc<UpdateQueue> {
        &self.cache.queue
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn scheduler(&self) -> &Arc<RefreshScheduler> {
        &self.scheduler
    }

    pub fn aggregation(&self) -> &Arc<AggregationService> {
        &self.aggregation
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }
}
