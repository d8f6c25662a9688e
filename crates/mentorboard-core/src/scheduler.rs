//! Periodic refresh driver
//!
//! Each tick releases expired claims, drains the update queue in batches and
//! then sweeps rows older than the staleness threshold. Refreshes fan out to a
//! bounded pool (semaphore + spawned tasks); one subject's failure, or panic,
//! never aborts the rest of the batch.

use crate::cache::{AckResult, CacheLayer};
use crate::clock::Clock;
use crate::config::RefreshConfig;
use crate::error::{CoreError, DegradedState, RefreshError};
use crate::event::{DataEvent, EventBus};
use crate::refresh::{AggregationService, Refreshed};
use mentorboard_types::{QueueEntry, RefreshFailure, RefreshOutcome, SubjectKey, TickSummary};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub struct RefreshScheduler {
    service: Arc<AggregationService>,
    cache: CacheLayer,
    clock: Arc<dyn Clock>,
    events: EventBus,
    config: RefreshConfig,
    degraded: RwLock<DegradedState>,
    last_tick: RwLock<Option<TickSummary>>,
    /// Serializes ticks started from different callers (loop, CLI, tests)
    running: tokio::sync::Mutex<()>,
}

impl RefreshScheduler {
    pub fn new(
        service: Arc<AggregationService>,
        cache: CacheLayer,
        clock: Arc<dyn Clock>,
        events: EventBus,
        config: RefreshConfig,
    ) -> Self {
        Self {
            service,
            cache,
            clock,
            events,
            config,
            degraded: RwLock::new(DegradedState::Starting),
            last_tick: RwLock::new(None),
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn degraded_state(&self) -> DegradedState {
        self.degraded.read().clone()
    }

    pub fn last_tick(&self) -> Option<TickSummary> {
        self.last_tick.read().clone()
    }

    /// Spawn [`run`](Self::run) on the runtime
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let join = tokio::spawn(async move {
            self.run(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
        });
        SchedulerHandle { shutdown_tx, join }
    }

    /// Tick every `tick_interval` until `shutdown` resolves
    ///
    /// Ticks run inline, so a slow tick delays (and skips) the next one
    /// instead of overlapping it.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            tick_interval_secs = self.config.tick_interval_secs,
            "Refresh scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Scheduler tick failed");
                    }
                }
                _ = &mut shutdown => {
                    info!("Refresh scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Run one tick
    ///
    /// Only infrastructure failures (queue or store unreachable) are returned;
    /// per-subject failures end up in the summary.
    pub async fn tick(&self) -> Result<TickSummary, CoreError> {
        let _running = self.running.lock().await;
        let timer = Instant::now();
        let now = self.clock.now();

        let mut summary = TickSummary {
            started_at: Some(now),
            ..Default::default()
        };

        summary.expired_claims = self.cache.claims.release_expired(now)?.len();
        summary.expired_queue_claims = self.cache.queue.release_expired_claims()?;
        if summary.expired_claims + summary.expired_queue_claims > 0 {
            warn!(
                refresh_claims = summary.expired_claims,
                queue_claims = summary.expired_queue_claims,
                "Expired claims released, their refreshes were missed"
            );
        }

        let mut done = HashSet::new();
        self.drain_queue(&mut summary, &mut done).await?;
        self.sweep(now, &mut summary, &done).await?;

        summary.elapsed_ms = timer.elapsed().as_millis() as u64;
        info!(
            drained = summary.queue_drained,
            refreshed = summary.total_refreshed(),
            dropped = summary.queue_dropped,
            deferred = summary.queue_deferred,
            failed = summary.failures.len(),
            sweep_candidates = summary.sweep_candidates,
            elapsed_ms = summary.elapsed_ms,
            "Scheduler tick completed"
        );

        *self.degraded.write() = DegradedState::from_tick(&summary);
        *self.last_tick.write() = Some(summary.clone());
        self.events
            .publish(DataEvent::TickCompleted(Box::new(summary.clone())));
        Ok(summary)
    }

    async fn drain_queue(
        &self,
        summary: &mut TickSummary,
        done: &mut HashSet<SubjectKey>,
    ) -> Result<(), CoreError> {
        let batch_size = self.config.queue_batch_size;

        for _ in 0..self.config.max_queue_batches_per_tick {
            let batch = self.cache.queue.drain(batch_size)?;
            if batch.is_empty() {
                break;
            }
            summary.queue_drained += batch.len();
            debug!(entries = batch.len(), "Draining refresh queue");

            let keys: Vec<SubjectKey> = batch.iter().map(|e| e.key.clone()).collect();
            let results = self.refresh_batch(keys).await;

            for (entry, result) in batch.iter().zip(results) {
                if result.is_ok() {
                    done.insert(entry.key.clone());
                }
                let outcome = self.settle(entry, result, summary);
                summary.record(true, outcome);
            }

            if batch.len() < batch_size {
                break;
            }
        }
        Ok(())
    }

    /// Ack, drop, defer or reschedule a drained entry
    fn settle(
        &self,
        entry: &QueueEntry,
        result: Result<Refreshed, RefreshError>,
        summary: &mut TickSummary,
    ) -> RefreshOutcome {
        let key = &entry.key;
        let queue = &self.cache.queue;

        let (outcome, settled) = match result {
            Ok(refreshed) => {
                let settled = queue.ack(entry).map(|ack| match ack {
                    AckResult::Removed => {}
                    AckResult::Requeued => {
                        debug!(subject = %key, "Subject changed during refresh, kept queued")
                    }
                    AckResult::Lost => {
                        warn!(subject = %key, "Queue claim lost before ack")
                    }
                });
                (refreshed.outcome, settled)
            }
            Err(RefreshError::SubjectNotFound { .. }) => (
                RefreshOutcome::Dropped,
                queue.drop_entry(entry).map(|_| ()),
            ),
            Err(RefreshError::ClaimHeld { holder, .. }) => {
                debug!(subject = %key, holder = %holder, "Subject busy, deferred");
                (
                    RefreshOutcome::Deferred,
                    queue.defer(entry, self.config.retry_delay()).map(|_| ()),
                )
            }
            Err(err) => {
                summary.failures.push(failure(&err));
                (
                    RefreshOutcome::Failed,
                    queue
                        .retry_later(entry, &err.to_string(), self.config.retry_delay())
                        .map(|_| ()),
                )
            }
        };

        if let Err(e) = settled {
            warn!(subject = %key, error = %e, "Failed to settle queue entry");
        }
        outcome
    }

    async fn sweep(
        &self,
        now: chrono::DateTime<chrono::Utc>,
        summary: &mut TickSummary,
        done: &HashSet<SubjectKey>,
    ) -> Result<(), CoreError> {
        let cutoff = now - self.config.staleness_threshold();
        let keys: Vec<SubjectKey> = self
            .cache
            .store
            .stale_keys(cutoff, self.config.sweep_batch_size)?
            .into_iter()
            .map(|(key, _)| key)
            .filter(|key| !done.contains(key))
            .collect();

        summary.sweep_candidates = keys.len();
        if keys.is_empty() {
            return Ok(());
        }
        debug!(candidates = keys.len(), "Sweeping stale dashboards");

        let results = self.refresh_batch(keys.clone()).await;
        for (key, result) in keys.iter().zip(results) {
            let outcome = match result {
                Ok(refreshed) => refreshed.outcome,
                Err(RefreshError::SubjectNotFound { .. }) => RefreshOutcome::Dropped,
                Err(RefreshError::ClaimHeld { .. }) => RefreshOutcome::Deferred,
                Err(err) => {
                    summary.failures.push(failure(&err));
                    if let Err(e) = self.cache.store.record_sweep_failure(key, now) {
                        warn!(subject = %key, error = %e, "Failed to record sweep attempt");
                    }
                    RefreshOutcome::Failed
                }
            };
            summary.record(false, outcome);
        }
        Ok(())
    }

    /// Refresh `keys` with at most `max_concurrent_refreshes` in flight
    ///
    /// Results come back in input order.
    async fn refresh_batch(&self, keys: Vec<SubjectKey>) -> Vec<Result<Refreshed, RefreshError>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_refreshes));
        let mut handles = Vec::with_capacity(keys.len());

        for key in keys {
            let sem = semaphore.clone();
            let service = self.service.clone();
            let task_key = key.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.map_err(|e| {
                    RefreshError::computation(&task_key, format!("worker pool closed: {}", e))
                })?;
                service.try_refresh(&task_key).await
            });
            handles.push((key, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (key, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(subject = %key, error = %e, "Refresh task panicked");
                    Err(RefreshError::computation(
                        &key,
                        format!("refresh task panicked: {}", e),
                    ))
                }
            };
            results.push(result);
        }
        results
    }
}

fn failure(err: &RefreshError) -> RefreshFailure {
    RefreshFailure {
        key: err.key().clone(),
        kind: err.kind().to_string(),
        message: err.to_string(),
    }
}

/// Running scheduler loop
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the in-flight tick to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
    }
}
