//! In-memory hot cache in front of the record store
//!
//! Refreshes in this process write through; rows written by another process
//! sharing the data directory become visible once the entry's TTL lapses.

use mentorboard_types::{CacheRecord, SubjectKey};
use moka::future::Cache;
use moka::ops::compute::Op;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct HotCache {
    records: Cache<SubjectKey, Arc<CacheRecord>>,
}

impl HotCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            records: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, key: &SubjectKey) -> Option<Arc<CacheRecord>> {
        self.records.get(key).await
    }

    /// Insert unless a newer row for the same subject is already cached
    ///
    /// Readers and refreshes race to fill the same key; the compare runs under
    /// moka's per-key lock so an older read can never replace a newer write.
    pub async fn insert(&self, record: Arc<CacheRecord>) {
        self.records
            .entry(record.key.clone())
            .and_compute_with(|existing| async move {
                match existing {
                    Some(entry) if entry.value().cache_updated_at > record.cache_updated_at => {
                        Op::Nop
                    }
                    _ => Op::Put(record),
                }
            })
            .await;
    }

    pub async fn invalidate(&self, key: &SubjectKey) {
        self.records.invalidate(key).await;
    }

    pub fn invalidate_all(&self) {
        self.records.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.records.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentorboard_types::{DashboardMetrics, SponsorMetrics};

    fn record(id: &str) -> Arc<CacheRecord> {
        record_at(id, chrono::Utc::now())
    }

    fn record_at(id: &str, at: chrono::DateTime<chrono::Utc>) -> Arc<CacheRecord> {
        Arc::new(CacheRecord {
            key: SubjectKey::sponsor(id),
            metrics: DashboardMetrics::Sponsor(SponsorMetrics::default()),
            cache_updated_at: at,
            schema_version: 1,
        })
    }

    #[tokio::test]
    async fn test_insert_get_invalidate() {
        let hot = HotCache::new(100, Duration::from_secs(60));
        let key = SubjectKey::sponsor("org1");
        assert!(hot.get(&key).await.is_none());

        hot.insert(record("org1")).await;
        assert_eq!(hot.get(&key).await.unwrap().key, key);

        hot.invalidate(&key).await;
        assert!(hot.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_older_row_never_replaces_newer() {
        let hot = HotCache::new(100, Duration::from_secs(60));
        let key = SubjectKey::sponsor("org1");
        let newer = chrono::Utc::now();
        let older = newer - chrono::Duration::minutes(5);

        hot.insert(record_at("org1", newer)).await;
        hot.insert(record_at("org1", older)).await;
        assert_eq!(hot.get(&key).await.unwrap().cache_updated_at, newer);

        let newest = newer + chrono::Duration::minutes(1);
        hot.insert(record_at("org1", newest)).await;
        assert_eq!(hot.get(&key).await.unwrap().cache_updated_at, newest);
    }
}
