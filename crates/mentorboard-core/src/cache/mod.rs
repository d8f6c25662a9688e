//! Persistent cache layer: dashboard rows, update queue and refresh claims

mod claims;
mod db;
mod hot;
mod queue;
mod record_store;

pub use claims::{ClaimGuard, ClaimInfo, ClaimRegistry};
pub use db::{Database, DB_FILE_NAME, SCHEMA_VERSION};
pub use hot::HotCache;
pub use queue::{AckResult, UpdateQueue};
pub use record_store::{CacheStats, CacheStore};

use crate::clock::Clock;
use crate::config::RefreshConfig;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Everything persisted in the cache database, sharing one connection
#[derive(Clone)]
pub struct CacheLayer {
    pub db: Arc<Database>,
    pub store: Arc<CacheStore>,
    pub queue: Arc<UpdateQueue>,
    pub claims: ClaimRegistry,
    pub hot: HotCache,
}

impl CacheLayer {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, config: &RefreshConfig) -> Self {
        Self {
            store: Arc::new(CacheStore::new(db.clone())),
            queue: Arc::new(UpdateQueue::new(db.clone(), clock, config.claim_timeout())),
            claims: ClaimRegistry::new(db.clone()),
            hot: HotCache::new(config.hot_cache_capacity, config.hot_cache_ttl()),
            db,
        }
    }

    /// Open `<data_dir>/dashboard-cache.db`
    pub fn open(data_dir: &Path, clock: Arc<dyn Clock>, config: &RefreshConfig) -> Result<Self> {
        let db = Arc::new(Database::open(data_dir)?);
        Ok(Self::new(db, clock, config))
    }

    pub fn in_memory(clock: Arc<dyn Clock>, config: &RefreshConfig) -> Result<Self> {
        let db = Arc::new(Database::open_in_memory()?);
        Ok(Self::new(db, clock, config))
    }
}
