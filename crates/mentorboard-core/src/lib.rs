//! mentorboard-core - Core library for mentorboard
//!
//! Materialized dashboard cache for students, program directors and sponsor
//! organizations: SQLite-backed record store, deduplicating update queue,
//! per-subject refresh claims, computators and the refresh scheduler.

pub mod aggregation;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod hooks;
pub mod refresh;
pub mod scheduler;
pub mod service;
pub mod sources;
pub mod subject;
pub mod testing;

pub use aggregation::{Computator, Computators};
pub use cache::{AckResult, CacheLayer, CacheStats, CacheStore, ClaimRegistry, UpdateQueue};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{resolve_data_dir, RefreshConfig, CONFIG_FILE_NAME};
pub use error::{CoreError, DegradedState, RefreshError, SourceError};
pub use event::{DataEvent, EventBus};
pub use hooks::MutationHooks;
pub use refresh::{AggregationService, Refreshed};
pub use scheduler::{RefreshScheduler, SchedulerHandle};
pub use service::{DashboardService, StatsReport};
pub use sources::{SourceAggregates, SqliteSources, TimedSources, SOURCES_DB_FILE_NAME};
pub use subject::{parse_key, validate_key};
