//! mentorboard-types - Shared data types for mentorboard
//!
//! Pure data structures without heavy dependencies.
//! No tokio, no async runtime - just serde-serializable types.
//!
//! Used by:
//! - mentorboard-core (aggregation, queue, scheduler)
//! - mentorboard-web (dashboard read API)
//! - mentorboard (operator CLI)

pub mod models;

pub use models::{
    CacheRecord, DashboardMetrics, DirectorMetrics, EnrollmentStatus, ParseSubjectTypeError,
    QueueEntry, RefreshAllSummary, RefreshFailure, RefreshOutcome, RefreshReason, SponsorMetrics,
    StudentMetrics, SubjectKey, SubjectType, TickSummary,
};
