//! Data models shared across mentorboard crates

pub mod metrics;
pub mod refresh;
pub mod subject;

pub use metrics::{
    CacheRecord, DashboardMetrics, DirectorMetrics, EnrollmentStatus, SponsorMetrics,
    StudentMetrics,
};
pub use refresh::{QueueEntry, RefreshAllSummary, RefreshFailure, RefreshOutcome, TickSummary};
pub use subject::{ParseSubjectTypeError, RefreshReason, SubjectKey, SubjectType};
