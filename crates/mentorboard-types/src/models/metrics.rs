//! Dashboard cache rows
//!
//! Each subject type has a fixed metrics layout. A row is always replaced
//! whole; `cache_updated_at` is the start time of the run that produced it.

use super::subject::{SubjectKey, SubjectType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Enrollment state shown on the student dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    /// No enrollment at all
    #[default]
    None,
    Active,
    Completed,
    Withdrawn,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StudentMetrics {
    pub enrollment_status: EnrollmentStatus,
    pub cohorts_enrolled: u32,
    pub missions_required: u32,
    pub missions_submitted: u32,
    pub missions_graded: u32,
    pub missions_passed: u32,
    /// Passed missions over required missions
    pub completion_pct: f64,
    /// Mean score of graded submissions (0 when nothing is graded)
    pub average_score: f64,
    pub sessions_completed: u32,
    pub sessions_scheduled: u32,
    pub sessions_cancelled: u32,
    pub mentor_minutes: u64,
    pub habits_active: u32,
    pub best_habit_streak: u32,
    pub goals_total: u32,
    pub goals_completed: u32,
    pub goal_completion_pct: f64,
    pub reflections_total: u32,
    pub has_active_subscription: bool,
    /// Latest timestamp seen across submissions, sessions and enrollments
    pub last_activity_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DirectorMetrics {
    pub cohorts_total: u32,
    pub cohorts_active: u32,
    pub seats_total: u32,
    pub seats_filled: u32,
    pub seat_utilization_pct: f64,
    pub students_active: u32,
    pub students_completed: u32,
    pub avg_completion_pct: f64,
    pub submissions_pending_review: u32,
    pub submissions_graded: u32,
    pub average_score: f64,
    pub sessions_completed: u32,
    pub mentor_minutes: u64,
    /// Active students below the at-risk completion line
    pub at_risk_students: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SponsorMetrics {
    pub subscriptions_active: u32,
    pub subscriptions_total: u32,
    pub seats_purchased: u32,
    pub seats_assigned: u32,
    pub seat_utilization_pct: f64,
    pub sponsored_students: u32,
    pub students_active: u32,
    pub students_completed: u32,
    pub avg_completion_pct: f64,
    pub mentor_minutes: u64,
    pub has_active_subscription: bool,
}

/// Precomputed metrics, one variant per subject type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardMetrics {
    Student(StudentMetrics),
    Director(DirectorMetrics),
    Sponsor(SponsorMetrics),
}

impl DashboardMetrics {
    pub fn subject_type(&self) -> SubjectType {
        match self {
            DashboardMetrics::Student(_) => SubjectType::Student,
            DashboardMetrics::Director(_) => SubjectType::Director,
            DashboardMetrics::Sponsor(_) => SubjectType::Sponsor,
        }
    }

    pub fn as_student(&self) -> Option<&StudentMetrics> {
        match self {
            DashboardMetrics::Student(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_director(&self) -> Option<&DirectorMetrics> {
        match self {
            DashboardMetrics::Director(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sponsor(&self) -> Option<&SponsorMetrics> {
        match self {
            DashboardMetrics::Sponsor(m) => Some(m),
            _ => None,
        }
    }
}

/// As-of-last-refresh snapshot for one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: SubjectKey,
    pub metrics: DashboardMetrics,
    pub cache_updated_at: DateTime<Utc>,
    pub schema_version: u32,
}

impl CacheRecord {
    /// Age of the snapshot relative to `now` (zero if the clock went backwards)
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.cache_updated_at).max(chrono::Duration::zero())
    }

    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        self.age(now) > threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_staleness() {
        let updated = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let record = CacheRecord {
            key: SubjectKey::student("s1"),
            metrics: DashboardMetrics::Student(StudentMetrics::default()),
            cache_updated_at: updated,
            schema_version: 1,
        };

        let threshold = chrono::Duration::minutes(30);
        assert!(!record.is_stale(updated + chrono::Duration::minutes(30), threshold));
        assert!(record.is_stale(updated + chrono::Duration::minutes(31), threshold));
        assert_eq!(record.age(updated - chrono::Duration::minutes(5)), chrono::Duration::zero());
    }

    #[test]
    fn test_metrics_json_is_tagged_by_subject_type() {
        let metrics = DashboardMetrics::Director(DirectorMetrics::default());
        let json = serde_json::to_value(&metrics).unwrap();
        assert!(json.get("director").is_some());
        assert_eq!(metrics.subject_type(), SubjectType::Director);
    }
}
