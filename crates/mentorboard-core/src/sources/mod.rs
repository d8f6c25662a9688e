//! Source aggregates: the normalized platform tables dashboards are derived from
//!
//! The cache layer only ever reads through [`SourceAggregates`]. Reads are
//! grouped per aggregate so a computator issues a handful of queries per
//! subject instead of one per metric.

mod sqlite;
mod timed;

pub use sqlite::{SqliteSources, SOURCES_DB_FILE_NAME};
pub use timed::TimedSources;

use crate::error::SourceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mentorboard_types::{EnrollmentStatus, SubjectKey, SubjectType};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub type SourceResult<T> = Result<T, SourceError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectorProfile {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SponsorProfile {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortRow {
    pub id: String,
    pub director_id: String,
    pub name: String,
    pub seat_capacity: u32,
    /// Missions a student must pass to complete the cohort
    pub mission_count: u32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRow {
    pub id: String,
    pub student_id: String,
    pub cohort_id: String,
    /// Never `EnrollmentStatus::None` for a stored row
    pub status: EnrollmentStatus,
    /// Sponsoring organization paying for the seat
    pub sponsor_id: Option<String>,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRow {
    pub id: String,
    pub student_id: String,
    pub cohort_id: String,
    pub mission_id: String,
    /// Set once graded, 0..=100
    pub score: Option<f64>,
    pub passed: bool,
    pub submitted_at: DateTime<Utc>,
    pub graded_at: Option<DateTime<Utc>>,
}

impl SubmissionRow {
    pub fn is_graded(&self) -> bool {
        self.graded_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentorSessionRow {
    pub id: String,
    pub student_id: String,
    pub mentor_id: String,
    pub status: SessionStatus,
    pub duration_minutes: u32,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitRow {
    pub id: String,
    pub student_id: String,
    pub active: bool,
    pub current_streak: u32,
    pub best_streak: u32,
    pub last_logged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalRow {
    pub id: String,
    pub student_id: String,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRow {
    pub id: String,
    /// Student or sponsor paying for the plan
    pub holder: SubjectKey,
    pub seats: u32,
    pub status: SubscriptionStatus,
}

impl SubscriptionRow {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

/// Read access to the platform's normalized tables
///
/// Every read may fail or hang; callers wrap implementations in
/// [`TimedSources`] to bound them.
#[async_trait]
pub trait SourceAggregates: Send + Sync {
    async fn student_profile(&self, student_id: &str) -> SourceResult<Option<StudentProfile>>;
    async fn director_profile(&self, director_id: &str) -> SourceResult<Option<DirectorProfile>>;
    async fn sponsor_profile(&self, sponsor_id: &str) -> SourceResult<Option<SponsorProfile>>;

    async fn enrollments_for_student(&self, student_id: &str) -> SourceResult<Vec<EnrollmentRow>>;
    async fn enrollments_for_cohorts(&self, cohort_ids: &[String])
        -> SourceResult<Vec<EnrollmentRow>>;
    async fn enrollments_for_sponsor(&self, sponsor_id: &str) -> SourceResult<Vec<EnrollmentRow>>;

    async fn cohorts_by_ids(&self, cohort_ids: &[String]) -> SourceResult<Vec<CohortRow>>;
    async fn cohorts_for_director(&self, director_id: &str) -> SourceResult<Vec<CohortRow>>;

    async fn submissions_for_students(
        &self,
        student_ids: &[String],
    ) -> SourceResult<Vec<SubmissionRow>>;
    async fn sessions_for_students(
        &self,
        student_ids: &[String],
    ) -> SourceResult<Vec<MentorSessionRow>>;

    async fn habits_for_student(&self, student_id: &str) -> SourceResult<Vec<HabitRow>>;
    async fn goals_for_student(&self, student_id: &str) -> SourceResult<Vec<GoalRow>>;
    async fn reflection_count(&self, student_id: &str) -> SourceResult<u32>;

    async fn subscriptions_for_holder(
        &self,
        holder: &SubjectKey,
    ) -> SourceResult<Vec<SubscriptionRow>>;

    /// Ids of every existing subject of one type, sorted
    async fn list_subjects(&self, subject_type: SubjectType) -> SourceResult<Vec<String>>;

    /// Directors of the student's cohorts and sponsors of their enrollments
    async fn related_subjects(&self, student_id: &str) -> SourceResult<Vec<SubjectKey>>;
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(SessionStatus::Scheduled),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(format!("unknown session status '{}'", other)),
        }
    }
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(format!("unknown subscription status '{}'", other)),
        }
    }
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

pub(crate) fn parse_enrollment_status(s: &str) -> Result<EnrollmentStatus, String> {
    match s {
        "active" => Ok(EnrollmentStatus::Active),
        "completed" => Ok(EnrollmentStatus::Completed),
        "withdrawn" => Ok(EnrollmentStatus::Withdrawn),
        other => Err(format!("unknown enrollment status '{}'", other)),
    }
}

pub(crate) fn enrollment_status_str(status: EnrollmentStatus) -> &'static str {
    match status {
        EnrollmentStatus::None => "none",
        EnrollmentStatus::Active => "active",
        EnrollmentStatus::Completed => "completed",
        EnrollmentStatus::Withdrawn => "withdrawn",
    }
}
