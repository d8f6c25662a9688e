//! Test support: fault-injecting sources and a source-table fixture
//!
//! Public so integration tests, benches and downstream crates can drive the
//! cache layer against real SQLite sources.

use crate::error::SourceError;
use crate::sources::{
    CohortRow, DirectorProfile, EnrollmentRow, GoalRow, HabitRow, MentorSessionRow,
    SessionStatus, SourceAggregates, SourceResult, SponsorProfile, SqliteSources, StudentProfile,
    SubmissionRow, SubscriptionRow, SubscriptionStatus,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mentorboard_types::{EnrollmentStatus, SubjectKey, SubjectType};
use parking_lot::Mutex;
use rusqlite::params;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
struct ReadStats {
    calls: usize,
    in_flight: usize,
    max_in_flight: usize,
}

/// Wraps a source and fails or slows down named reads on demand
pub struct FlakySources {
    inner: Arc<dyn SourceAggregates>,
    failing: Mutex<HashSet<&'static str>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    stats: DashMap<&'static str, ReadStats>,
}

impl FlakySources {
    pub fn new(inner: Arc<dyn SourceAggregates>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
            stats: DashMap::new(),
        }
    }

    /// Make every call to `read` fail until [`heal`](Self::heal)
    pub fn fail_read(&self, read: &'static str) {
        self.failing.lock().insert(read);
    }

    /// Delay every call to `read`
    pub fn delay_read(&self, read: &'static str, delay: Duration) {
        self.delays.lock().insert(read, delay);
    }

    /// Clear all injected failures and delays
    pub fn heal(&self) {
        self.failing.lock().clear();
        self.delays.lock().clear();
    }

    /// Calls made to `read`, failed ones included
    pub fn calls(&self, read: &str) -> usize {
        self.stats.get(read).map(|s| s.calls).unwrap_or(0)
    }

    /// Highest number of overlapping calls seen for `read`
    pub fn max_in_flight(&self, read: &str) -> usize {
        self.stats.get(read).map(|s| s.max_in_flight).unwrap_or(0)
    }

    async fn wrap<T>(
        &self,
        read: &'static str,
        fut: impl Future<Output = SourceResult<T>> + Send,
    ) -> SourceResult<T> {
        {
            let mut stats = self.stats.entry(read).or_default();
            stats.calls += 1;
            stats.in_flight += 1;
            stats.max_in_flight = stats.max_in_flight.max(stats.in_flight);
        }
        let _in_flight = InFlight { stats: &self.stats, read };

        let delay = self.delays.lock().get(read).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().contains(read) {
            return Err(SourceError::unavailable(read, "injected failure"));
        }
        fut.await
    }
}

struct InFlight<'a> {
    stats: &'a DashMap<&'static str, ReadStats>,
    read: &'static str,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(mut stats) = self.stats.get_mut(self.read) {
            stats.in_flight = stats.in_flight.saturating_sub(1);
        }
    }
}

#[async_trait]
impl SourceAggregates for FlakySources {
    async fn student_profile(&self, student_id: &str) -> SourceResult<Option<StudentProfile>> {
        self.wrap("student_profile", self.inner.student_profile(student_id))
            .await
    }

    async fn director_profile(&self, director_id: &str) -> SourceResult<Option<DirectorProfile>> {
        self.wrap("director_profile", self.inner.director_profile(director_id))
            .await
    }

    async fn sponsor_profile(&self, sponsor_id: &str) -> SourceResult<Option<SponsorProfile>> {
        self.wrap("sponsor_profile", self.inner.sponsor_profile(sponsor_id))
            .await
    }

    async fn enrollments_for_student(&self, student_id: &str) -> SourceResult<Vec<EnrollmentRow>> {
        self.wrap(
            "enrollments_for_student",
            self.inner.enrollments_for_student(student_id),
        )
        .await
    }

    async fn enrollments_for_cohorts(
        &self,
        cohort_ids: &[String],
    ) -> SourceResult<Vec<EnrollmentRow>> {
        self.wrap(
            "enrollments_for_cohorts",
            self.inner.enrollments_for_cohorts(cohort_ids),
        )
        .await
    }

    async fn enrollments_for_sponsor(&self, sponsor_id: &str) -> SourceResult<Vec<EnrollmentRow>> {
        self.wrap(
            "enrollments_for_sponsor",
            self.inner.enrollments_for_sponsor(sponsor_id),
        )
        .await
    }

    async fn cohorts_by_ids(&self, cohort_ids: &[String]) -> SourceResult<Vec<CohortRow>> {
        self.wrap("cohorts_by_ids", self.inner.cohorts_by_ids(cohort_ids))
            .await
    }

    async fn cohorts_for_director(&self, director_id: &str) -> SourceResult<Vec<CohortRow>> {
        self.wrap(
            "cohorts_for_director",
            self.inner.cohorts_for_director(director_id),
        )
        .await
    }

    async fn submissions_for_students(
        &self,
        student_ids: &[String],
    ) -> SourceResult<Vec<SubmissionRow>> {
        self.wrap(
            "submissions_for_students",
            self.inner.submissions_for_students(student_ids),
        )
        .await
    }

    async fn sessions_for_students(
        &self,
        student_ids: &[String],
    ) -> SourceResult<Vec<MentorSessionRow>> {
        self.wrap(
            "sessions_for_students",
            self.inner.sessions_for_students(student_ids),
        )
        .await
    }

    async fn habits_for_student(&self, student_id: &str) -> SourceResult<Vec<HabitRow>> {
        self.wrap("habits_for_student", self.inner.habits_for_student(student_id))
            .await
    }

    async fn goals_for_student(&self, student_id: &str) -> SourceResult<Vec<GoalRow>> {
        self.wrap("goals_for_student", self.inner.goals_for_student(student_id))
            .await
    }

    async fn reflection_count(&self, student_id: &str) -> SourceResult<u32> {
        self.wrap("reflection_count", self.inner.reflection_count(student_id))
            .await
    }

    async fn subscriptions_for_holder(
        &self,
        holder: &SubjectKey,
    ) -> SourceResult<Vec<SubscriptionRow>> {
        self.wrap(
            "subscriptions_for_holder",
            self.inner.subscriptions_for_holder(holder),
        )
        .await
    }

    async fn list_subjects(&self, subject_type: SubjectType) -> SourceResult<Vec<String>> {
        self.wrap("list_subjects", self.inner.list_subjects(subject_type))
            .await
    }

    async fn related_subjects(&self, student_id: &str) -> SourceResult<Vec<SubjectKey>> {
        self.wrap("related_subjects", self.inner.related_subjects(student_id))
            .await
    }
}

/// Terse writers for the source tables, stamping rows with a fixed time
#[derive(Clone)]
pub struct SourceFixture {
    pub sources: SqliteSources,
    pub now: DateTime<Utc>,
}

impl SourceFixture {
    pub fn new(sources: SqliteSources, now: DateTime<Utc>) -> Self {
        Self { sources, now }
    }

    pub fn in_memory(now: DateTime<Utc>) -> Result<Self> {
        Ok(Self::new(SqliteSources::open_in_memory()?, now))
    }

    pub fn student(&self, id: &str) -> Result<()> {
        self.sources.insert_student(id, id, self.now)
    }

    pub fn director(&self, id: &str) -> Result<()> {
        self.sources.insert_director(id, id)
    }

    pub fn sponsor(&self, id: &str) -> Result<()> {
        self.sources.insert_sponsor(id, id)
    }

    pub fn cohort(
        &self,
        id: &str,
        director_id: &str,
        mission_count: u32,
        seats: u32,
    ) -> Result<()> {
        self.sources.insert_cohort(&CohortRow {
            id: id.to_string(),
            director_id: director_id.to_string(),
            name: id.to_string(),
            seat_capacity: seats,
            mission_count,
            active: true,
        })
    }

    pub fn enroll(
        &self,
        id: &str,
        student_id: &str,
        cohort_id: &str,
        status: EnrollmentStatus,
        sponsor_id: Option<&str>,
    ) -> Result<()> {
        self.sources.insert_enrollment(&EnrollmentRow {
            id: id.to_string(),
            student_id: student_id.to_string(),
            cohort_id: cohort_id.to_string(),
            status,
            sponsor_id: sponsor_id.map(str::to_string),
            enrolled_at: self.now,
        })
    }

    /// Ungraded submission
    pub fn submit(
        &self,
        id: &str,
        student_id: &str,
        cohort_id: &str,
        mission_id: &str,
    ) -> Result<()> {
        self.sources.insert_submission(&SubmissionRow {
            id: id.to_string(),
            student_id: student_id.to_string(),
            cohort_id: cohort_id.to_string(),
            mission_id: mission_id.to_string(),
            score: None,
            passed: false,
            submitted_at: self.now,
            graded_at: None,
        })
    }

    pub fn grade(&self, submission_id: &str, score: f64, passed: bool) -> Result<()> {
        let graded_at = self.now.timestamp_millis();
        self.sources.with_connection(|conn| {
            conn.execute(
                "UPDATE submissions SET score = ?2, passed = ?3, graded_at = ?4 WHERE id = ?1",
                params![submission_id, score, passed, graded_at],
            )
            .map(|_| ())
        })
    }

    pub fn session(
        &self,
        id: &str,
        student_id: &str,
        status: SessionStatus,
        duration_minutes: u32,
    ) -> Result<()> {
        self.sources.insert_session(&MentorSessionRow {
            id: id.to_string(),
            student_id: student_id.to_string(),
            mentor_id: "mentor_1".to_string(),
            status,
            duration_minutes,
            scheduled_for: self.now,
        })
    }

    pub fn subscription(
        &self,
        id: &str,
        holder: SubjectKey,
        seats: u32,
        status: SubscriptionStatus,
    ) -> Result<()> {
        self.sources.insert_subscription(&SubscriptionRow {
            id: id.to_string(),
            holder,
            seats,
            status,
        })
    }

    pub fn habit(
        &self,
        id: &str,
        student_id: &str,
        current_streak: u32,
        best_streak: u32,
    ) -> Result<()> {
        self.sources.insert_habit(&HabitRow {
            id: id.to_string(),
            student_id: student_id.to_string(),
            active: true,
            current_streak,
            best_streak,
            last_logged_at: Some(self.now),
        })
    }

    pub fn goal(&self, id: &str, student_id: &str, completed: bool) -> Result<()> {
        self.sources.insert_goal(&GoalRow {
            id: id.to_string(),
            student_id: student_id.to_string(),
            completed,
            updated_at: self.now,
        })
    }

    pub fn reflection(&self, id: &str, student_id: &str) -> Result<()> {
        self.sources.insert_reflection(id, student_id, self.now)
    }
}
