//! Per-read deadline around any [`SourceAggregates`]

use super::{
    CohortRow, DirectorProfile, EnrollmentRow, GoalRow, HabitRow, MentorSessionRow,
    SourceAggregates, SourceResult, SponsorProfile, StudentProfile, SubmissionRow,
    SubscriptionRow,
};
use crate::error::SourceError;
use async_trait::async_trait;
use mentorboard_types::{SubjectKey, SubjectType};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Fails any single read that takes longer than `timeout`
pub struct TimedSources {
    inner: Arc<dyn SourceAggregates>,
    timeout: Duration,
}

impl TimedSources {
    pub fn new(inner: Arc<dyn SourceAggregates>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn timed<T>(
        &self,
        read: &'static str,
        fut: impl Future<Output = SourceResult<T>> + Send,
    ) -> SourceResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                warn!(read, timeout_ms, "Source read timed out");
                Err(SourceError::Timeout { read, timeout_ms })
            }
        }
    }
}

#[async_trait]
impl SourceAggregates for TimedSources {
    async fn student_profile(&self, student_id: &str) -> SourceResult<Option<StudentProfile>> {
        self.timed("student_profile", self.inner.student_profile(student_id))
            .await
    }

    async fn director_profile(&self, director_id: &str) -> SourceResult<Option<DirectorProfile>> {
        self.timed("director_profile", self.inner.director_profile(director_id))
            .await
    }

    async fn sponsor_profile(&self, sponsor_id: &str) -> SourceResult<Option<SponsorProfile>> {
        self.timed("sponsor_profile", self.inner.sponsor_profile(sponsor_id))
            .await
    }

    async fn enrollments_for_student(&self, student_id: &str) -> SourceResult<Vec<EnrollmentRow>> {
        self.timed(
            "enrollments_for_student",
            self.inner.enrollments_for_student(student_id),
        )
        .await
    }

    async fn enrollments_for_cohorts(
        &self,
        cohort_ids: &[String],
    ) -> SourceResult<Vec<EnrollmentRow>> {
        self.timed(
            "enrollments_for_cohorts",
            self.inner.enrollments_for_cohorts(cohort_ids),
        )
        .await
    }

    async fn enrollments_for_sponsor(&self, sponsor_id: &str) -> SourceResult<Vec<EnrollmentRow>> {
        self.timed(
            "enrollments_for_sponsor",
            self.inner.enrollments_for_sponsor(sponsor_id),
        )
        .await
    }

    async fn cohorts_by_ids(&self, cohort_ids: &[String]) -> SourceResult<Vec<CohortRow>> {
        self.timed("cohorts_by_ids", self.inner.cohorts_by_ids(cohort_ids))
            .await
    }

    async fn cohorts_for_director(&self, director_id: &str) -> SourceResult<Vec<CohortRow>> {
        self.timed(
            "cohorts_for_director",
            self.inner.cohorts_for_director(director_id),
        )
        .await
    }

    async fn submissions_for_students(
        &self,
        student_ids: &[String],
    ) -> SourceResult<Vec<SubmissionRow>> {
        self.timed(
            "submissions_for_students",
            self.inner.submissions_for_students(student_ids),
        )
        .await
    }

    async fn sessions_for_students(
        &self,
        student_ids: &[String],
    ) -> SourceResult<Vec<MentorSessionRow>> {
        self.timed(
            "sessions_for_students",
            self.inner.sessions_for_students(student_ids),
        )
        .await
    }

    async fn habits_for_student(&self, student_id: &str) -> SourceResult<Vec<HabitRow>> {
        self.timed("habits_for_student", self.inner.habits_for_student(student_id))
            .await
    }

    async fn goals_for_student(&self, student_id: &str) -> SourceResult<Vec<GoalRow>> {
        self.timed("goals_for_student", self.inner.goals_for_student(student_id))
            .await
    }

    async fn reflection_count(&self, student_id: &str) -> SourceResult<u32> {
        self.timed("reflection_count", self.inner.reflection_count(student_id))
            .await
    }

    async fn subscriptions_for_holder(
        &self,
        holder: &SubjectKey,
    ) -> SourceResult<Vec<SubscriptionRow>> {
        self.timed(
            "subscriptions_for_holder",
            self.inner.subscriptions_for_holder(holder),
        )
        .await
    }

    async fn list_subjects(&self, subject_type: SubjectType) -> SourceResult<Vec<String>> {
        self.timed("list_subjects", self.inner.list_subjects(subject_type))
            .await
    }

    async fn related_subjects(&self, student_id: &str) -> SourceResult<Vec<SubjectKey>> {
        self.timed("related_subjects", self.inner.related_subjects(student_id))
            .await
    }
}
