use super::{enrollment_progress, index_cohorts, math, ComputeError, Computator};
use crate::sources::{
    CohortRow, EnrollmentRow, MentorSessionRow, SessionStatus, SourceAggregates, SubmissionRow,
    SubscriptionRow,
};
use async_trait::async_trait;
use mentorboard_types::{
    DashboardMetrics, EnrollmentStatus, SponsorMetrics, SubjectKey, SubjectType,
};
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone, Default)]
pub struct SponsorInputs {
    pub subscriptions: Vec<SubscriptionRow>,
    /// Enrollments paid for by the sponsor
    pub enrollments: Vec<EnrollmentRow>,
    pub cohorts: Vec<CohortRow>,
    pub submissions: Vec<SubmissionRow>,
    pub sessions: Vec<MentorSessionRow>,
}

pub struct SponsorComputator;

impl SponsorComputator {
    pub fn derive(inputs: &SponsorInputs) -> Result<SponsorMetrics, ComputeError> {
        let active_subscriptions: Vec<&SubscriptionRow> =
            inputs.subscriptions.iter().filter(|s| s.is_active()).collect();

        let mut metrics = SponsorMetrics {
            subscriptions_total: inputs.subscriptions.len() as u32,
            subscriptions_active: active_subscriptions.len() as u32,
            seats_purchased: math::saturating_sum(active_subscriptions.iter().map(|s| s.seats)),
            has_active_subscription: !active_subscriptions.is_empty(),
            ..Default::default()
        };

        let cohorts = index_cohorts(&inputs.cohorts);
        let progress = enrollment_progress(&inputs.enrollments, &cohorts, &inputs.submissions)?;

        let mut sponsored = BTreeSet::new();
        let mut active = BTreeSet::new();
        let mut completed = BTreeSet::new();
        for p in &progress {
            sponsored.insert(p.student_id.as_str());
            match p.status {
                EnrollmentStatus::Active => {
                    active.insert(p.student_id.as_str());
                }
                EnrollmentStatus::Completed => {
                    completed.insert(p.student_id.as_str());
                }
                EnrollmentStatus::Withdrawn | EnrollmentStatus::None => {}
            }
        }
        metrics.sponsored_students = sponsored.len() as u32;
        metrics.students_active = active.len() as u32;
        metrics.students_completed = completed.len() as u32;
        // One seat per student with an active sponsored enrollment
        metrics.seats_assigned = active.len() as u32;
        metrics.seat_utilization_pct =
            math::percent(metrics.seats_assigned as u64, metrics.seats_purchased as u64);
        metrics.avg_completion_pct = math::mean(
            progress
                .iter()
                .filter(|p| p.status != EnrollmentStatus::Withdrawn)
                .map(|p| p.completion_pct),
        );

        let counted_students: HashSet<&str> = progress
            .iter()
            .filter(|p| p.status != EnrollmentStatus::Withdrawn)
            .map(|p| p.student_id.as_str())
            .collect();
        metrics.mentor_minutes = inputs
            .sessions
            .iter()
            .filter(|s| {
                s.status == SessionStatus::Completed
                    && counted_students.contains(s.student_id.as_str())
            })
            .map(|s| s.duration_minutes as u64)
            .sum();

        Ok(metrics)
    }
}

#[async_trait]
impl Computator for SponsorComputator {
    fn subject_type(&self) -> SubjectType {
        SubjectType::Sponsor
    }

    async fn compute(
        &self,
        sources: &dyn SourceAggregates,
        sponsor_id: &str,
    ) -> Result<Option<DashboardMetrics>, ComputeError> {
        if sources.sponsor_profile(sponsor_id).await?.is_none() {
            return Ok(None);
        }

        let holder = SubjectKey::sponsor(sponsor_id);
        let (subscriptions, enrollments) = tokio::try_join!(
            sources.subscriptions_for_holder(&holder),
            sources.enrollments_for_sponsor(sponsor_id),
        )?;

        let cohort_ids: Vec<String> = enrollments
            .iter()
            .map(|e| e.cohort_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let students: Vec<String> = enrollments
            .iter()
            .map(|e| e.student_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let (cohorts, submissions, sessions) = tokio::try_join!(
            sources.cohorts_by_ids(&cohort_ids),
            sources.submissions_for_students(&students),
            sources.sessions_for_students(&students),
        )?;

        let inputs = SponsorInputs {
            subscriptions,
            enrollments,
            cohorts,
            submissions,
            sessions,
        };
        Self::derive(&inputs).map(|m| Some(DashboardMetrics::Sponsor(m)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SubscriptionStatus;
    use chrono::{TimeZone, Utc};

    fn subscription(id: &str, seats: u32, status: SubscriptionStatus) -> SubscriptionRow {
        SubscriptionRow {
            id: id.into(),
            holder: SubjectKey::sponsor("org1"),
            seats,
            status,
        }
    }

    fn enrollment(id: &str, student: &str, status: EnrollmentStatus) -> EnrollmentRow {
        EnrollmentRow {
            id: id.into(),
            student_id: student.into(),
            cohort_id: "c1".into(),
            status,
            sponsor_id: Some("org1".into()),
            enrolled_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_sponsor_without_subscriptions() {
        let metrics = SponsorComputator::derive(&SponsorInputs::default()).unwrap();
        assert_eq!(metrics, SponsorMetrics::default());
        assert!(!metrics.has_active_subscription);
    }

    #[test]
    fn test_seat_utilization() {
        let inputs = SponsorInputs {
            subscriptions: vec![
                subscription("a", 5, SubscriptionStatus::Active),
                subscription("b", 3, SubscriptionStatus::Active),
                subscription("old", 10, SubscriptionStatus::Expired),
            ],
            enrollments: vec![
                enrollment("e1", "s1", EnrollmentStatus::Active),
                enrollment("e2", "s2", EnrollmentStatus::Active),
                enrollment("e3", "s3", EnrollmentStatus::Withdrawn),
            ],
            cohorts: vec![CohortRow {
                id: "c1".into(),
                director_id: "d1".into(),
                name: "c1".into(),
                seat_capacity: 30,
                mission_count: 5,
                active: true,
            }],
            ..Default::default()
        };

        let metrics = SponsorComputator::derive(&inputs).unwrap();
        assert_eq!(metrics.subscriptions_total, 3);
        assert_eq!(metrics.subscriptions_active, 2);
        assert_eq!(metrics.seats_purchased, 8);
        assert_eq!(metrics.seats_assigned, 2);
        assert_eq!(metrics.seat_utilization_pct, 25.0);
        assert_eq!(metrics.sponsored_students, 3);
        assert_eq!(metrics.students_active, 2);
        assert!(metrics.has_active_subscription);
    }
}
