use super::{check_submission, enrollment_progress, index_cohorts, math, ComputeError, Computator};
use crate::sources::{
    CohortRow, EnrollmentRow, MentorSessionRow, SessionStatus, SourceAggregates, SubmissionRow,
};
use async_trait::async_trait;
use mentorboard_types::{DashboardMetrics, DirectorMetrics, EnrollmentStatus, SubjectType};
use std::collections::{BTreeSet, HashSet};

/// Active enrollments below this completion count as at risk
pub const AT_RISK_COMPLETION_PCT: f64 = 25.0;

#[derive(Debug, Clone, Default)]
pub struct DirectorInputs {
    pub cohorts: Vec<CohortRow>,
    pub enrollments: Vec<EnrollmentRow>,
    /// Submissions of enrolled students (any cohort)
    pub submissions: Vec<SubmissionRow>,
    /// Sessions of non-withdrawn students
    pub sessions: Vec<MentorSessionRow>,
}

pub struct DirectorComputator;

impl DirectorComputator {
    pub fn derive(inputs: &DirectorInputs) -> Result<DirectorMetrics, ComputeError> {
        let cohorts = index_cohorts(&inputs.cohorts);
        let active_cohorts: HashSet<&str> = inputs
            .cohorts
            .iter()
            .filter(|c| c.active)
            .map(|c| c.id.as_str())
            .collect();

        let own_submissions: Vec<SubmissionRow> = inputs
            .submissions
            .iter()
            .filter(|s| cohorts.contains_key(s.cohort_id.as_str()))
            .cloned()
            .collect();
        let progress = enrollment_progress(&inputs.enrollments, &cohorts, &own_submissions)?;

        let mut metrics = DirectorMetrics {
            cohorts_total: inputs.cohorts.len() as u32,
            cohorts_active: active_cohorts.len() as u32,
            seats_total: math::saturating_sum(
                inputs
                    .cohorts
                    .iter()
                    .filter(|c| c.active)
                    .map(|c| c.seat_capacity),
            ),
            seats_filled: inputs
                .enrollments
                .iter()
                .filter(|e| {
                    e.status == EnrollmentStatus::Active
                        && active_cohorts.contains(e.cohort_id.as_str())
                })
                .count() as u32,
            ..Default::default()
        };
        metrics.seat_utilization_pct =
            math::percent(metrics.seats_filled as u64, metrics.seats_total as u64);

        let mut active = BTreeSet::new();
        let mut completed = BTreeSet::new();
        let mut at_risk = BTreeSet::new();
        for p in &progress {
            match p.status {
                EnrollmentStatus::Active => {
                    active.insert(p.student_id.as_str());
                    if p.completion_pct < AT_RISK_COMPLETION_PCT {
                        at_risk.insert(p.student_id.as_str());
                    }
                }
                EnrollmentStatus::Completed => {
                    completed.insert(p.student_id.as_str());
                }
                EnrollmentStatus::Withdrawn | EnrollmentStatus::None => {}
            }
        }
        metrics.students_active = active.len() as u32;
        metrics.students_completed = completed.len() as u32;
        metrics.at_risk_students = at_risk.len() as u32;
        metrics.avg_completion_pct = math::mean(
            progress
                .iter()
                .filter(|p| p.status != EnrollmentStatus::Withdrawn)
                .map(|p| p.completion_pct),
        );

        let mut scores = Vec::new();
        for submission in &own_submissions {
            check_submission(submission)?;
            match submission.score.filter(|_| submission.is_graded()) {
                Some(score) => {
                    metrics.submissions_graded += 1;
                    scores.push(score);
                }
                None => metrics.submissions_pending_review += 1,
            }
        }
        metrics.average_score = math::mean(scores);

        let counted_students: HashSet<&str> = inputs
            .enrollments
            .iter()
            .filter(|e| e.status != EnrollmentStatus::Withdrawn)
            .map(|e| e.student_id.as_str())
            .collect();
        for session in &inputs.sessions {
            if session.status == SessionStatus::Completed
                && counted_students.contains(session.student_id.as_str())
            {
                metrics.sessions_completed += 1;
                metrics.mentor_minutes += session.duration_minutes as u64;
            }
        }

        Ok(metrics)
    }
}

#[async_trait]
impl Computator for DirectorComputator {
    fn subject_type(&self) -> SubjectType {
        SubjectType::Director
    }

    async fn compute(
        &self,
        sources: &dyn SourceAggregates,
        director_id: &str,
    ) -> Result<Option<DashboardMetrics>, ComputeError> {
        if sources.director_profile(director_id).await?.is_none() {
            return Ok(None);
        }

        let cohorts = sources.cohorts_for_director(director_id).await?;
        let cohort_ids: Vec<String> = cohorts.iter().map(|c| c.id.clone()).collect();
        let enrollments = sources.enrollments_for_cohorts(&cohort_ids).await?;

        let students: Vec<String> = enrollments
            .iter()
            .map(|e| e.student_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let (submissions, sessions) = tokio::try_join!(
            sources.submissions_for_students(&students),
            sources.sessions_for_students(&students),
        )?;

        let inputs = DirectorInputs {
            cohorts,
            enrollments,
            submissions,
            sessions,
        };
        Self::derive(&inputs).map(|m| Some(DashboardMetrics::Director(m)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, 9, 0, 0).unwrap()
    }

    fn cohort(id: &str, missions: u32, seats: u32, active: bool) -> CohortRow {
        CohortRow {
            id: id.into(),
            director_id: "director_7".into(),
            name: id.into(),
            seat_capacity: seats,
            mission_count: missions,
            active,
        }
    }

    fn enrollment(id: &str, student: &str, cohort_id: &str, status: EnrollmentStatus) -> EnrollmentRow {
        EnrollmentRow {
            id: id.into(),
            student_id: student.into(),
            cohort_id: cohort_id.into(),
            status,
            sponsor_id: None,
            enrolled_at: at(),
        }
    }

    fn submission(id: &str, student: &str, cohort_id: &str, mission: &str, score: Option<f64>) -> SubmissionRow {
        SubmissionRow {
            id: id.into(),
            student_id: student.into(),
            cohort_id: cohort_id.into(),
            mission_id: mission.into(),
            score,
            passed: score.is_some_and(|s| s >= 70.0),
            submitted_at: at(),
            graded_at: score.map(|_| at()),
        }
    }

    #[test]
    fn test_empty_director_is_all_zero() {
        let metrics = DirectorComputator::derive(&DirectorInputs::default()).unwrap();
        assert_eq!(metrics, DirectorMetrics::default());
    }

    #[test]
    fn test_rollup_over_cohorts() {
        let inputs = DirectorInputs {
            cohorts: vec![cohort("c1", 4, 10, true), cohort("old", 2, 5, false)],
            enrollments: vec![
                enrollment("e1", "s1", "c1", EnrollmentStatus::Active),
                enrollment("e2", "s2", "c1", EnrollmentStatus::Active),
                enrollment("e3", "s3", "c1", EnrollmentStatus::Withdrawn),
                enrollment("e4", "s4", "old", EnrollmentStatus::Completed),
            ],
            submissions: vec![
                submission("a", "s1", "c1", "m1", Some(90.0)),
                submission("b", "s1", "c1", "m2", Some(80.0)),
                submission("c", "s2", "c1", "m1", None),
                submission("d", "s4", "old", "m1", Some(75.0)),
                submission("e", "s4", "old", "m2", Some(85.0)),
                // Another director's cohort
                submission("f", "s1", "elsewhere", "m1", Some(10.0)),
            ],
            sessions: vec![MentorSessionRow {
                id: "x".into(),
                student_id: "s3".into(),
                mentor_id: "m".into(),
                status: SessionStatus::Completed,
                duration_minutes: 30,
                scheduled_for: at(),
            }],
        };

        let metrics = DirectorComputator::derive(&inputs).unwrap();
        assert_eq!(metrics.cohorts_total, 2);
        assert_eq!(metrics.cohorts_active, 1);
        assert_eq!(metrics.seats_total, 10);
        assert_eq!(metrics.seats_filled, 2);
        assert_eq!(metrics.seat_utilization_pct, 20.0);
        assert_eq!(metrics.students_active, 2);
        assert_eq!(metrics.students_completed, 1);
        // s1 50%, s2 0%, s4 100%
        assert_eq!(metrics.avg_completion_pct, 50.0);
        assert_eq!(metrics.at_risk_students, 1);
        assert_eq!(metrics.submissions_graded, 4);
        assert_eq!(metrics.submissions_pending_review, 1);
        assert_eq!(metrics.average_score, 82.5);
        // Withdrawn student's session is not counted
        assert_eq!(metrics.sessions_completed, 0);
    }

    #[test]
    fn test_seat_capacity_overflow_saturates() {
        let inputs = DirectorInputs {
            cohorts: vec![
                cohort("c1", 4, u32::MAX, true),
                cohort("c2", 4, u32::MAX, true),
            ],
            enrollments: vec![enrollment("e1", "s1", "c1", EnrollmentStatus::Active)],
            submissions: Vec::new(),
            sessions: Vec::new(),
        };

        let metrics = DirectorComputator::derive(&inputs).unwrap();
        assert_eq!(metrics.seats_total, u32::MAX);
        assert_eq!(metrics.seats_filled, 1);
        assert_eq!(metrics.seat_utilization_pct, 0.0);
    }
}
