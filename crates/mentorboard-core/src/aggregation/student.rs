use super::{check_submission, index_cohorts, math, ComputeError, Computator};
use crate::sources::{
    CohortRow, EnrollmentRow, GoalRow, HabitRow, MentorSessionRow, SessionStatus,
    SourceAggregates, SubmissionRow, SubscriptionRow,
};
use async_trait::async_trait;
use mentorboard_types::{
    DashboardMetrics, EnrollmentStatus, StudentMetrics, SubjectKey, SubjectType,
};
use std::collections::{BTreeSet, HashSet};

/// Everything the student dashboard is derived from
#[derive(Debug, Clone, Default)]
pub struct StudentInputs {
    pub enrollments: Vec<EnrollmentRow>,
    pub cohorts: Vec<CohortRow>,
    pub submissions: Vec<SubmissionRow>,
    pub sessions: Vec<MentorSessionRow>,
    pub habits: Vec<HabitRow>,
    pub goals: Vec<GoalRow>,
    pub reflections: u32,
    pub subscriptions: Vec<SubscriptionRow>,
}

pub struct StudentComputator;

impl StudentComputator {
    pub fn derive(inputs: &StudentInputs) -> Result<StudentMetrics, ComputeError> {
        let cohorts = index_cohorts(&inputs.cohorts);
        let counted: Vec<&EnrollmentRow> = inputs
            .enrollments
            .iter()
            .filter(|e| e.status != EnrollmentStatus::Withdrawn)
            .collect();

        let mut submitted = HashSet::new();
        let mut graded = HashSet::new();
        let mut passed = HashSet::new();
        let mut scores = Vec::new();
        for submission in &inputs.submissions {
            check_submission(submission)?;
            let mission = (submission.cohort_id.as_str(), submission.mission_id.as_str());
            submitted.insert(mission);
            if let (true, Some(score)) = (submission.is_graded(), submission.score) {
                graded.insert(mission);
                scores.push(score);
            }
            if submission.passed {
                passed.insert(mission);
            }
        }

        let mut missions_required = 0u64;
        let mut missions_done = 0u64;
        let mut cohorts_enrolled = BTreeSet::new();
        for enrollment in &counted {
            let cohort = cohorts.get(enrollment.cohort_id.as_str()).ok_or_else(|| {
                ComputeError::invariant(format!(
                    "enrollment {} references missing cohort {}",
                    enrollment.id, enrollment.cohort_id
                ))
            })?;
            if !cohorts_enrolled.insert(cohort.id.as_str()) {
                continue;
            }
            let done = passed
                .iter()
                .filter(|(cohort_id, _)| *cohort_id == cohort.id)
                .count() as u64;
            missions_required += cohort.mission_count as u64;
            missions_done += done.min(cohort.mission_count as u64);
        }

        let mut metrics = StudentMetrics {
            enrollment_status: overall_status(&inputs.enrollments),
            cohorts_enrolled: cohorts_enrolled.len() as u32,
            missions_required: missions_required as u32,
            missions_submitted: submitted.len() as u32,
            missions_graded: graded.len() as u32,
            missions_passed: passed.len() as u32,
            completion_pct: math::percent(missions_done, missions_required),
            average_score: math::mean(scores),
            ..Default::default()
        };

        for session in &inputs.sessions {
            match session.status {
                SessionStatus::Completed => {
                    metrics.sessions_completed += 1;
                    metrics.mentor_minutes += session.duration_minutes as u64;
                }
                SessionStatus::Scheduled => metrics.sessions_scheduled += 1,
                SessionStatus::Cancelled => metrics.sessions_cancelled += 1,
            }
        }

        for habit in &inputs.habits {
            if habit.current_streak > habit.best_streak {
                return Err(ComputeError::invariant(format!(
                    "habit {} current streak {} exceeds best streak {}",
                    habit.id, habit.current_streak, habit.best_streak
                )));
            }
            if habit.active {
                metrics.habits_active += 1;
            }
            metrics.best_habit_streak = metrics.best_habit_streak.max(habit.best_streak);
        }

        metrics.goals_total = inputs.goals.len() as u32;
        metrics.goals_completed = inputs.goals.iter().filter(|g| g.completed).count() as u32;
        metrics.goal_completion_pct =
            math::percent(metrics.goals_completed as u64, metrics.goals_total as u64);
        metrics.reflections_total = inputs.reflections;
        metrics.has_active_subscription = inputs.subscriptions.iter().any(|s| s.is_active());

        metrics.last_activity_at = inputs
            .submissions
            .iter()
            .map(|s| s.submitted_at)
            .chain(
                inputs
                    .sessions
                    .iter()
                    .filter(|s| s.status == SessionStatus::Completed)
                    .map(|s| s.scheduled_for),
            )
            .chain(inputs.habits.iter().filter_map(|h| h.last_logged_at))
            .max();

        Ok(metrics)
    }
}

/// Active beats completed beats withdrawn; no enrollment at all is `None`
fn overall_status(enrollments: &[EnrollmentRow]) -> EnrollmentStatus {
    let has = |status| enrollments.iter().any(|e| e.status == status);
    if has(EnrollmentStatus::Active) {
        EnrollmentStatus::Active
    } else if has(EnrollmentStatus::Completed) {
        EnrollmentStatus::Completed
    } else if has(EnrollmentStatus::Withdrawn) {
        EnrollmentStatus::Withdrawn
    } else {
        EnrollmentStatus::None
    }
}

#[async_trait]
impl Computator for StudentComputator {
    fn subject_type(&self) -> SubjectType {
        SubjectType::Student
    }

    async fn compute(
        &self,
        sources: &dyn SourceAggregates,
        student_id: &str,
    ) -> Result<Option<DashboardMetrics>, ComputeError> {
        if sources.student_profile(student_id).await?.is_none() {
            return Ok(None);
        }

        let ids = [student_id.to_string()];
        let holder = SubjectKey::student(student_id);
        let (enrollments, submissions, sessions, habits, goals, reflections, subscriptions) = tokio::try_join!(
            sources.enrollments_for_student(student_id),
            sources.submissions_for_students(&ids),
            sources.sessions_for_students(&ids),
            sources.habits_for_student(student_id),
            sources.goals_for_student(student_id),
            sources.reflection_count(student_id),
            sources.subscriptions_for_holder(&holder),
        )?;

        let cohort_ids: Vec<String> = enrollments
            .iter()
            .map(|e| e.cohort_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let cohorts = sources.cohorts_by_ids(&cohort_ids).await?;

        let inputs = StudentInputs {
            enrollments,
            cohorts,
            submissions,
            sessions,
            habits,
            goals,
            reflections,
            subscriptions,
        };
        Self::derive(&inputs).map(|m| Some(DashboardMetrics::Student(m)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SubscriptionStatus;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    fn cohort(id: &str, missions: u32) -> CohortRow {
        CohortRow {
            id: id.into(),
            director_id: "d1".into(),
            name: id.into(),
            seat_capacity: 20,
            mission_count: missions,
            active: true,
        }
    }

    fn enrollment(id: &str, cohort_id: &str, status: EnrollmentStatus) -> EnrollmentRow {
        EnrollmentRow {
            id: id.into(),
            student_id: "s1".into(),
            cohort_id: cohort_id.into(),
            status,
            sponsor_id: None,
            enrolled_at: at(1),
        }
    }

    fn graded(id: &str, cohort_id: &str, mission: &str, score: f64) -> SubmissionRow {
        SubmissionRow {
            id: id.into(),
            student_id: "s1".into(),
            cohort_id: cohort_id.into(),
            mission_id: mission.into(),
            score: Some(score),
            passed: score >= 70.0,
            submitted_at: at(2),
            graded_at: Some(at(3)),
        }
    }

    #[test]
    fn test_no_activity_is_all_zero() {
        let metrics = StudentComputator::derive(&StudentInputs::default()).unwrap();
        assert_eq!(metrics, StudentMetrics::default());
        assert_eq!(metrics.enrollment_status, EnrollmentStatus::None);
    }

    #[test]
    fn test_completion_ignores_withdrawn_cohorts() {
        let inputs = StudentInputs {
            enrollments: vec![
                enrollment("e1", "c1", EnrollmentStatus::Active),
                enrollment("e2", "c2", EnrollmentStatus::Withdrawn),
            ],
            cohorts: vec![cohort("c1", 4), cohort("c2", 10)],
            submissions: vec![
                graded("a", "c1", "m1", 90.0),
                graded("b", "c1", "m2", 50.0),
                graded("c", "c2", "m1", 80.0),
            ],
            ..Default::default()
        };

        let metrics = StudentComputator::derive(&inputs).unwrap();
        assert_eq!(metrics.enrollment_status, EnrollmentStatus::Active);
        assert_eq!(metrics.cohorts_enrolled, 1);
        assert_eq!(metrics.missions_required, 4);
        assert_eq!(metrics.missions_submitted, 3);
        assert_eq!(metrics.missions_graded, 3);
        assert_eq!(metrics.missions_passed, 2);
        assert_eq!(metrics.completion_pct, 25.0);
        assert_eq!(metrics.average_score, 73.33);
        assert_eq!(metrics.last_activity_at, Some(at(2)));
    }

    #[test]
    fn test_sessions_habits_goals_and_subscription() {
        let session = |id: &str, status, minutes| MentorSessionRow {
            id: id.into(),
            student_id: "s1".into(),
            mentor_id: "m1".into(),
            status,
            duration_minutes: minutes,
            scheduled_for: at(5),
        };
        let inputs = StudentInputs {
            sessions: vec![
                session("x", SessionStatus::Completed, 45),
                session("y", SessionStatus::Completed, 30),
                session("z", SessionStatus::Cancelled, 60),
            ],
            habits: vec![HabitRow {
                id: "h1".into(),
                student_id: "s1".into(),
                active: true,
                current_streak: 3,
                best_streak: 9,
                last_logged_at: Some(at(7)),
            }],
            goals: vec![
                GoalRow {
                    id: "g1".into(),
                    student_id: "s1".into(),
                    completed: true,
                    updated_at: at(4),
                },
                GoalRow {
                    id: "g2".into(),
                    student_id: "s1".into(),
                    completed: false,
                    updated_at: at(4),
                },
            ],
            reflections: 4,
            subscriptions: vec![SubscriptionRow {
                id: "sub1".into(),
                holder: SubjectKey::student("s1"),
                seats: 1,
                status: SubscriptionStatus::Active,
            }],
            ..Default::default()
        };

        let metrics = StudentComputator::derive(&inputs).unwrap();
        assert_eq!(metrics.sessions_completed, 2);
        assert_eq!(metrics.sessions_cancelled, 1);
        assert_eq!(metrics.mentor_minutes, 75);
        assert_eq!(metrics.habits_active, 1);
        assert_eq!(metrics.best_habit_streak, 9);
        assert_eq!(metrics.goal_completion_pct, 50.0);
        assert_eq!(metrics.reflections_total, 4);
        assert!(metrics.has_active_subscription);
        assert_eq!(metrics.last_activity_at, Some(at(7)));
    }

    #[test]
    fn test_streak_above_best_is_rejected() {
        let inputs = StudentInputs {
            habits: vec![HabitRow {
                id: "h1".into(),
                student_id: "s1".into(),
                active: true,
                current_streak: 12,
                best_streak: 9,
                last_logged_at: None,
            }],
            ..Default::default()
        };
        assert!(matches!(
            StudentComputator::derive(&inputs),
            Err(ComputeError::Invariant(_))
        ));
    }
}
