//! Demo rows for a fresh sources database

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use mentorboard_core::sources::{
    CohortRow, EnrollmentRow, GoalRow, HabitRow, MentorSessionRow, SessionStatus, SubmissionRow,
    SubscriptionRow, SubscriptionStatus,
};
use mentorboard_core::SqliteSources;
use mentorboard_types::{EnrollmentStatus, SubjectKey};

/// What `seed_demo` wrote
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub students: usize,
    pub directors: usize,
    pub sponsors: usize,
    pub cohorts: usize,
}

/// Two cohorts under `director_7`, `org_acme` sponsoring part of the seats,
/// `student_42` enrolled with no activity yet.
pub fn seed_demo(sources: &SqliteSources, now: DateTime<Utc>) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    sources.insert_director("director_7", "Dana Okafor")?;
    report.directors += 1;
    sources.insert_sponsor("org_acme", "Acme Learning Fund")?;
    report.sponsors += 1;

    for (id, name, missions) in [("cohort_a", "Spring Cohort", 4), ("cohort_b", "Summer Cohort", 6)] {
        sources.insert_cohort(&CohortRow {
            id: id.to_string(),
            director_id: "director_7".to_string(),
            name: name.to_string(),
            seat_capacity: 12,
            mission_count: missions,
            active: true,
        })?;
        report.cohorts += 1;
    }

    let students = [
        ("student_42", "cohort_a", None),
        ("student_43", "cohort_a", Some("org_acme")),
        ("student_44", "cohort_b", Some("org_acme")),
    ];
    for (id, cohort, sponsor) in students {
        sources.insert_student(id, id, now - Duration::days(30))?;
        sources.insert_enrollment(&EnrollmentRow {
            id: format!("enr_{}", id),
            student_id: id.to_string(),
            cohort_id: cohort.to_string(),
            status: EnrollmentStatus::Active,
            sponsor_id: sponsor.map(str::to_string),
            enrolled_at: now - Duration::days(21),
        })?;
        report.students += 1;
    }

    // student_43 has some history; student_42 stays empty
    for (n, score) in [(1, Some(88.0)), (2, Some(54.0)), (3, None)] {
        let submitted_at = now - Duration::days(14 - n);
        sources.insert_submission(&SubmissionRow {
            id: format!("sub_43_{}", n),
            student_id: "student_43".to_string(),
            cohort_id: "cohort_a".to_string(),
            mission_id: format!("mission_{}", n),
            score,
            passed: score.is_some_and(|s| s >= 60.0),
            submitted_at,
            graded_at: score.map(|_| submitted_at + Duration::days(1)),
        })?;
    }
    sources.insert_session(&MentorSessionRow {
        id: "session_43_1".to_string(),
        student_id: "student_43".to_string(),
        mentor_id: "mentor_1".to_string(),
        status: SessionStatus::Completed,
        duration_minutes: 45,
        scheduled_for: now - Duration::days(7),
    })?;
    sources.insert_habit(&HabitRow {
        id: "habit_43_1".to_string(),
        student_id: "student_43".to_string(),
        active: true,
        current_streak: 5,
        best_streak: 9,
        last_logged_at: Some(now - Duration::hours(20)),
    })?;
    sources.insert_goal(&GoalRow {
        id: "goal_43_1".to_string(),
        student_id: "student_43".to_string(),
        completed: true,
        updated_at: now - Duration::days(3),
    })?;
    sources.insert_reflection("refl_43_1", "student_43", now - Duration::days(2))?;
    sources.insert_subscription(&SubscriptionRow {
        id: "sub_acme".to_string(),
        holder: SubjectKey::sponsor("org_acme"),
        seats: 10,
        status: SubscriptionStatus::Active,
    })?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentorboard_core::sources::SourceAggregates;
    use mentorboard_types::SubjectType;

    #[tokio::test]
    async fn test_seed_demo_lists_subjects() {
        let sources = SqliteSources::open_in_memory().unwrap();
        let report = seed_demo(&sources, Utc::now()).unwrap();
        assert_eq!(report.students, 3);
        assert_eq!(report.cohorts, 2);

        let students = sources.list_subjects(SubjectType::Student).await.unwrap();
        assert_eq!(students.len(), 3);
        let directors = sources.list_subjects(SubjectType::Director).await.unwrap();
        assert_eq!(directors, vec!["director_7".to_string()]);
    }
}
