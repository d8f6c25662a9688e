//! Benchmarks for dashboard aggregation
//!
//! Measures:
//! - StudentComputator::derive over growing submission histories
//! - DirectorComputator::derive over growing cohorts
//! - A full refresh (source reads + cache write) against in-memory SQLite
//!
//! Run with:
//! ```bash
//! cargo bench --bench aggregation_bench
//! ```

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mentorboard_core::aggregation::{
    DirectorComputator, DirectorInputs, StudentComputator, StudentInputs,
};
use mentorboard_core::sources::{
    CohortRow, EnrollmentRow, MentorSessionRow, SessionStatus, SubmissionRow,
};
use mentorboard_core::testing::SourceFixture;
use mentorboard_core::{CacheLayer, DashboardService, RefreshConfig, SystemClock};
use mentorboard_types::{EnrollmentStatus, SubjectKey};
use std::sync::Arc;

const MISSIONS_PER_COHORT: u32 = 12;

fn cohort(id: usize) -> CohortRow {
    CohortRow {
        id: format!("cohort-{}", id),
        director_id: "director-1".to_string(),
        name: format!("Cohort {}", id),
        seat_capacity: 40,
        mission_count: MISSIONS_PER_COHORT,
        active: true,
    }
}

fn enrollment(student: usize, cohort: usize) -> EnrollmentRow {
    EnrollmentRow {
        id: format!("enr-{}-{}", student, cohort),
        student_id: format!("student-{}", student),
        cohort_id: format!("cohort-{}", cohort),
        status: EnrollmentStatus::Active,
        sponsor_id: None,
        enrolled_at: Utc::now() - Duration::days(60),
    }
}

/// `per_student` graded submissions for each student, spread over missions
fn submissions(students: usize, cohorts: usize, per_student: usize) -> Vec<SubmissionRow> {
    let now = Utc::now();
    (0..students)
        .flat_map(|s| {
            (0..per_student).map(move |i| {
                let score = ((s * 7 + i * 13) % 101) as f64;
                SubmissionRow {
                    id: format!("sub-{}-{}", s, i),
                    student_id: format!("student-{}", s),
                    cohort_id: format!("cohort-{}", s % cohorts),
                    mission_id: format!("mission-{}", i % MISSIONS_PER_COHORT as usize),
                    score: Some(score),
                    passed: score >= 60.0,
                    submitted_at: now - Duration::hours(i as i64),
                    graded_at: Some(now - Duration::hours(i as i64 - 1)),
                }
            })
        })
        .collect()
}

fn sessions(students: usize, per_student: usize) -> Vec<MentorSessionRow> {
    let now = Utc::now();
    (0..students)
        .flat_map(|s| {
            (0..per_student).map(move |i| MentorSessionRow {
                id: format!("session-{}-{}", s, i),
                student_id: format!("student-{}", s),
                mentor_id: "mentor-1".to_string(),
                status: if i % 3 == 0 {
                    SessionStatus::Scheduled
                } else {
                    SessionStatus::Completed
                },
                duration_minutes: 30,
                scheduled_for: now - Duration::days(i as i64),
            })
        })
        .collect()
}

fn student_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("student_derive");

    for per_student in [10, 100, 1000] {
        let inputs = StudentInputs {
            enrollments: vec![enrollment(0, 0)],
            cohorts: vec![cohort(0)],
            submissions: submissions(1, 1, per_student),
            sessions: sessions(1, per_student / 10),
            ..Default::default()
        };
        group.bench_with_input(
            BenchmarkId::new("submissions", per_student),
            &inputs,
            |b, inputs| b.iter(|| black_box(StudentComputator::derive(inputs))),
        );
    }

    group.finish();
}

fn director_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("director_derive");

    for students in [10, 100, 500] {
        let cohorts = 4;
        let inputs = DirectorInputs {
            cohorts: (0..cohorts).map(cohort).collect(),
            enrollments: (0..students).map(|s| enrollment(s, s % cohorts)).collect(),
            submissions: submissions(students, cohorts, 20),
            sessions: sessions(students, 4),
        };
        group.bench_with_input(
            BenchmarkId::new("students", students),
            &inputs,
            |b, inputs| b.iter(|| black_box(DirectorComputator::derive(inputs))),
        );
    }

    group.finish();
}

fn refresh_benchmark(c: &mut Criterion) {
    let Ok(runtime) = tokio::runtime::Runtime::new() else {
        return;
    };

    let config = RefreshConfig::default();
    let clock = Arc::new(SystemClock);
    let fixture = SourceFixture::in_memory(Utc::now()).expect("fixture");
    fixture.director("director-1").expect("director");
    fixture.cohort("cohort-0", "director-1", MISSIONS_PER_COHORT, 40).expect("cohort");
    for s in 0..50 {
        let id = format!("student-{}", s);
        fixture.student(&id).expect("student");
        fixture
            .enroll(&format!("enr-{}", s), &id, "cohort-0", EnrollmentStatus::Active, None)
            .expect("enroll");
        for m in 0..5 {
            let sub = format!("sub-{}-{}", s, m);
            fixture.submit(&sub, &id, "cohort-0", &format!("mission-{}", m)).expect("submit");
            fixture.grade(&sub, 75.0, true).expect("grade");
        }
    }

    let cache = CacheLayer::in_memory(clock.clone(), &config).expect("cache");
    let service = DashboardService::new(Arc::new(fixture.sources), cache, clock, config);
    let key = SubjectKey::director("director-1");

    c.bench_function("refresh_director_50_students", |b| {
        b.to_async(&runtime)
            .iter(|| async { black_box(service.refresh_now(&key).await) })
    });
}

criterion_group!(
    benches,
    student_benchmark,
    director_benchmark,
    refresh_benchmark
);
criterion_main!(benches);
