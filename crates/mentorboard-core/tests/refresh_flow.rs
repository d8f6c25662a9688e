//! End-to-end refresh flows through `DashboardService`

use chrono::{TimeZone, Utc};
use mentorboard_core::sources::SqliteSources;
use mentorboard_core::testing::{FlakySources, SourceFixture};
use mentorboard_core::{
    CacheLayer, Clock, CoreError, DashboardService, ManualClock, RefreshConfig, SystemClock,
};
use mentorboard_types::{
    EnrollmentStatus, RefreshOutcome, RefreshReason, StudentMetrics, SubjectKey,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

struct Harness {
    service: DashboardService,
    fixture: SourceFixture,
    flaky: Arc<FlakySources>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let start = Utc.with_ymd_and_hms(2026, 9, 1, 9, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let config = RefreshConfig::default();
    let sources = SqliteSources::open_in_memory().unwrap();
    let fixture = SourceFixture::new(sources.clone(), start);
    let flaky = Arc::new(FlakySources::new(Arc::new(sources)));
    let cache = CacheLayer::in_memory(clock.clone(), &config).unwrap();
    let service = DashboardService::new(flaky.clone(), cache, clock.clone(), config);
    Harness {
        service,
        fixture,
        flaky,
        clock,
    }
}

#[tokio::test]
async fn test_student_dashboard_follows_grading() {
    let h = harness();
    let key = SubjectKey::student("student_42");
    h.fixture.student("student_42").unwrap();

    // No activity at all: every metric is zero
    let refreshed = h.service.refresh_now(&key).await.unwrap();
    assert_eq!(refreshed.outcome, RefreshOutcome::Refreshed);
    assert_eq!(
        refreshed.record.metrics.as_student(),
        Some(&StudentMetrics::default())
    );

    h.fixture.director("director_7").unwrap();
    h.fixture.cohort("cohort_a", "director_7", 4, 12).unwrap();
    h.fixture
        .enroll("e1", "student_42", "cohort_a", EnrollmentStatus::Active, None)
        .unwrap();
    h.fixture.submit("sub1", "student_42", "cohort_a", "m1").unwrap();
    h.fixture.grade("sub1", 91.0, true).unwrap();

    let queued = h
        .service
        .hooks()
        .submission_graded("student_42")
        .await
        .unwrap();
    assert_eq!(queued, vec![key.clone(), SubjectKey::director("director_7")]);

    // Reads keep serving the old snapshot until the tick runs
    let before = h.service.get_cache_record(&key).await.unwrap();
    assert_eq!(before.metrics.as_student().unwrap().completion_pct, 0.0);

    h.clock.advance(chrono::Duration::seconds(5));
    let summary = h.service.scheduler().tick().await.unwrap();
    assert_eq!(summary.queue_refreshed, 2);
    assert!(summary.failures.is_empty());
    assert!(h.service.queue().get(&key).unwrap().is_none());

    let after = h.service.get_cache_record(&key).await.unwrap();
    let metrics = after.metrics.as_student().unwrap();
    assert_eq!(metrics.completion_pct, 25.0);
    assert_eq!(metrics.missions_passed, 1);
    assert_eq!(metrics.average_score, 91.0);
    assert_eq!(after.cache_updated_at, h.clock.now());

    let director = h
        .service
        .get_cache_record(&SubjectKey::director("director_7"))
        .await
        .unwrap();
    assert!(director.metrics.as_director().is_some());
}

#[tokio::test]
async fn test_repeated_signals_collapse_into_one_refresh() {
    let h = harness();
    h.fixture.student("s1").unwrap();
    h.fixture.director("d1").unwrap();
    h.fixture.cohort("c1", "d1", 3, 10).unwrap();
    h.fixture
        .enroll("e1", "s1", "c1", EnrollmentStatus::Active, None)
        .unwrap();

    let hooks = h.service.hooks();
    hooks.submission_created("s1").await.unwrap();
    hooks.submission_created("s1").await.unwrap();
    hooks.session_completed("s1").await.unwrap();
    hooks.habit_logged("s1").await.unwrap();
    assert_eq!(h.service.queue().pending_count().unwrap(), 2);

    let summary = h.service.scheduler().tick().await.unwrap();
    assert_eq!(summary.queue_drained, 2);
    assert_eq!(summary.queue_refreshed, 2);
    assert_eq!(h.flaky.calls("student_profile"), 1);
    assert_eq!(h.flaky.calls("director_profile"), 1);
}

#[tokio::test]
async fn test_refresh_is_idempotent() {
    let h = harness();
    let key = SubjectKey::sponsor("org1");
    h.fixture.sponsor("org1").unwrap();

    let first = h.service.refresh_now(&key).await.unwrap().record;
    h.clock.advance(chrono::Duration::minutes(10));
    let second = h.service.refresh_now(&key).await.unwrap().record;

    assert_eq!(first.metrics, second.metrics);
    assert_eq!(
        second.cache_updated_at - first.cache_updated_at,
        chrono::Duration::minutes(10)
    );
}

#[tokio::test]
async fn test_stale_rows_are_served_then_swept() {
    let h = harness();
    let key = SubjectKey::student("s1");
    h.fixture.student("s1").unwrap();
    h.service.refresh_now(&key).await.unwrap();
    let threshold = h.service.config().staleness_threshold();

    h.clock.advance(threshold + chrono::Duration::seconds(1));
    let stale = h.service.get_cache_record(&key).await.unwrap();
    assert!(stale.is_stale(h.clock.now(), threshold));

    let summary = h.service.scheduler().tick().await.unwrap();
    assert_eq!(summary.sweep_refreshed, 1);

    let fresh = h.service.get_cache_record(&key).await.unwrap();
    assert_eq!(fresh.cache_updated_at, h.clock.now());
    assert!(!fresh.is_stale(h.clock.now(), threshold));
}

#[tokio::test]
async fn test_failed_refresh_leaves_row_untouched() {
    let h = harness();
    let key = SubjectKey::student("s1");
    h.fixture.student("s1").unwrap();
    let original = h.service.refresh_now(&key).await.unwrap().record;

    h.fixture.goal("g1", "s1", true).unwrap();
    h.flaky.fail_read("goals_for_student");
    h.clock.advance(chrono::Duration::minutes(1));

    let err = h.service.refresh_now(&key).await.unwrap_err();
    assert!(matches!(err, CoreError::Refresh(_)));

    let current = h.service.get_cache_record(&key).await.unwrap();
    assert_eq!(current.as_ref(), original.as_ref());
    assert_eq!(h.service.cache().claims.held_count().unwrap(), 0);
}

#[tokio::test]
async fn test_manual_refresh_and_tick_never_overlap() {
    let h = harness();
    let key = SubjectKey::director("director_7");
    h.fixture.director("director_7").unwrap();
    h.service
        .enqueue(&key, RefreshReason::CohortChanged)
        .unwrap();
    h.flaky
        .delay_read("director_profile", Duration::from_millis(200));

    let (manual, tick) = tokio::join!(h.service.refresh_now(&key), h.service.scheduler().tick());

    assert_eq!(manual.unwrap().outcome, RefreshOutcome::Refreshed);
    let tick = tick.unwrap();
    assert_eq!(tick.queue_deferred, 1);
    assert!(tick.failures.is_empty());
    assert_eq!(h.flaky.calls("director_profile"), 1);
    assert_eq!(h.flaky.max_in_flight("director_profile"), 1);

    // Deferral does not count as a failed attempt
    let entry = h.service.queue().get(&key).unwrap().unwrap();
    assert_eq!(entry.attempts, 0);
}

#[tokio::test]
async fn test_processes_sharing_a_cache_file_coalesce() {
    let dir = tempdir().unwrap();
    let config = RefreshConfig::default();
    let sources = SqliteSources::open_in_memory().unwrap();
    SourceFixture::new(sources.clone(), Utc::now())
        .director("director_7")
        .unwrap();
    let flaky = Arc::new(FlakySources::new(Arc::new(sources)));
    flaky.delay_read("director_profile", Duration::from_millis(400));

    let open = || {
        let clock = Arc::new(SystemClock);
        let cache = CacheLayer::open(dir.path(), clock.clone(), &config).unwrap();
        DashboardService::new(flaky.clone(), cache, clock, config.clone())
    };
    let first = open();
    let second = open();

    let key = SubjectKey::director("director_7");
    let (a, b) = tokio::join!(first.refresh_now(&key), second.refresh_now(&key));

    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.outcome, RefreshOutcome::Refreshed);
    assert_eq!(b.outcome, RefreshOutcome::Coalesced);
    assert_eq!(a.record.cache_updated_at, b.record.cache_updated_at);
    assert_eq!(flaky.calls("director_profile"), 1);
}

#[tokio::test]
async fn test_queue_and_rows_survive_restart() {
    let dir = tempdir().unwrap();
    let sources_db = dir.path().join("sources.db");
    {
        let sources = SqliteSources::open(&sources_db).unwrap();
        let fixture = SourceFixture::new(sources, Utc::now());
        fixture.student("s1").unwrap();
        fixture.student("s2").unwrap();
    }

    let key = SubjectKey::student("s1");
    {
        let service =
            DashboardService::open(dir.path(), &sources_db, RefreshConfig::default()).unwrap();
        service.enqueue(&key, RefreshReason::HabitLogged).unwrap();
        service
            .refresh_now(&SubjectKey::student("s2"))
            .await
            .unwrap();
    }

    let service =
        DashboardService::open(dir.path(), &sources_db, RefreshConfig::default()).unwrap();
    assert_eq!(service.queue().pending_count().unwrap(), 1);
    assert!(service
        .get_cache_record(&SubjectKey::student("s2"))
        .await
        .is_ok());

    let summary = service.scheduler().tick().await.unwrap();
    assert_eq!(summary.queue_refreshed, 1);
    assert!(service.get_cache_record(&key).await.is_ok());
    assert_eq!(service.stats().unwrap().cache.total_entries, 2);
}

#[tokio::test]
async fn test_deleted_subject_disappears() {
    let h = harness();
    let key = SubjectKey::student("s1");
    h.fixture.student("s1").unwrap();
    h.service.refresh_now(&key).await.unwrap();

    h.fixture.sources.delete_subject(&key).unwrap();
    h.service.hooks().subject_deleted(&key).await.unwrap();

    let err = h.service.get_cache_record(&key).await.unwrap_err();
    assert!(matches!(err, CoreError::RecordNotFound { .. }));
    assert_eq!(h.service.queue().pending_count().unwrap(), 0);
}
