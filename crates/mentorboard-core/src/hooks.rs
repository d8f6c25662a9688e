//! Domain-mutation hooks
//!
//! Called explicitly by the code that mutates source data, right after the
//! mutation commits. Each hook marks the affected dashboards stale in the
//! update queue; nothing is computed inline.
//!
//! Bulk imports construct [`MutationHooks::disabled`] and rely on the sweep
//! (or `refresh-all`) instead.

use crate::cache::UpdateQueue;
use crate::error::CoreError;
use crate::event::{DataEvent, EventBus};
use crate::refresh::AggregationService;
use crate::sources::SourceAggregates;
use mentorboard_types::{RefreshReason, SubjectKey, SubjectType};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

struct HookTargets {
    queue: Arc<UpdateQueue>,
    sources: Arc<dyn SourceAggregates>,
    service: Arc<AggregationService>,
    events: EventBus,
}

/// Enqueues stale subjects on source mutations
///
/// Every method returns the keys it marked stale.
#[derive(Clone)]
pub struct MutationHooks {
    targets: Option<Arc<HookTargets>>,
}

type HookResult = Result<Vec<SubjectKey>, CoreError>;

impl MutationHooks {
    pub fn new(
        queue: Arc<UpdateQueue>,
        sources: Arc<dyn SourceAggregates>,
        service: Arc<AggregationService>,
        events: EventBus,
    ) -> Self {
        Self {
            targets: Some(Arc::new(HookTargets {
                queue,
                sources,
                service,
                events,
            })),
        }
    }

    /// Hooks that accept every call and enqueue nothing
    pub fn disabled() -> Self {
        Self { targets: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.targets.is_some()
    }

    pub async fn submission_created(&self, student_id: &str) -> HookResult {
        self.student_and_related(student_id, RefreshReason::SubmissionCreated)
            .await
    }

    pub async fn submission_graded(&self, student_id: &str) -> HookResult {
        self.student_and_related(student_id, RefreshReason::SubmissionGraded)
            .await
    }

    pub async fn session_scheduled(&self, student_id: &str) -> HookResult {
        self.student_and_related(student_id, RefreshReason::SessionScheduled)
            .await
    }

    pub async fn session_completed(&self, student_id: &str) -> HookResult {
        self.student_and_related(student_id, RefreshReason::SessionCompleted)
            .await
    }

    /// Subscription created, renewed, cancelled or resized for `holder`
    pub async fn subscription_changed(&self, holder: &SubjectKey) -> HookResult {
        let Some(targets) = self.enabled("subscription_changed") else {
            return Ok(Vec::new());
        };
        targets.enqueue_all([holder.clone()], RefreshReason::SubscriptionChanged)
    }

    /// Enrollment created, withdrawn or completed
    ///
    /// The cohort's director is enqueued explicitly so a removed enrollment
    /// still refreshes the director it no longer links to.
    pub async fn enrollment_changed(&self, student_id: &str, cohort_id: &str) -> HookResult {
        let Some(targets) = self.enabled("enrollment_changed") else {
            return Ok(Vec::new());
        };
        let mut keys = targets.related(student_id).await;
        match targets.sources.cohorts_by_ids(&[cohort_id.to_string()]).await {
            Ok(cohorts) => {
                keys.extend(cohorts.into_iter().map(|c| SubjectKey::director(c.director_id)))
            }
            Err(e) => warn!(cohort_id, error = %e, "Cohort lookup failed, director not enqueued"),
        }
        targets.enqueue_all(keys, RefreshReason::EnrollmentChanged)
    }

    /// Cohort edited (mission count, seats, activation): director plus every
    /// enrolled student and their sponsors
    pub async fn cohort_changed(&self, cohort_id: &str) -> HookResult {
        let Some(targets) = self.enabled("cohort_changed") else {
            return Ok(Vec::new());
        };
        let ids = [cohort_id.to_string()];
        let (cohorts, enrollments) = tokio::try_join!(
            targets.sources.cohorts_by_ids(&ids),
            targets.sources.enrollments_for_cohorts(&ids),
        )?;

        let mut keys = BTreeSet::new();
        for cohort in cohorts {
            keys.insert(SubjectKey::director(cohort.director_id));
        }
        for enrollment in enrollments {
            if let Some(sponsor) = enrollment.sponsor_id {
                keys.insert(SubjectKey::sponsor(sponsor));
            }
            keys.insert(SubjectKey::student(enrollment.student_id));
        }
        targets.enqueue_all(keys, RefreshReason::CohortChanged)
    }

    pub async fn habit_logged(&self, student_id: &str) -> HookResult {
        self.student_only(student_id, RefreshReason::HabitLogged)
    }

    pub async fn goal_updated(&self, student_id: &str) -> HookResult {
        self.student_only(student_id, RefreshReason::GoalUpdated)
    }

    pub async fn reflection_added(&self, student_id: &str) -> HookResult {
        self.student_only(student_id, RefreshReason::ReflectionAdded)
    }

    /// Subject removed from its owning table
    ///
    /// Purges its row and queue entry. For a student, the directors and
    /// sponsors still linked to it are enqueued.
    pub async fn subject_deleted(&self, key: &SubjectKey) -> HookResult {
        let Some(targets) = self.enabled("subject_deleted") else {
            return Ok(Vec::new());
        };
        targets.service.purge(key).await?;

        if key.subject_type != SubjectType::Student {
            return Ok(Vec::new());
        }
        let mut related = targets.related(&key.subject_id).await;
        related.remove(key);
        targets.enqueue_all(related, RefreshReason::EnrollmentChanged)
    }

    fn enabled(&self, hook: &'static str) -> Option<&HookTargets> {
        if self.targets.is_none() {
            debug!(hook, "Mutation hooks disabled, nothing enqueued");
        }
        self.targets.as_deref()
    }

    fn student_only(&self, student_id: &str, reason: RefreshReason) -> HookResult {
        let Some(targets) = self.enabled(reason.as_str()) else {
            return Ok(Vec::new());
        };
        targets.enqueue_all([SubjectKey::student(student_id)], reason)
    }

    async fn student_and_related(&self, student_id: &str, reason: RefreshReason) -> HookResult {
        let Some(targets) = self.enabled(reason.as_str()) else {
            return Ok(Vec::new());
        };
        let keys = targets.related(student_id).await;
        targets.enqueue_all(keys, reason)
    }
}

impl HookTargets {
    /// The student plus its directors and sponsors
    ///
    /// A failed lookup still yields the student; the sweep catches the rest.
    async fn related(&self, student_id: &str) -> BTreeSet<SubjectKey> {
        let mut keys = BTreeSet::from([SubjectKey::student(student_id)]);
        match self.sources.related_subjects(student_id).await {
            Ok(related) => keys.extend(related),
            Err(e) => warn!(
                student_id,
                error = %e,
                "Related subject lookup failed, only the student was enqueued"
            ),
        }
        keys
    }

    fn enqueue_all(
        &self,
        keys: impl IntoIterator<Item = SubjectKey>,
        reason: RefreshReason,
    ) -> HookResult {
        let mut enqueued = Vec::new();
        for key in keys {
            let created = self.queue.enqueue(&key, reason)?;
            debug!(subject = %key, reason = %reason, created, "Subject marked stale");
            self.events.publish(DataEvent::Enqueued {
                key: key.clone(),
                reason,
            });
            enqueued.push(key);
        }
        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLayer;
    use crate::clock::ManualClock;
    use crate::config::RefreshConfig;
    use crate::sources::SqliteSources;
    use crate::testing::{FlakySources, SourceFixture};
    use chrono::{TimeZone, Utc};
    use mentorboard_types::EnrollmentStatus;

    struct Harness {
        hooks: MutationHooks,
        cache: CacheLayer,
        service: Arc<AggregationService>,
        flaky: Arc<FlakySources>,
        fixture: SourceFixture,
    }

    fn harness() -> Harness {
        let start = Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let config = RefreshConfig::default();
        let sources = SqliteSources::open_in_memory().unwrap();
        let fixture = SourceFixture::new(sources.clone(), start);
        let flaky = Arc::new(FlakySources::new(Arc::new(sources)));
        let cache = CacheLayer::in_memory(clock.clone(), &config).unwrap();
        let events = EventBus::default_capacity();
        let service = Arc::new(AggregationService::new(
            flaky.clone(),
            cache.clone(),
            clock,
            events.clone(),
            &config,
        ));
        let hooks = MutationHooks::new(cache.queue.clone(), flaky.clone(), service.clone(), events);

        fixture.student("s1").unwrap();
        fixture.director("d1").unwrap();
        fixture.sponsor("org1").unwrap();
        fixture.cohort("c1", "d1", 5, 20).unwrap();
        fixture
            .enroll("e1", "s1", "c1", EnrollmentStatus::Active, Some("org1"))
            .unwrap();

        Harness {
            hooks,
            cache,
            service,
            flaky,
            fixture,
        }
    }

    #[tokio::test]
    async fn test_graded_submission_fans_out() {
        let h = harness();
        let keys = h.hooks.submission_graded("s1").await.unwrap();
        assert_eq!(
            keys,
            vec![
                SubjectKey::student("s1"),
                SubjectKey::director("d1"),
                SubjectKey::sponsor("org1"),
            ]
        );
        assert_eq!(h.cache.queue.pending_count().unwrap(), 3);

        // Coalesced with the pending entries
        h.hooks.session_completed("s1").await.unwrap();
        assert_eq!(h.cache.queue.pending_count().unwrap(), 3);
        let entry = h.cache.queue.get(&SubjectKey::director("d1")).unwrap().unwrap();
        assert_eq!(entry.reason, RefreshReason::SessionCompleted);
    }

    #[tokio::test]
    async fn test_lookup_failure_still_enqueues_student() {
        let h = harness();
        h.flaky.fail_read("related_subjects");

        let keys = h.hooks.submission_created("s1").await.unwrap();
        assert_eq!(keys, vec![SubjectKey::student("s1")]);
    }

    #[tokio::test]
    async fn test_student_only_hooks() {
        let h = harness();
        h.hooks.habit_logged("s1").await.unwrap();
        h.hooks.goal_updated("s1").await.unwrap();
        h.hooks.reflection_added("s1").await.unwrap();
        assert_eq!(h.cache.queue.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cohort_changed_reaches_everyone_enrolled() {
        let h = harness();
        h.fixture.student("s2").unwrap();
        h.fixture
            .enroll("e2", "s2", "c1", EnrollmentStatus::Withdrawn, None)
            .unwrap();

        let keys = h.hooks.cohort_changed("c1").await.unwrap();
        assert_eq!(keys.len(), 4);
        assert!(keys.contains(&SubjectKey::student("s2")));
        assert!(keys.contains(&SubjectKey::director("d1")));
    }

    #[tokio::test]
    async fn test_subscription_changed_enqueues_holder() {
        let h = harness();
        let keys = h
            .hooks
            .subscription_changed(&SubjectKey::sponsor("org1"))
            .await
            .unwrap();
        assert_eq!(keys, vec![SubjectKey::sponsor("org1")]);
    }

    #[tokio::test]
    async fn test_subject_deleted_purges() {
        let h = harness();
        let key = SubjectKey::student("s1");
        h.service.refresh(&key).await.unwrap();
        h.cache
            .queue
            .enqueue(&key, RefreshReason::Manual)
            .unwrap();

        h.fixture.sources.delete_subject(&key).unwrap();
        h.hooks.subject_deleted(&key).await.unwrap();
        assert!(h.cache.store.get(&key).unwrap().is_none());
        assert!(h.cache.queue.get(&key).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabled_hooks_enqueue_nothing() {
        let h = harness();
        let hooks = MutationHooks::disabled();
        assert!(!hooks.is_enabled());
        assert!(hooks.submission_graded("s1").await.unwrap().is_empty());
        assert!(hooks.cohort_changed("c1").await.unwrap().is_empty());
        assert_eq!(h.cache.queue.pending_count().unwrap(), 0);
    }
}
