//! Per-subject-type metric computators
//!
//! A computator reads the source aggregates for one subject and derives its
//! metrics. Derivation is split from the reads (`derive` functions over an
//! inputs struct) so the arithmetic is a pure function of source state.

pub mod math;

mod director;
mod sponsor;
mod student;

pub use director::{DirectorComputator, DirectorInputs};
pub use sponsor::{SponsorComputator, SponsorInputs};
pub use student::{StudentComputator, StudentInputs};

use crate::error::SourceError;
use crate::sources::{CohortRow, EnrollmentRow, SourceAggregates, SubmissionRow};
use async_trait::async_trait;
use mentorboard_types::{DashboardMetrics, EnrollmentStatus, SubjectType};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Why a computator produced no metrics
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputeError {
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Source rows contradict each other or a metric's domain
    #[error("{0}")]
    Invariant(String),
}

impl ComputeError {
    pub fn invariant(message: impl Into<String>) -> Self {
        ComputeError::Invariant(message.into())
    }
}

/// Metric strategy for one subject type
#[async_trait]
pub trait Computator: Send + Sync {
    fn subject_type(&self) -> SubjectType;

    /// Derive metrics for `subject_id`; `Ok(None)` if the subject does not exist
    async fn compute(
        &self,
        sources: &dyn SourceAggregates,
        subject_id: &str,
    ) -> Result<Option<DashboardMetrics>, ComputeError>;
}

/// Computators keyed by subject type
#[derive(Clone)]
pub struct Computators {
    by_type: HashMap<SubjectType, Arc<dyn Computator>>,
}

impl Computators {
    pub fn empty() -> Self {
        Self {
            by_type: HashMap::new(),
        }
    }

    /// Replace the computator for its subject type
    pub fn register(&mut self, computator: Arc<dyn Computator>) {
        self.by_type.insert(computator.subject_type(), computator);
    }

    pub fn get(&self, subject_type: SubjectType) -> Option<&Arc<dyn Computator>> {
        self.by_type.get(&subject_type)
    }
}

impl Default for Computators {
    fn default() -> Self {
        let mut computators = Self::empty();
        computators.register(Arc::new(StudentComputator));
        computators.register(Arc::new(DirectorComputator));
        computators.register(Arc::new(SponsorComputator));
        computators
    }
}

/// Per-enrollment progress, shared by the director and sponsor rollups
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EnrollmentProgress {
    pub student_id: String,
    pub status: EnrollmentStatus,
    pub completion_pct: f64,
}

/// Check a graded submission's score and pass flag
pub(crate) fn check_submission(submission: &SubmissionRow) -> Result<(), ComputeError> {
    match (submission.graded_at, submission.score) {
        (Some(_), None) => Err(ComputeError::invariant(format!(
            "submission {} is graded without a score",
            submission.id
        ))),
        (_, Some(score)) if !(0.0..=100.0).contains(&score) => Err(ComputeError::invariant(
            format!("submission {} has score {} outside 0..=100", submission.id, score),
        )),
        (None, _) if submission.passed => Err(ComputeError::invariant(format!(
            "submission {} is passed but not graded",
            submission.id
        ))),
        _ => Ok(()),
    }
}

/// Completion of each enrollment: distinct passed missions of the cohort over its mission count
pub(crate) fn enrollment_progress(
    enrollments: &[EnrollmentRow],
    cohorts: &HashMap<&str, &CohortRow>,
    submissions: &[SubmissionRow],
) -> Result<Vec<EnrollmentProgress>, ComputeError> {
    let mut passed: HashMap<(&str, &str), HashSet<&str>> = HashMap::new();
    for submission in submissions {
        check_submission(submission)?;
        if submission.passed {
            passed
                .entry((submission.student_id.as_str(), submission.cohort_id.as_str()))
                .or_default()
                .insert(submission.mission_id.as_str());
        }
    }

    enrollments
        .iter()
        .map(|enrollment| {
            let cohort = cohorts.get(enrollment.cohort_id.as_str()).ok_or_else(|| {
                ComputeError::invariant(format!(
                    "enrollment {} references missing cohort {}",
                    enrollment.id, enrollment.cohort_id
                ))
            })?;
            let done = passed
                .get(&(enrollment.student_id.as_str(), enrollment.cohort_id.as_str()))
                .map(|missions| missions.len() as u64)
                .unwrap_or(0)
                .min(cohort.mission_count as u64);
            Ok(EnrollmentProgress {
                student_id: enrollment.student_id.clone(),
                status: enrollment.status,
                completion_pct: math::percent(done, cohort.mission_count as u64),
            })
        })
        .collect()
}

pub(crate) fn index_cohorts(cohorts: &[CohortRow]) -> HashMap<&str, &CohortRow> {
    cohorts.iter().map(|c| (c.id.as_str(), c)).collect()
}
