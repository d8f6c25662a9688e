use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of entity a dashboard cache row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    Student,
    Director,
    Sponsor,
}

impl SubjectType {
    pub const ALL: [SubjectType; 3] = [
        SubjectType::Student,
        SubjectType::Director,
        SubjectType::Sponsor,
    ];

    /// Stable name used in storage and URLs
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Student => "student",
            SubjectType::Director => "director",
            SubjectType::Sponsor => "sponsor",
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSubjectTypeError(pub String);

impl fmt::Display for ParseSubjectTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown subject type '{}' (expected student, director or sponsor)",
            self.0
        )
    }
}

impl std::error::Error for ParseSubjectTypeError {}

impl FromStr for SubjectType {
    type Err = ParseSubjectTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(SubjectType::Student),
            "director" | "program_director" => Ok(SubjectType::Director),
            "sponsor" | "sponsor-org" | "sponsor_org" => Ok(SubjectType::Sponsor),
            other => Err(ParseSubjectTypeError(other.to_string())),
        }
    }
}

/// Identity of a cache row: (subject_type, subject_id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectKey {
    pub subject_type: SubjectType,
    pub subject_id: String,
}

impl SubjectKey {
    pub fn new(subject_type: SubjectType, subject_id: impl Into<String>) -> Self {
        Self {
            subject_type,
            subject_id: subject_id.into(),
        }
    }

    pub fn student(id: impl Into<String>) -> Self {
        Self::new(SubjectType::Student, id)
    }

    pub fn director(id: impl Into<String>) -> Self {
        Self::new(SubjectType::Director, id)
    }

    pub fn sponsor(id: impl Into<String>) -> Self {
        Self::new(SubjectType::Sponsor, id)
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type, self.subject_id)
    }
}

/// Why a subject was marked stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    SubmissionCreated,
    SubmissionGraded,
    SessionScheduled,
    SessionCompleted,
    SubscriptionChanged,
    EnrollmentChanged,
    CohortChanged,
    HabitLogged,
    GoalUpdated,
    ReflectionAdded,
    Manual,
}

impl RefreshReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshReason::SubmissionCreated => "submission_created",
            RefreshReason::SubmissionGraded => "submission_graded",
            RefreshReason::SessionScheduled => "session_scheduled",
            RefreshReason::SessionCompleted => "session_completed",
            RefreshReason::SubscriptionChanged => "subscription_changed",
            RefreshReason::EnrollmentChanged => "enrollment_changed",
            RefreshReason::CohortChanged => "cohort_changed",
            RefreshReason::HabitLogged => "habit_logged",
            RefreshReason::GoalUpdated => "goal_updated",
            RefreshReason::ReflectionAdded => "reflection_added",
            RefreshReason::Manual => "manual",
        }
    }
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let reason = match s {
            "submission_created" => RefreshReason::SubmissionCreated,
            "submission_graded" => RefreshReason::SubmissionGraded,
            "session_scheduled" => RefreshReason::SessionScheduled,
            "session_completed" => RefreshReason::SessionCompleted,
            "subscription_changed" => RefreshReason::SubscriptionChanged,
            "enrollment_changed" => RefreshReason::EnrollmentChanged,
            "cohort_changed" => RefreshReason::CohortChanged,
            "habit_logged" => RefreshReason::HabitLogged,
            "goal_updated" => RefreshReason::GoalUpdated,
            "reflection_added" => RefreshReason::ReflectionAdded,
            "manual" => RefreshReason::Manual,
            other => return Err(format!("unknown refresh reason '{}'", other)),
        };
        Ok(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_type_aliases() {
        assert_eq!("sponsor-org".parse::<SubjectType>(), Ok(SubjectType::Sponsor));
        assert_eq!(" Student ".parse::<SubjectType>(), Ok(SubjectType::Student));
        assert!("mentor".parse::<SubjectType>().is_err());
    }

    #[test]
    fn test_subject_key_display() {
        assert_eq!(SubjectKey::student("student_42").to_string(), "student:student_42");
    }

    #[test]
    fn test_reason_names_parse_back() {
        for reason in [
            RefreshReason::SubmissionGraded,
            RefreshReason::SessionCompleted,
            RefreshReason::SubscriptionChanged,
            RefreshReason::Manual,
        ] {
            assert_eq!(reason.as_str().parse::<RefreshReason>(), Ok(reason));
        }
    }
}
