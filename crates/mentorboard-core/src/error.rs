//! Error types for mentorboard-core
//!
//! `CoreError` covers infrastructure (config, storage, lookups), `RefreshError`
//! is the per-subject refresh taxonomy and `SourceError` is what source adapters
//! report. Per-subject failures never escape a batch; they are recorded and
//! surfaced through `TickSummary` and the event bus.

use mentorboard_types::{SubjectKey, TickSummary};
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for mentorboard operations
#[derive(Error, Debug)]
pub enum CoreError {
    // ===================
    // Lookup Errors
    // ===================
    #[error("Dashboard not ready yet: no cache record for {key}")]
    RecordNotFound { key: SubjectKey },

    #[error("Invalid subject: {reason}")]
    InvalidSubject { reason: String },

    // ===================
    // Config Errors
    // ===================
    #[error("Failed to read config file: {path}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Data directory not found and no override given")]
    DataDirNotFound,

    // ===================
    // Refresh Errors
    // ===================
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error(transparent)]
    Source(#[from] SourceError),

    // ===================
    // Storage Errors
    // ===================
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Why a refresh of one subject did not produce a record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// Subject disappeared from its owning table; dropped, never retried
    #[error("Subject not found: {key}")]
    SubjectNotFound { key: SubjectKey },

    /// A source read failed or timed out; nothing was written
    #[error("Source read '{read}' failed for {key}: {message}")]
    SourceUnavailable {
        key: SubjectKey,
        read: String,
        message: String,
    },

    /// Another worker holds the subject's refresh claim
    #[error("Refresh claim for {key} is held by {holder}")]
    ClaimHeld { key: SubjectKey, holder: String },

    /// Our claim expired and was taken over before the write; nothing was written
    #[error("Refresh claim for {key} expired before the write")]
    ClaimTimeout { key: SubjectKey },

    /// Invariant violation while deriving metrics
    #[error("Computation failed for {key}: {message}")]
    Computation { key: SubjectKey, message: String },

    #[error("Cache store error for {key}: {message}")]
    Store { key: SubjectKey, message: String },
}

impl RefreshError {
    pub fn key(&self) -> &SubjectKey {
        match self {
            RefreshError::SubjectNotFound { key }
            | RefreshError::SourceUnavailable { key, .. }
            | RefreshError::ClaimHeld { key, .. }
            | RefreshError::ClaimTimeout { key }
            | RefreshError::Computation { key, .. }
            | RefreshError::Store { key, .. } => key,
        }
    }

    /// Short taxonomy name used in summaries and events
    pub fn kind(&self) -> &'static str {
        match self {
            RefreshError::SubjectNotFound { .. } => "subject_not_found",
            RefreshError::SourceUnavailable { .. } => "source_unavailable",
            RefreshError::ClaimHeld { .. } => "claim_held",
            RefreshError::ClaimTimeout { .. } => "claim_timeout",
            RefreshError::Computation { .. } => "computation_error",
            RefreshError::Store { .. } => "store_error",
        }
    }

    /// Whether the queue entry should be kept for a later tick
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RefreshError::SubjectNotFound { .. })
    }

    pub(crate) fn from_source(key: &SubjectKey, err: SourceError) -> Self {
        RefreshError::SourceUnavailable {
            key: key.clone(),
            read: err.read().to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn store(key: &SubjectKey, err: anyhow::Error) -> Self {
        RefreshError::Store {
            key: key.clone(),
            message: format!("{:#}", err),
        }
    }

    pub(crate) fn computation(key: &SubjectKey, message: impl Into<String>) -> Self {
        RefreshError::Computation {
            key: key.clone(),
            message: message.into(),
        }
    }
}

/// Failure reported by a source aggregate adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("source read '{read}' timed out after {timeout_ms}ms")]
    Timeout { read: &'static str, timeout_ms: u64 },

    #[error("source read '{read}' failed: {message}")]
    Unavailable { read: &'static str, message: String },
}

impl SourceError {
    pub fn unavailable(read: &'static str, message: impl Into<String>) -> Self {
        SourceError::Unavailable {
            read,
            message: message.into(),
        }
    }

    pub fn read(&self) -> &'static str {
        match self {
            SourceError::Timeout { read, .. } | SourceError::Unavailable { read, .. } => read,
        }
    }
}

/// Degraded state indicator derived from the last scheduler tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradedState {
    /// Last tick refreshed everything it attempted
    Healthy,
    /// Some subjects failed and are waiting for a retry
    PartialFailures { failed: usize, reason: String },
    /// No tick has completed yet
    Starting,
}

impl DegradedState {
    pub fn from_tick(summary: &TickSummary) -> Self {
        if summary.failures.is_empty() {
            return DegradedState::Healthy;
        }

        let mut kinds: Vec<&str> = summary.failures.iter().map(|f| f.kind.as_str()).collect();
        kinds.sort_unstable();
        kinds.dedup();

        DegradedState::PartialFailures {
            failed: summary.failures.len(),
            reason: format!("Failed refreshes: {}", kinds.join(", ")),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, DegradedState::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, DegradedState::PartialFailures { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            DegradedState::Healthy => "healthy",
            DegradedState::PartialFailures { .. } => "degraded",
            DegradedState::Starting => "starting",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentorboard_types::RefreshFailure;

    #[test]
    fn test_refresh_error_taxonomy() {
        let key = SubjectKey::student("s1");
        let not_found = RefreshError::SubjectNotFound { key: key.clone() };
        assert_eq!(not_found.kind(), "subject_not_found");
        assert!(!not_found.is_retryable());

        let source = RefreshError::from_source(
            &key,
            SourceError::Timeout {
                read: "submissions_for_students",
                timeout_ms: 500,
            },
        );
        assert_eq!(source.kind(), "source_unavailable");
        assert!(source.is_retryable());
        assert_eq!(source.key(), &key);
        assert!(source.to_string().contains("submissions_for_students"));
    }

    #[test]
    fn test_degraded_state_from_tick() {
        let mut summary = TickSummary::default();
        assert!(DegradedState::from_tick(&summary).is_healthy());

        for kind in ["source_unavailable", "source_unavailable", "computation_error"] {
            summary.failures.push(RefreshFailure {
                key: SubjectKey::director("d1"),
                kind: kind.to_string(),
                message: "boom".to_string(),
            });
        }

        let state = DegradedState::from_tick(&summary);
        assert!(state.is_degraded());
        assert_eq!(
            state,
            DegradedState::PartialFailures {
                failed: 3,
                reason: "Failed refreshes: computation_error, source_unavailable".to_string(),
            }
        );
    }
}
