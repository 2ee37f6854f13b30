//! Error types for the forecast orchestration domain.
//!
//! Pipeline errors fall into the retry taxonomy exposed by
//! [`Error::failure_kind`]; infrastructure errors (configuration, state
//! machine violations) are surfaced as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use tipoff_core::EventId;

/// The result type used throughout tipoff-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in orchestration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A network call failed or exceeded its timeout.
    #[error("transient failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// Required structured data is not available yet.
    #[error("incomplete data for event {event_id}: missing {missing:?}")]
    IncompleteData {
        /// The event being assembled.
        event_id: EventId,
        /// The missing items (e.g. `home_stats`, `odds`).
        missing: Vec<String>,
    },

    /// Structured data was last refreshed too long before the event start.
    #[error(
        "stale data for event {event_id}: refreshed at {refreshed_at}, starts at {start_time}, bound {bound_secs}s"
    )]
    StaleData {
        /// The event being assembled.
        event_id: EventId,
        /// Oldest refresh timestamp among the required items.
        refreshed_at: DateTime<Utc>,
        /// The event start time.
        start_time: DateTime<Utc>,
        /// The configured freshness bound, in seconds.
        bound_secs: u64,
    },

    /// Generated output did not satisfy the response contract.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the violation.
        message: String,
    },

    /// The attempt budget for an event is exhausted.
    #[error("attempts exhausted for event {event_id} after {attempts} attempts")]
    Terminal {
        /// The dead-lettered event.
        event_id: EventId,
        /// Attempts consumed.
        attempts: u32,
    },

    /// An event is not known to the registry.
    #[error("event not found: {event_id}")]
    EventNotFound {
        /// The event ID that was looked up.
        event_id: EventId,
    },

    /// An invalid state transition was attempted.
    #[error("invalid state transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// Configuration is missing or malformed.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An error from tipoff-core.
    #[error("core error: {0}")]
    Core(#[from] tipoff_core::Error),
}

impl Error {
    /// Creates a new transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Classifies this error for the retry policy.
    #[must_use]
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Transient { .. } | Self::Storage { .. } => FailureKind::Transient,
            Self::IncompleteData { .. } | Self::StaleData { .. } => FailureKind::DataNotReady,
            Self::Validation { .. } | Self::Serialization { .. } => FailureKind::Validation,
            Self::EventNotFound { .. } => FailureKind::EventWithdrawn,
            Self::Terminal { .. }
            | Self::InvalidStateTransition { .. }
            | Self::Configuration { .. }
            | Self::Core(_) => FailureKind::Internal,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// Why a single pipeline attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network failure or timeout.
    Transient,
    /// Required structured data missing or stale.
    DataNotReady,
    /// Generated output violated the response contract.
    Validation,
    /// The lease went stale and was reclaimed.
    LeaseExpired,
    /// The event left `scheduled` before a forecast was committed.
    EventWithdrawn,
    /// Unexpected internal failure (including worker panics).
    Internal,
}

impl FailureKind {
    /// Returns true if this failure is charged to the data-readiness budget
    /// instead of the generation attempt budget.
    #[must_use]
    pub const fn is_data_readiness(self) -> bool {
        matches!(self, Self::DataNotReady)
    }

    /// Returns the metric/log label for this kind.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::DataNotReady => "data_not_ready",
            Self::Validation => "validation",
            Self::LeaseExpired => "lease_expired",
            Self::EventWithdrawn => "event_withdrawn",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    fn event() -> EventId {
        EventId::new("game-1").unwrap()
    }

    #[test]
    fn data_errors_are_data_readiness() {
        let incomplete = Error::IncompleteData {
            event_id: event(),
            missing: vec!["odds".into()],
        };
        assert_eq!(incomplete.failure_kind(), FailureKind::DataNotReady);
        assert!(incomplete.failure_kind().is_data_readiness());
        assert!(incomplete.to_string().contains("odds"));

        let stale = Error::StaleData {
            event_id: event(),
            refreshed_at: Utc::now(),
            start_time: Utc::now(),
            bound_secs: 86_400,
        };
        assert_eq!(stale.failure_kind(), FailureKind::DataNotReady);
    }

    #[test]
    fn generation_path_errors_consume_attempts() {
        assert_eq!(
            Error::transient("timeout").failure_kind(),
            FailureKind::Transient
        );
        assert_eq!(
            Error::storage("down").failure_kind(),
            FailureKind::Transient
        );
        assert_eq!(
            Error::validation("bad pick").failure_kind(),
            FailureKind::Validation
        );
        assert!(!FailureKind::Validation.is_data_readiness());
    }

    #[test]
    fn state_transition_error_display() {
        let err = Error::InvalidStateTransition {
            from: "committed".into(),
            to: "in_progress".into(),
            reason: "committed is permanent".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("committed"));
        assert!(msg.contains("in_progress"));
    }

    #[test]
    fn core_error_converts() {
        let core = tipoff_core::EventId::new("").unwrap_err();
        let err: Error = core.into();
        assert!(matches!(err, Error::Core(_)));
        assert_eq!(err.failure_kind(), FailureKind::Internal);
    }

    #[test]
    fn storage_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::Other, "io");
        let err = Error::storage_with_source("write failed", source);
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::DataNotReady).unwrap();
        assert_eq!(json, "\"data_not_ready\"");
    }
}
