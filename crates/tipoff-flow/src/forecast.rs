//! Forecast records.
//!
//! A [`ForecastRecord`] is created `pending` by the generation client, and
//! becomes `committed` only once the idempotency ledger accepts it. Only
//! committed records ever reach the persistence gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use tipoff_core::EventId;

use crate::context::ContextGap;
use crate::error::{Error, Result};

/// Predicted outcome: which side covers the spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeLabel {
    /// The home participant covers.
    Home,
    /// The away participant covers.
    Away,
}

impl OutcomeLabel {
    /// Returns the wire label.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Away => "away",
        }
    }
}

impl fmt::Display for OutcomeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

impl FromStr for OutcomeLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "home" => Ok(Self::Home),
            "away" => Ok(Self::Away),
            other => Err(Error::validation(format!(
                "pick must be \"home\" or \"away\", got {other:?}"
            ))),
        }
    }
}

/// Forecast record lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastStatus {
    /// Generated and validated, not yet accepted by the ledger.
    Pending,
    /// Accepted by the ledger. Permanent.
    Committed,
    /// Attempts exhausted.
    Failed,
}

impl ForecastStatus {
    /// Returns true if the transition to `target` is allowed.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Committed | Self::Failed)
        )
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ForecastStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A machine-derived forecast for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    /// The event. Unique key of committed records.
    pub event_id: EventId,
    /// Predicted outcome.
    pub outcome: OutcomeLabel,
    /// Confidence in [0, 1], after calibration.
    pub confidence: f64,
    /// Confidence as returned by the model.
    pub raw_confidence: f64,
    /// Model rationale.
    pub rationale: String,
    /// Model identifier.
    pub model_id: String,
    /// Snapshot version of the generation request.
    pub snapshot_version: u64,
    /// Attempt number that produced the record.
    pub attempt: u32,
    /// Unstructured context that was missing.
    #[serde(default)]
    pub context_gaps: Vec<ContextGap>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Lifecycle status.
    pub status: ForecastStatus,
}

impl ForecastRecord {
    /// Returns true if the record was produced with reduced context.
    #[must_use]
    pub fn is_reduced_context(&self) -> bool {
        !self.context_gaps.is_empty()
    }

    /// Transitions the record to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStateTransition`] if the transition is not allowed.
    pub fn transition_to(&mut self, target: ForecastStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: target.to_string(),
                reason: "forecast status only moves forward from pending".into(),
            });
        }
        self.status = target;
        Ok(())
    }

    /// Returns a committed copy of this record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStateTransition`] unless the record is pending.
    pub fn committed(&self) -> Result<Self> {
        let mut record = self.clone();
        record.transition_to(ForecastStatus::Committed)?;
        Ok(record)
    }
}
