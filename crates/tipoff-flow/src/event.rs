//! Scheduled events and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use tipoff_core::{EventId, ParticipantId};

/// Event lifecycle status as reported by the schedule provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Not yet started; start time may still move.
    Scheduled,
    /// In play. The event is immutable from here on.
    Started,
    /// Finished.
    Completed,
    /// Called off.
    Canceled,
}

impl EventStatus {
    /// Returns true if no further status changes are possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }

    /// Returns true if the transition to `target` is allowed.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Scheduled => matches!(target, Self::Started | Self::Completed | Self::Canceled),
            Self::Started => matches!(target, Self::Completed | Self::Canceled),
            Self::Completed | Self::Canceled => false,
        }
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// One side of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Provider identifier.
    pub id: ParticipantId,
    /// Display name used in prompts.
    pub name: String,
}

impl Participant {
    /// Creates a participant.
    #[must_use]
    pub fn new(id: ParticipantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A scheduled occurrence requiring a forecast before it starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: EventId,
    /// Scheduled start (UTC).
    pub start_time: DateTime<Utc>,
    /// Home participant.
    pub home: Participant,
    /// Away participant.
    pub away: Participant,
    /// Current status.
    pub status: EventStatus,
}

impl Event {
    /// Creates a new event in `scheduled` status.
    #[must_use]
    pub fn scheduled(
        id: EventId,
        start_time: DateTime<Utc>,
        home: Participant,
        away: Participant,
    ) -> Self {
        Self {
            id,
            start_time,
            home,
            away,
            status: EventStatus::Scheduled,
        }
    }

    /// Returns true if the event is still `scheduled`.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.status == EventStatus::Scheduled
    }

    /// Returns true once `as_of` has reached the scheduled start.
    #[must_use]
    pub fn has_started_by(&self, as_of: DateTime<Utc>) -> bool {
        as_of >= self.start_time
    }

    /// Returns true if generation should have been triggered by `as_of`.
    ///
    /// An event is due when `start_time - lead_time <= as_of`.
    #[must_use]
    pub fn is_due(&self, as_of: DateTime<Utc>, lead_time: Duration) -> bool {
        self.start_time
            .checked_sub_signed(crate::signed(lead_time))
            .is_none_or(|trigger_at| trigger_at <= as_of)
    }
}
