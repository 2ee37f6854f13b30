//! Strongly-typed identifiers for tipoff entities.
//!
//! - [`EventId`] and [`ParticipantId`] wrap identifiers issued by the
//!   sports-data provider. They are opaque, non-empty and trimmed.
//! - [`OwnerToken`] identifies the scheduler instance holding a lease. It is
//!   a ULID, so tokens are globally unique and sort by creation time.
//!
//! # Example
//!
//! ```rust
//! use tipoff_core::id::{EventId, ParticipantId};
//!
//! let event: EventId = "game-1042".parse()?;
//! let team = ParticipantId::new("LAL")?;
//!
//! // IDs are different types - this won't compile:
//! // let wrong: EventId = team;
//! # let _ = (event, team);
//! # Ok::<(), tipoff_core::Error>(())
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// Longest provider identifier accepted.
const MAX_EXTERNAL_ID_LEN: usize = 128;

fn validate_external(kind: &str, raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_id(format!("{kind} ID must not be empty")));
    }
    if trimmed.len() > MAX_EXTERNAL_ID_LEN {
        return Err(Error::invalid_id(format!("{kind} ID exceeds {MAX_EXTERNAL_ID_LEN} bytes")));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(Error::invalid_id(format!(
            "{kind} ID '{}' contains control characters",
            trimmed.escape_debug()
        )));
    }
    Ok(trimmed.to_string())
}

/// A unique identifier for a scheduled sporting event.
///
/// The event ID is the idempotency key of the whole pipeline: at most one
/// committed forecast may exist per event ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId(String);

impl EventId {
    /// Creates a validated event ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if the ID is empty, too long, or contains
    /// control characters.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        validate_external("event", raw.as_ref()).map(Self)
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EventId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for EventId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<EventId> for String {
    fn from(value: EventId) -> Self {
        value.0
    }
}

/// A unique identifier for an event participant (a team).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Creates a validated participant ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if the ID is empty, too long, or contains
    /// control characters.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        validate_external("participant", raw.as_ref()).map(Self)
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ParticipantId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ParticipantId> for String {
    fn from(value: ParticipantId) -> Self {
        value.0
    }
}

/// Identifies the scheduler instance that holds a lease.
///
/// Uses ULID generation which is:
/// - Lexicographically sortable by creation time
/// - Globally unique without coordination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerToken(Ulid);

impl OwnerToken {
    /// Generates a new unique owner token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates an owner token from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the creation timestamp encoded in the token.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = i64::try_from(self.0.timestamp_ms()).unwrap_or(i64::MAX);
        chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OwnerToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::invalid_id(format!("invalid owner token '{s}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_is_trimmed() {
        let id = EventId::new("  game-7 ").unwrap();
        assert_eq!(id.as_str(), "game-7");
    }

    #[test]
    fn empty_ids_are_rejected() {
        assert!(EventId::new("   ").is_err());
        assert!(ParticipantId::new("").is_err());
    }

    #[test]
    fn control_characters_are_rejected() {
        let err = EventId::new("game\n7").unwrap_err();
        assert!(matches!(err, Error::InvalidId { .. }));
    }

    #[test]
    fn overlong_ids_are_rejected() {
        let raw = "x".repeat(MAX_EXTERNAL_ID_LEN + 1);
        assert!(EventId::new(raw).is_err());
    }

    #[test]
    fn event_id_serde_validates() {
        let id: EventId = serde_json::from_str("\"game-7\"").unwrap();
        assert_eq!(id.as_str(), "game-7");
        assert!(serde_json::from_str::<EventId>("\"\"").is_err());
    }

    #[test]
    fn owner_tokens_are_unique_and_parse() {
        let a = OwnerToken::generate();
        let b = OwnerToken::generate();
        assert_ne!(a, b);
        let parsed: OwnerToken = a.to_string().parse().unwrap();
        assert_eq!(a, parsed);
        assert!("not-a-valid-ulid".parse::<OwnerToken>().is_err());
    }
}
