//! # tipoff-core
//!
//! Core abstractions shared by the tipoff prediction orchestrator.
//!
//! This crate provides the foundational types used across all tipoff components:
//!
//! - **Identifiers**: Strongly-typed IDs for events, participants and lease owners
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialisation and standard spans
//!
//! ## Crate Boundary
//!
//! `tipoff-core` holds primitives only. Scheduling, leasing and generation
//! semantics live in `tipoff-flow`.
//!
//! ## Example
//!
//! ```rust
//! use tipoff_core::prelude::*;
//!
//! let event = EventId::new("nba-2024-11-02-lal-bos")?;
//! let owner = OwnerToken::generate();
//! assert_ne!(owner, OwnerToken::generate());
//! # Ok::<(), tipoff_core::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use tipoff_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{EventId, OwnerToken, ParticipantId};
}

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use id::{EventId, OwnerToken, ParticipantId};
pub use observability::{LogFormat, forecast_span, init_logging};
