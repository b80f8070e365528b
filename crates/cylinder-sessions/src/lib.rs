//! # cylinder-sessions
//!
//! Data model and derived statistics for gas cylinder usage sessions.
//!
//! A session is a sequence of timestamped level switches. Time spent at a
//! level is the gap to the next switch (or to the end of the session), and
//! level `k` consumes `k` units per hour.
//!
//! ## Key Types
//!
//! - [`CylinderSession`] - A stored session and its [`UsageLog`] sequence
//! - [`SessionStats`] - Hours per level and weighted units, via [`compute_stats`]
//! - [`SessionPartition`] - Active session plus history, via [`partition`]

mod error;
pub mod stats;
pub mod types;
pub mod view;

pub use error::{InvalidReason, SessionError};
pub use stats::{compute_stats, SessionStats};
pub use types::{CylinderSession, HeatLevel, SessionDraft, SessionPatch, UsageLog};
pub use view::{partition, SessionPartition};
