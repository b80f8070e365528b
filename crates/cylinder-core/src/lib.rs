//! # cylinder-core
//!
//! Session lifecycle and live view for the cylinder tracker.
//!
//! [`LifecycleManager`] writes through a store and never patches local
//! state; [`ViewModel`] rebuilds the active/history partition from every
//! snapshot the store pushes. [`Tracker`] wires both from a
//! [`TrackerConfig`].

mod clock;
mod config;
mod error;
mod inflight;
mod lifecycle;
mod live;
mod tracker;
mod view_model;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LoggingConfig, TrackerConfig, ViewConfig, CONFIG_FILE_NAME};
pub use error::{CoreError, CoreResult};
pub use inflight::{InFlight, InFlightGuard, Operation};
pub use lifecycle::{LevelChange, LifecycleManager};
pub use live::live_stats;
pub use tracker::Tracker;
pub use view_model::{ViewCallback, ViewHandle, ViewModel, ViewState};
