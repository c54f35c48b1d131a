//! Utility Module
//!
//! - [`time`]: wall-clock frame timer
//! - [`observable`]: ordered observer lists used for frame notifications

pub mod observable;
pub mod time;

pub use observable::{Observable, ObserverId};
pub use time::Timer;
