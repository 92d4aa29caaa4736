pub mod api;
pub mod components;
pub mod goog_cc;
pub mod pacing;
pub mod remote_bitrate_estimator;
pub mod rtc;
pub mod statistics;

mod field_trials;

pub use field_trials::*;
