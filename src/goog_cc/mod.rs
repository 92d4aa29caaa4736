mod acknowledged_bitrate_estimator;
mod link_capacity_estimator;
mod link_capacity_tracker;
mod loss_feedback_based_bwe;
mod loss_report_based_bwe;
mod probe_bitrate_estimator;
mod probe_controller;
mod throughput_estimator;

pub use acknowledged_bitrate_estimator::*;
pub use link_capacity_estimator::*;
pub use link_capacity_tracker::*;
pub use loss_feedback_based_bwe::*;
pub use loss_report_based_bwe::*;
pub use probe_bitrate_estimator::*;
pub use probe_controller::*;
pub use throughput_estimator::*;
