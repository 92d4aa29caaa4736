mod alr_detector;
mod congestion_control_handler;
mod transport_statistician;

pub use alr_detector::*;
pub use congestion_control_handler::*;
pub use transport_statistician::*;
