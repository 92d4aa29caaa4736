mod bitrate_prober;
mod error;
mod interval_budget;
mod pacing_controller;
mod packet_queue;
mod packet_to_send;

pub use bitrate_prober::*;
pub use error::*;
pub use interval_budget::*;
pub use pacing_controller::*;
pub use packet_queue::*;
pub use packet_to_send::*;
