mod aimd_rate_control;
mod bwe_defines;
mod packet_arrival_time_map;

pub use aimd_rate_control::*;
pub use bwe_defines::*;
pub use packet_arrival_time_map::*;
