mod bitrate_limiter;
mod bitrate_statistics;

pub use bitrate_limiter::*;
pub use bitrate_statistics::*;
