/// Network structs and types shared by the estimators and the pacer.
pub mod transport;

/// Unit types, such as [DataSize](units::DataSize) and [DataRate](units::DataRate).
pub mod units;
