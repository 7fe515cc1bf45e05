pub mod config;
pub mod metrics;
pub mod plate_detection;
pub mod session;
