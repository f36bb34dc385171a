//! Relay statistics

pub mod metrics;

pub use metrics::{DeviceCounters, DeviceStats, RelayStats};
