//! Relay configuration

use std::time::Duration;

use crate::bus::Topics;

use super::snapshot::SnapshotConfig;

/// Default per-device buffer capacity in frames
pub const DEFAULT_BUFFER_CAPACITY: usize = 10;

/// Default dispatch tick
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_millis(100);

// tokio intervals panic on a zero period
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Frames buffered per device before the oldest is evicted
    pub buffer_capacity: usize,

    /// How often each device's dispatcher drains its buffer
    pub dispatch_interval: Duration,

    /// Upper bound on one frame write (write + flush) to one viewer
    pub write_timeout: Duration,

    /// How long a device may have zero viewers before it is torn down
    pub idle_device_timeout: Duration,

    /// How often the idle reaper runs
    pub cleanup_interval: Duration,

    /// How long shutdown waits for device tasks before aborting them
    pub shutdown_timeout: Duration,

    /// Send a stop command to devices torn down for being idle
    pub stop_idle_devices: bool,

    /// Bus topic naming
    pub topics: Topics,

    /// Debug frame sampling to disk (disabled when `None`)
    pub snapshot: Option<SnapshotConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
            write_timeout: Duration::from_secs(5),
            idle_device_timeout: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            stop_idle_devices: true,
            topics: Topics::default(),
            snapshot: None,
        }
    }
}

impl RelayConfig {
    /// Set the per-device buffer capacity (at least 1)
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }

    /// Set the dispatch tick
    pub fn dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Set the per-write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the idle device timeout
    pub fn idle_device_timeout(mut self, timeout: Duration) -> Self {
        self.idle_device_timeout = timeout;
        self
    }

    /// Set the reaper interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Set the shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Whether to send stop commands to reaped devices
    pub fn stop_idle_devices(mut self, enabled: bool) -> Self {
        self.stop_idle_devices = enabled;
        self
    }

    /// Set topic naming
    pub fn topics(mut self, topics: Topics) -> Self {
        self.topics = topics;
        self
    }

    /// Enable debug frame sampling
    pub fn snapshot(mut self, snapshot: SnapshotConfig) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}
