//! Statistics for relayed devices

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::frame::DeviceId;

/// Live per-device counters
///
/// Shared by the ingest task and the dispatcher of one device.
#[derive(Debug, Default)]
pub struct DeviceCounters {
    /// Frame events received from the bus
    pub frames_received: AtomicU64,
    /// Events dropped because they failed to decode or route
    pub frames_rejected: AtomicU64,
    /// Frames delivered to at least one viewer
    pub frames_dispatched: AtomicU64,
    /// Frames drained after every viewer failed
    pub frames_discarded: AtomicU64,
    /// Successful per-viewer writes
    pub writes: AtomicU64,
    /// Bytes written to viewers
    pub bytes_sent: AtomicU64,
    /// Viewers removed after a failed write
    pub viewers_pruned: AtomicU64,
}

impl DeviceCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Snapshot of one device's relay state
#[derive(Debug, Clone)]
pub struct DeviceStats {
    /// Device id
    pub device: DeviceId,
    /// Viewers currently attached
    pub viewers: usize,
    /// Frames waiting for the next dispatch tick
    pub buffered: usize,
    /// Buffer capacity
    pub buffer_capacity: usize,
    /// Frame events received from the bus
    pub frames_received: u64,
    /// Events dropped on decode or routing failure
    pub frames_rejected: u64,
    /// Frames evicted by drop-oldest backpressure
    pub frames_evicted: u64,
    /// Frames delivered to at least one viewer
    pub frames_dispatched: u64,
    /// Frames drained after every viewer failed
    pub frames_discarded: u64,
    /// Successful per-viewer writes
    pub writes: u64,
    /// Bytes written to viewers
    pub bytes_sent: u64,
    /// Viewers pruned after write failures
    pub viewers_pruned: u64,
    /// Time since the subscription started
    pub active_for: Duration,
}

impl DeviceStats {
    /// Average ingest rate since the subscription started
    pub fn ingest_fps(&self) -> f64 {
        let secs = self.active_for.as_secs_f64();
        if secs > 0.0 {
            self.frames_received as f64 / secs
        } else {
            0.0
        }
    }

    /// Average outbound bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.active_for.as_secs();
        if secs > 0 {
            (self.bytes_sent * 8) / secs
        } else {
            0
        }
    }
}

/// Relay-wide statistics
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    /// Devices with an active subscription
    pub active_devices: usize,
    /// Viewers attached across all devices
    pub active_viewers: usize,
    /// Frame events received across all devices
    pub frames_received: u64,
    /// Frames delivered across all devices
    pub frames_dispatched: u64,
    /// Bytes written to viewers across all devices
    pub bytes_sent: u64,
    /// Time since the relay was created
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(active_for: Duration) -> DeviceStats {
        DeviceStats {
            device: DeviceId::new("cam"),
            viewers: 0,
            buffered: 0,
            buffer_capacity: 10,
            frames_received: 0,
            frames_rejected: 0,
            frames_evicted: 0,
            frames_dispatched: 0,
            frames_discarded: 0,
            writes: 0,
            bytes_sent: 0,
            viewers_pruned: 0,
            active_for,
        }
    }

    #[test]
    fn test_counters_start_at_zero() {
        let counters = DeviceCounters::new();
        assert_eq!(DeviceCounters::get(&counters.frames_received), 0);
        assert_eq!(DeviceCounters::get(&counters.bytes_sent), 0);
    }

    #[test]
    fn test_counter_add() {
        let counters = DeviceCounters::new();
        DeviceCounters::add(&counters.writes, 3);
        DeviceCounters::add(&counters.writes, 2);
        assert_eq!(DeviceCounters::get(&counters.writes), 5);
    }

    #[test]
    fn test_ingest_fps() {
        let mut s = stats(Duration::from_secs(10));
        s.frames_received = 50;
        assert!((s.ingest_fps() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bitrate() {
        let mut s = stats(Duration::from_secs(10));
        s.bytes_sent = 1_000_000;

        // 1,000,000 bytes * 8 bits / 10 seconds
        assert_eq!(s.bitrate(), 800_000);
    }

    #[test]
    fn test_rates_with_zero_duration() {
        let mut s = stats(Duration::ZERO);
        s.frames_received = 10;
        s.bytes_sent = 10;

        assert_eq!(s.ingest_fps(), 0.0);
        assert_eq!(s.bitrate(), 0);
    }
}
