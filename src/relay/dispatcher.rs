//! Per-device fan-out
//!
//! Each active device runs one dispatcher task on a fixed tick, independent of
//! the ingest rate. A tick drains the device buffer and writes every frame, in
//! order, to every registered viewer. Sink writes are the only place the relay
//! waits on a viewer, and they are confined to this task.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::frame::DeviceId;
use crate::stats::DeviceCounters;

use super::buffer::DeviceBuffer;
use super::viewer::{ViewerId, ViewerRegistry};

/// Outcome of one dispatch tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Frames drained from the buffer
    pub frames: usize,
    /// Successful per-viewer writes
    pub writes: usize,
    /// Viewers removed after a failed write
    pub pruned: usize,
    /// Frames drained that no viewer received because every write failed
    pub discarded: usize,
}

/// Drains one device's buffer into its viewers
pub struct FanoutDispatcher {
    device: DeviceId,
    buffer: Arc<DeviceBuffer>,
    registry: Arc<ViewerRegistry>,
    counters: Arc<DeviceCounters>,
    interval: Duration,
    write_timeout: Duration,
}

impl FanoutDispatcher {
    /// Create a dispatcher for a device
    pub fn new(
        device: DeviceId,
        buffer: Arc<DeviceBuffer>,
        registry: Arc<ViewerRegistry>,
        counters: Arc<DeviceCounters>,
        interval: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            device,
            buffer,
            registry,
            counters,
            interval,
            write_timeout,
        }
    }

    /// Run one dispatch pass
    ///
    /// With no viewers attached the buffer is left alone, so a viewer that
    /// arrives later still gets the newest buffered frames. A viewer whose
    /// write fails is marked failed, unregistered at once and skipped for the
    /// rest of the tick; the others still get every frame.
    pub async fn tick(&self) -> TickReport {
        let mut sinks = self.registry.sinks(&self.device);
        if sinks.is_empty() {
            return TickReport::default();
        }

        let frames = self.buffer.drain_all();
        let mut report = TickReport {
            frames: frames.len(),
            ..Default::default()
        };

        for (idx, frame) in frames.iter().enumerate() {
            if sinks.is_empty() {
                // Every viewer failed earlier in this tick
                report.discarded += frames.len() - idx;
                break;
            }

            let mut failed: Vec<ViewerId> = Vec::new();

            for sink in &sinks {
                match sink.write_frame(frame, self.write_timeout).await {
                    Ok(()) => {
                        report.writes += 1;
                        DeviceCounters::add(&self.counters.bytes_sent, frame.len() as u64);
                    }
                    Err(e) => {
                        tracing::debug!(
                            device = %self.device,
                            viewer = %sink.id(),
                            error = %e,
                            "Viewer write failed, removing"
                        );
                        sink.mark_failed();
                        self.registry.remove(&self.device, sink.id());
                        failed.push(sink.id());
                    }
                }
            }

            if failed.len() < sinks.len() {
                DeviceCounters::add(&self.counters.frames_dispatched, 1);
            } else {
                report.discarded += 1;
            }

            if !failed.is_empty() {
                report.pruned += failed.len();
                sinks.retain(|s| !failed.contains(&s.id()));
            }
        }

        DeviceCounters::add(&self.counters.writes, report.writes as u64);
        DeviceCounters::add(&self.counters.viewers_pruned, report.pruned as u64);
        DeviceCounters::add(&self.counters.frames_discarded, report.discarded as u64);

        report
    }

    /// Tick until cancelled
    ///
    /// The first tick fires one interval after start. Missed ticks are
    /// skipped rather than bursted. A tick in progress when the token fires
    /// is allowed to finish.
    pub async fn run(self, shutdown: CancellationToken) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(
            device = %self.device,
            interval_ms = self.interval.as_millis() as u64,
            "Dispatcher started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report.pruned > 0 {
                        tracing::debug!(
                            device = %self.device,
                            frames = report.frames,
                            pruned = report.pruned,
                            viewers = self.registry.viewer_count(&self.device),
                            "Dispatch tick pruned viewers"
                        );
                    }
                }
            }
        }

        tracing::debug!(device = %self.device, "Dispatcher stopped");
    }
}
