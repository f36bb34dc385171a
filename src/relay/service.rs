//! Camera relay service
//!
//! Ties the viewer registry, the per-device subscriptions and the command
//! publisher together behind the calls the web layer makes.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;

use crate::bus::{MessageBus, StreamCommandPublisher};
use crate::frame::DeviceId;
use crate::stats::{DeviceStats, RelayStats};

use super::config::RelayConfig;
use super::error::RelayError;
use super::subscription::{EnsureOutcome, SubscriptionManager};
use super::viewer::{ViewerId, ViewerRegistry, ViewerSink};

/// Live camera frame relay
pub struct CameraRelay<B> {
    bus: Arc<B>,
    config: RelayConfig,
    registry: Arc<ViewerRegistry>,
    subscriptions: SubscriptionManager<B>,
    commands: StreamCommandPublisher<B>,
    started_at: Instant,
}

impl<B: MessageBus> CameraRelay<B> {
    /// Create a relay that owns its bus handle
    pub fn new(bus: B, config: RelayConfig) -> Arc<Self> {
        Self::with_shared_bus(Arc::new(bus), config)
    }

    /// Create a relay on a bus shared with other components
    pub fn with_shared_bus(bus: Arc<B>, config: RelayConfig) -> Arc<Self> {
        let registry = Arc::new(ViewerRegistry::new());
        let subscriptions =
            SubscriptionManager::new(Arc::clone(&bus), Arc::clone(&registry), config.clone());
        let commands = StreamCommandPublisher::new(Arc::clone(&bus), config.topics.clone());

        Arc::new(Self {
            bus,
            config,
            registry,
            subscriptions,
            commands,
            started_at: Instant::now(),
        })
    }

    /// The bus this relay talks to
    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }

    /// Relay configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Register a viewer for a device's live stream
    ///
    /// The first viewer of a device starts its bus subscription. If that
    /// fails the viewer is unregistered again and the error returned. The
    /// caller keeps owning the connection behind the sink.
    pub async fn subscribe(
        &self,
        device: &DeviceId,
        sink: Arc<ViewerSink>,
    ) -> Result<ViewerId, RelayError> {
        if self.subscriptions.is_shutting_down() {
            return Err(RelayError::ShuttingDown);
        }

        let viewer = sink.id();
        self.registry.add(device, sink)?;

        match self.subscriptions.ensure(device).await {
            Ok(EnsureOutcome::Started) => {
                tracing::debug!(device = %device, viewer = %viewer, "First viewer started device");
            }
            Ok(EnsureOutcome::AlreadyActive) => {}
            Err(e) => {
                self.registry.remove(device, viewer);
                return Err(e);
            }
        }

        Ok(viewer)
    }

    /// Unregister a viewer
    ///
    /// The device keeps streaming until the idle reaper notices it has no
    /// viewers left.
    pub fn unsubscribe(&self, device: &DeviceId, viewer: ViewerId) -> bool {
        self.registry.remove(device, viewer)
    }

    /// Ask a device to start pushing frames
    pub async fn start_stream(
        &self,
        device: &DeviceId,
        fps: Option<u32>,
        quality: Option<u32>,
    ) -> Result<(), RelayError> {
        self.commands.start(device, fps, quality).await
    }

    /// Ask a device to stop pushing frames
    pub async fn stop_stream(&self, device: &DeviceId) -> Result<(), RelayError> {
        self.commands.stop(device).await
    }

    /// Number of viewers attached to a device
    pub fn viewer_count(&self, device: &DeviceId) -> usize {
        self.registry.viewer_count(device)
    }

    /// Whether a device has a running subscription
    pub fn is_active(&self, device: &DeviceId) -> bool {
        self.subscriptions.is_active(device)
    }

    /// Stats for one device
    pub fn device_stats(&self, device: &DeviceId) -> Option<DeviceStats> {
        self.subscriptions.device_stats(device)
    }

    /// Relay-wide stats
    pub fn stats(&self) -> RelayStats {
        let devices = self.subscriptions.all_stats();

        RelayStats {
            active_devices: self.subscriptions.active_devices().len(),
            active_viewers: self.registry.total_viewers(),
            frames_received: devices.iter().map(|d| d.frames_received).sum(),
            frames_dispatched: devices.iter().map(|d| d.frames_dispatched).sum(),
            bytes_sent: devices.iter().map(|d| d.bytes_sent).sum(),
            uptime: self.started_at.elapsed(),
        }
    }

    /// Tear down idle devices and restart devices that lost their subscription
    ///
    /// Returns the devices that were reaped.
    pub async fn cleanup(&self) -> Vec<DeviceId> {
        if self.subscriptions.is_shutting_down() {
            return Vec::new();
        }

        let reaped = self
            .subscriptions
            .reap_idle(self.config.idle_device_timeout);

        for device in &reaped {
            tracing::info!(
                device = %device,
                idle_secs = self.config.idle_device_timeout.as_secs(),
                "Reaped idle camera"
            );
            if self.config.stop_idle_devices {
                // Failure is already logged by the publisher
                let _ = self.commands.stop(device).await;
            }
        }

        // Viewers left without a subscription, e.g. after a failed first
        // subscribe or a bus-side close
        for device in self.registry.watched_devices() {
            if self.subscriptions.is_active(&device) {
                continue;
            }
            match self.subscriptions.ensure(&device).await {
                Ok(EnsureOutcome::Started) => {
                    tracing::info!(device = %device, "Restored camera subscription for waiting viewers");
                }
                Ok(EnsureOutcome::AlreadyActive) => {}
                Err(e) => {
                    tracing::warn!(device = %device, error = %e, "Failed to restore camera subscription");
                }
            }
        }

        if !reaped.is_empty() {
            tracing::debug!(
                reaped = reaped.len(),
                active = self.subscriptions.active_devices().len(),
                "Cleanup pass finished"
            );
        }

        reaped
    }

    /// Run [`cleanup`](Self::cleanup) every `cleanup_interval` until shutdown
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> JoinHandle<()> {
        let relay = Arc::clone(self);
        let interval = relay.config.cleanup_interval;
        let shutdown = relay.subscriptions.shutdown_token();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        relay.cleanup().await;
                    }
                }
            }
        })
    }

    /// Stop every device and drop every viewer registration
    ///
    /// Sinks are released, not closed; their connections belong to the
    /// caller. Later `subscribe` calls fail with `ShuttingDown`.
    pub async fn shutdown(&self) {
        self.subscriptions.shutdown().await;
        let viewers = self.registry.clear();

        tracing::info!(
            viewers = viewers,
            uptime_secs = self.started_at.elapsed().as_secs(),
            "Camera relay shut down"
        );
    }
}
