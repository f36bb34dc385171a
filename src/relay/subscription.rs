//! Lazy per-device bus subscriptions
//!
//! The first viewer of a device claims the device in the handle map with an
//! atomic insert-if-absent. Only that caller subscribes to the frame topic and
//! spawns the device's ingest task and dispatcher; everyone racing with it
//! returns straight away. This keeps exactly one subscription, and so exactly
//! one copy of every frame, per device.
//!
//! ```text
//!   ensure(dev) ──► handles.entry(dev)
//!                     ├─ occupied ──► AlreadyActive
//!                     └─ vacant ──► claim ──► bus.subscribe("camera:frames:dev")
//!                                               ├─ ok ──► spawn ingest + dispatcher
//!                                               └─ err ─► release claim
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusError, BusMessage, BusSubscription, MessageBus, Topics};
use crate::frame::{DeviceId, FrameEncoder};
use crate::stats::{DeviceCounters, DeviceStats};

use super::buffer::DeviceBuffer;
use super::config::RelayConfig;
use super::dispatcher::FanoutDispatcher;
use super::error::RelayError;
use super::snapshot::FrameSampler;
use super::viewer::ViewerRegistry;

/// Result of [`SubscriptionManager::ensure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// This call subscribed and started the device's tasks
    Started,
    /// The device was already claimed by an earlier or concurrent call
    AlreadyActive,
}

struct DeviceTasks {
    cancel: CancellationToken,
    ingest: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl DeviceTasks {
    fn abort(&self) {
        self.cancel.cancel();
        self.ingest.abort();
        self.dispatcher.abort();
    }
}

struct SubscriptionHandle {
    buffer: Arc<DeviceBuffer>,
    counters: Arc<DeviceCounters>,
    started_at: Instant,
    /// `None` while the claiming call is still subscribing
    tasks: Option<DeviceTasks>,
}

type HandleMap = Arc<Mutex<HashMap<DeviceId, SubscriptionHandle>>>;

/// Owns the bus subscription and tasks of every active device
pub struct SubscriptionManager<B> {
    bus: Arc<B>,
    registry: Arc<ViewerRegistry>,
    config: RelayConfig,
    handles: HandleMap,
    shutdown: CancellationToken,
}

impl<B: MessageBus> SubscriptionManager<B> {
    /// Create a manager feeding the given registry's viewers
    pub fn new(bus: Arc<B>, registry: Arc<ViewerRegistry>, config: RelayConfig) -> Self {
        Self {
            bus,
            registry,
            config,
            handles: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Make sure the device has a live subscription and dispatcher
    ///
    /// Safe to call concurrently; exactly one caller per device gets
    /// `Started`. If subscribing fails the claim is released so a later call
    /// can retry.
    pub async fn ensure(&self, device: &DeviceId) -> Result<EnsureOutcome, RelayError> {
        let (buffer, counters) = {
            let mut handles = self.handles.lock();
            // Checked under the lock: shutdown cancels before draining the
            // map, so no claim can be left behind after the drain
            if self.shutdown.is_cancelled() {
                return Err(RelayError::ShuttingDown);
            }
            match handles.entry(device.clone()) {
                Entry::Occupied(_) => return Ok(EnsureOutcome::AlreadyActive),
                Entry::Vacant(slot) => {
                    let handle = SubscriptionHandle {
                        buffer: Arc::new(DeviceBuffer::new(self.config.buffer_capacity)),
                        counters: Arc::new(DeviceCounters::new()),
                        started_at: Instant::now(),
                        tasks: None,
                    };
                    let pair = (Arc::clone(&handle.buffer), Arc::clone(&handle.counters));
                    slot.insert(handle);
                    pair
                }
            }
        };

        let topic = self.config.topics.frame_topic(device);
        let subscription = match self.bus.subscribe(&topic).await {
            Ok(subscription) => subscription,
            Err(source) => {
                self.release_claim(device, &buffer);
                tracing::warn!(
                    device = %device,
                    topic = %topic,
                    error = %source,
                    "Failed to subscribe to camera frames"
                );
                return Err(RelayError::Subscribe {
                    device: device.clone(),
                    source,
                });
            }
        };

        let tasks = self.spawn_tasks(device, subscription, &buffer, &counters);
        self.install_tasks(device, &buffer, tasks)?;

        tracing::info!(
            device = %device,
            topic = %topic,
            "Started camera frame subscription"
        );

        Ok(EnsureOutcome::Started)
    }

    /// Attach freshly spawned tasks to the claim they were spawned for
    ///
    /// The claim may be gone by now: taken by shutdown, by `teardown`, or by
    /// the ingest task itself when the bus closed the subscription at once.
    fn install_tasks(
        &self,
        device: &DeviceId,
        buffer: &Arc<DeviceBuffer>,
        tasks: DeviceTasks,
    ) -> Result<(), RelayError> {
        let orphaned = {
            let mut handles = self.handles.lock();
            match handles.get_mut(device) {
                Some(handle) if Arc::ptr_eq(&handle.buffer, buffer) => {
                    handle.tasks = Some(tasks);
                    None
                }
                _ => Some(tasks),
            }
        };

        let Some(tasks) = orphaned else {
            return Ok(());
        };
        tasks.abort();

        if self.shutdown.is_cancelled() {
            return Err(RelayError::ShuttingDown);
        }
        tracing::warn!(
            device = %device,
            "Frame subscription released before it was installed"
        );
        Err(RelayError::Subscribe {
            device: device.clone(),
            source: BusError::Closed,
        })
    }

    fn spawn_tasks(
        &self,
        device: &DeviceId,
        subscription: BusSubscription,
        buffer: &Arc<DeviceBuffer>,
        counters: &Arc<DeviceCounters>,
    ) -> DeviceTasks {
        let cancel = self.shutdown.child_token();

        let ingest = FrameIngest {
            device: device.clone(),
            topics: self.config.topics.clone(),
            buffer: Arc::clone(buffer),
            counters: Arc::clone(counters),
            handles: Arc::clone(&self.handles),
            sampler: self
                .config
                .snapshot
                .as_ref()
                .map(|snapshot| FrameSampler::new(snapshot, device, cancel.clone())),
        };

        let dispatcher = FanoutDispatcher::new(
            device.clone(),
            Arc::clone(buffer),
            Arc::clone(&self.registry),
            Arc::clone(counters),
            self.config.dispatch_interval,
            self.config.write_timeout,
        );

        DeviceTasks {
            ingest: tokio::spawn(ingest.run(subscription, cancel.clone())),
            dispatcher: tokio::spawn(dispatcher.run(cancel.clone())),
            cancel,
        }
    }

    fn release_claim(&self, device: &DeviceId, buffer: &Arc<DeviceBuffer>) {
        let mut handles = self.handles.lock();
        if handles
            .get(device)
            .is_some_and(|h| Arc::ptr_eq(&h.buffer, buffer))
        {
            handles.remove(device);
        }
    }

    /// Whether the device has a running subscription
    pub fn is_active(&self, device: &DeviceId) -> bool {
        self.handles
            .lock()
            .get(device)
            .is_some_and(|h| h.tasks.is_some())
    }

    /// Devices with a running subscription
    pub fn active_devices(&self) -> Vec<DeviceId> {
        self.handles
            .lock()
            .iter()
            .filter(|(_, h)| h.tasks.is_some())
            .map(|(device, _)| device.clone())
            .collect()
    }

    /// Stop a device's tasks and drop its subscription
    pub fn teardown(&self, device: &DeviceId) -> bool {
        let handle = self.handles.lock().remove(device);
        match handle {
            Some(handle) => {
                if let Some(tasks) = handle.tasks {
                    tasks.abort();
                }
                tracing::info!(device = %device, "Camera frame subscription torn down");
                true
            }
            None => false,
        }
    }

    /// Tear down every running device whose viewers have been gone for `idle_for`
    ///
    /// Viewer-set removal and subscription removal happen under the handle
    /// lock, so a concurrent `ensure` sees either the old subscription (and a
    /// viewer that keeps it alive) or none at all.
    pub fn reap_idle(&self, idle_for: Duration) -> Vec<DeviceId> {
        let mut handles = self.handles.lock();

        let idle: Vec<DeviceId> = handles
            .iter()
            .filter(|(_, h)| h.tasks.is_some())
            .map(|(device, _)| device.clone())
            .filter(|device| self.registry.remove_if_idle(device, idle_for))
            .collect();

        for device in &idle {
            if let Some(tasks) = handles.remove(device).and_then(|h| h.tasks) {
                tasks.abort();
            }
        }

        idle
    }

    /// Stats for one device, if it has a subscription
    pub fn device_stats(&self, device: &DeviceId) -> Option<DeviceStats> {
        let handles = self.handles.lock();
        let handle = handles.get(device)?;
        Some(self.stats_for(device, handle))
    }

    /// Stats for every device with a subscription
    pub fn all_stats(&self) -> Vec<DeviceStats> {
        self.handles
            .lock()
            .iter()
            .map(|(device, handle)| self.stats_for(device, handle))
            .collect()
    }

    fn stats_for(&self, device: &DeviceId, handle: &SubscriptionHandle) -> DeviceStats {
        let c = &handle.counters;
        DeviceStats {
            device: device.clone(),
            viewers: self.registry.viewer_count(device),
            buffered: handle.buffer.len(),
            buffer_capacity: handle.buffer.capacity(),
            frames_received: DeviceCounters::get(&c.frames_received),
            frames_rejected: DeviceCounters::get(&c.frames_rejected),
            frames_evicted: handle.buffer.evicted_count(),
            frames_dispatched: DeviceCounters::get(&c.frames_dispatched),
            frames_discarded: DeviceCounters::get(&c.frames_discarded),
            writes: DeviceCounters::get(&c.writes),
            bytes_sent: DeviceCounters::get(&c.bytes_sent),
            viewers_pruned: DeviceCounters::get(&c.viewers_pruned),
            active_for: handle.started_at.elapsed(),
        }
    }

    /// Token cancelled when the manager shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Whether shutdown has started
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop every device task and release every subscription
    ///
    /// In-flight writes may finish; tasks still running after the configured
    /// shutdown timeout are aborted.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handles: Vec<(DeviceId, SubscriptionHandle)> = self.handles.lock().drain().collect();
        let count = handles.len();
        let mut tasks: Vec<DeviceTasks> = handles.into_iter().filter_map(|(_, h)| h.tasks).collect();

        let wait = async {
            for t in tasks.iter_mut() {
                let _ = (&mut t.ingest).await;
                let _ = (&mut t.dispatcher).await;
            }
        };

        if tokio::time::timeout(self.config.shutdown_timeout, wait)
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                "Device tasks did not stop in time, aborting"
            );
            for t in &tasks {
                t.abort();
            }
        }

        tracing::info!(devices = count, "Camera subscriptions shut down");
    }
}

/// Per-device ingest: bus message → frame → buffer
struct FrameIngest {
    device: DeviceId,
    topics: Topics,
    buffer: Arc<DeviceBuffer>,
    counters: Arc<DeviceCounters>,
    handles: HandleMap,
    sampler: Option<FrameSampler>,
}

impl FrameIngest {
    async fn run(self, mut subscription: BusSubscription, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = subscription.recv() => match msg {
                    Some(msg) => {
                        self.handle(&msg);
                    }
                    None => {
                        tracing::warn!(
                            device = %self.device,
                            topic = subscription.topic(),
                            "Frame subscription closed by bus"
                        );
                        self.release();
                        break;
                    }
                },
            }
        }
    }

    /// Route one bus message into a device buffer
    ///
    /// Bad input is logged and dropped; returns whether a frame was buffered.
    fn handle(&self, msg: &BusMessage) -> bool {
        DeviceCounters::add(&self.counters.frames_received, 1);

        let Some(device) = self.topics.parse_frame_topic(&msg.topic) else {
            self.reject();
            tracing::warn!(
                device = %self.device,
                topic = %msg.topic,
                "Dropping frame with malformed topic"
            );
            return false;
        };

        let payload = match msg.payload_str() {
            Ok(payload) => payload,
            Err(e) => {
                self.reject();
                tracing::warn!(device = %device, error = %e, "Dropping non-text frame payload");
                return false;
            }
        };

        let frame = match FrameEncoder::decode(&device, payload) {
            Ok(frame) => frame,
            Err(e) => {
                self.reject();
                tracing::warn!(device = %device, error = %e, "Dropping undecodable frame");
                return false;
            }
        };

        let buffer = if device == self.device {
            if let Some(sampler) = &self.sampler {
                sampler.observe(&frame);
            }
            Arc::clone(&self.buffer)
        } else {
            let routed = self
                .handles
                .lock()
                .get(&device)
                .map(|h| Arc::clone(&h.buffer));
            match routed {
                Some(buffer) => buffer,
                None => {
                    self.reject();
                    tracing::warn!(
                        device = %device,
                        topic = %msg.topic,
                        "Dropping frame for unknown device"
                    );
                    return false;
                }
            }
        };

        if buffer.offer(frame) {
            tracing::trace!(device = %device, "Buffer full, evicted oldest frame");
        }
        true
    }

    fn reject(&self) {
        DeviceCounters::add(&self.counters.frames_rejected, 1);
    }

    /// Drop our handle so the next viewer (or the reaper) subscribes again
    fn release(&self) {
        let mut handles = self.handles.lock();
        let ours = handles
            .get(&self.device)
            .is_some_and(|h| Arc::ptr_eq(&h.buffer, &self.buffer));
        if ours {
            if let Some(tasks) = handles.remove(&self.device).and_then(|h| h.tasks) {
                tasks.cancel.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use bytes::Bytes;

    use super::*;
    use crate::bus::MemoryBus;
    use crate::relay::testing::{wait_for, StalledWriter, TestBus};
    use crate::relay::viewer::ViewerSink;

    fn manager(bus: &TestBus, config: RelayConfig) -> Arc<SubscriptionManager<TestBus>> {
        Arc::new(SubscriptionManager::new(
            Arc::new(bus.clone()),
            Arc::new(ViewerRegistry::new()),
            config,
        ))
    }

    fn quiet_config() -> RelayConfig {
        // Dispatcher never ticks during these tests
        RelayConfig::default().dispatch_interval(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_concurrent_ensure_subscribes_once() {
        let bus = TestBus::new();
        let mgr = manager(&bus, quiet_config());
        let device = DeviceId::new("race");

        let calls: Vec<_> = (0..16)
            .map(|_| {
                let mgr = Arc::clone(&mgr);
                let device = device.clone();
                tokio::spawn(async move { mgr.ensure(&device).await })
            })
            .collect();

        let mut started = 0;
        let mut already = 0;
        for call in calls {
            match call.await.unwrap().unwrap() {
                EnsureOutcome::Started => started += 1,
                EnsureOutcome::AlreadyActive => already += 1,
            }
        }

        assert_eq!(started, 1);
        assert_eq!(already, 15);
        assert_eq!(bus.subscribe_calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.inner.subscriber_count("camera:frames:race"), 1);
        assert_eq!(mgr.active_devices(), vec![device]);
    }

    #[tokio::test]
    async fn test_second_ensure_is_noop() {
        let bus = TestBus::new();
        let mgr = manager(&bus, quiet_config());
        let device = DeviceId::new("d");

        assert_eq!(mgr.ensure(&device).await.unwrap(), EnsureOutcome::Started);
        assert_eq!(
            mgr.ensure(&device).await.unwrap(),
            EnsureOutcome::AlreadyActive
        );
        assert_eq!(bus.subscribe_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bad_frame_does_not_stop_ingest() {
        let bus = TestBus::new();
        let mgr = manager(&bus, quiet_config());
        let device = DeviceId::new("cam");
        mgr.ensure(&device).await.unwrap();

        bus.inner
            .publish("camera:frames:cam", Bytes::from_static(b"%%% not base64"))
            .await
            .unwrap();
        bus.inner
            .publish("camera:frames:cam", Bytes::from_static(&[0xFF, 0x00]))
            .await
            .unwrap();
        bus.inner
            .publish("camera:frames:cam", Bytes::from_static(b"AAAA"))
            .await
            .unwrap();

        assert!(
            wait_for(|| mgr
                .device_stats(&device)
                .is_some_and(|s| s.frames_received == 3))
            .await
        );

        let stats = mgr.device_stats(&device).unwrap();
        assert_eq!(stats.frames_rejected, 2);
        assert_eq!(stats.buffered, 1);
        assert!(mgr.is_active(&device));
    }

    #[tokio::test]
    async fn test_ingest_routes_by_topic() {
        let bus = TestBus::new();
        let mgr = manager(&bus, quiet_config());
        let a = DeviceId::new("a");
        let b = DeviceId::new("b");
        mgr.ensure(&a).await.unwrap();
        mgr.ensure(&b).await.unwrap();

        let (buffer_a, buffer_b, counters_a) = {
            let handles = mgr.handles.lock();
            (
                Arc::clone(&handles[&a].buffer),
                Arc::clone(&handles[&b].buffer),
                Arc::clone(&handles[&a].counters),
            )
        };
        let ingest = FrameIngest {
            device: a.clone(),
            topics: Topics::default(),
            buffer: Arc::clone(&buffer_a),
            counters: Arc::clone(&counters_a),
            handles: Arc::clone(&mgr.handles),
            sampler: None,
        };

        assert!(ingest.handle(&BusMessage::new("camera:frames:a", "AAAA")));
        assert!(ingest.handle(&BusMessage::new("camera:frames:b", "BBBB")));
        assert!(!ingest.handle(&BusMessage::new("camera:frames:zzz", "CCCC")));
        assert!(!ingest.handle(&BusMessage::new("other:topic", "CCCC")));

        assert_eq!(buffer_a.len(), 1);
        assert_eq!(buffer_b.len(), 1);
        assert_eq!(DeviceCounters::get(&counters_a.frames_rejected), 2);
    }

    #[tokio::test]
    async fn test_failed_subscribe_releases_claim() {
        let bus = TestBus::new();
        bus.fail_subscribe.store(true, Ordering::SeqCst);
        let mgr = manager(&bus, quiet_config());
        let device = DeviceId::new("flaky");

        let err = mgr.ensure(&device).await.unwrap_err();
        assert!(matches!(err, RelayError::Subscribe { .. }));
        assert!(!mgr.is_active(&device));

        bus.fail_subscribe.store(false, Ordering::SeqCst);
        assert_eq!(mgr.ensure(&device).await.unwrap(), EnsureOutcome::Started);
    }

    #[tokio::test]
    async fn test_reap_idle_device_without_viewers() {
        let bus = TestBus::new();
        let mgr = manager(&bus, quiet_config());
        let device = DeviceId::new("idle");
        mgr.ensure(&device).await.unwrap();

        assert_eq!(mgr.reap_idle(Duration::ZERO), vec![device.clone()]);
        assert!(!mgr.is_active(&device));

        // Subscription is dropped once the aborted ingest task is gone
        assert!(wait_for(|| bus.inner.subscriber_count("camera:frames:idle") == 0).await);

        assert_eq!(mgr.ensure(&device).await.unwrap(), EnsureOutcome::Started);
    }

    #[tokio::test]
    async fn test_teardown() {
        let bus = TestBus::new();
        let mgr = manager(&bus, quiet_config());
        let device = DeviceId::new("t");
        mgr.ensure(&device).await.unwrap();

        assert!(mgr.teardown(&device));
        assert!(!mgr.teardown(&device));
        assert!(mgr.device_stats(&device).is_none());
        assert!(wait_for(|| bus.inner.subscriber_count("camera:frames:t") == 0).await);
    }

    #[tokio::test]
    async fn test_bus_closing_subscription_releases_device() {
        let bus = TestBus::new();
        let mgr = manager(&bus, quiet_config());
        let device = DeviceId::new("gone");
        mgr.ensure(&device).await.unwrap();

        bus.inner.close();

        assert!(wait_for(|| !mgr.is_active(&device)).await);
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let bus = TestBus::new();
        let mgr = manager(&bus, quiet_config().shutdown_timeout(Duration::from_secs(1)));
        mgr.ensure(&DeviceId::new("x")).await.unwrap();
        mgr.ensure(&DeviceId::new("y")).await.unwrap();

        mgr.shutdown().await;

        assert!(mgr.active_devices().is_empty());
        assert!(mgr.is_shutting_down());
        assert!(matches!(
            mgr.ensure(&DeviceId::new("z")).await,
            Err(RelayError::ShuttingDown)
        ));
        assert_eq!(bus.inner.subscriber_count("camera:frames:x"), 0);
        assert_eq!(bus.inner.subscriber_count("camera:frames:y"), 0);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_stuck_dispatcher() {
        let bus = TestBus::new();
        let registry = Arc::new(ViewerRegistry::new());
        let mgr = SubscriptionManager::new(
            Arc::new(bus.clone()),
            Arc::clone(&registry),
            RelayConfig::default()
                .dispatch_interval(Duration::from_millis(10))
                .write_timeout(Duration::from_secs(3600))
                .shutdown_timeout(Duration::from_millis(100)),
        );
        let device = DeviceId::new("stuck");
        let sink = ViewerSink::new(StalledWriter);
        registry.add(&device, Arc::clone(&sink)).unwrap();
        mgr.ensure(&device).await.unwrap();

        bus.inner
            .publish("camera:frames:stuck", Bytes::from_static(b"AAAA"))
            .await
            .unwrap();

        // Frame drained and the dispatcher is blocked writing it
        assert!(
            wait_for(|| mgr
                .device_stats(&device)
                .is_some_and(|s| s.frames_received == 1 && s.buffered == 0))
            .await
        );
        assert_eq!(Arc::strong_count(&sink), 3);

        let started = Instant::now();
        tokio::time::timeout(Duration::from_secs(2), mgr.shutdown())
            .await
            .expect("shutdown returns within its timeout");
        assert!(started.elapsed() < Duration::from_secs(1));

        // The aborted dispatcher drops its handle on the sink
        assert!(wait_for(|| Arc::strong_count(&sink) == 2).await);
        assert_eq!(sink.frames_written(), 0);
        assert!(mgr.active_devices().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_after_cancel_leaves_no_claim() {
        let bus = TestBus::new();
        let mgr = manager(&bus, quiet_config());

        mgr.shutdown_token().cancel();

        assert!(matches!(
            mgr.ensure(&DeviceId::new("late")).await,
            Err(RelayError::ShuttingDown)
        ));
        assert!(mgr.handles.lock().is_empty());
        assert_eq!(bus.subscribe_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lost_claim_reports_subscribe_error() {
        let bus = TestBus::new();
        let mgr = manager(&bus, quiet_config());
        let device = DeviceId::new("lost");
        let buffer = Arc::new(DeviceBuffer::new(4));
        let counters = Arc::new(DeviceCounters::new());

        // No claim in the map, as after the ingest task released it
        let subscription = bus.inner.subscribe("camera:frames:lost").await.unwrap();
        let tasks = mgr.spawn_tasks(&device, subscription, &buffer, &counters);
        let err = mgr.install_tasks(&device, &buffer, tasks).unwrap_err();

        assert!(matches!(
            err,
            RelayError::Subscribe {
                source: BusError::Closed,
                ..
            }
        ));
        assert!(!mgr.is_active(&device));

        mgr.shutdown().await;

        let subscription = bus.inner.subscribe("camera:frames:lost").await.unwrap();
        let tasks = mgr.spawn_tasks(&device, subscription, &buffer, &counters);
        assert!(matches!(
            mgr.install_tasks(&device, &buffer, tasks),
            Err(RelayError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_memory_bus_manager() {
        // Manager also works directly over MemoryBus
        let mgr = SubscriptionManager::new(
            Arc::new(MemoryBus::new()),
            Arc::new(ViewerRegistry::new()),
            quiet_config(),
        );
        assert_eq!(
            mgr.ensure(&DeviceId::new("m")).await.unwrap(),
            EnsureOutcome::Started
        );
        mgr.shutdown().await;
    }
}
