//! Viewer sinks and the per-device viewer registry
//!
//! A `ViewerSink` is the write side of one HTTP viewer's long-lived response.
//! The web layer creates it, registers it, and owns the connection; the relay
//! only writes frames into it and drops its handle when the viewer goes away.
//! It never shuts the writer down.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};

use crate::frame::{DeviceId, Frame};

use super::error::RelayError;

static NEXT_VIEWER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique viewer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(u64);

impl ViewerId {
    fn next() -> Self {
        Self(NEXT_VIEWER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ViewerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of one viewer connection
pub struct ViewerSink {
    id: ViewerId,
    writer: tokio::sync::Mutex<BoxedWriter>,
    attached: Mutex<Option<DeviceId>>,
    failed: AtomicBool,
    frames_written: AtomicU64,
    connected_at: Instant,
}

impl ViewerSink {
    /// Wrap any async writer
    pub fn new<W>(writer: W) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(Self {
            id: ViewerId::next(),
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            attached: Mutex::new(None),
            failed: AtomicBool::new(false),
            frames_written: AtomicU64::new(0),
            connected_at: Instant::now(),
        })
    }

    /// Create a sink backed by an in-memory pipe
    ///
    /// The returned stream is the read side; serve it as the HTTP response
    /// body. Dropping it makes the next frame write fail, which unregisters
    /// the viewer.
    pub fn duplex(max_buf_size: usize) -> (Arc<Self>, DuplexStream) {
        let (write_half, read_half) = tokio::io::duplex(max_buf_size);
        (Self::new(write_half), read_half)
    }

    /// Viewer id
    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// Whether a write to this sink has failed
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Frames written successfully
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Device this sink is currently registered with
    pub fn attached_device(&self) -> Option<DeviceId> {
        self.attached.lock().clone()
    }

    /// Time since the sink was created
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Write one frame and flush, bounded by `timeout`
    pub(crate) async fn write_frame(&self, frame: &Frame, timeout: Duration) -> io::Result<()> {
        let write = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(frame.as_bytes()).await?;
            writer.flush().await
        };

        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(())) => {
                self.frames_written.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "viewer write timed out",
            )),
        }
    }

    pub(crate) fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    fn attach(&self, device: &DeviceId) -> Result<(), RelayError> {
        let mut attached = self.attached.lock();
        if let Some(current) = attached.as_ref() {
            return Err(RelayError::SinkAlreadyAttached {
                viewer: self.id,
                device: current.clone(),
            });
        }
        *attached = Some(device.clone());
        Ok(())
    }

    fn detach(&self, device: &DeviceId) {
        let mut attached = self.attached.lock();
        if attached.as_ref() == Some(device) {
            *attached = None;
        }
    }
}

impl std::fmt::Debug for ViewerSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerSink")
            .field("id", &self.id)
            .field("attached", &*self.attached.lock())
            .field("failed", &self.is_failed())
            .field("frames_written", &self.frames_written())
            .finish()
    }
}

#[derive(Default)]
struct ViewerSet {
    sinks: Vec<Arc<ViewerSink>>,
    /// When the set last became empty
    idle_since: Option<Instant>,
}

/// Thread-safe map of device to its active viewer sinks
///
/// The outer map is only locked to find or create a device's set; each set has
/// its own lock, so devices never contend with each other for long.
#[derive(Default)]
pub struct ViewerRegistry {
    devices: RwLock<HashMap<DeviceId, Arc<Mutex<ViewerSet>>>>,
}

impl ViewerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink for a device
    ///
    /// Rejects sinks that already failed or are registered elsewhere.
    pub fn add(&self, device: &DeviceId, sink: Arc<ViewerSink>) -> Result<(), RelayError> {
        if sink.is_failed() {
            return Err(RelayError::SinkFailed { viewer: sink.id() });
        }
        sink.attach(device)?;

        // Pushed under the map lock so the idle reaper cannot drop the set
        // between lookup and insert
        let count = {
            let mut devices = self.devices.write();
            let mut set = devices.entry(device.clone()).or_default().lock();
            set.sinks.push(Arc::clone(&sink));
            set.idle_since = None;
            set.sinks.len()
        };

        tracing::info!(
            device = %device,
            viewer = %sink.id(),
            viewers = count,
            "Viewer added"
        );

        Ok(())
    }

    /// Unregister a sink; returns whether it was registered for the device
    pub fn remove(&self, device: &DeviceId, viewer: ViewerId) -> bool {
        let Some(set) = self.devices.read().get(device).cloned() else {
            return false;
        };

        let (removed, remaining) = {
            let mut set = set.lock();
            let removed = set
                .sinks
                .iter()
                .position(|s| s.id() == viewer)
                .map(|idx| set.sinks.remove(idx));
            if removed.is_some() && set.sinks.is_empty() {
                set.idle_since = Some(Instant::now());
            }
            (removed, set.sinks.len())
        };

        match removed {
            Some(sink) => {
                sink.detach(device);
                tracing::debug!(
                    device = %device,
                    viewer = %viewer,
                    viewers = remaining,
                    "Viewer removed"
                );
                true
            }
            None => false,
        }
    }

    /// Snapshot of the sinks currently registered for a device
    pub fn sinks(&self, device: &DeviceId) -> Vec<Arc<ViewerSink>> {
        self.devices
            .read()
            .get(device)
            .map(|set| set.lock().sinks.clone())
            .unwrap_or_default()
    }

    /// Number of viewers for a device
    pub fn viewer_count(&self, device: &DeviceId) -> usize {
        self.devices
            .read()
            .get(device)
            .map(|set| set.lock().sinks.len())
            .unwrap_or(0)
    }

    /// Number of viewers across all devices
    pub fn total_viewers(&self) -> usize {
        self.devices
            .read()
            .values()
            .map(|set| set.lock().sinks.len())
            .sum()
    }

    /// Devices with at least one viewer
    pub fn watched_devices(&self) -> Vec<DeviceId> {
        self.devices
            .read()
            .iter()
            .filter(|(_, set)| !set.lock().sinks.is_empty())
            .map(|(device, _)| device.clone())
            .collect()
    }

    /// Drop a device's set if it has had no viewers for at least `idle_for`
    ///
    /// Returns true if the device has no set left (including when it never had
    /// one). Checked and removed under the map's write lock, so a concurrent
    /// `add` either lands before (and keeps the device) or creates a new set.
    pub fn remove_if_idle(&self, device: &DeviceId, idle_for: Duration) -> bool {
        let mut devices = self.devices.write();

        let idle = match devices.get(device) {
            None => return true,
            Some(set) => {
                let set = set.lock();
                set.sinks.is_empty()
                    && set
                        .idle_since
                        .is_some_and(|since| since.elapsed() >= idle_for)
            }
        };

        if idle {
            devices.remove(device);
        }
        idle
    }

    /// Drop every registration without touching the sinks' writers
    pub fn clear(&self) -> usize {
        let devices: Vec<(DeviceId, Arc<Mutex<ViewerSet>>)> =
            self.devices.write().drain().collect();

        let mut count = 0;
        for (device, set) in devices {
            for sink in set.lock().sinks.drain(..) {
                sink.detach(&device);
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameEncoder;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_viewer_ids_are_unique() {
        let (a, _ra) = ViewerSink::duplex(64);
        let (b, _rb) = ViewerSink::duplex(64);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_add_and_remove() {
        let registry = ViewerRegistry::new();
        let device = DeviceId::new("dev-1");
        let (sink, _rx) = ViewerSink::duplex(64);

        registry.add(&device, Arc::clone(&sink)).unwrap();
        assert_eq!(registry.viewer_count(&device), 1);
        assert_eq!(sink.attached_device(), Some(device.clone()));

        assert!(registry.remove(&device, sink.id()));
        assert!(!registry.remove(&device, sink.id()));
        assert_eq!(registry.viewer_count(&device), 0);
        assert_eq!(sink.attached_device(), None);
    }

    #[test]
    fn test_sink_in_one_set_at_a_time() {
        let registry = ViewerRegistry::new();
        let (sink, _rx) = ViewerSink::duplex(64);

        registry.add(&DeviceId::new("a"), Arc::clone(&sink)).unwrap();
        let err = registry
            .add(&DeviceId::new("b"), Arc::clone(&sink))
            .unwrap_err();

        assert!(matches!(err, RelayError::SinkAlreadyAttached { .. }));
        assert_eq!(registry.total_viewers(), 1);

        // Free again after leaving the first device
        registry.remove(&DeviceId::new("a"), sink.id());
        registry.add(&DeviceId::new("b"), sink).unwrap();
    }

    #[test]
    fn test_failed_sink_rejected() {
        let registry = ViewerRegistry::new();
        let (sink, _rx) = ViewerSink::duplex(64);
        sink.mark_failed();

        let err = registry.add(&DeviceId::new("a"), sink).unwrap_err();
        assert!(matches!(err, RelayError::SinkFailed { .. }));
    }

    #[test]
    fn test_remove_if_idle() {
        let registry = ViewerRegistry::new();
        let device = DeviceId::new("dev");
        let (sink, _rx) = ViewerSink::duplex(64);

        registry.add(&device, Arc::clone(&sink)).unwrap();
        assert!(!registry.remove_if_idle(&device, Duration::ZERO));

        registry.remove(&device, sink.id());
        assert!(!registry.remove_if_idle(&device, Duration::from_secs(3600)));
        assert!(registry.remove_if_idle(&device, Duration::ZERO));
        assert!(registry.watched_devices().is_empty());
    }

    #[test]
    fn test_clear_detaches() {
        let registry = ViewerRegistry::new();
        let (a, _ra) = ViewerSink::duplex(64);
        let (b, _rb) = ViewerSink::duplex(64);
        registry.add(&DeviceId::new("x"), Arc::clone(&a)).unwrap();
        registry.add(&DeviceId::new("y"), Arc::clone(&b)).unwrap();

        assert_eq!(registry.clear(), 2);
        assert_eq!(registry.total_viewers(), 0);
        assert!(a.attached_device().is_none());
        assert!(b.attached_device().is_none());
    }

    #[tokio::test]
    async fn test_write_frame() {
        let (sink, mut rx) = ViewerSink::duplex(1024);
        let frame = FrameEncoder::frame_jpeg(b"jpeg");

        sink.write_frame(&frame, Duration::from_secs(1)).await.unwrap();

        let mut buf = vec![0u8; frame.len()];
        rx.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf.as_slice(), frame.as_bytes().as_ref());
        assert_eq!(sink.frames_written(), 1);
    }

    #[tokio::test]
    async fn test_write_after_reader_dropped_fails() {
        let (sink, rx) = ViewerSink::duplex(1024);
        drop(rx);

        let frame = FrameEncoder::frame_jpeg(b"jpeg");
        assert!(sink.write_frame(&frame, Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_stalled_reader_times_out() {
        // Pipe smaller than one frame and nobody reading
        let (sink, _rx) = ViewerSink::duplex(8);
        let frame = FrameEncoder::frame_jpeg(&[0u8; 256]);

        let err = sink
            .write_frame(&frame, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
