//! Debug frame sampling
//!
//! Writes every Nth decoded JPEG of a device to disk so operators can check
//! what the relay is actually receiving. Purely a side channel: writes are
//! spawned off the ingest path and failures are only logged.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::frame::{DeviceId, Frame};

/// Debug sampling settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotConfig {
    /// Root directory; each device gets a subdirectory
    pub dir: PathBuf,
    /// Save one frame out of every `every_n` (at least 1)
    pub every_n: u32,
}

impl SnapshotConfig {
    /// Create sampling settings
    pub fn new(dir: impl Into<PathBuf>, every_n: u32) -> Self {
        Self {
            dir: dir.into(),
            every_n: every_n.max(1),
        }
    }
}

/// Per-device sampler
#[derive(Debug)]
pub(crate) struct FrameSampler {
    device: DeviceId,
    dir: PathBuf,
    every_n: u64,
    seen: AtomicU64,
    /// The device's task token; pending writes are dropped when it fires
    cancel: CancellationToken,
}

impl FrameSampler {
    pub(crate) fn new(config: &SnapshotConfig, device: &DeviceId, cancel: CancellationToken) -> Self {
        Self {
            device: device.clone(),
            dir: config.dir.join(device.path_safe()),
            every_n: u64::from(config.every_n.max(1)),
            seen: AtomicU64::new(0),
            cancel,
        }
    }

    /// Count a decoded frame and save it if it is due
    ///
    /// Returns the path the frame will be written to, if sampled. Nothing is
    /// sampled once the device's tasks have been cancelled.
    pub(crate) fn observe(&self, frame: &Frame) -> Option<PathBuf> {
        if self.cancel.is_cancelled() {
            return None;
        }

        let seq = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        if seq % self.every_n != 0 {
            return None;
        }

        let path = self.dir.join(format!("{:08}.jpg", seq));
        let dir = self.dir.clone();
        let target = path.clone();
        let device = self.device.clone();
        let jpeg = frame.payload();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let write = async {
                tokio::fs::create_dir_all(&dir).await?;
                tokio::fs::write(&target, &jpeg).await
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = write => result,
            };

            match result {
                Ok(()) => tracing::debug!(
                    device = %device,
                    path = %target.display(),
                    bytes = jpeg.len(),
                    "Saved camera frame sample"
                ),
                Err(e) => tracing::warn!(
                    device = %device,
                    path = %target.display(),
                    error = %e,
                    "Failed to save camera frame sample"
                ),
            }
        });

        Some(path)
    }
}
