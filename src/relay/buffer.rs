//! Per-device frame buffer
//!
//! Decouples the ingest rate from the dispatch rate. The buffer is bounded
//! and drops the oldest frame on overflow, so a slow dispatcher costs viewers
//! stale frames but never stalls the producer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::frame::Frame;

/// Bounded drop-oldest FIFO of frames for one device
#[derive(Debug)]
pub struct DeviceBuffer {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    offered: AtomicU64,
    evicted: AtomicU64,
}

impl DeviceBuffer {
    /// Create a buffer holding at most `capacity` frames (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            offered: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Insert a frame, evicting the oldest one if full
    ///
    /// Never blocks beyond the short internal lock. Returns true if a frame
    /// was evicted to make room.
    pub fn offer(&self, frame: Frame) -> bool {
        let evicted = {
            let mut frames = self.frames.lock();
            let evicted = if frames.len() >= self.capacity {
                frames.pop_front().is_some()
            } else {
                false
            };
            frames.push_back(frame);
            evicted
        };

        self.offered.fetch_add(1, Ordering::Relaxed);
        if evicted {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Remove and return every buffered frame, oldest first
    pub fn drain_all(&self) -> Vec<Frame> {
        self.frames.lock().drain(..).collect()
    }

    /// Number of buffered frames
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    /// Maximum number of buffered frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames offered since creation
    pub fn offered_count(&self) -> u64 {
        self.offered.load(Ordering::Relaxed)
    }

    /// Frames evicted since creation
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}
