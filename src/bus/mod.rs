//! Message bus interface
//!
//! The relay talks to devices through a publish/subscribe bus keyed by topic:
//! - `camera:cmd:{device}` carries JSON control commands to the device
//! - `camera:frames:{device}` carries base64 JPEG frames from the device
//!
//! Any transport can back the relay by implementing [`MessageBus`]. A
//! subscription is a plain channel receiver; dropping it releases the
//! subscription. [`MemoryBus`] is the in-process implementation.

pub mod command;
pub mod memory;

use std::future::Future;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::frame::DeviceId;

pub use command::{StreamCommand, StreamCommandPublisher};
pub use memory::MemoryBus;

/// Bus transport errors
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus has been shut down
    #[error("bus is closed")]
    Closed,

    /// The bus refused a publish
    #[error("publish to {topic} rejected: {reason}")]
    Rejected { topic: String, reason: String },

    /// The bus could not create a subscription
    #[error("subscribe to {topic} failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    /// A command could not be serialized
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One message delivered by the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic the message was published on
    pub topic: String,
    /// Raw message body
    pub payload: Bytes,
}

impl BusMessage {
    /// Create a message
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Message body as text
    pub fn payload_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }
}

/// Receiving end of a topic subscription
///
/// Bus implementations feed the channel; dropping this value unsubscribes.
#[derive(Debug)]
pub struct BusSubscription {
    topic: String,
    rx: mpsc::Receiver<BusMessage>,
}

impl BusSubscription {
    /// Wrap a channel receiver fed by a bus implementation
    pub fn new(topic: impl Into<String>, rx: mpsc::Receiver<BusMessage>) -> Self {
        Self {
            topic: topic.into(),
            rx,
        }
    }

    /// Topic this subscription listens on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next message
    ///
    /// Returns `None` once the bus side has gone away.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

/// Publish/subscribe transport between devices and the relay
pub trait MessageBus: Send + Sync + 'static {
    /// Publish a message on a topic
    ///
    /// Success means the bus accepted the message, not that anyone acted on it.
    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), BusError>> + Send;

    /// Subscribe to a topic
    fn subscribe(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<BusSubscription, BusError>> + Send;
}

/// Topic naming for control and frame channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Prefix of per-device control topics
    pub command_prefix: String,
    /// Prefix of per-device frame topics
    pub frame_prefix: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            command_prefix: "camera:cmd:".into(),
            frame_prefix: "camera:frames:".into(),
        }
    }
}

impl Topics {
    /// Control topic for a device
    pub fn command_topic(&self, device: &DeviceId) -> String {
        format!("{}{}", self.command_prefix, device)
    }

    /// Frame topic for a device
    pub fn frame_topic(&self, device: &DeviceId) -> String {
        format!("{}{}", self.frame_prefix, device)
    }

    /// Extract the device id from a frame topic
    ///
    /// Returns `None` for topics outside the frame namespace or with an empty id.
    pub fn parse_frame_topic(&self, topic: &str) -> Option<DeviceId> {
        topic
            .strip_prefix(self.frame_prefix.as_str())
            .filter(|id| !id.is_empty())
            .map(DeviceId::from)
    }
}
