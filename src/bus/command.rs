//! Stream control commands
//!
//! Fire-and-forget `start`/`stop` messages published on the device's control
//! topic. The device side deserializes the same [`StreamCommand`] JSON:
//!
//! ```text
//! {"action":"start","fps":10,"quality":20}
//! {"action":"stop"}
//! ```

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::frame::DeviceId;
use crate::relay::RelayError;

use super::{BusError, MessageBus, Topics};

/// Control message sent to a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum StreamCommand {
    /// Start pushing frames
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fps: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quality: Option<u32>,
    },
    /// Stop pushing frames
    Stop,
}

impl StreamCommand {
    /// Action name as it appears on the wire
    pub fn action(&self) -> &'static str {
        match self {
            StreamCommand::Start { .. } => "start",
            StreamCommand::Stop => "stop",
        }
    }

    /// Serialize to the JSON message body
    pub fn to_json(&self) -> Result<Bytes, BusError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Publishes control commands to devices
pub struct StreamCommandPublisher<B> {
    bus: Arc<B>,
    topics: Topics,
}

impl<B: MessageBus> StreamCommandPublisher<B> {
    /// Create a publisher on the given bus
    pub fn new(bus: Arc<B>, topics: Topics) -> Self {
        Self { bus, topics }
    }

    /// Ask a device to start streaming
    ///
    /// `fps` and `quality` are passed through untouched; zero is rejected
    /// before anything is published.
    pub async fn start(
        &self,
        device: &DeviceId,
        fps: Option<u32>,
        quality: Option<u32>,
    ) -> Result<(), RelayError> {
        check_positive("fps", fps)?;
        check_positive("quality", quality)?;

        tracing::info!(
            device = %device,
            fps = ?fps,
            quality = ?quality,
            "Starting camera stream"
        );

        self.send(device, &StreamCommand::Start { fps, quality })
            .await
    }

    /// Ask a device to stop streaming
    pub async fn stop(&self, device: &DeviceId) -> Result<(), RelayError> {
        tracing::info!(device = %device, "Stopping camera stream");
        self.send(device, &StreamCommand::Stop).await
    }

    /// Publish a command to the device's control topic
    ///
    /// Failures are logged and returned; there is no retry.
    pub async fn send(&self, device: &DeviceId, command: &StreamCommand) -> Result<(), RelayError> {
        let topic = self.topics.command_topic(device);

        let result = match command.to_json() {
            Ok(body) => self.bus.publish(&topic, body).await,
            Err(e) => Err(e),
        };

        result.map_err(|source| {
            tracing::warn!(
                device = %device,
                topic = %topic,
                action = command.action(),
                error = %source,
                "Failed to publish stream command"
            );
            RelayError::Command {
                device: device.clone(),
                action: command.action(),
                source,
            }
        })
    }
}

fn check_positive(name: &'static str, value: Option<u32>) -> Result<(), RelayError> {
    match value {
        Some(0) => Err(RelayError::InvalidParameter { name, value: 0 }),
        _ => Ok(()),
    }
}
