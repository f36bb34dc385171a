//! Relay error types

use thiserror::Error;

use crate::bus::BusError;
use crate::frame::DeviceId;

use super::viewer::ViewerId;

/// Error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// The sink is already registered for a device
    #[error("viewer {viewer} is already attached to device {device}")]
    SinkAlreadyAttached { viewer: ViewerId, device: DeviceId },

    /// The sink failed a write earlier and is never reused
    #[error("viewer {viewer} has failed and cannot be registered again")]
    SinkFailed { viewer: ViewerId },

    /// fps/quality must be positive
    #[error("invalid {name}: {value} (must be a positive integer)")]
    InvalidParameter { name: &'static str, value: u32 },

    /// The bus refused the frame subscription
    #[error("failed to subscribe to frames for {device}: {source}")]
    Subscribe {
        device: DeviceId,
        #[source]
        source: BusError,
    },

    /// The bus refused a control command
    #[error("failed to send {action} command to {device}: {source}")]
    Command {
        device: DeviceId,
        action: &'static str,
        #[source]
        source: BusError,
    },

    /// The relay has been shut down
    #[error("relay is shutting down")]
    ShuttingDown,
}
