//! Frame decoding errors

use thiserror::Error;

use super::device::DeviceId;

/// Why an inbound frame event was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Payload is not valid base64
    #[error("invalid base64 frame from {device}: {source}")]
    InvalidBase64 {
        device: DeviceId,
        source: base64::DecodeError,
    },

    /// Payload decoded to zero bytes
    #[error("empty frame from {device}")]
    EmptyPayload { device: DeviceId },
}

impl FrameError {
    /// Device the rejected event came from
    pub fn device(&self) -> &DeviceId {
        match self {
            FrameError::InvalidBase64 { device, .. } | FrameError::EmptyPayload { device } => {
                device
            }
        }
    }
}
