//! Frame types for the relay
//!
//! This module provides:
//! - `DeviceId`, the key for all per-device state
//! - `Frame`, one multipart chunk ready to be written verbatim to a viewer
//! - `FrameEncoder`, base64 decoding and multipart framing

pub mod device;
pub mod encoder;
pub mod error;

pub use device::DeviceId;
pub use encoder::{Frame, FrameEncoder, MULTIPART_BOUNDARY, MULTIPART_CONTENT_TYPE};
pub use error::FrameError;
