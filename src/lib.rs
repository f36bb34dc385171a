//! # mjpeg-relay
//!
//! Live camera frame relay. Devices publish base64 JPEG frames on a message
//! bus; the relay buffers them per device and fans them out to any number of
//! HTTP viewers as a `multipart/x-mixed-replace` stream.
//!
//! ```text
//!   device ──► bus "camera:frames:{id}" ──► ingest task ──► FrameEncoder
//!                                                              │
//!                                                              ▼
//!   viewer sinks ◄── FanoutDispatcher (100ms tick) ◄── DeviceBuffer (drop-oldest)
//! ```
//!
//! # Example
//! ```no_run
//! use mjpeg_relay::{CameraRelay, DeviceId, MemoryBus, RelayConfig, ViewerSink};
//!
//! # async fn example() -> mjpeg_relay::error::Result<()> {
//! let bus = MemoryBus::new();
//! let relay = CameraRelay::new(bus, RelayConfig::default());
//!
//! let device = DeviceId::new("cam-01");
//! let (sink, _body) = ViewerSink::duplex(64 * 1024);
//! relay.subscribe(&device, sink).await?;
//!
//! // Ask the device to start pushing frames (soft failure on bus errors)
//! let _ = relay.start_stream(&device, Some(10), Some(20)).await;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod error;
pub mod frame;
pub mod relay;
pub mod stats;

pub use bus::{BusMessage, BusSubscription, MemoryBus, MessageBus, StreamCommand, Topics};
pub use error::{Error, Result};
pub use frame::{DeviceId, Frame, FrameEncoder, FrameError, MULTIPART_CONTENT_TYPE};
pub use relay::{CameraRelay, RelayConfig, RelayError, ViewerId, ViewerSink};
