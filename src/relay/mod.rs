//! Frame relay core
//!
//! ```text
//!                       ┌──────────────────── per device ────────────────────┐
//!  bus subscription ──► │ ingest task ──► DeviceBuffer ──► FanoutDispatcher  │ ──► ViewerSinks
//!                       └──────────────────────────────────────────────────────┘
//!                                     ▲                         ▲
//!                  SubscriptionManager (one per device)   ViewerRegistry
//! ```
//!
//! [`CameraRelay`] is the entry point. Devices are started lazily by their
//! first viewer and reaped once they have had no viewers for
//! `RelayConfig::idle_device_timeout`.

pub mod buffer;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod service;
pub mod snapshot;
pub mod subscription;
pub mod viewer;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::DeviceBuffer;
pub use config::RelayConfig;
pub use dispatcher::{FanoutDispatcher, TickReport};
pub use error::RelayError;
pub use service::CameraRelay;
pub use snapshot::SnapshotConfig;
pub use subscription::{EnsureOutcome, SubscriptionManager};
pub use viewer::{ViewerId, ViewerRegistry, ViewerSink};
