//! Crate-level error type
//!
//! Each module owns its error enum; this aggregates them for callers that
//! just want one `Result`.

use thiserror::Error;

use crate::bus::BusError;
use crate::frame::FrameError;
use crate::relay::RelayError;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
