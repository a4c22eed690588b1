//! Collector and logger handles over a shared event ring.
//!
//! The collector owns the ring and the single consumer, and answers control
//! sideband requests on a Unix-domain socket; loggers attach through that
//! socket, receive the ring memfd and publish from any thread.

use thiserror::Error;

pub mod client;
pub mod collector;
mod listener;
pub mod logger;

pub use client::ControlClient;
pub use collector::{Collector, CollectorConfig};
pub use eventring::{Dropped, Geometry, LogEntry, Origin};
pub use logger::Logger;

/// Handle acquisition and sideband failures. Fatal for the handle; `Dropped`
/// and empty `pop`s are normal outcomes and never surface here.
#[derive(Error, Debug)]
pub enum AttachError {
    #[error("control channel I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("control channel system call failed: {0}")]
    Os(#[from] nix::errno::Errno),

    #[error("control message codec failed: {0}")]
    Codec(#[from] rkyv::rancor::Error),

    #[error("collector rejected request: {0}")]
    Rejected(String),

    #[error("shared ring validation failed: {0}")]
    Ring(#[from] eventring::RingError),

    #[error("cycle counter calibration failed: {0}")]
    Calibration(#[from] eventring::cycles::CalibrationError),

    #[error("attach response did not carry the ring file descriptor")]
    MissingFd,

    #[error("unexpected response to {0} request")]
    UnexpectedResponse(&'static str),

    #[error("control channel closed by peer")]
    ChannelClosed,
}

pub type Result<T, E = AttachError> = std::result::Result<T, E>;
