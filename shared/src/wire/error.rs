use std::io;

use replica_serde::SerdeErr;
use thiserror::Error;

/// Errors of the socket transport. They end the current connection, never the wire.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Socket error: {0}")]
    Io(#[from] io::Error),

    /// Write attempted while no socket is attached
    #[error("Wire '{0}' has no connected socket")]
    NotConnected(String),

    /// The wire's lifetime is over
    #[error("Wire '{0}' is terminated")]
    Terminated(String),

    /// Frame length other than a payload size or a control sentinel
    #[error("Invalid frame length {0}")]
    InvalidFrameLength(i32),

    #[error("Malformed frame: {0}")]
    Serde(#[from] SerdeErr),

    /// Negative inbound message length
    #[error("Invalid message length {0}")]
    InvalidMessageLength(i32),
}

impl WireError {
    /// Timeouts and would-block reads are part of normal operation
    pub fn is_recoverable(&self) -> bool {
        match self {
            WireError::Io(err) => is_recoverable_io(err),
            _ => false,
        }
    }
}

pub(crate) fn is_recoverable_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
