//! Transport layer abstraction
//!
//! A transport owns one physical or logical link to a device and moves
//! bytes with per-call timeouts. Exclusive use of a device is enforced by
//! the job registry, not here.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Transport-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The link could not be opened
    #[error("failed to open {device}: {reason}")]
    Open {
        /// Device id or connection string
        device: String,
        /// Underlying error text
        reason: String,
    },

    /// No data moved before the deadline
    #[error("transport timed out")]
    Timeout,

    /// The link was closed
    #[error("transport closed")]
    Closed,

    /// I/O error from the underlying port or socket
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Self::Timeout,
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset => Self::Closed,
            _ => Self::Io(e.to_string()),
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = core::result::Result<T, TransportError>;

/// Byte-level link to a device
#[async_trait]
pub trait Transport: Send {
    /// Write all of `data` within `timeout`
    async fn write(&mut self, data: &[u8], timeout: Duration) -> TransportResult<()>;

    /// Fill `buf` completely within `timeout`
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> TransportResult<()>;

    /// Read whatever arrives within `timeout`
    ///
    /// Returns the number of bytes read, or 0 on timeout.
    async fn read_available(&mut self, buf: &mut [u8], timeout: Duration)
        -> TransportResult<usize>;

    /// Release the link
    async fn close(&mut self) -> TransportResult<()>;
}
