//! Error types for buddyflash-core
//!
//! Every failure the flashing core can report maps onto one variant of
//! [`Error`]. Job records carry the matching [`ErrorKind`] plus the
//! rendered message, so pollers see the underlying detail verbatim.

use core::fmt;
use thiserror::Error;

/// Protocol step a deadline applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Opening the transport to the device
    Connect,
    /// Bootloader synchronization and identification
    Handshake,
    /// Erasing the target range
    Erase,
    /// Writing one chunk
    Write,
    /// Reading back one chunk for verification
    Verify,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Handshake => write!(f, "handshake"),
            Self::Erase => write!(f, "erase"),
            Self::Write => write!(f, "write"),
            Self::Verify => write!(f, "verify"),
        }
    }
}

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Firmware descriptor or device id is missing or malformed
    #[error("invalid firmware descriptor: {0}")]
    InvalidDescriptor(String),

    /// The device already has a job that has not finished
    #[error("device {0} is busy with another flash job")]
    DeviceBusy(String),

    /// No artifact or job matches the request
    #[error("not found: {0}")]
    NotFound(String),

    /// Firmware payload is empty, undecodable or fails its checksum
    #[error("corrupt firmware: {0}")]
    Corrupt(String),

    /// Firmware source could not be reached
    #[error("firmware source unavailable: {0}")]
    Unavailable(String),

    /// A protocol step exceeded its deadline
    #[error("{0} step timed out")]
    Timeout(Step),

    /// The device answered with something the protocol does not allow
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The job was cancelled on request
    #[error("cancelled")]
    Cancelled,
}

/// Discriminant of [`Error`] without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidDescriptor,
    DeviceBusy,
    NotFound,
    Corrupt,
    Unavailable,
    Timeout,
    ProtocolError,
    Cancelled,
}

impl Error {
    /// Get the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDescriptor(_) => ErrorKind::InvalidDescriptor,
            Self::DeviceBusy(_) => ErrorKind::DeviceBusy,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Corrupt(_) => ErrorKind::Corrupt,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ProtocolError(_) => ErrorKind::ProtocolError,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidDescriptor => "InvalidDescriptor",
            Self::DeviceBusy => "DeviceBusy",
            Self::NotFound => "NotFound",
            Self::Corrupt => "Corrupt",
            Self::Unavailable => "Unavailable",
            Self::Timeout => "Timeout",
            Self::ProtocolError => "ProtocolError",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_detail_is_kept_verbatim() {
        let err = Error::ProtocolError("NAK for command 0x21 (code 0x03)".into());
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
        assert!(err.to_string().contains("NAK for command 0x21 (code 0x03)"));
    }

    #[test]
    fn timeout_names_the_step() {
        let err = Error::Timeout(Step::Handshake);
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.to_string(), "handshake step timed out");
    }
}
