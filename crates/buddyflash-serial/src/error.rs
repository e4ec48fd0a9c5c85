//! Error types for bootloader operations

use buddyflash_core::{Error as CoreError, Step, TransportError};
use thiserror::Error;

/// Bootloader-specific errors
#[derive(Debug, Error)]
pub enum BootloaderError {
    /// Failed to connect to device
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to synchronize protocol
    #[error("Protocol synchronization failed")]
    SyncFailed,

    /// Unsupported protocol version
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    /// Command not supported by the bootloader
    #[error("Command 0x{0:02X} not supported")]
    CommandNotSupported(u8),

    /// NAK response received
    #[error("NAK received for command 0x{command:02X} ({reason})")]
    Nak { command: u8, reason: NakReason },

    /// Invalid response received
    #[error("Invalid response 0x{response:02X} for command 0x{command:02X}")]
    InvalidResponse { command: u8, response: u8 },

    /// Transport failure during communication
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Reason code sent after a NAK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NakReason {
    /// Command byte not recognized
    UnknownCommand,
    /// Address range outside the flash
    OutOfRange,
    /// Programming failed
    ProgramFailed,
    /// Erase failed
    EraseFailed,
    /// Code not defined by the protocol
    Other(u8),
}

impl NakReason {
    /// Decode the reason byte
    pub fn from_code(code: u8) -> Self {
        match code {
            crate::protocol::NAK_UNKNOWN_COMMAND => Self::UnknownCommand,
            crate::protocol::NAK_OUT_OF_RANGE => Self::OutOfRange,
            crate::protocol::NAK_PROGRAM_FAILED => Self::ProgramFailed,
            crate::protocol::NAK_ERASE_FAILED => Self::EraseFailed,
            other => Self::Other(other),
        }
    }
}

impl std::fmt::Display for NakReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownCommand => write!(f, "unknown command"),
            Self::OutOfRange => write!(f, "address out of range"),
            Self::ProgramFailed => write!(f, "program failed"),
            Self::EraseFailed => write!(f, "erase failed"),
            Self::Other(code) => write!(f, "code 0x{:02X}", code),
        }
    }
}

/// Result type for bootloader operations
pub type Result<T> = core::result::Result<T, BootloaderError>;

impl BootloaderError {
    /// Whether this failure is a stalled link rather than a bad answer
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Timeout))
    }

    /// Convert into the core taxonomy for the step that failed
    ///
    /// Timeouts stay timeouts, and so does a device that never answered the
    /// sync sequence. Everything else becomes a protocol error carrying this
    /// error's message.
    pub fn into_core(self, step: Step) -> CoreError {
        if self.is_timeout() || matches!(self, Self::SyncFailed) {
            CoreError::Timeout(step)
        } else {
            CoreError::ProtocolError(self.to_string())
        }
    }
}

impl From<std::io::Error> for BootloaderError {
    fn from(e: std::io::Error) -> Self {
        BootloaderError::Transport(TransportError::from(e))
    }
}
