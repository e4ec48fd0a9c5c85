//! buddyflash-serial - Radio bootloader protocol support
//!
//! This crate implements the bootloader protocol spoken by radios in
//! firmware-update mode, over a USB CDC serial port or a TCP bridge.
//!
//! # Protocol Overview
//!
//! Each command is an opcode byte plus fixed little-endian parameters. The
//! device answers ACK followed by any return data, or NAK followed by a
//! reason byte. A SYNCNOP (answered NAK then ACK) brings host and device
//! back into step after a reconnect.
//!
//! # Supported Transports
//!
//! - Serial port: `dev=/dev/ttyACM0`, `dev=COM3:115200`, or a bare path
//! - TCP socket: `ip=host:port`
//!
//! # Example
//!
//! ```no_run
//! use buddyflash_core::{DeviceConnector, DeviceProtocol};
//! use buddyflash_serial::SerialConnector;
//!
//! # async fn run() -> buddyflash_core::Result<()> {
//! let connector = SerialConnector::default();
//! let mut driver = connector.connect("dev=/dev/ttyACM0").await?;
//! let info = driver.handshake().await?;
//! println!("{} has {} bytes of flash", info.name, info.capacity);
//! driver.close().await;
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod error;
pub mod protocol;
pub mod transport;

use async_trait::async_trait;
use buddyflash_core::error::{Error as CoreError, Result as CoreResult, Step};
use buddyflash_core::{DeviceConnector, DeviceProtocol, TransportError};
use std::time::Duration;

// Re-exports
pub use device::{Bootloader, DEFAULT_IO_TIMEOUT};
pub use error::{BootloaderError, NakReason, Result};
pub use protocol::{BootloaderInfo, CommandMap};
pub use transport::serial::SerialTransport;
pub use transport::tcp::TcpTransport;

/// Connection options for a bootloader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    /// Serial port connection
    Serial {
        /// Device path (e.g., "/dev/ttyACM0" or "COM3")
        device: String,
        /// Baud rate (None for the default)
        baud: Option<u32>,
    },
    /// TCP socket connection
    Tcp {
        /// Hostname or IP address
        host: String,
        /// Port number
        port: u16,
    },
}

impl Connection {
    /// Parse a connection string
    ///
    /// Formats:
    /// - `dev=/dev/ttyACM0` - Serial with default baud
    /// - `dev=/dev/ttyACM0:115200` - Serial with specified baud
    /// - `ip=host:port` - TCP connection
    /// - `/dev/ttyACM0` - anything else is taken as a serial device path
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Empty device id".to_string());
        }

        if let Some(dev) = s.strip_prefix("dev=") {
            // Serial connection
            match dev.rsplit_once(':') {
                Some((device, baud_str)) if !device.is_empty() => {
                    let baud = baud_str
                        .parse()
                        .map_err(|_| format!("Invalid baud rate: {}", baud_str))?;
                    Ok(Connection::Serial {
                        device: device.to_string(),
                        baud: Some(baud),
                    })
                }
                _ => Ok(Connection::Serial {
                    device: dev.to_string(),
                    baud: None,
                }),
            }
        } else if let Some(ip) = s.strip_prefix("ip=") {
            // TCP connection
            let (host, port_str) = ip
                .rsplit_once(':')
                .ok_or_else(|| "Missing port in ip= parameter".to_string())?;
            let port = port_str
                .parse()
                .map_err(|_| format!("Invalid port: {}", port_str))?;
            Ok(Connection::Tcp {
                host: host.to_string(),
                port,
            })
        } else if s.contains('=') {
            Err(format!(
                "Invalid connection string: {}. Use dev=... or ip=...",
                s
            ))
        } else {
            Ok(Connection::Serial {
                device: s.to_string(),
                baud: None,
            })
        }
    }

    /// Name of the endpoint, ignoring settings such as the baud rate
    pub fn endpoint(&self) -> String {
        match self {
            Connection::Serial { device, .. } => format!("serial:{}", device),
            Connection::Tcp { host, port } => format!("tcp:{}:{}", host.to_lowercase(), port),
        }
    }
}

/// Opens bootloader drivers over serial ports and TCP bridges
#[derive(Debug, Clone)]
pub struct SerialConnector {
    /// Deadline for opening the port or socket
    pub connect_timeout: Duration,
    /// Timeout for each command exchange
    pub io_timeout: Duration,
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl SerialConnector {
    /// Open the transport for `conn` and wrap it in a driver
    pub async fn open(&self, conn: &Connection) -> Result<Box<dyn DeviceProtocol>> {
        match conn {
            Connection::Serial { device, baud } => {
                let (device, baud) = (device.clone(), *baud);
                let open =
                    tokio::task::spawn_blocking(move || SerialTransport::open(&device, baud));
                let transport = match tokio::time::timeout(self.connect_timeout, open).await {
                    Ok(joined) => joined
                        .map_err(|e| BootloaderError::ConnectionFailed(e.to_string()))??,
                    Err(_) => return Err(TransportError::Timeout.into()),
                };
                Ok(Box::new(
                    Bootloader::new(transport).with_io_timeout(self.io_timeout),
                ))
            }
            Connection::Tcp { host, port } => {
                let transport = TcpTransport::connect(host, *port, self.connect_timeout).await?;
                Ok(Box::new(
                    Bootloader::new(transport).with_io_timeout(self.io_timeout),
                ))
            }
        }
    }
}

#[async_trait]
impl DeviceConnector for SerialConnector {
    fn device_key(&self, device_id: &str) -> String {
        match Connection::parse(device_id) {
            Ok(conn) => conn.endpoint(),
            Err(_) => device_id.trim().to_string(),
        }
    }

    async fn connect(&self, device_id: &str) -> CoreResult<Box<dyn DeviceProtocol>> {
        let conn = Connection::parse(device_id).map_err(CoreError::InvalidDescriptor)?;
        log::debug!("bootloader: Opening {:?}", conn);
        self.open(&conn).await.map_err(|e| match e {
            BootloaderError::Transport(TransportError::Timeout) => {
                CoreError::Timeout(Step::Connect)
            }
            BootloaderError::Transport(TransportError::Open { device, reason }) => {
                CoreError::NotFound(format!("device {}: {}", device, reason))
            }
            other => CoreError::ProtocolError(other.to_string()),
        })
    }
}
