//! Device protocol driver traits
//!
//! A [`DeviceProtocol`] is one bootloader dialect driven over one open
//! transport. The framing is the driver's business; the flashing sequence
//! in [`crate::flash`] only sees these discrete steps. A
//! [`DeviceConnector`] turns a device id into a ready driver.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Capabilities reported by the bootloader during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Bootloader name
    pub name: String,
    /// Protocol version spoken by the device
    pub protocol_version: u16,
    /// Bytes of flash available for the image
    pub capacity: u32,
    /// Largest chunk a single write command accepts
    pub max_write_len: usize,
    /// Largest chunk a single read command returns
    pub max_read_len: usize,
}

/// Step-level access to a device bootloader
///
/// Each method is one protocol step. Implementations report a malformed
/// device response as [`crate::Error::ProtocolError`] and a transport stall
/// as [`crate::Error::Timeout`].
#[async_trait]
pub trait DeviceProtocol: Send {
    /// Deadline for the step about to run
    ///
    /// Called before every step. Drivers that wait on device replies with
    /// their own timeouts must wait this long, or a slow step fails before
    /// its deadline.
    fn set_step_timeout(&mut self, _timeout: Duration) {}

    /// Synchronize with the bootloader and query its capabilities
    async fn handshake(&mut self) -> Result<DeviceInfo>;

    /// Erase `len` bytes starting at `addr`
    async fn erase(&mut self, addr: u32, len: u32) -> Result<()>;

    /// Program one chunk at `addr`
    async fn write_chunk(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    /// Read back `buf.len()` bytes starting at `addr`
    async fn read_chunk(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Leave the bootloader and boot the new image
    async fn reset(&mut self) -> Result<()>;

    /// Release the underlying transport
    async fn close(&mut self);
}

/// Opens a driver for a device id
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Key naming the physical device behind `device_id`
    ///
    /// Two ids that open the same device must map to the same key. The
    /// registry uses it to keep one unfinished job per device.
    fn device_key(&self, device_id: &str) -> String {
        device_id.trim().to_string()
    }

    /// Open the transport for `device_id` and wrap it in a driver
    ///
    /// No bytes are exchanged with the device yet.
    async fn connect(&self, device_id: &str) -> Result<Box<dyn DeviceProtocol>>;
}
