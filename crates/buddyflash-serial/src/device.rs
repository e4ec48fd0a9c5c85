//! Bootloader device implementation
//!
//! This module provides the `Bootloader` struct that speaks the radio
//! bootloader protocol over any [`Transport`] and implements
//! [`DeviceProtocol`] on top of it.

use crate::error::{BootloaderError, NakReason, Result};
use crate::protocol::*;

use async_trait::async_trait;
use buddyflash_core::error::{Error as CoreError, Result as CoreResult, Step};
use buddyflash_core::{DeviceInfo, DeviceProtocol, Transport};
use std::time::Duration;

/// Default timeout for a single command response
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(2);

/// Bootloader driver
///
/// Constructing one does not talk to the device. The first exchange
/// happens in [`DeviceProtocol::handshake`].
pub struct Bootloader<T: Transport> {
    /// Transport layer (serial, TCP or emulated)
    transport: T,
    /// Bootloader capabilities
    info: BootloaderInfo,
    /// Whether automatic command checking is enabled
    auto_check: bool,
    /// Timeout for each command write
    io_timeout: Duration,
    /// Timeout for each command reply, set per step by the flash sequence
    reply_timeout: Duration,
}

impl<T: Transport> Bootloader<T> {
    /// Create a new driver around an open transport
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            info: BootloaderInfo::default(),
            auto_check: false,
            io_timeout: DEFAULT_IO_TIMEOUT,
            reply_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Override the per-command write and reply timeout
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self.reply_timeout = timeout;
        self
    }

    /// Get bootloader information gathered by the last handshake
    pub fn info(&self) -> &BootloaderInfo {
        &self.info
    }

    /// Synchronize and query the bootloader
    ///
    /// 1. Synchronize the protocol
    /// 2. Query interface version
    /// 3. Query command map and check the required commands
    /// 4. Query capacity, transfer limits and name
    pub async fn identify(&mut self) -> Result<DeviceInfo> {
        self.info = BootloaderInfo::default();
        self.auto_check = false;

        self.synchronize().await?;
        log::debug!("bootloader: Synchronized");

        let version = self.query_iface().await?;
        if version != BOOTLOADER_PROTOCOL_VERSION {
            return Err(BootloaderError::UnsupportedVersion(version));
        }
        log::debug!("bootloader: Interface version OK ({})", version);

        self.info.cmdmap = self.query_cmdmap().await?;
        self.auto_check = true;

        for cmd in REQUIRED_COMMANDS {
            if !self.info.supports_cmd(cmd) {
                log::error!("bootloader: Required command 0x{:02X} not supported", cmd);
                return Err(BootloaderError::CommandNotSupported(cmd));
            }
        }

        let buf = self.do_command_ret::<4>(CMD_Q_CAPACITY).await?;
        self.info.capacity = u32::from_le_bytes(buf);
        log::debug!("bootloader: Flash capacity is {} bytes", self.info.capacity);

        // Query optional parameters
        if let Ok(buf) = self.do_command_ret::<3>(CMD_Q_WRMAXLEN).await {
            self.info.max_write_n = u24_to_u32(&buf);
            log::debug!(
                "bootloader: Maximum write length is {}",
                self.info.effective_max_write()
            );
        }

        if let Ok(buf) = self.do_command_ret::<3>(CMD_Q_RDMAXLEN).await {
            self.info.max_read_n = u24_to_u32(&buf);
            log::debug!(
                "bootloader: Maximum read length is {}",
                self.info.effective_max_read()
            );
        }

        if let Ok(name) = self.do_command_ret::<NAME_SIZE>(CMD_Q_NAME).await {
            self.info.name = name;
            log::info!("bootloader: Device name is \"{}\"", self.info.name_str());
        }

        Ok(DeviceInfo {
            name: self.info.name_str().to_string(),
            protocol_version: version,
            capacity: self.info.capacity,
            max_write_len: self.info.effective_max_write(),
            max_read_len: self.info.effective_max_read(),
        })
    }

    /// Erase `len` bytes starting at `addr`
    pub async fn erase_range(&mut self, addr: u32, len: u32) -> Result<()> {
        self.do_command(CMD_ERASE, &erase_params(addr, len), &mut []).await
    }

    /// Program `data` at `addr`
    pub async fn write_range(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if data.len() > self.info.effective_max_write() {
            return Err(BootloaderError::InvalidParameter(format!(
                "write of {} bytes exceeds device maximum {}",
                data.len(),
                self.info.effective_max_write()
            )));
        }

        let mut params = Vec::with_capacity(7 + data.len());
        params.extend_from_slice(&addr_len_params(addr, data.len()));
        params.extend_from_slice(data);
        self.do_command(CMD_WRITE, &params, &mut []).await
    }

    /// Read `buf.len()` bytes starting at `addr`
    pub async fn read_range(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        if buf.len() > self.info.effective_max_read() {
            return Err(BootloaderError::InvalidParameter(format!(
                "read of {} bytes exceeds device maximum {}",
                buf.len(),
                self.info.effective_max_read()
            )));
        }

        let params = addr_len_params(addr, buf.len());
        self.do_command(CMD_READ, &params, buf).await
    }

    /// Ask the bootloader to start the application
    pub async fn reboot(&mut self) -> Result<()> {
        self.do_command(CMD_RESET, &[], &mut []).await?;
        log::debug!("bootloader: Reset requested");
        Ok(())
    }

    // ---- Protocol implementation ----

    /// Synchronize the protocol
    ///
    /// This brings the bootloader to a known waiting-for-command state.
    async fn synchronize(&mut self) -> Result<()> {
        // Try a simple test first
        if self.test_sync().await? {
            return Ok(());
        }

        log::debug!("bootloader: Attempting to synchronize");

        // Send 8 NOPs to reset the parser state
        self.transport.write(&[CMD_NOP; 8], self.io_timeout).await?;

        // Drain any pending data
        let mut buf = [0u8; 512];
        for _ in 0..1024 {
            let n = self
                .transport
                .read_available(&mut buf, Duration::from_millis(10))
                .await?;
            if n == 0 {
                break;
            }
        }

        // Try sync again up to 8 times
        for _ in 0..8 {
            if self.test_sync().await? {
                return Ok(());
            }
        }

        Err(BootloaderError::SyncFailed)
    }

    /// Test synchronization by sending SYNCNOP
    ///
    /// Returns true if synchronized, false if not.
    async fn test_sync(&mut self) -> Result<bool> {
        self.transport.write(&[CMD_SYNCNOP], self.io_timeout).await?;

        // Try to read NAK
        let mut c = [0u8];
        for _ in 0..10 {
            let n = self.read_byte(&mut c, 50).await?;
            if n == 0 || c[0] != S_NAK {
                continue;
            }

            // Got NAK, now expect ACK
            let n = self.read_byte(&mut c, 20).await?;
            if n == 0 || c[0] != S_ACK {
                continue;
            }

            // Send another SYNCNOP to confirm
            self.transport.write(&[CMD_SYNCNOP], self.io_timeout).await?;

            let n = self.read_byte(&mut c, 500).await?;
            if n == 0 || c[0] != S_NAK {
                return Ok(false);
            }

            let n = self.read_byte(&mut c, 100).await?;
            if n == 0 || c[0] != S_ACK {
                return Ok(false);
            }

            return Ok(true);
        }

        Ok(false)
    }

    async fn read_byte(&mut self, c: &mut [u8; 1], timeout_ms: u64) -> Result<usize> {
        Ok(self
            .transport
            .read_available(c, Duration::from_millis(timeout_ms))
            .await?)
    }

    /// Execute a bootloader command
    async fn do_command(&mut self, cmd: u8, params: &[u8], ret_buf: &mut [u8]) -> Result<()> {
        // Check command availability
        if self.auto_check && !self.info.supports_cmd(cmd) {
            log::debug!("bootloader: Command 0x{:02X} not supported", cmd);
            return Err(BootloaderError::CommandNotSupported(cmd));
        }

        let mut frame = Vec::with_capacity(1 + params.len());
        frame.push(cmd);
        frame.extend_from_slice(params);
        self.transport.write(&frame, self.io_timeout).await?;

        // Read response
        let mut response = [0u8];
        self.transport.read(&mut response, self.reply_timeout).await?;

        if response[0] == S_NAK {
            let mut code = [0u8];
            self.transport.read(&mut code, self.reply_timeout).await?;
            return Err(BootloaderError::Nak {
                command: cmd,
                reason: NakReason::from_code(code[0]),
            });
        }

        if response[0] != S_ACK {
            return Err(BootloaderError::InvalidResponse {
                command: cmd,
                response: response[0],
            });
        }

        // Read return data
        if !ret_buf.is_empty() {
            self.transport.read(ret_buf, self.reply_timeout).await?;
        }

        Ok(())
    }

    /// Execute a command and return the result in a fixed-size array
    async fn do_command_ret<const N: usize>(&mut self, cmd: u8) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.do_command(cmd, &[], &mut buf).await?;
        Ok(buf)
    }

    /// Query interface version
    async fn query_iface(&mut self) -> Result<u16> {
        let buf = self.do_command_ret::<2>(CMD_Q_IFACE).await?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Query command map
    async fn query_cmdmap(&mut self) -> Result<CommandMap> {
        let mut cmdmap = CommandMap::new();
        self.do_command(CMD_Q_CMDMAP, &[], &mut cmdmap.bitmap).await?;
        Ok(cmdmap)
    }
}

#[async_trait]
impl<T: Transport> DeviceProtocol for Bootloader<T> {
    fn set_step_timeout(&mut self, timeout: Duration) {
        self.reply_timeout = timeout;
    }

    async fn handshake(&mut self) -> CoreResult<DeviceInfo> {
        self.identify().await.map_err(|e| e.into_core(Step::Handshake))
    }

    async fn erase(&mut self, addr: u32, len: u32) -> CoreResult<()> {
        self.erase_range(addr, len)
            .await
            .map_err(|e| e.into_core(Step::Erase))
    }

    async fn write_chunk(&mut self, addr: u32, data: &[u8]) -> CoreResult<()> {
        self.write_range(addr, data)
            .await
            .map_err(|e| e.into_core(Step::Write))
    }

    async fn read_chunk(&mut self, addr: u32, buf: &mut [u8]) -> CoreResult<()> {
        self.read_range(addr, buf)
            .await
            .map_err(|e| e.into_core(Step::Verify))
    }

    async fn reset(&mut self) -> CoreResult<()> {
        self.reboot()
            .await
            .map_err(|e| CoreError::ProtocolError(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.transport.close().await {
            log::warn!("bootloader: Failed to close transport: {}", e);
        }
    }
}
