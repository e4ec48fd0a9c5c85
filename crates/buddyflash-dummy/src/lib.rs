//! buddyflash-dummy - In-memory radio emulator for testing
//!
//! This crate provides a dummy radio that speaks the bootloader byte
//! protocol against flash kept in memory. It's useful for testing and
//! development without real hardware. The real [`Bootloader`] driver runs
//! on top of it unchanged, and faults can be injected while a job runs.

use async_trait::async_trait;
use buddyflash_core::error::{Error, Result};
use buddyflash_core::{DeviceConnector, DeviceProtocol, Transport, TransportError, TransportResult};
use buddyflash_serial::protocol::*;
use buddyflash_serial::Bootloader;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the dummy radio
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Bootloader name reported during the handshake
    pub name: String,
    /// Flash size in bytes
    pub capacity: usize,
    /// Largest chunk accepted by a write command
    pub max_write_len: usize,
    /// Largest chunk returned by a read command
    pub max_read_len: usize,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            name: "dummy-radio".to_string(),
            capacity: 2 * 1024 * 1024,
            max_write_len: 1024,
            max_read_len: 4096,
        }
    }
}

/// Faults the dummy radio can be told to produce
#[derive(Debug, Clone, Default)]
pub struct DummyFaults {
    /// Swallow all input and never answer
    pub silent: bool,
    /// Answer NAK to a write that covers this address
    pub nak_write_at: Option<u32>,
    /// Flip the lowest bit of this byte right after it is programmed
    pub corrupt_at: Option<usize>,
    /// Delay before each response becomes readable
    pub latency: Duration,
}

struct RadioState {
    config: DummyConfig,
    data: Vec<u8>,
    faults: DummyFaults,
    input: Vec<u8>,
    output: VecDeque<u8>,
    response_pending: bool,
    open: bool,
    writes: usize,
    resets: usize,
}

impl RadioState {
    fn command_map(&self) -> CommandMap {
        let mut cmdmap = CommandMap::new();
        for cmd in [
            CMD_NOP,
            CMD_Q_IFACE,
            CMD_Q_CMDMAP,
            CMD_Q_NAME,
            CMD_Q_CAPACITY,
            CMD_Q_WRMAXLEN,
            CMD_SYNCNOP,
            CMD_Q_RDMAXLEN,
            CMD_ERASE,
            CMD_WRITE,
            CMD_READ,
            CMD_RESET,
        ] {
            cmdmap.set_supported(cmd);
        }
        cmdmap
    }

    fn ack(&mut self, payload: &[u8]) {
        self.output.push_back(S_ACK);
        self.output.extend(payload.iter().copied());
    }

    fn nak(&mut self, reason: u8) {
        self.output.push_back(S_NAK);
        self.output.push_back(reason);
    }

    fn in_range(&self, addr: usize, len: usize) -> bool {
        addr.checked_add(len).is_some_and(|end| end <= self.data.len())
    }

    /// Feed host bytes into the command parser
    fn receive(&mut self, bytes: &[u8]) {
        if self.faults.silent {
            return;
        }
        self.input.extend_from_slice(bytes);
        while let Some(consumed) = self.process_one() {
            self.input.drain(..consumed);
        }
    }

    /// Execute the first complete command in the input buffer
    ///
    /// Returns the number of bytes consumed, or `None` if the command is
    /// still incomplete.
    fn process_one(&mut self) -> Option<usize> {
        let cmd = *self.input.first()?;
        let header = 1 + param_len(cmd);
        if self.input.len() < header {
            return None;
        }
        let params = self.input[1..header].to_vec();

        match cmd {
            CMD_NOP => {}
            CMD_SYNCNOP => {
                self.output.push_back(S_NAK);
                self.output.push_back(S_ACK);
            }
            CMD_Q_IFACE => self.ack(&BOOTLOADER_PROTOCOL_VERSION.to_le_bytes()),
            CMD_Q_CMDMAP => {
                let cmdmap = self.command_map();
                self.ack(&cmdmap.bitmap);
            }
            CMD_Q_NAME => {
                let mut name = [0u8; NAME_SIZE];
                let len = self.config.name.len().min(NAME_SIZE);
                name[..len].copy_from_slice(&self.config.name.as_bytes()[..len]);
                self.ack(&name);
            }
            CMD_Q_CAPACITY => self.ack(&(self.config.capacity as u32).to_le_bytes()),
            CMD_Q_WRMAXLEN => self.ack(&u24_le(self.config.max_write_len)),
            CMD_Q_RDMAXLEN => self.ack(&u24_le(self.config.max_read_len)),
            CMD_ERASE => {
                let addr = u32::from_le_bytes([params[0], params[1], params[2], params[3]]);
                let len = u32::from_le_bytes([params[4], params[5], params[6], params[7]]);
                self.handle_erase(addr as usize, len as usize);
            }
            CMD_WRITE => {
                let (addr, len) = decode_addr_len(&params);
                if self.input.len() < header + len {
                    return None;
                }
                let data = self.input[header..header + len].to_vec();
                self.handle_write(addr, &data);
                return Some(header + len);
            }
            CMD_READ => {
                let (addr, len) = decode_addr_len(&params);
                self.handle_read(addr, len);
            }
            CMD_RESET => {
                self.resets += 1;
                log::debug!("dummy: Reset requested");
                self.ack(&[]);
            }
            _ => self.nak(NAK_UNKNOWN_COMMAND),
        }

        Some(header)
    }

    fn handle_erase(&mut self, addr: usize, len: usize) {
        if !self.in_range(addr, len) {
            self.nak(NAK_OUT_OF_RANGE);
            return;
        }
        // Erase sets all bytes to 0xFF
        self.data[addr..addr + len].fill(0xFF);
        self.ack(&[]);
    }

    fn handle_write(&mut self, addr: usize, data: &[u8]) {
        if data.len() > self.config.max_write_len || !self.in_range(addr, data.len()) {
            self.nak(NAK_OUT_OF_RANGE);
            return;
        }
        if let Some(bad) = self.faults.nak_write_at {
            let bad = bad as usize;
            if bad >= addr && bad < addr + data.len() {
                self.nak(NAK_PROGRAM_FAILED);
                return;
            }
        }

        // Flash programming: can only change 1 -> 0
        for (i, &byte) in data.iter().enumerate() {
            self.data[addr + i] &= byte;
        }
        if let Some(offset) = self.faults.corrupt_at {
            if offset >= addr && offset < addr + data.len() {
                self.data[offset] ^= 0x01;
            }
        }

        self.writes += 1;
        self.ack(&[]);
    }

    fn handle_read(&mut self, addr: usize, len: usize) {
        if len > self.config.max_read_len || !self.in_range(addr, len) {
            self.nak(NAK_OUT_OF_RANGE);
            return;
        }
        let data = self.data[addr..addr + len].to_vec();
        self.ack(&data);
    }
}

fn decode_addr_len(params: &[u8]) -> (usize, usize) {
    let addr = u32::from_le_bytes([params[0], params[1], params[2], params[3]]);
    let len = u24_to_u32(&[params[4], params[5], params[6]]);
    (addr as usize, len as usize)
}

/// Handle to one emulated radio
///
/// Clones share the same flash and fault settings, so a test can keep a
/// handle while a job drives the radio through a [`DummyTransport`].
#[derive(Clone)]
pub struct DummyRadio {
    state: Arc<Mutex<RadioState>>,
}

impl DummyRadio {
    /// Create a new radio with the given configuration
    pub fn new(config: DummyConfig) -> Self {
        let data = vec![0xFF; config.capacity];
        Self {
            state: Arc::new(Mutex::new(RadioState {
                config,
                data,
                faults: DummyFaults::default(),
                input: Vec::new(),
                output: VecDeque::new(),
                response_pending: false,
                open: false,
                writes: 0,
                resets: 0,
            })),
        }
    }

    /// Create a new radio with default configuration
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Open a transport to this radio
    pub fn open(&self) -> DummyTransport {
        let mut state = self.state.lock();
        state.input.clear();
        state.output.clear();
        state.response_pending = false;
        state.open = true;
        DummyTransport {
            radio: self.clone(),
            closed: false,
        }
    }

    /// Copy of the flash contents
    pub fn data(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }

    /// Copy of the first `len` bytes of flash
    pub fn read(&self, len: usize) -> Vec<u8> {
        let state = self.state.lock();
        state.data[..len.min(state.data.len())].to_vec()
    }

    /// Replace the fault settings
    pub fn set_faults(&self, faults: DummyFaults) {
        self.state.lock().faults = faults;
    }

    /// Start or stop answering
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().faults.silent = silent;
    }

    /// Set the delay before each response
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().faults.latency = latency;
    }

    /// Flip the lowest bit of an already programmed byte
    pub fn corrupt_byte(&self, offset: usize) {
        let mut state = self.state.lock();
        if let Some(byte) = state.data.get_mut(offset) {
            *byte ^= 0x01;
        }
    }

    /// Whether a transport to this radio is currently open
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Number of successful write commands
    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    /// Number of reset commands received
    pub fn reset_count(&self) -> usize {
        self.state.lock().resets
    }
}

/// Byte-level link to a [`DummyRadio`]
pub struct DummyTransport {
    radio: DummyRadio,
    closed: bool,
}

impl DummyTransport {
    fn check_open(&self) -> TransportResult<()> {
        if self.closed {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    /// Apply response latency once per command
    ///
    /// Returns false if the latency exceeds `timeout`.
    async fn wait_for_response(&self, timeout: Duration) -> bool {
        let latency = {
            let mut state = self.radio.state.lock();
            if !state.response_pending {
                return true;
            }
            state.response_pending = false;
            state.faults.latency
        };
        if latency.is_zero() {
            return true;
        }
        tokio::time::sleep(latency.min(timeout)).await;
        latency <= timeout
    }
}

#[async_trait]
impl Transport for DummyTransport {
    async fn write(&mut self, data: &[u8], _timeout: Duration) -> TransportResult<()> {
        self.check_open()?;
        let mut state = self.radio.state.lock();
        state.receive(data);
        state.response_pending = true;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> TransportResult<()> {
        self.check_open()?;
        if !self.wait_for_response(timeout).await {
            return Err(TransportError::Timeout);
        }
        {
            let len = buf.len();
            let mut state = self.radio.state.lock();
            if state.output.len() >= len {
                for (dst, src) in buf.iter_mut().zip(state.output.drain(..len)) {
                    *dst = src;
                }
                return Ok(());
            }
        }
        // Nothing more is coming until the host writes again
        tokio::time::sleep(timeout).await;
        Err(TransportError::Timeout)
    }

    async fn read_available(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        self.check_open()?;
        if !self.wait_for_response(timeout).await {
            return Ok(0);
        }
        {
            let mut state = self.radio.state.lock();
            let n = buf.len().min(state.output.len());
            if n > 0 {
                for (dst, src) in buf.iter_mut().zip(state.output.drain(..n)) {
                    *dst = src;
                }
                return Ok(n);
            }
        }
        tokio::time::sleep(timeout).await;
        Ok(0)
    }

    async fn close(&mut self) -> TransportResult<()> {
        if !self.closed {
            self.closed = true;
            self.radio.state.lock().open = false;
        }
        Ok(())
    }
}

/// Opens bootloader drivers for emulated radios by device id
///
/// Radios are created on first use. Unplugged ids fail to open.
#[derive(Clone)]
pub struct DummyConnector {
    config: DummyConfig,
    radios: Arc<Mutex<HashMap<String, DummyRadio>>>,
    unplugged: Arc<Mutex<HashSet<String>>>,
}

impl DummyConnector {
    /// Create a connector whose radios use `config`
    pub fn new(config: DummyConfig) -> Self {
        Self {
            config,
            radios: Arc::new(Mutex::new(HashMap::new())),
            unplugged: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Handle to the radio for `device_id`, creating it if needed
    pub fn radio(&self, device_id: &str) -> DummyRadio {
        self.radios
            .lock()
            .entry(device_id.to_string())
            .or_insert_with(|| DummyRadio::new(self.config.clone()))
            .clone()
    }

    /// Make `device_id` fail to open
    pub fn unplug(&self, device_id: &str) {
        self.unplugged.lock().insert(device_id.to_string());
    }

    /// Make `device_id` openable again
    pub fn plug(&self, device_id: &str) {
        self.unplugged.lock().remove(device_id);
    }
}

impl Default for DummyConnector {
    fn default() -> Self {
        Self::new(DummyConfig::default())
    }
}

#[async_trait]
impl DeviceConnector for DummyConnector {
    async fn connect(&self, device_id: &str) -> Result<Box<dyn DeviceProtocol>> {
        if device_id.trim().is_empty() {
            return Err(Error::InvalidDescriptor("empty device id".into()));
        }
        if self.unplugged.lock().contains(device_id) {
            return Err(Error::NotFound(format!("device {}", device_id)));
        }
        log::debug!("dummy: Opening emulated radio {}", device_id);
        let transport = self.radio(device_id).open();
        Ok(Box::new(Bootloader::new(transport)))
    }
}
