//! Bootloader protocol constants and types
//!
//! Every command is a single opcode byte followed by fixed parameters. The
//! device answers `S_ACK` plus return data, or `S_NAK` plus one reason byte.
//! Addresses are 32-bit little-endian, lengths 24-bit little-endian.

/// Protocol version we support
pub const BOOTLOADER_PROTOCOL_VERSION: u16 = 1;

/// ACK response byte
pub const S_ACK: u8 = 0x06;
/// NAK response byte
pub const S_NAK: u8 = 0x15;

// Command opcodes
/// No operation
pub const CMD_NOP: u8 = 0x00;
/// Query interface version
pub const CMD_Q_IFACE: u8 = 0x01;
/// Query supported commands bitmap
pub const CMD_Q_CMDMAP: u8 = 0x02;
/// Query bootloader name
pub const CMD_Q_NAME: u8 = 0x03;
/// Query flash capacity
pub const CMD_Q_CAPACITY: u8 = 0x06;
/// Query maximum write length
pub const CMD_Q_WRMAXLEN: u8 = 0x08;
/// Special no-operation that returns NAK+ACK (for synchronization)
pub const CMD_SYNCNOP: u8 = 0x10;
/// Query maximum read length
pub const CMD_Q_RDMAXLEN: u8 = 0x11;
/// Erase a range: addr u32, len u32
pub const CMD_ERASE: u8 = 0x20;
/// Program a chunk: addr u32, len u24, data
pub const CMD_WRITE: u8 = 0x21;
/// Read a chunk: addr u32, len u24
pub const CMD_READ: u8 = 0x22;
/// Leave the bootloader and boot the application
pub const CMD_RESET: u8 = 0x2F;

// NAK reason codes
/// Command byte not recognized
pub const NAK_UNKNOWN_COMMAND: u8 = 0x01;
/// Address range outside the flash
pub const NAK_OUT_OF_RANGE: u8 = 0x02;
/// Programming failed
pub const NAK_PROGRAM_FAILED: u8 = 0x03;
/// Erase failed
pub const NAK_ERASE_FAILED: u8 = 0x04;

/// Number of bytes in the command map bitmap
pub const CMDMAP_SIZE: usize = 32;

/// Number of bytes in the bootloader name
pub const NAME_SIZE: usize = 16;

/// Largest length a 24-bit field can carry
pub const MAX_U24: usize = (1 << 24) - 1;

/// Commands a bootloader must support for flashing
pub const REQUIRED_COMMANDS: [u8; 4] = [CMD_ERASE, CMD_WRITE, CMD_READ, CMD_Q_CAPACITY];

/// Supported commands bitmap
#[derive(Debug, Clone)]
pub struct CommandMap {
    /// Raw bitmap of supported commands
    pub bitmap: [u8; CMDMAP_SIZE],
}

impl CommandMap {
    /// Create an empty command map
    pub fn new() -> Self {
        Self {
            bitmap: [0; CMDMAP_SIZE],
        }
    }

    /// Check if a command is supported
    pub fn is_supported(&self, cmd: u8) -> bool {
        let byte_idx = (cmd / 8) as usize;
        let bit_idx = cmd % 8;
        (self.bitmap[byte_idx] & (1 << bit_idx)) != 0
    }

    /// Set a command as supported
    pub fn set_supported(&mut self, cmd: u8) {
        let byte_idx = (cmd / 8) as usize;
        let bit_idx = cmd % 8;
        self.bitmap[byte_idx] |= 1 << bit_idx;
    }
}

impl Default for CommandMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Bootloader capabilities discovered during the handshake
#[derive(Debug, Clone)]
pub struct BootloaderInfo {
    /// Bootloader name (up to 16 characters)
    pub name: [u8; NAME_SIZE],
    /// Flash capacity in bytes
    pub capacity: u32,
    /// Maximum write length (0 = 2^24 - 1)
    pub max_write_n: u32,
    /// Maximum read length (0 = 2^24 - 1)
    pub max_read_n: u32,
    /// Supported commands bitmap
    pub cmdmap: CommandMap,
}

impl Default for BootloaderInfo {
    fn default() -> Self {
        Self {
            name: [0; NAME_SIZE],
            capacity: 0,
            max_write_n: 0,
            max_read_n: 0,
            cmdmap: CommandMap::new(),
        }
    }
}

impl BootloaderInfo {
    /// Get the bootloader name as a string
    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(NAME_SIZE);
        core::str::from_utf8(&self.name[..len]).unwrap_or("(invalid)")
    }

    /// Get the effective max write length
    pub fn effective_max_write(&self) -> usize {
        if self.max_write_n == 0 {
            MAX_U24
        } else {
            self.max_write_n as usize
        }
    }

    /// Get the effective max read length
    pub fn effective_max_read(&self) -> usize {
        if self.max_read_n == 0 {
            MAX_U24
        } else {
            self.max_read_n as usize
        }
    }

    /// Check if a command is supported
    pub fn supports_cmd(&self, cmd: u8) -> bool {
        self.cmdmap.is_supported(cmd)
    }
}

/// Encode a 24-bit little-endian length
pub fn u24_le(value: usize) -> [u8; 3] {
    [
        (value & 0xFF) as u8,
        ((value >> 8) & 0xFF) as u8,
        ((value >> 16) & 0xFF) as u8,
    ]
}

/// Convert a 24-bit little-endian value to u32
pub fn u24_to_u32(buf: &[u8; 3]) -> u32 {
    (buf[0] as u32) | ((buf[1] as u32) << 8) | ((buf[2] as u32) << 16)
}

/// Parameters for `CMD_WRITE` / `CMD_READ`: addr u32 + len u24
pub fn addr_len_params(addr: u32, len: usize) -> [u8; 7] {
    let a = addr.to_le_bytes();
    let l = u24_le(len);
    [a[0], a[1], a[2], a[3], l[0], l[1], l[2]]
}

/// Parameters for `CMD_ERASE`: addr u32 + len u32
pub fn erase_params(addr: u32, len: u32) -> [u8; 8] {
    let a = addr.to_le_bytes();
    let l = len.to_le_bytes();
    [a[0], a[1], a[2], a[3], l[0], l[1], l[2], l[3]]
}

/// Number of parameter bytes that follow an opcode, excluding write payload
pub fn param_len(cmd: u8) -> usize {
    match cmd {
        CMD_ERASE => 8,
        CMD_WRITE | CMD_READ => 7,
        _ => 0,
    }
}
