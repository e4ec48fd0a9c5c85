//! buddyflash-core - Core library for radio firmware flashing
//!
//! This crate holds everything the flashing engine agrees on, independent of
//! how a device is reached or where firmware comes from:
//!
//! - [`firmware`] - firmware descriptors, version decoding, validated binaries
//! - [`job`] - job ids, the job state machine and job snapshots
//! - [`transport`] - the byte-level [`Transport`] trait
//! - [`protocol`] - the step-level [`DeviceProtocol`] driver trait
//! - [`flash`] - the handshake/erase/write/verify sequence
//!
//! # Example
//!
//! ```ignore
//! use buddyflash_core::flash::{flash, FlashOptions, NoObserver};
//! use tokio_util::sync::CancellationToken;
//!
//! let mut driver = connector.connect("dev=/dev/ttyACM0").await?;
//! let stats = flash(
//!     driver.as_mut(),
//!     &binary,
//!     &mut NoObserver,
//!     &CancellationToken::new(),
//!     &FlashOptions::default(),
//! )
//! .await?;
//! println!("Wrote {} bytes", stats.bytes_written);
//! ```

#![warn(rust_2018_idioms)]

pub mod error;
pub mod firmware;
pub mod flash;
pub mod job;
pub mod protocol;
pub mod transport;

pub use error::{Error, ErrorKind, Result, Step};
pub use firmware::{FirmwareBinary, FirmwareDescriptor, FirmwareSource};
pub use job::{FlashJob, JobError, JobId, JobState};
pub use protocol::{DeviceConnector, DeviceInfo, DeviceProtocol};
pub use transport::{Transport, TransportError, TransportResult};
