//! CLI argument definitions

use crate::connectors;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Generate dynamic help text for the device argument
fn device_help() -> String {
    format!(
        "Device to flash [forms: {}]",
        connectors::device_forms_short()
    )
}

#[derive(Parser)]
#[command(author, version, about = "Radio firmware flasher", long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Which firmware to fetch
#[derive(Args, Clone)]
pub struct FirmwareArgs {
    /// Target code of the radio (e.g. x9d, tx16s)
    #[arg(short, long)]
    pub target: String,

    /// Release version (e.g. v2.9.0) or PR build as pr-<id>@<commit>
    #[arg(long = "firmware-version", visible_alias = "fw")]
    pub firmware_version: String,

    /// GraphQL endpoint serving firmware bundles
    #[arg(long, env = "BUDDYFLASH_API_URL", default_value = buddyflash_jobs::DEFAULT_API_URL)]
    pub api_url: String,

    /// Timeout for one firmware API request in seconds
    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch firmware and write it to a radio
    Flash {
        #[command(flatten)]
        firmware: FirmwareArgs,

        #[arg(short, long, help = device_help())]
        device: String,

        /// Read firmware from this directory instead of the API
        #[arg(long)]
        firmware_dir: Option<PathBuf>,

        /// Preferred write/verify chunk size in bytes
        #[arg(long, default_value_t = 4096)]
        chunk_size: usize,

        /// Deadline for each bootloader step in milliseconds
        /// (overrides the per-step defaults)
        #[arg(long)]
        step_timeout_ms: Option<u64>,
    },

    /// Fetch firmware and save it to a file
    Download {
        #[command(flatten)]
        firmware: FirmwareArgs,

        /// Directory to write the binary into
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// List serial ports that may have a radio attached
    ListDevices,

    /// List supported device connectors
    ListConnectors,
}
