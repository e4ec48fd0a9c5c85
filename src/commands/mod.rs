//! CLI command implementations
//!
//! Flashing always goes through a `JobRegistry`, even for a single job, so
//! the CLI sees the same lifecycle, progress and cancellation as any other
//! caller of `buddyflash-jobs`.

mod download;
mod flash;
mod list;

pub use download::run_download;
pub use flash::run_flash;
pub use list::{list_connectors, list_devices};
