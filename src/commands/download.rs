//! Download command implementation

use buddyflash_core::FirmwareDescriptor;
use buddyflash_jobs::Resolver;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fetch a binary and save it under its artifact name in `output_dir`
pub async fn run_download(
    resolver: &Resolver,
    descriptor: &FirmwareDescriptor,
    output_dir: &Path,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Fetching {}...", descriptor));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let (name, binary) = match resolver.download(descriptor).await {
        Ok(found) => found,
        Err(e) => {
            spinner.abandon_with_message("Fetch failed");
            return Err(e.into());
        }
    };
    spinner.finish_with_message(format!("Fetched {} bytes", binary.size_bytes()));

    tokio::fs::create_dir_all(output_dir).await?;
    let path = output_dir.join(&name);
    tokio::fs::write(&path, binary.bytes()).await?;

    println!("Saved {}", path.display());
    println!("  size:   {} bytes", binary.size_bytes());
    println!("  sha256: {}", binary.checksum_hex());

    Ok(path)
}
