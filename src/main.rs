//! buddyflash - Radio firmware flasher
//!
//! Fetches a firmware binary for a radio target, either a published release
//! or a PR build, and writes it to the radio's bootloader over a serial port
//! or a TCP bridge.
//!
//! # Architecture
//!
//! Every flash runs as a job in a `JobRegistry`:
//! - **Resolver** - turns target + version into a verified binary, from the
//!   GraphQL API or a local mirror directory
//! - **Connectors** - turn a device id into a bootloader driver
//!   (serial, TCP, or the emulated `dummy` radio)
//! - **Job runner** - connect, erase, write, verify, with per-step deadlines
//!   and cancellation between steps

mod cli;
mod commands;
mod connectors;

use buddyflash_core::flash::StepDeadlines;
use buddyflash_core::FirmwareDescriptor;
use buddyflash_jobs::{
    DirectoryFetcher, FirmwareFetcher, FlashRequest, GraphqlFetcher, JobRegistry, RegistryConfig,
    Resolver, ResolverConfig,
};
use buddyflash_serial::SerialConnector;
use clap::Parser;
use cli::{Cli, Commands, FirmwareArgs};
use connectors::Connectors;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logger, RUST_LOG overrides -v
    logger(env_logger::Env::default(), cli.verbose).init();

    match cli.command {
        Commands::Flash {
            firmware,
            device,
            firmware_dir,
            chunk_size,
            step_timeout_ms,
        } => {
            let resolver = build_resolver(&firmware, firmware_dir.as_deref())?;
            let config = RegistryConfig {
                chunk_size,
                deadlines: step_timeout_ms
                    .map(|ms| StepDeadlines::uniform(Duration::from_millis(ms)))
                    .unwrap_or_default(),
                ..RegistryConfig::default()
            };
            let connectors = Connectors::new(SerialConnector::default());
            let registry = JobRegistry::new(resolver, Arc::new(connectors), config);

            let request = FlashRequest::new(firmware.target, firmware.firmware_version, device);
            commands::run_flash(&registry, &request).await?;
            Ok(())
        }
        Commands::Download {
            firmware,
            output_dir,
        } => {
            let descriptor = FirmwareDescriptor::from_parts(
                Some(&firmware.target),
                Some(&firmware.firmware_version),
            )?;
            let resolver = build_resolver(&firmware, None)?;
            commands::run_download(&resolver, &descriptor, &output_dir).await?;
            Ok(())
        }
        Commands::ListDevices => commands::list_devices(),
        Commands::ListConnectors => {
            commands::list_connectors();
            Ok(())
        }
    }
}

/// Logger whose default level follows the verbosity count
fn logger(env: env_logger::Env<'_>, verbose: u8) -> env_logger::Builder {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env.default_filter_or(level))
}

/// Resolver reading from `firmware_dir` if given, the GraphQL API otherwise
fn build_resolver(
    args: &FirmwareArgs,
    firmware_dir: Option<&Path>,
) -> Result<Arc<Resolver>, Box<dyn std::error::Error>> {
    let config = ResolverConfig {
        api_url: args.api_url.clone(),
        request_timeout: Duration::from_secs(args.request_timeout_secs),
        ..ResolverConfig::default()
    };

    let fetcher: Arc<dyn FirmwareFetcher> = match firmware_dir {
        Some(dir) => {
            log::info!("Using firmware from {}", dir.display());
            Arc::new(DirectoryFetcher::new(dir))
        }
        None => {
            let fetcher = GraphqlFetcher::new(&config)?;
            log::debug!("Using firmware API at {}", fetcher.endpoint());
            Arc::new(fetcher)
        }
    };

    Ok(Arc::new(Resolver::new(fetcher, config.retry_delay)))
}
