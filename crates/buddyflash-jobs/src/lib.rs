//! buddyflash-jobs - Flash job orchestration
//!
//! This crate turns a firmware request into a running flash job and keeps
//! track of it. The CLI should only interact with types from this crate
//! and `buddyflash-core`, never directly with a transport.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      CLI (bin/buddyflash)                    │
//! │  - create_job / cancel_job / get_status / subscribe          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   buddyflash-jobs (this crate)               │
//! │  - JobRegistry: ids, busy devices, retention                 │
//! │  - JobRunner: one task per job, sole writer of its record    │
//! │  - Resolver: descriptor -> FirmwareBinary, one retry         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┴───────────────┐
//!              ▼                               ▼
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │    buddyflash-core       │   │  Connectors              │
//! │  - flash() sequence      │   │  - serial / TCP          │
//! │  - FlashJob, JobState    │   │  - dummy radio           │
//! │  - error taxonomy        │   │                          │
//! └──────────────────────────┘   └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use buddyflash_jobs::{FlashRequest, GraphqlFetcher, JobRegistry, Resolver};
//!
//! let fetcher = Arc::new(GraphqlFetcher::new(&ResolverConfig::default())?);
//! let resolver = Arc::new(Resolver::new(fetcher, Duration::from_secs(1)));
//! let registry = JobRegistry::new(resolver, Arc::new(SerialConnector::default()), Default::default());
//!
//! let id = registry
//!     .create_job(&FlashRequest::new("x9d", "v2.9.0", "dev=/dev/ttyACM0"))
//!     .await?;
//! let mut updates = registry.subscribe(id)?;
//! let job = updates.wait_for(|j| j.is_terminal()).await?.clone();
//! ```

pub mod config;
pub mod graphql;
mod machine;
pub mod mirror;
pub mod registry;
pub mod resolver;

pub use config::{RegistryConfig, ResolverConfig, DEFAULT_API_URL};
pub use graphql::GraphqlFetcher;
pub use mirror::DirectoryFetcher;
pub use registry::{FlashRequest, JobRegistry};
pub use resolver::{FetchError, FetchedFirmware, FirmwareFetcher, Resolver};
