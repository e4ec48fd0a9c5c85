//! Registry and resolver configuration

use buddyflash_core::flash::{FlashOptions, StepDeadlines, DEFAULT_CHUNK_SIZE};
use std::time::Duration;

/// GraphQL endpoint used when none is configured
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:4000/graphql";

/// Job registry settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Preferred chunk size for writes and verify reads
    pub chunk_size: usize,
    /// Per-step deadlines
    pub deadlines: StepDeadlines,
    /// How long a finished job stays queryable before it is evicted
    pub retention: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            deadlines: StepDeadlines::default(),
            retention: Duration::from_secs(10 * 60),
        }
    }
}

impl RegistryConfig {
    /// Options handed to each flashing run
    pub fn flash_options(&self) -> FlashOptions {
        FlashOptions {
            chunk_size: self.chunk_size,
            deadlines: self.deadlines,
        }
    }
}

/// Firmware source settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// GraphQL endpoint serving firmware bundles
    pub api_url: String,
    /// Timeout for one HTTP request
    pub request_timeout: Duration,
    /// Pause before the single retry after a transient failure
    pub retry_delay: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(1),
        }
    }
}
