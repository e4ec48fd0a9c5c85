//! Firmware source resolution
//!
//! A [`FirmwareFetcher`] knows how to reach one remote source. The
//! [`Resolver`] wraps it with the retry policy and turns raw payloads into
//! validated [`FirmwareBinary`] values.

use async_trait::async_trait;
use buddyflash_core::error::{Error, Result};
use buddyflash_core::{FirmwareBinary, FirmwareDescriptor};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a [`FirmwareFetcher`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The source has no artifact for the descriptor
    #[error("no firmware published for {0}")]
    NotFound(String),

    /// A failure that may go away if the request is repeated
    #[error("{0}")]
    Transient(String),

    /// A failure that repeating the request will not fix
    #[error("{0}")]
    Fatal(String),

    /// The payload arrived but could not be decoded
    #[error("{0}")]
    Corrupt(String),
}

impl From<FetchError> for Error {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::NotFound(what) => {
                Error::NotFound(format!("no firmware published for {}", what))
            }
            FetchError::Transient(reason) | FetchError::Fatal(reason) => Error::Unavailable(reason),
            FetchError::Corrupt(reason) => Error::Corrupt(reason),
        }
    }
}

/// Raw payload returned by a fetcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFirmware {
    /// Decoded image bytes
    pub bytes: Vec<u8>,
    /// SHA-256 digest published with the image, if any
    pub sha256: Option<[u8; 32]>,
}

/// Fetches the raw bytes for a firmware descriptor from one source
#[async_trait]
pub trait FirmwareFetcher: Send + Sync {
    /// Fetch the image described by `descriptor`
    async fn fetch(
        &self,
        descriptor: &FirmwareDescriptor,
    ) -> core::result::Result<FetchedFirmware, FetchError>;
}

/// Resolves descriptors to validated binaries
pub struct Resolver {
    fetcher: Arc<dyn FirmwareFetcher>,
    retry_delay: Duration,
}

impl Resolver {
    /// Create a resolver around `fetcher`
    pub fn new(fetcher: Arc<dyn FirmwareFetcher>, retry_delay: Duration) -> Self {
        Self {
            fetcher,
            retry_delay,
        }
    }

    /// Fetch and validate the binary for `descriptor`
    ///
    /// A transient failure is retried once after the retry delay. A second
    /// transient failure surfaces as [`Error::Unavailable`].
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the source has no matching artifact
    /// - [`Error::Corrupt`] if the payload is empty, undecodable or fails
    ///   its checksum
    /// - [`Error::Unavailable`] if the source could not be reached
    pub async fn resolve(&self, descriptor: &FirmwareDescriptor) -> Result<FirmwareBinary> {
        let fetched = match self.fetcher.fetch(descriptor).await {
            Err(FetchError::Transient(reason)) => {
                log::warn!(
                    "resolver: fetching {} failed ({}), retrying in {:?}",
                    descriptor,
                    reason,
                    self.retry_delay
                );
                tokio::time::sleep(self.retry_delay).await;
                self.fetcher.fetch(descriptor).await
            }
            other => other,
        }?;

        let binary = FirmwareBinary::new(fetched.bytes, fetched.sha256.as_ref())?;
        log::info!(
            "resolver: {} is {} bytes (sha256 {})",
            descriptor,
            binary.size_bytes(),
            binary.checksum_hex()
        );
        Ok(binary)
    }

    /// Resolve `descriptor` and name the artifact for saving
    ///
    /// Returns `{target}-{shortCommitOrVersion}.bin` with the binary.
    pub async fn download(
        &self,
        descriptor: &FirmwareDescriptor,
    ) -> Result<(String, FirmwareBinary)> {
        let binary = self.resolve(descriptor).await?;
        Ok((descriptor.file_name(), binary))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use buddyflash_core::ErrorKind;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-process firmware source
    #[derive(Default)]
    pub(crate) struct FakeFetcher {
        images: Mutex<HashMap<String, FetchedFirmware>>,
        failures: Mutex<VecDeque<FetchError>>,
        delay: Mutex<Duration>,
        pub calls: AtomicUsize,
    }

    impl FakeFetcher {
        pub fn with_image(version: &str, target: &str, bytes: Vec<u8>) -> Self {
            let fetcher = Self::default();
            fetcher.publish(version, target, bytes);
            fetcher
        }

        pub fn publish(&self, version: &str, target: &str, bytes: Vec<u8>) {
            let desc = FirmwareDescriptor::from_parts(Some(target), Some(version)).unwrap();
            self.images.lock().insert(
                desc.to_string(),
                FetchedFirmware {
                    bytes,
                    sha256: None,
                },
            );
        }

        pub fn publish_raw(&self, descriptor: &FirmwareDescriptor, fetched: FetchedFirmware) {
            self.images.lock().insert(descriptor.to_string(), fetched);
        }

        pub fn fail_next(&self, error: FetchError) {
            self.failures.lock().push_back(error);
        }

        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock() = delay;
        }
    }

    #[async_trait]
    impl FirmwareFetcher for FakeFetcher {
        async fn fetch(
            &self,
            descriptor: &FirmwareDescriptor,
        ) -> core::result::Result<FetchedFirmware, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(error) = self.failures.lock().pop_front() {
                return Err(error);
            }
            self.images
                .lock()
                .get(&descriptor.to_string())
                .cloned()
                .ok_or_else(|| FetchError::NotFound(descriptor.to_string()))
        }
    }

    fn descriptor() -> FirmwareDescriptor {
        FirmwareDescriptor::from_parts(Some("x9d"), Some("v2.9.0")).unwrap()
    }

    fn resolver(fetcher: &Arc<FakeFetcher>) -> Resolver {
        Resolver::new(fetcher.clone(), Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_release() {
        let fetcher = Arc::new(FakeFetcher::with_image("v2.9.0", "x9d", vec![1, 2, 3]));
        let binary = resolver(&fetcher).resolve(&descriptor()).await.unwrap();
        assert_eq!(binary.bytes(), &[1, 2, 3]);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried_once() {
        let fetcher = Arc::new(FakeFetcher::with_image("v2.9.0", "x9d", vec![1, 2, 3]));
        fetcher.fail_next(FetchError::Transient("connection reset".into()));
        let binary = resolver(&fetcher).resolve(&descriptor()).await.unwrap();
        assert_eq!(binary.size_bytes(), 3);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_transient_failure_is_unavailable() {
        let fetcher = Arc::new(FakeFetcher::with_image("v2.9.0", "x9d", vec![1, 2, 3]));
        fetcher.fail_next(FetchError::Transient("HTTP 503".into()));
        fetcher.fail_next(FetchError::Transient("HTTP 503".into()));
        fetcher.fail_next(FetchError::Transient("HTTP 503".into()));
        let err = resolver(&fetcher).resolve(&descriptor()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(err.to_string().contains("HTTP 503"), "{err}");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let fetcher = Arc::new(FakeFetcher::default());
        let err = resolver(&fetcher).resolve(&descriptor()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_is_not_retried() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.fail_next(FetchError::Fatal("HTTP 400 Bad Request".into()));
        let err = resolver(&fetcher).resolve(&descriptor()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_payload_is_corrupt() {
        let fetcher = Arc::new(FakeFetcher::with_image("v2.9.0", "x9d", Vec::new()));
        let err = resolver(&fetcher).resolve(&descriptor()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checksum_mismatch_is_corrupt() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.publish_raw(
            &descriptor(),
            FetchedFirmware {
                bytes: vec![1, 2, 3],
                sha256: Some([0u8; 32]),
            },
        );
        let err = resolver(&fetcher).resolve(&descriptor()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_names_pr_build() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.publish("pr-1234@3f9c1e2a77d0", "tx16s", vec![0xAA; 16]);
        let desc =
            FirmwareDescriptor::from_parts(Some("tx16s"), Some("pr-1234@3f9c1e2a77d0")).unwrap();
        let (name, binary) = resolver(&fetcher).download(&desc).await.unwrap();
        assert_eq!(name, "tx16s-3f9c1e2.bin");
        assert_eq!(binary.size_bytes(), 16);
    }
}
