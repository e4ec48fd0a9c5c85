//! Local firmware mirror
//!
//! Serves binaries that were saved earlier by a download, looked up by the
//! artifact file name in one directory.

use crate::resolver::{FetchError, FetchedFirmware, FirmwareFetcher};
use async_trait::async_trait;
use buddyflash_core::FirmwareDescriptor;
use std::path::{Path, PathBuf};

/// Fetches firmware from a directory of saved artifacts
pub struct DirectoryFetcher {
    dir: PathBuf,
}

impl DirectoryFetcher {
    /// Serve files from `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory files are read from
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl FirmwareFetcher for DirectoryFetcher {
    async fn fetch(
        &self,
        descriptor: &FirmwareDescriptor,
    ) -> core::result::Result<FetchedFirmware, FetchError> {
        let path = self.dir.join(descriptor.file_name());
        log::debug!("resolver: reading {}", path.display());
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(FetchedFirmware {
                bytes,
                sha256: None,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(format!("{} ({})", descriptor, path.display())))
            }
            Err(e) => Err(FetchError::Fatal(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_artifact_by_file_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x9d-v2.9.0.bin"), [7u8; 32]).unwrap();

        let fetcher = DirectoryFetcher::new(dir.path());
        let release = FirmwareDescriptor::from_parts(Some("x9d"), Some("v2.9.0")).unwrap();
        assert_eq!(fetcher.fetch(&release).await.unwrap().bytes, vec![7u8; 32]);

        let missing = FirmwareDescriptor::from_parts(Some("x9d"), Some("v2.10.0")).unwrap();
        assert!(matches!(
            fetcher.fetch(&missing).await,
            Err(FetchError::NotFound(_))
        ));
    }
}
