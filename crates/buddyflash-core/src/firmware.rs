//! Firmware descriptors and binaries
//!
//! A [`FirmwareDescriptor`] names exactly one binary: a release version or a
//! pull-request build commit, for one target. Version strings coming from
//! the outside are decoded once here and never re-interpreted downstream.

use crate::error::{Error, Result};
use core::fmt;
use sha2::{Digest, Sha256};

/// Prefix marking a pull-request build version string
pub const PR_VERSION_PREFIX: &str = "pr-";

/// Version string the UI uses for a local file, which no remote source holds
pub const LOCAL_VERSION: &str = "local";

/// Number of commit id characters used in artifact file names
pub const SHORT_COMMIT_LEN: usize = 7;

/// Where a firmware binary comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FirmwareSource {
    /// A published release, e.g. `v2.9.0`
    Release {
        /// Release version string
        version: String,
    },
    /// A CI build attached to a pull request commit
    PrBuild {
        /// Pull request identifier
        pr_id: String,
        /// Full commit id
        commit_id: String,
    },
}

impl FirmwareSource {
    /// Decode a version string
    ///
    /// `pr-<prId>@<commitId>` is a pull-request build, anything else is a
    /// release version. Empty parts and the `local` marker are rejected.
    pub fn parse(version: &str) -> Result<Self> {
        let version = version.trim();
        if version.is_empty() {
            return Err(Error::InvalidDescriptor("version is missing".into()));
        }
        if version == LOCAL_VERSION {
            return Err(Error::InvalidDescriptor(
                "local firmware cannot be resolved from a remote source".into(),
            ));
        }

        let Some(encoded) = version.strip_prefix(PR_VERSION_PREFIX) else {
            return Ok(Self::Release {
                version: version.to_string(),
            });
        };

        let (pr_id, commit_id) = encoded.split_once('@').ok_or_else(|| {
            Error::InvalidDescriptor(format!("PR version {version} has no commit id"))
        })?;
        if pr_id.is_empty() || commit_id.is_empty() {
            return Err(Error::InvalidDescriptor(format!(
                "PR version {version} is missing its PR id or commit id"
            )));
        }

        Ok(Self::PrBuild {
            pr_id: pr_id.to_string(),
            commit_id: commit_id.to_string(),
        })
    }

    /// The version component used in artifact names
    ///
    /// Full version string for releases, 7-character commit prefix for PR builds.
    pub fn short_name(&self) -> &str {
        match self {
            Self::Release { version } => version,
            Self::PrBuild { commit_id, .. } => {
                let end = commit_id
                    .char_indices()
                    .nth(SHORT_COMMIT_LEN)
                    .map(|(i, _)| i)
                    .unwrap_or(commit_id.len());
                &commit_id[..end]
            }
        }
    }
}

impl fmt::Display for FirmwareSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Release { version } => write!(f, "{}", version),
            Self::PrBuild { pr_id, commit_id } => {
                write!(f, "{}{}@{}", PR_VERSION_PREFIX, pr_id, commit_id)
            }
        }
    }
}

/// Identifies one firmware binary for one device target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FirmwareDescriptor {
    /// Release or PR build
    pub source: FirmwareSource,
    /// Device target code, e.g. `x9d`
    pub target: String,
}

impl FirmwareDescriptor {
    /// Create a descriptor, rejecting an empty target
    pub fn new(source: FirmwareSource, target: impl Into<String>) -> Result<Self> {
        let target = target.into();
        if target.trim().is_empty() {
            return Err(Error::InvalidDescriptor("target is missing".into()));
        }
        if let FirmwareSource::PrBuild { pr_id, commit_id } = &source {
            if pr_id.is_empty() || commit_id.is_empty() {
                return Err(Error::InvalidDescriptor(
                    "PR build is missing its PR id or commit id".into(),
                ));
            }
        }
        if let FirmwareSource::Release { version } = &source {
            if version.trim().is_empty() {
                return Err(Error::InvalidDescriptor("version is missing".into()));
            }
        }
        Ok(Self { source, target })
    }

    /// Build a descriptor from the optional `target` and `version` fields a
    /// caller supplies
    pub fn from_parts(target: Option<&str>, version: Option<&str>) -> Result<Self> {
        let target = target
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::InvalidDescriptor("target is missing".into()))?;
        let version = version.ok_or_else(|| Error::InvalidDescriptor("version is missing".into()))?;
        Self::new(FirmwareSource::parse(version)?, target.trim())
    }

    /// File name for a saved binary: `{target}-{shortCommitOrVersion}.bin`
    pub fn file_name(&self) -> String {
        format!("{}-{}.bin", self.target, self.source.short_name())
    }
}

impl fmt::Display for FirmwareDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.source, self.target)
    }
}

/// A validated firmware image
///
/// Never mutated once built. Jobs hold their own copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareBinary {
    bytes: Vec<u8>,
    checksum: [u8; 32],
}

impl FirmwareBinary {
    /// Validate a decoded payload
    ///
    /// Fails with [`Error::Corrupt`] if the payload is empty or if
    /// `expected_sha256` is given and does not match.
    pub fn new(bytes: Vec<u8>, expected_sha256: Option<&[u8; 32]>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::Corrupt("decoded payload is empty".into()));
        }

        let checksum: [u8; 32] = Sha256::digest(&bytes).into();
        if let Some(expected) = expected_sha256 {
            if *expected != checksum {
                return Err(Error::Corrupt(format!(
                    "checksum mismatch: expected {}, got {}",
                    hex::encode(expected),
                    hex::encode(checksum)
                )));
            }
        }

        Ok(Self { bytes, checksum })
    }

    /// Raw image bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Image size in bytes
    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// SHA-256 of the image
    pub fn checksum(&self) -> &[u8; 32] {
        &self.checksum
    }

    /// SHA-256 of the image as lowercase hex
    pub fn checksum_hex(&self) -> String {
        hex::encode(self.checksum)
    }
}

/// Parse a 64-character hex SHA-256 digest
pub fn parse_sha256_hex(s: &str) -> Option<[u8; 32]> {
    let mut out = [0u8; 32];
    hex::decode_to_slice(s.trim(), &mut out).ok()?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_release() {
        let source = FirmwareSource::parse("v2.9.0").unwrap();
        assert_eq!(
            source,
            FirmwareSource::Release {
                version: "v2.9.0".into()
            }
        );
    }

    #[test]
    fn test_parse_pr_build() {
        let source = FirmwareSource::parse("pr-2387@3f9c1e2a8b7d").unwrap();
        assert_eq!(
            source,
            FirmwareSource::PrBuild {
                pr_id: "2387".into(),
                commit_id: "3f9c1e2a8b7d".into()
            }
        );
        assert_eq!(source.to_string(), "pr-2387@3f9c1e2a8b7d");
    }

    #[test]
    fn test_parse_rejects_incomplete_versions() {
        for version in ["", "   ", "local", "pr-2387", "pr-@abc", "pr-12@"] {
            let err = FirmwareSource::parse(version).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidDescriptor, "{version:?}");
        }
    }

    #[test]
    fn test_from_parts_requires_target_and_version() {
        let cases = [
            (None, Some("v2.9.0")),
            (Some(""), Some("v2.9.0")),
            (Some("x9d"), None),
            (Some("x9d"), Some("")),
        ];
        for (target, version) in cases {
            let err = FirmwareDescriptor::from_parts(target, version).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidDescriptor);
        }
    }

    #[test]
    fn test_file_name_release_uses_full_version() {
        let desc = FirmwareDescriptor::from_parts(Some("x9d"), Some("v2.9.0")).unwrap();
        assert_eq!(desc.file_name(), "x9d-v2.9.0.bin");
    }

    #[test]
    fn test_file_name_pr_build_uses_short_commit() {
        let desc =
            FirmwareDescriptor::from_parts(Some("tx16s"), Some("pr-2387@3f9c1e2a8b7d")).unwrap();
        assert_eq!(desc.file_name(), "tx16s-3f9c1e2.bin");
    }

    #[test]
    fn test_file_name_short_commit_shorter_than_prefix() {
        let desc = FirmwareDescriptor::from_parts(Some("t12"), Some("pr-1@abc")).unwrap();
        assert_eq!(desc.file_name(), "t12-abc.bin");
    }

    #[test]
    fn test_binary_rejects_empty_payload() {
        let err = FirmwareBinary::new(Vec::new(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn test_binary_checksum() {
        let bin = FirmwareBinary::new(b"abc".to_vec(), None).unwrap();
        assert_eq!(
            bin.checksum_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let expected = parse_sha256_hex(&bin.checksum_hex()).unwrap();
        assert!(FirmwareBinary::new(b"abc".to_vec(), Some(&expected)).is_ok());

        let err = FirmwareBinary::new(b"abd".to_vec(), Some(&expected)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert!(err.to_string().contains("ba7816bf"), "{err}");
    }

    #[test]
    fn test_parse_sha256_hex() {
        let digest = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";
        let parsed = parse_sha256_hex(&format!(" {digest}\n")).unwrap();
        assert_eq!(parsed[0], 0xBA);
        assert_eq!(parsed[31], 0xAD);

        assert!(parse_sha256_hex(&digest[..62]).is_none());
        assert!(parse_sha256_hex(&format!("{digest}00")).is_none());
        assert!(parse_sha256_hex(&digest.replace('B', "g")).is_none());
    }
}
