//! GraphQL firmware source
//!
//! Firmware bundles are served by a GraphQL API. Each bundle holds one
//! base64-encoded binary per target. Releases are looked up by version,
//! PR builds by PR id and commit id.

use crate::config::ResolverConfig;
use crate::resolver::{FetchError, FetchedFirmware, FirmwareFetcher};
use async_trait::async_trait;
use base64::Engine;
use buddyflash_core::error::{Error, Result};
use buddyflash_core::{FirmwareDescriptor, FirmwareSource};
use serde::Deserialize;
use serde_json::{json, Value};

const RELEASE_QUERY: &str = r#"
query ReleaseFirmwareData($version: ID!, $target: ID!) {
  edgeTxRelease(id: $version) {
    id
    firmwareBundle {
      id
      target(code: $target) {
        id
        base64Data
      }
    }
  }
}
"#;

const PR_BUILD_QUERY: &str = r#"
query PrBuildFirmwareData($prId: ID!, $commitId: ID!, $target: ID!) {
  edgeTxPr(id: $prId) {
    id
    commit(id: $commitId) {
      id
      firmwareBundle {
        id
        target(code: $target) {
          id
          base64Data
        }
      }
    }
  }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

/// Fetches firmware from the GraphQL API
pub struct GraphqlFetcher {
    client: reqwest::Client,
    endpoint: String,
}

impl GraphqlFetcher {
    /// Create a fetcher for the endpoint in `config`
    pub fn new(config: &ResolverConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: config.api_url.clone(),
        })
    }

    /// The endpoint requests go to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Request body for `descriptor`
fn request_body(descriptor: &FirmwareDescriptor) -> Value {
    match &descriptor.source {
        FirmwareSource::Release { version } => json!({
            "operationName": "ReleaseFirmwareData",
            "query": RELEASE_QUERY,
            "variables": { "version": version, "target": descriptor.target },
        }),
        FirmwareSource::PrBuild { pr_id, commit_id } => json!({
            "operationName": "PrBuildFirmwareData",
            "query": PR_BUILD_QUERY,
            "variables": {
                "prId": pr_id,
                "commitId": commit_id,
                "target": descriptor.target,
            },
        }),
    }
}

/// Where the payload sits in the response data
fn payload_pointer(source: &FirmwareSource) -> &'static str {
    match source {
        FirmwareSource::Release { .. } => "/edgeTxRelease/firmwareBundle/target/base64Data",
        FirmwareSource::PrBuild { .. } => "/edgeTxPr/commit/firmwareBundle/target/base64Data",
    }
}

/// Pull the binary for `descriptor` out of a GraphQL response
fn decode_response(
    response: GraphqlResponse,
    descriptor: &FirmwareDescriptor,
) -> core::result::Result<FetchedFirmware, FetchError> {
    if !response.errors.is_empty() {
        let messages: Vec<_> = response.errors.into_iter().map(|e| e.message).collect();
        return Err(FetchError::Fatal(format!(
            "firmware API returned errors: {}",
            messages.join("; ")
        )));
    }

    let encoded = response
        .data
        .as_ref()
        .and_then(|data| data.pointer(payload_pointer(&descriptor.source)))
        .and_then(Value::as_str)
        .ok_or_else(|| FetchError::NotFound(descriptor.to_string()))?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| FetchError::Corrupt(format!("firmware payload is not valid base64: {}", e)))?;

    Ok(FetchedFirmware {
        bytes,
        sha256: None,
    })
}

fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() || e.is_connect() {
        FetchError::Transient(format!("firmware API unreachable: {}", e))
    } else {
        FetchError::Fatal(format!("firmware API request failed: {}", e))
    }
}

#[async_trait]
impl FirmwareFetcher for GraphqlFetcher {
    async fn fetch(
        &self,
        descriptor: &FirmwareDescriptor,
    ) -> core::result::Result<FetchedFirmware, FetchError> {
        log::debug!("resolver: querying {} for {}", self.endpoint, descriptor);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request_body(descriptor))
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::Transient(format!(
                "firmware API returned HTTP {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(FetchError::Fatal(format!(
                "firmware API returned HTTP {}",
                status
            )));
        }

        let body: GraphqlResponse = response.json().await.map_err(classify)?;
        decode_response(body, descriptor)
    }
}
