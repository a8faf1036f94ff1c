//! WORM upload: proxy mode (control plane is the target) and direct mode
//! (appliance uploads straight to an Object-Locked S3 bucket). Spec §4.7,
//! §6.

use crate::registry::UploadRegistry;
use haven_types::{AgentError, EvidenceBundle};
use std::time::Duration;

pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_ATTEMPTS_PER_CYCLE: u32 = 3;
pub const MINIMUM_RETENTION_DAYS: u32 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WormMode {
    Proxy,
    Direct,
}

#[derive(Debug, Clone)]
pub struct DirectUploadConfig {
    pub bucket: String,
    pub region: String,
    pub retention_days: u32,
}

impl DirectUploadConfig {
    /// Object Lock configuration errors are fatal for direct mode (spec
    /// §4.7) — validated eagerly so a misconfigured bucket never silently
    /// accepts an upload it can't actually protect.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.retention_days < MINIMUM_RETENTION_DAYS {
            return Err(AgentError::configuration(format!(
                "WORM retention of {} days is below the required minimum of {}",
                self.retention_days, MINIMUM_RETENTION_DAYS
            )));
        }
        if self.bucket.is_empty() {
            return Err(AgentError::configuration("WORM_S3_BUCKET is required in direct mode"));
        }
        Ok(())
    }

    fn object_key(&self, site_id: &str, when: chrono::DateTime<chrono::Utc>, bundle_id: &str, ext: &str) -> String {
        format!(
            "evidence/{}/{}/{}/{}.{}",
            site_id,
            when.format("%Y"),
            when.format("%m"),
            bundle_id,
            ext
        )
    }
}

/// Abstraction over the two WORM delivery paths so the upload worker (in
/// `haven-orchestrator`) doesn't need to know which mode is active.
#[async_trait::async_trait]
pub trait WormUploader: Send + Sync {
    async fn upload(&self, bundle: &EvidenceBundle, json_bytes: &[u8]) -> Result<String, AgentError>;
}

/// Proxy mode: posts the bundle JSON + `.sig` as multipart to the control
/// plane's `/api/evidence/upload` endpoint; the appliance never holds S3
/// credentials.
pub struct ProxyUploader {
    client: reqwest::Client,
    base_url: String,
}

impl ProxyUploader {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl WormUploader for ProxyUploader {
    async fn upload(&self, bundle: &EvidenceBundle, json_bytes: &[u8]) -> Result<String, AgentError> {
        let form = reqwest::multipart::Form::new()
            .part(
                "bundle",
                reqwest::multipart::Part::bytes(json_bytes.to_vec())
                    .file_name(format!("{}.json", bundle.bundle_id)),
            )
            .part(
                "signature",
                reqwest::multipart::Part::bytes(bundle.signature.clone().into_bytes())
                    .file_name(format!("{}.sig", bundle.bundle_id)),
            );

        let response = self
            .client
            .post(format!("{}/api/evidence/upload", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if !response.status().is_success() {
            return Err(classify_status(response.status()));
        }

        #[derive(serde::Deserialize)]
        struct UploadResponse {
            worm_uri: String,
        }
        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| AgentError::ValidationFailed {
                reason: format!("malformed upload response: {e}"),
            })?;
        Ok(parsed.worm_uri)
    }
}

/// Direct mode: appliance holds scoped S3 credentials and uploads straight
/// to the Object-Locked bucket.
pub struct DirectUploader {
    client: aws_sdk_s3::Client,
    config: DirectUploadConfig,
}

impl DirectUploader {
    pub fn new(client: aws_sdk_s3::Client, config: DirectUploadConfig) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self { client, config })
    }
}

#[async_trait::async_trait]
impl WormUploader for DirectUploader {
    async fn upload(&self, bundle: &EvidenceBundle, json_bytes: &[u8]) -> Result<String, AgentError> {
        let json_key = self.config.object_key(&bundle.site_id, bundle.timestamp, &bundle.bundle_id, "json");
        let sig_key = self.config.object_key(&bundle.site_id, bundle.timestamp, &bundle.bundle_id, "sig");

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&json_key)
            .body(json_bytes.to_vec().into())
            .object_lock_mode(aws_sdk_s3::types::ObjectLockMode::Compliance)
            .send()
            .await
            .map_err(|e| AgentError::UploadFailed {
                reason: format!("direct WORM upload of bundle failed: {e}"),
            })?;

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&sig_key)
            .body(bundle.signature.clone().into_bytes().into())
            .object_lock_mode(aws_sdk_s3::types::ObjectLockMode::Compliance)
            .send()
            .await
            .map_err(|e| AgentError::UploadFailed {
                reason: format!("direct WORM upload of signature failed: {e}"),
            })?;

        Ok(format!("s3://{}/{}", self.config.bucket, json_key))
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> AgentError {
    if e.is_timeout() || e.is_connect() {
        AgentError::TransportTransient { message: e.to_string() }
    } else {
        AgentError::TransportPermanent { message: e.to_string() }
    }
}

fn classify_status(status: reqwest::StatusCode) -> AgentError {
    if status.as_u16() == 429 || status.is_server_error() {
        AgentError::TransportTransient {
            message: format!("upload endpoint returned {status}"),
        }
    } else {
        AgentError::TransportPermanent {
            message: format!("upload endpoint returned {status}"),
        }
    }
}

/// Drains pending entries from `registry`, attempting delivery through
/// `uploader` with capped constant backoff, up to
/// [`DEFAULT_MAX_ATTEMPTS_PER_CYCLE`] attempts per bundle per cycle.
pub async fn deliver_pending(
    uploader: &dyn WormUploader,
    registry: &UploadRegistry,
    load_bundle: impl Fn(&str) -> Result<(EvidenceBundle, Vec<u8>), AgentError>,
) -> Result<(), AgentError> {
    for bundle_id in registry.pending_bundle_ids() {
        let (bundle, json_bytes) = match load_bundle(&bundle_id) {
            Ok(v) => v,
            Err(e) => {
                registry.record_failed(&bundle_id, &e.to_string())?;
                continue;
            }
        };

        let mut last_err = None;
        for attempt in 0..DEFAULT_MAX_ATTEMPTS_PER_CYCLE {
            match uploader.upload(&bundle, &json_bytes).await {
                Ok(worm_uri) => {
                    registry.record_uploaded(&bundle_id, &worm_uri)?;
                    last_err = None;
                    break;
                }
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < DEFAULT_MAX_ATTEMPTS_PER_CYCLE {
                        tokio::time::sleep(DEFAULT_RETRY_BACKOFF).await;
                    }
                }
            }
        }
        if let Some(e) = last_err {
            registry.record_failed(&bundle_id, &e.to_string())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_config_rejects_retention_below_minimum() {
        let config = DirectUploadConfig {
            bucket: "evidence".into(),
            region: "us-east-1".into(),
            retention_days: 30,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn direct_config_accepts_compliant_retention() {
        let config = DirectUploadConfig {
            bucket: "evidence".into(),
            region: "us-east-1".into(),
            retention_days: 90,
        };
        assert!(config.validate().is_ok());
    }
}
