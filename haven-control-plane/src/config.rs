//! Builds the single mTLS [`reqwest::Client`] every control-plane call
//! shares (spec §4.11 "All requests carry a client certificate and a
//! bearer token"), plus the Ed25519 public key used to verify order
//! signatures.

use haven_types::AgentError;
use std::path::Path;
use std::time::Duration;

pub struct ClientConfig {
    pub base_url: String,
    pub bearer_token: String,
    /// PEM-encoded client certificate chain.
    pub client_cert_pem: Vec<u8>,
    /// PEM-encoded client private key, matching `client_cert_pem`.
    pub client_key_pem: Vec<u8>,
    /// Raw Ed25519 public key bytes used to verify order/evidence-ack
    /// signatures returned by the control plane.
    pub order_verify_key: Vec<u8>,
}

impl ClientConfig {
    pub fn from_files(
        base_url: impl Into<String>,
        bearer_token: impl Into<String>,
        client_cert_path: &Path,
        client_key_path: &Path,
        order_verify_key: Vec<u8>,
    ) -> Result<Self, AgentError> {
        let client_cert_pem = std::fs::read(client_cert_path).map_err(|e| {
            AgentError::configuration(format!(
                "failed to read client cert {}: {e}",
                client_cert_path.display()
            ))
        })?;
        let client_key_pem = std::fs::read(client_key_path).map_err(|e| {
            AgentError::configuration(format!(
                "failed to read client key {}: {e}",
                client_key_path.display()
            ))
        })?;
        Ok(Self {
            base_url: base_url.into(),
            bearer_token: bearer_token.into(),
            client_cert_pem,
            client_key_pem,
            order_verify_key,
        })
    }

    /// Builds the shared client: pinned identity, TLS 1.2 floor, and the
    /// per-call timeouts of spec §5 applied as a connect/request default
    /// (individual calls still wrap with their own tighter timeout).
    pub fn build_client(&self) -> Result<reqwest::Client, AgentError> {
        let mut identity_pem = self.client_cert_pem.clone();
        identity_pem.extend_from_slice(b"\n");
        identity_pem.extend_from_slice(&self.client_key_pem);
        let identity = reqwest::Identity::from_pem(&identity_pem)
            .map_err(|e| AgentError::crypto_unavailable(format!("invalid client identity: {e}")))?;

        reqwest::Client::builder()
            .identity(identity)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AgentError::configuration(format!("failed to build control-plane client: {e}")))
    }
}
