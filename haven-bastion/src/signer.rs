//! Content hashing and Ed25519 signing for the tamper-evident evidence
//! pipeline (spec §4.7). The signer holds the appliance's private key in
//! memory only long enough to sign; key material is zeroized on drop.

use haven_types::AgentError;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use zeroize::Zeroizing;

/// SHA-256 of `bytes`, returned as lowercase hex — the canonical content
/// hash embedded in every evidence bundle and hash-chain link.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, bytes);
    hex::encode(digest.as_ref())
}

/// Holds an Ed25519 keypair in memory for the lifetime of the signer. The
/// raw PKCS#8 document is kept zeroizing so a crash dump or swapped page
/// doesn't persist it longer than necessary.
pub struct Signer {
    pkcs8: Zeroizing<Vec<u8>>,
    key_pair: Ed25519KeyPair,
}

impl Signer {
    /// Loads a signer from a PKCS#8-encoded Ed25519 private key, the format
    /// `ring::signature::Ed25519KeyPair::generate_pkcs8` produces and the
    /// format the on-disk provisioned key is expected to be stored in.
    pub fn from_pkcs8(pkcs8_bytes: &[u8]) -> Result<Self, AgentError> {
        let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8_bytes)
            .map_err(|e| AgentError::crypto_unavailable(format!("invalid Ed25519 key: {e}")))?;
        Ok(Self {
            pkcs8: Zeroizing::new(pkcs8_bytes.to_vec()),
            key_pair,
        })
    }

    /// Generates a fresh keypair, returning `(signer, pkcs8_document)` so the
    /// caller can persist the document to the provisioned key store.
    pub fn generate() -> Result<(Self, Vec<u8>), AgentError> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|e| AgentError::crypto_unavailable(format!("key generation failed: {e}")))?;
        let signer = Self::from_pkcs8(pkcs8.as_ref())?;
        Ok((signer, pkcs8.as_ref().to_vec()))
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.key_pair.public_key().as_ref().to_vec()
    }

    /// Signs `payload`, returning the raw 64-byte Ed25519 signature encoded
    /// as base64.
    pub fn sign(&self, payload: &[u8]) -> String {
        let signature = self.key_pair.sign(payload);
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, signature.as_ref())
    }
}

/// Verifies a base64-encoded Ed25519 signature over `payload` against a raw
/// public key. Used by the control-plane ingest side and by any tooling that
/// audits an evidence bundle offline.
pub fn verify(public_key_bytes: &[u8], payload: &[u8], signature_b64: &str) -> bool {
    let Ok(signature) =
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, signature_b64)
    else {
        return false;
    };
    UnparsedPublicKey::new(&ED25519, public_key_bytes)
        .verify(payload, &signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let (signer, _pkcs8) = Signer::generate().unwrap();
        let payload = b"evidence bundle canonical bytes";
        let signature = signer.sign(payload);
        assert!(verify(&signer.public_key_bytes(), payload, &signature));
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let (signer, _pkcs8) = Signer::generate().unwrap();
        let signature = signer.sign(b"original");
        assert!(!verify(&signer.public_key_bytes(), b"tampered", &signature));
    }

    #[test]
    fn content_hash_is_deterministic_and_hex_64_chars() {
        let h1 = content_hash(b"payload");
        let h2 = content_hash(b"payload");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }
}
