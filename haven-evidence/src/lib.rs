//! The evidence pipeline: canonical serialization, signing, hash-chaining,
//! local persistence, and WORM upload for every check and remediation
//! (spec §4.7). Exclusively owns the local hash chain and the upload
//! registry.

pub mod canonical;
pub mod generator;
pub mod hashchain;
pub mod registry;
pub mod uploader;

pub use canonical::{canonical_bytes, canonical_bytes_excluding};
pub use generator::{EvidenceGenerator, SealInput};
pub use hashchain::HashChain;
pub use registry::{RegistryEntry, UploadRegistry, UploadState};
pub use uploader::{
    deliver_pending, DirectUploadConfig, DirectUploader, ProxyUploader, WormMode, WormUploader,
    DEFAULT_MAX_ATTEMPTS_PER_CYCLE, DEFAULT_RETRY_BACKOFF, MINIMUM_RETENTION_DAYS,
};
