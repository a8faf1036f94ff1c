//! Pull-only mTLS control-plane client (spec §4.11): cycle check-in, order
//! retrieval and verification, ephemeral credential pull, L2 planning, and
//! execution telemetry. Evidence upload is delegated to
//! `haven_evidence::ProxyUploader` over the same shared, identity-bound
//! client this crate builds.

pub mod checkin;
pub mod client;
pub mod config;
pub mod telemetry;

pub use checkin::{verify_orders, CheckinResponse, CheckinResponseWire, CheckinState, CredentialWire};
pub use client::{ControlPlaneClient, CHECKIN_TIMEOUT, PLAN_TIMEOUT, REPORT_TIMEOUT};
pub use config::ClientConfig;
pub use telemetry::{ExecutionReport, ExecutionTelemetry};
