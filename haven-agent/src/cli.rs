//! CLI surface and environment variable bindings (spec §6). Every scalar
//! field that can also come from the optional config file is left without a
//! clap default so `config::resolve` can tell "not set by flag or env" apart
//! from "explicitly set to the default value" and apply the config file
//! underneath it.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "lower")]
pub enum DeploymentMode {
    /// Single-tenant: this appliance talks to a control plane operated by
    /// the covered entity itself.
    Direct,
    /// Multi-tenant: this appliance talks to a control plane operated by an
    /// MSP/reseller on behalf of the covered entity.
    Reseller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "lower")]
pub enum LogLevelArg {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "lower")]
pub enum WormModeArg {
    Proxy,
    Direct,
}

/// Parsed command line, env-overridable per spec §6. CLI flags take
/// precedence over the matching environment variable automatically (clap's
/// `env` feature); the optional config file sits beneath both and is
/// applied in [`crate::config::resolve`].
#[derive(Parser, Debug, Clone)]
#[command(name = "haven-agent", version, about = "On-appliance HIPAA compliance enforcement agent")]
pub struct Cli {
    #[arg(long, env = "SITE_ID")]
    pub site_id: String,

    #[arg(long, env = "HOST_ID")]
    pub host_id: String,

    #[arg(long, env = "MCP_URL")]
    pub mcp_url: Option<String>,

    #[arg(long, value_enum, env = "DEPLOYMENT_MODE")]
    pub deployment_mode: Option<DeploymentMode>,

    #[arg(long, env = "STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    #[arg(long, env = "RULES_DIR")]
    pub rules_dir: Option<PathBuf>,

    #[arg(long, env = "CLIENT_CERT_FILE")]
    pub client_cert: Option<PathBuf>,

    #[arg(long, env = "CLIENT_KEY_FILE")]
    pub client_key: Option<PathBuf>,

    #[arg(long, env = "SIGNING_KEY_FILE")]
    pub signing_key: Option<PathBuf>,

    /// Raw Ed25519 public key (32 bytes, base64) used to verify orders and
    /// evidence acknowledgements signed by the control plane. Not named in
    /// spec §6's environment variable list, which omits it; added here
    /// because `haven_control_plane::ClientConfig` requires it whenever a
    /// control plane is configured.
    #[arg(long, env = "ORDER_VERIFY_KEY_FILE")]
    pub order_verify_key: Option<PathBuf>,

    #[arg(long, env = "MCP_API_KEY", hide_env_values = true)]
    pub mcp_api_key: Option<String>,

    #[arg(long, env = "POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    #[arg(long, value_enum, env = "LOG_LEVEL")]
    pub log_level: Option<LogLevelArg>,

    #[arg(long)]
    pub dry_run: bool,

    #[arg(long)]
    pub one_shot: bool,

    #[arg(long, value_enum, env = "WORM_MODE")]
    pub worm_mode: Option<WormModeArg>,

    #[arg(long, env = "WORM_S3_BUCKET")]
    pub worm_s3_bucket: Option<String>,

    #[arg(long, env = "WORM_S3_REGION")]
    pub worm_s3_region: Option<String>,

    #[arg(long, env = "WORM_RETENTION_DAYS")]
    pub worm_retention_days: Option<u32>,

    #[arg(long, env = "WORM_AUTO_UPLOAD")]
    pub worm_auto_upload: Option<bool>,

    /// Optional layered config file (TOML or YAML, chosen by extension),
    /// applied beneath CLI flags and environment variables.
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Optional guardrail policy file consumed by
    /// `haven_bastion::load_guardrail_config`; absent means fleet defaults.
    #[arg(long, env = "GUARDRAIL_CONFIG_FILE")]
    pub guardrail_config: Option<PathBuf>,
}
