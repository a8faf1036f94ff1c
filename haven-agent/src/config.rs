//! Layered configuration resolution (spec §6, SPEC_FULL §9.1): compiled
//! defaults, an optional config file, environment variables, then CLI flags
//! — highest precedence last. Mirrors `haven_bastion::config`'s
//! defaults-then-file-then-env shape, with the flag/env precedence already
//! handled by clap's `env` feature in [`crate::cli::Cli`], so this module
//! only has to slot the config file in beneath whatever `Cli` resolved to.

use crate::cli::{Cli, DeploymentMode, LogLevelArg, WormModeArg};
use haven_types::AgentError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use validator::Validate;

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/haven-agent")
}

fn default_rules_dir() -> PathBuf {
    PathBuf::from("/etc/haven-agent/rules")
}

fn default_poll_interval() -> u64 {
    60
}

fn default_worm_retention_days() -> u32 {
    90
}

fn default_true() -> bool {
    true
}

/// Shape of the optional `--config-file`/`CONFIG_FILE` document. Every
/// field is optional: a config file only needs to supply what it wants to
/// override beneath environment variables and CLI flags.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
struct ConfigFile {
    mcp_url: Option<String>,
    deployment_mode: Option<String>,
    state_dir: Option<PathBuf>,
    rules_dir: Option<PathBuf>,
    client_cert: Option<PathBuf>,
    client_key: Option<PathBuf>,
    signing_key: Option<PathBuf>,
    order_verify_key: Option<PathBuf>,
    poll_interval: Option<u64>,
    log_level: Option<String>,
    dry_run: Option<bool>,
    one_shot: Option<bool>,
    worm_mode: Option<String>,
    worm_s3_bucket: Option<String>,
    worm_s3_region: Option<String>,
    worm_retention_days: Option<u32>,
    worm_auto_upload: Option<bool>,
}

fn read_config_file(path: &Path) -> Result<ConfigFile, AgentError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AgentError::configuration(format!("cannot read config file {}: {e}", path.display())))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&raw)
            .map_err(|e| AgentError::configuration(format!("invalid TOML config file {}: {e}", path.display()))),
        Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)
            .map_err(|e| AgentError::configuration(format!("invalid YAML config file {}: {e}", path.display()))),
        other => Err(AgentError::configuration(format!(
            "config file {} has unrecognized extension {other:?}; expected .toml, .yaml, or .yml",
            path.display()
        ))),
    }
}

fn parse_deployment_mode(raw: &str) -> Result<DeploymentMode, AgentError> {
    match raw.to_lowercase().as_str() {
        "direct" => Ok(DeploymentMode::Direct),
        "reseller" => Ok(DeploymentMode::Reseller),
        other => Err(AgentError::configuration(format!(
            "invalid deployment_mode '{other}' in config file; expected 'direct' or 'reseller'"
        ))),
    }
}

fn parse_log_level(raw: &str) -> Result<LogLevelArg, AgentError> {
    match raw.to_lowercase().as_str() {
        "debug" => Ok(LogLevelArg::Debug),
        "info" => Ok(LogLevelArg::Info),
        "warn" => Ok(LogLevelArg::Warn),
        "error" => Ok(LogLevelArg::Error),
        other => Err(AgentError::configuration(format!(
            "invalid log_level '{other}' in config file"
        ))),
    }
}

fn parse_worm_mode(raw: &str) -> Result<WormModeArg, AgentError> {
    match raw.to_lowercase().as_str() {
        "proxy" => Ok(WormModeArg::Proxy),
        "direct" => Ok(WormModeArg::Direct),
        other => Err(AgentError::configuration(format!(
            "invalid worm_mode '{other}' in config file; expected 'proxy' or 'direct'"
        ))),
    }
}

/// The fully resolved configuration every other `haven-agent` module
/// builds from — the concrete struct SPEC_FULL §9.1 calls for, binding
/// every CLI flag/env var of spec.md §6 to a typed field.
#[derive(Debug, Clone, Validate)]
pub struct AgentConfig {
    pub site_id: String,
    pub host_id: String,
    pub mcp_url: Option<String>,
    pub mcp_api_key: Option<String>,
    pub deployment_mode: DeploymentMode,
    pub state_dir: PathBuf,
    pub rules_dir: PathBuf,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub signing_key: Option<PathBuf>,
    pub order_verify_key: Option<PathBuf>,
    #[validate(range(min = 1))]
    pub poll_interval_secs: u64,
    pub log_level: LogLevelArg,
    pub dry_run: bool,
    pub one_shot: bool,
    pub worm_mode: WormModeArg,
    pub worm_s3_bucket: Option<String>,
    pub worm_s3_region: Option<String>,
    #[validate(range(min = 90))]
    pub worm_retention_days: u32,
    pub worm_auto_upload: bool,
    pub guardrail_config: Option<PathBuf>,
}

impl AgentConfig {
    pub fn has_control_plane(&self) -> bool {
        self.mcp_url.is_some()
    }

    /// Structural checks beyond what `validator` expresses as field
    /// attributes: cross-field requirements that only make sense together.
    fn validate_cross_fields(&self) -> Result<(), AgentError> {
        if self.has_control_plane() {
            if self.client_cert.is_none() || self.client_key.is_none() {
                return Err(AgentError::configuration(
                    "--client-cert and --client-key are required when --mcp-url is set",
                ));
            }
            if self.order_verify_key.is_none() {
                return Err(AgentError::configuration(
                    "--order-verify-key is required when --mcp-url is set",
                ));
            }
        }
        if self.worm_mode == WormModeArg::Direct {
            if self.worm_s3_bucket.is_none() {
                return Err(AgentError::configuration("WORM_S3_BUCKET is required when WORM_MODE=direct"));
            }
            if self.worm_s3_region.is_none() {
                return Err(AgentError::configuration("WORM_S3_REGION is required when WORM_MODE=direct"));
            }
        } else if !self.has_control_plane() {
            return Err(AgentError::configuration(
                "WORM_MODE=proxy requires a control plane; set --mcp-url or use WORM_MODE=direct",
            ));
        }
        if self.signing_key.is_none() {
            return Err(AgentError::configuration("--signing-key is required"));
        }
        Ok(())
    }
}

/// Resolves `cli` into a validated [`AgentConfig`]: for every field already
/// set by a flag or environment variable, that value wins; otherwise the
/// config file's value applies; otherwise the compiled default.
pub fn resolve(cli: Cli) -> Result<AgentConfig, AgentError> {
    let file = match cli.config_file.as_deref() {
        Some(path) => read_config_file(path)?,
        None => ConfigFile::default(),
    };

    let deployment_mode = match cli.deployment_mode {
        Some(mode) => mode,
        None => match file.deployment_mode {
            Some(raw) => parse_deployment_mode(&raw)?,
            None => DeploymentMode::Reseller,
        },
    };

    let log_level = match cli.log_level {
        Some(level) => level,
        None => match file.log_level {
            Some(raw) => parse_log_level(&raw)?,
            None => LogLevelArg::Info,
        },
    };

    let worm_mode = match cli.worm_mode {
        Some(mode) => mode,
        None => match file.worm_mode {
            Some(raw) => parse_worm_mode(&raw)?,
            None => WormModeArg::Proxy,
        },
    };

    let config = AgentConfig {
        site_id: cli.site_id,
        host_id: cli.host_id,
        mcp_url: cli.mcp_url.or(file.mcp_url),
        mcp_api_key: cli.mcp_api_key,
        deployment_mode,
        state_dir: cli.state_dir.or(file.state_dir).unwrap_or_else(default_state_dir),
        rules_dir: cli.rules_dir.or(file.rules_dir).unwrap_or_else(default_rules_dir),
        client_cert: cli.client_cert.or(file.client_cert),
        client_key: cli.client_key.or(file.client_key),
        signing_key: cli.signing_key.or(file.signing_key),
        order_verify_key: cli.order_verify_key.or(file.order_verify_key),
        poll_interval_secs: cli.poll_interval.or(file.poll_interval).unwrap_or_else(default_poll_interval),
        log_level,
        dry_run: cli.dry_run || file.dry_run.unwrap_or(false),
        one_shot: cli.one_shot || file.one_shot.unwrap_or(false),
        worm_mode,
        worm_s3_bucket: cli.worm_s3_bucket.or(file.worm_s3_bucket),
        worm_s3_region: cli.worm_s3_region.or(file.worm_s3_region),
        worm_retention_days: cli
            .worm_retention_days
            .or(file.worm_retention_days)
            .unwrap_or_else(default_worm_retention_days),
        worm_auto_upload: cli.worm_auto_upload.or(file.worm_auto_upload).unwrap_or_else(default_true),
        guardrail_config: cli.guardrail_config,
    };

    config
        .validate()
        .map_err(|e| AgentError::configuration(format!("configuration failed validation: {e}")))?;
    config.validate_cross_fields()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(args)
    }

    #[test]
    fn defaults_apply_when_nothing_else_is_set() {
        let cli = parse(&[
            "haven-agent",
            "--site-id",
            "site-1",
            "--host-id",
            "host-1",
            "--signing-key",
            "/tmp/key.pk8",
            "--mcp-url",
            "https://cp.example.com",
            "--client-cert",
            "/tmp/c.pem",
            "--client-key",
            "/tmp/k.pem",
            "--order-verify-key",
            "/tmp/verify.pub",
        ]);
        let config = resolve(cli).unwrap();
        assert_eq!(config.state_dir, default_state_dir());
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.worm_mode, WormModeArg::Proxy);
        assert_eq!(config.deployment_mode, DeploymentMode::Reseller);
    }

    #[test]
    fn direct_worm_mode_without_bucket_fails_validation() {
        let cli = parse(&[
            "haven-agent",
            "--site-id",
            "site-1",
            "--host-id",
            "host-1",
            "--signing-key",
            "/tmp/key.pk8",
            "--worm-mode",
            "direct",
        ]);
        assert!(resolve(cli).is_err());
    }

    #[test]
    fn zero_poll_interval_fails_range_validation() {
        let cli = parse(&[
            "haven-agent",
            "--site-id",
            "site-1",
            "--host-id",
            "host-1",
            "--signing-key",
            "/tmp/key.pk8",
            "--worm-mode",
            "direct",
            "--worm-s3-bucket",
            "b",
            "--worm-s3-region",
            "us-east-1",
            "--poll-interval",
            "0",
        ]);
        assert!(resolve(cli).is_err());
    }
}
