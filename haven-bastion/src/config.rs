//! Layered guardrail configuration: built-in defaults, overridden by a
//! site-provided YAML/TOML file, overridden again by environment variables.
//! Structural validation runs after every layer is merged so a bad override
//! fails fast at startup rather than silently weakening a guardrail.

use crate::allowlist::Allowlist;
use crate::budget::BudgetLimits;
use crate::maintenance_window::MaintenanceWindowPolicy;
use haven_types::AgentError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use validator::Validate;

/// What the pipeline should do if a guardrail stage itself errors (a regex
/// engine panic path, a poisoned lock) rather than returning a normal
/// outcome. The agent always fails closed on policy — this only exists so
/// the choice is explicit and auditable rather than implicit.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    #[default]
    Closed,
    Open,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GuardrailConfigFile {
    #[serde(default)]
    pub allowed_actions: Vec<String>,
    #[serde(default)]
    pub disruptive_actions: Vec<String>,
    #[validate(range(min = 0.0))]
    #[serde(default = "default_daily_usd")]
    pub daily_budget_usd: f64,
    #[serde(default = "default_hourly_calls")]
    pub hourly_call_budget: u32,
    #[serde(default = "default_concurrency")]
    pub max_concurrent_llm_calls: u32,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default)]
    pub fail_mode: FailMode,
}

fn default_daily_usd() -> f64 {
    10.0
}
fn default_hourly_calls() -> u32 {
    60
}
fn default_concurrency() -> u32 {
    3
}
fn default_cooldown_seconds() -> u64 {
    300
}

impl Default for GuardrailConfigFile {
    fn default() -> Self {
        Self {
            allowed_actions: Vec::new(),
            disruptive_actions: Vec::new(),
            daily_budget_usd: default_daily_usd(),
            hourly_call_budget: default_hourly_calls(),
            max_concurrent_llm_calls: default_concurrency(),
            cooldown_seconds: default_cooldown_seconds(),
            fail_mode: FailMode::default(),
        }
    }
}

/// The fully resolved, validated guardrail configuration, ready to build a
/// [`crate::guardrails::GuardrailPipeline`] from.
pub struct ResolvedGuardrailConfig {
    pub allowlist: Allowlist,
    pub maintenance: MaintenanceWindowPolicy,
    pub budget_limits: BudgetLimits,
    pub cooldown: Duration,
    pub fail_mode: FailMode,
}

/// Loads a [`GuardrailConfigFile`] from `path` (YAML or TOML, chosen by
/// extension), applies environment-variable overrides, validates, and
/// builds the resolved config the pipeline consumes.
///
/// An absent `path` is not an error — the built-in defaults plus the
/// fleet-default allowlist and disruptive-action list apply.
pub fn load(path: Option<&Path>) -> Result<ResolvedGuardrailConfig, AgentError> {
    let mut file = match path {
        Some(p) => read_config_file(p)?,
        None => GuardrailConfigFile::default(),
    };

    apply_env_overrides(&mut file);

    file.validate().map_err(|e| {
        AgentError::configuration(format!("guardrail config failed validation: {e}"))
    })?;

    let allowlist = if file.allowed_actions.is_empty() {
        Allowlist::default_fleet()
    } else {
        Allowlist::new(file.allowed_actions.clone())
    };

    let maintenance = if file.disruptive_actions.is_empty() {
        MaintenanceWindowPolicy::default_disruptive()
    } else {
        MaintenanceWindowPolicy::new(file.disruptive_actions.clone())
    };

    Ok(ResolvedGuardrailConfig {
        allowlist,
        maintenance,
        budget_limits: BudgetLimits {
            daily_usd: file.daily_budget_usd,
            hourly_calls: file.hourly_call_budget,
            max_concurrent: file.max_concurrent_llm_calls,
        },
        cooldown: Duration::from_secs(file.cooldown_seconds),
        fail_mode: file.fail_mode,
    })
}

fn read_config_file(path: &Path) -> Result<GuardrailConfigFile, AgentError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AgentError::configuration(format!("cannot read {}: {e}", path.display())))?;

    let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
    if is_toml {
        toml::from_str(&raw)
            .map_err(|e| AgentError::configuration(format!("invalid TOML in {}: {e}", path.display())))
    } else {
        serde_yaml::from_str(&raw)
            .map_err(|e| AgentError::configuration(format!("invalid YAML in {}: {e}", path.display())))
    }
}

fn apply_env_overrides(file: &mut GuardrailConfigFile) {
    if let Ok(v) = std::env::var("HAVEN_DAILY_BUDGET_USD") {
        if let Ok(parsed) = v.parse() {
            file.daily_budget_usd = parsed;
        }
    }
    if let Ok(v) = std::env::var("HAVEN_HOURLY_CALL_BUDGET") {
        if let Ok(parsed) = v.parse() {
            file.hourly_call_budget = parsed;
        }
    }
    if let Ok(v) = std::env::var("HAVEN_COOLDOWN_SECONDS") {
        if let Ok(parsed) = v.parse() {
            file.cooldown_seconds = parsed;
        }
    }
    if let Ok(v) = std::env::var("HAVEN_GUARDRAIL_FAIL_MODE") {
        file.fail_mode = match v.to_lowercase().as_str() {
            "open" => FailMode::Open,
            _ => FailMode::Closed,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn absent_path_yields_fleet_defaults() {
        let resolved = load(None).unwrap();
        assert!(resolved.allowlist.allows("restart_service"));
        assert_eq!(resolved.budget_limits.daily_usd, 10.0);
        assert_eq!(resolved.fail_mode, FailMode::Closed);
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut tmp = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            tmp,
            "allowed_actions:\n  - custom_action\ndaily_budget_usd: 25.0\ncooldown_seconds: 120\n"
        )
        .unwrap();

        let resolved = load(Some(tmp.path())).unwrap();
        assert!(resolved.allowlist.allows("custom_action"));
        assert_eq!(resolved.budget_limits.daily_usd, 25.0);
        assert_eq!(resolved.cooldown, Duration::from_secs(120));
    }

    #[test]
    fn negative_budget_fails_validation() {
        let mut tmp = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(tmp, "daily_budget_usd: -5.0\n").unwrap();
        assert!(load(Some(tmp.path())).is_err());
    }
}
