//! Loads and validates [`Rule`] definitions from
//! `<rules_dir>/{builtin,custom,promoted}/*.yaml` (spec §9.1 rule-file
//! schema: one rule per file, the `Rule` struct's own field names as the
//! YAML keys). Every rule is validated fully at load time — invalid regex,
//! an action outside the allowlist, a priority below its source's floor, an
//! empty condition list — so a bad file fails the whole load with an
//! actionable [`AgentError::Configuration`] rather than silently skipping
//! the rule or panicking deep inside matching.

use crate::condition::compile_regex;
use crate::engine::CompiledRule;
use haven_bastion::Allowlist;
use haven_types::{AgentError, Rule, RuleSource};
use std::path::{Path, PathBuf};

const SOURCE_DIRS: &[(&str, RuleSource)] = &[
    ("builtin", RuleSource::Builtin),
    ("custom", RuleSource::Custom),
    ("promoted", RuleSource::Promoted),
];

/// Reads every `*.yaml`/`*.yml` rule file under `rules_dir`'s three source
/// subdirectories, validates each rule, and returns them compiled and ready
/// for [`crate::engine::L1Engine`]. A subdirectory that doesn't exist is
/// treated as empty, not an error — a fresh deployment has no `promoted/`
/// directory until the learning loop writes one.
pub fn load_rules(rules_dir: &Path, allowlist: &Allowlist) -> Result<Vec<CompiledRule>, AgentError> {
    let mut rules = Vec::new();
    for (dir_name, expected_source) in SOURCE_DIRS {
        let dir = rules_dir.join(dir_name);
        if !dir.is_dir() {
            continue;
        }
        for path in read_yaml_files(&dir)? {
            let rule = load_one(&path, *expected_source)?;
            validate(&rule, &path, allowlist)?;
            let regexes = rule
                .conditions
                .iter()
                .map(|c| {
                    compile_regex(c)
                        .map_err(|reason| AgentError::configuration(format!("{}: {reason}", path.display())))
                })
                .collect::<Result<Vec<_>, _>>()?;
            rules.push(CompiledRule { rule, regexes });
        }
    }
    Ok(rules)
}

fn read_yaml_files(dir: &Path) -> Result<Vec<PathBuf>, AgentError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        AgentError::configuration(format!("cannot read rules directory {}: {e}", dir.display()))
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();
    Ok(paths)
}

fn load_one(path: &Path, expected_source: RuleSource) -> Result<Rule, AgentError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AgentError::configuration(format!("cannot read {}: {e}", path.display())))?;
    let rule: Rule = serde_yaml::from_str(&raw)
        .map_err(|e| AgentError::configuration(format!("invalid rule YAML in {}: {e}", path.display())))?;
    if rule.source != expected_source {
        return Err(AgentError::configuration(format!(
            "{}: rule '{}' declares source {:?} but lives under {:?}/",
            path.display(),
            rule.id,
            rule.source,
            expected_source
        )));
    }
    Ok(rule)
}

fn validate(rule: &Rule, path: &Path, allowlist: &Allowlist) -> Result<(), AgentError> {
    if !rule.has_canonical_priority() {
        return Err(AgentError::configuration(format!(
            "{}: rule '{}' priority {} violates the floor for source {:?}",
            path.display(),
            rule.id,
            rule.priority,
            rule.source
        )));
    }
    if !allowlist.allows(&rule.action) {
        return Err(AgentError::configuration(format!(
            "{}: rule '{}' targets action '{}' which is not on the allowlist",
            path.display(),
            rule.id,
            rule.action
        )));
    }
    if rule.conditions.is_empty() {
        return Err(AgentError::configuration(format!(
            "{}: rule '{}' has no conditions",
            path.display(),
            rule.id
        )));
    }
    Ok(())
}

/// Persists a freshly promoted rule to `<rules_dir>/promoted/{id}.yaml` so
/// the next `load_rules` call (or a hot reload mid-run) picks it up. Callers
/// are expected to have already confirmed `rule.source == RuleSource::Promoted`.
pub fn write_promoted_rule(rules_dir: &Path, rule: &Rule) -> Result<(), AgentError> {
    let dir = rules_dir.join("promoted");
    std::fs::create_dir_all(&dir)
        .map_err(|e| AgentError::configuration(format!("cannot create {}: {e}", dir.display())))?;
    let path = dir.join(format!("{}.yaml", rule.id));
    let yaml = serde_yaml::to_string(rule)
        .map_err(|e| AgentError::configuration(format!("cannot serialize rule '{}': {e}", rule.id)))?;
    std::fs::write(&path, yaml)
        .map_err(|e| AgentError::configuration(format!("cannot write {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_rule(dir: &Path, filename: &str, body: &str) {
        fs::write(dir.join(filename), body).unwrap();
    }

    const GOOD_BUILTIN: &str = r#"
id: restore-firewall
name: Restore firewall baseline
description: Firewall drifted from the site baseline profile.
enabled: true
priority: 100
source: builtin
conditions:
  - field: incident_type
    operator: eq
    value: firewall
action: restore_firewall_baseline
action_params: {}
hipaa_controls: ["164.312(c)"]
cooldown_seconds: 300
max_retries: 1
"#;

    #[test]
    fn loads_a_valid_builtin_rule() {
        let tmp = tempfile::tempdir().unwrap();
        let builtin_dir = tmp.path().join("builtin");
        fs::create_dir_all(&builtin_dir).unwrap();
        write_rule(&builtin_dir, "restore-firewall.yaml", GOOD_BUILTIN);

        let rules = load_rules(tmp.path(), &Allowlist::default_fleet()).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].rule.id, "restore-firewall");
    }

    #[test]
    fn missing_subdirectories_yield_an_empty_rule_set() {
        let tmp = tempfile::tempdir().unwrap();
        let rules = load_rules(tmp.path(), &Allowlist::default_fleet()).unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn rejects_rule_targeting_action_outside_the_allowlist() {
        let tmp = tempfile::tempdir().unwrap();
        let builtin_dir = tmp.path().join("builtin");
        fs::create_dir_all(&builtin_dir).unwrap();
        let bad = GOOD_BUILTIN.replace("restore_firewall_baseline", "format_hard_drive");
        write_rule(&builtin_dir, "bad.yaml", &bad);

        let err = load_rules(tmp.path(), &Allowlist::default_fleet()).unwrap_err();
        assert!(matches!(err, AgentError::Configuration { .. }));
    }

    #[test]
    fn rejects_builtin_rule_below_the_priority_floor() {
        let tmp = tempfile::tempdir().unwrap();
        let builtin_dir = tmp.path().join("builtin");
        fs::create_dir_all(&builtin_dir).unwrap();
        let bad = GOOD_BUILTIN.replace("priority: 100", "priority: 10");
        write_rule(&builtin_dir, "bad.yaml", &bad);

        assert!(load_rules(tmp.path(), &Allowlist::default_fleet()).is_err());
    }

    #[test]
    fn rejects_rule_filed_under_the_wrong_source_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let custom_dir = tmp.path().join("custom");
        fs::create_dir_all(&custom_dir).unwrap();
        write_rule(&custom_dir, "mismatched.yaml", GOOD_BUILTIN);

        assert!(load_rules(tmp.path(), &Allowlist::default_fleet()).is_err());
    }

    #[test]
    fn rejects_invalid_regex_condition() {
        let tmp = tempfile::tempdir().unwrap();
        let builtin_dir = tmp.path().join("builtin");
        fs::create_dir_all(&builtin_dir).unwrap();
        let bad = GOOD_BUILTIN
            .replace("operator: eq", "operator: regex")
            .replace("value: firewall", "value: \"(\"");
        write_rule(&builtin_dir, "bad.yaml", &bad);

        assert!(load_rules(tmp.path(), &Allowlist::default_fleet()).is_err());
    }

    #[test]
    fn write_promoted_rule_round_trips_through_load_rules() {
        use haven_types::Condition;
        use haven_types::Operator;
        use haven_types::Value;

        let tmp = tempfile::tempdir().unwrap();
        let rule = Rule {
            id: "promoted-1".to_string(),
            name: "Promoted rule".to_string(),
            description: "Learned from repeated L2 resolutions.".to_string(),
            enabled: true,
            priority: 50,
            source: RuleSource::Promoted,
            conditions: vec![Condition {
                field: "pattern_signature".to_string(),
                operator: Operator::Eq,
                value: Value::from("abc123"),
            }],
            action: "restart_service".to_string(),
            action_params: Value::Null,
            hipaa_controls: vec![],
            cooldown_seconds: 300,
            max_retries: 1,
            promotion: None,
        };

        write_promoted_rule(tmp.path(), &rule).unwrap();
        let rules = load_rules(tmp.path(), &Allowlist::default_fleet()).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].rule.id, "promoted-1");
    }
}
