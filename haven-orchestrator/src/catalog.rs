//! Loads the fixed set of named [`Runbook`]s an agent deployment ships
//! with, from `<rules_dir>/runbooks/{id}.yaml` — a sibling of the rule
//! source directories `haven_l1::load_rules` reads, using the same
//! one-file-per-definition convention (spec §4.6, §9.1).

use haven_executor::Runbook;
use haven_types::AgentError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct RunbookCatalog {
    runbooks: HashMap<String, Runbook>,
}

impl RunbookCatalog {
    /// An absent `runbooks/` directory yields an empty catalog rather than
    /// an error — a deployment whose every rule only ever escalates has no
    /// use for one.
    pub fn load(rules_dir: &Path) -> Result<Self, AgentError> {
        let dir = rules_dir.join("runbooks");
        if !dir.is_dir() {
            return Ok(Self { runbooks: HashMap::new() });
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| AgentError::configuration(format!("cannot read runbooks directory {}: {e}", dir.display())))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml")))
            .collect();
        paths.sort();

        let mut runbooks = HashMap::new();
        for path in paths {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| AgentError::configuration(format!("cannot read {}: {e}", path.display())))?;
            let runbook: Runbook = serde_yaml::from_str(&raw)
                .map_err(|e| AgentError::configuration(format!("invalid runbook YAML in {}: {e}", path.display())))?;
            if runbook.steps.is_empty() {
                return Err(AgentError::configuration(format!(
                    "{}: runbook '{}' has no steps",
                    path.display(),
                    runbook.id
                )));
            }
            runbooks.insert(runbook.id.clone(), runbook);
        }

        Ok(Self { runbooks })
    }

    pub fn get(&self, id: &str) -> Option<&Runbook> {
        self.runbooks.get(id)
    }

    pub fn len(&self) -> usize {
        self.runbooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runbooks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SAMPLE: &str = r#"
id: restart_logging_service
steps:
  - name: restart
    command_text: systemctl restart rsyslog
    params: {}
"#;

    #[test]
    fn loads_runbooks_keyed_by_id() {
        let tmp = tempfile::tempdir().unwrap();
        let runbooks_dir = tmp.path().join("runbooks");
        fs::create_dir_all(&runbooks_dir).unwrap();
        fs::write(runbooks_dir.join("restart_logging_service.yaml"), SAMPLE).unwrap();

        let catalog = RunbookCatalog::load(tmp.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("restart_logging_service").is_some());
        assert!(catalog.get("unknown").is_none());
    }

    #[test]
    fn missing_directory_yields_empty_catalog() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = RunbookCatalog::load(tmp.path()).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn rejects_runbook_with_no_steps() {
        let tmp = tempfile::tempdir().unwrap();
        let runbooks_dir = tmp.path().join("runbooks");
        fs::create_dir_all(&runbooks_dir).unwrap();
        fs::write(runbooks_dir.join("empty.yaml"), "id: empty\nsteps: []\n").unwrap();

        assert!(RunbookCatalog::load(tmp.path()).is_err());
    }
}
