//! [`HostSnapshot`] — the pure-function input every [`crate::check::Check`]
//! evaluates against.

use chrono::{DateTime, Utc};
use haven_types::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub host_id: String,
    pub site_id: String,
    pub collected_at: DateTime<Utc>,
    /// Raw facts collected from the host (installed patches, AV service
    /// state, last backup timestamp, ...), keyed by fact name. Each check
    /// reads only the facts it declares it needs.
    pub facts: Value,
}

impl HostSnapshot {
    pub fn fact(&self, path: &str) -> Option<&Value> {
        self.facts.get_path(path)
    }
}
