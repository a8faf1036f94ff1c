//! Row <-> domain-type conversions for the `incidents`/`resolutions`/
//! `pattern_stats` tables. Kept separate from [`crate::store`] so the SQL
//! string literals stay in one place.

use chrono::{DateTime, Utc};
use haven_types::{
    AgentError, Incident, IncidentType, Outcome, PatternStats, Resolution, ResolutionLevel,
    Severity, Value,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::BTreeMap;

fn parse_timestamp(raw: &str, field: &str) -> Result<DateTime<Utc>, AgentError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AgentError::StoreCorruption {
            message: format!("corrupt {field} timestamp {raw:?}: {e}"),
        })
}

fn parse_severity(raw: &str) -> Result<Severity, AgentError> {
    match raw {
        "low" => Ok(Severity::Low),
        "medium" => Ok(Severity::Medium),
        "high" => Ok(Severity::High),
        "critical" => Ok(Severity::Critical),
        other => Err(AgentError::StoreCorruption {
            message: format!("unknown severity {other:?}"),
        }),
    }
}

fn severity_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "low",
        Severity::Medium => "medium",
        Severity::High => "high",
        Severity::Critical => "critical",
    }
}

pub fn incident_from_row(row: &SqliteRow) -> Result<Incident, AgentError> {
    let raw_data_str: String = row.try_get("raw_data").map_err(store_err)?;
    let raw_data: Value = serde_json::from_str(&raw_data_str).map_err(|e| AgentError::StoreCorruption {
        message: format!("corrupt raw_data json: {e}"),
    })?;
    let created_at_str: String = row.try_get("created_at").map_err(store_err)?;
    let severity_str: String = row.try_get("severity").map_err(store_err)?;

    Ok(Incident {
        id: row.try_get("id").map_err(store_err)?,
        site_id: row.try_get("site_id").map_err(store_err)?,
        host_id: row.try_get("host_id").map_err(store_err)?,
        incident_type: IncidentType::from(row.try_get::<String, _>("incident_type").map_err(store_err)?),
        severity: parse_severity(&severity_str)?,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
        raw_data,
        pattern_signature: row.try_get("pattern_signature").map_err(store_err)?,
    })
}

fn store_err(e: sqlx::Error) -> AgentError {
    AgentError::StoreCorruption {
        message: format!("row decode failed: {e}"),
    }
}

pub fn incident_severity_str(severity: Severity) -> &'static str {
    severity_str(severity)
}

pub fn resolution_level_str(level: ResolutionLevel) -> &'static str {
    match level {
        ResolutionLevel::L1 => "l1",
        ResolutionLevel::L2 => "l2",
        ResolutionLevel::L3 => "l3",
    }
}

pub fn parse_resolution_level(raw: &str) -> Result<ResolutionLevel, AgentError> {
    match raw {
        "l1" => Ok(ResolutionLevel::L1),
        "l2" => Ok(ResolutionLevel::L2),
        "l3" => Ok(ResolutionLevel::L3),
        other => Err(AgentError::StoreCorruption {
            message: format!("unknown resolution_level {other:?}"),
        }),
    }
}

pub fn outcome_str(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Success => "success",
        Outcome::Failure => "failure",
        Outcome::Partial => "partial",
        Outcome::Escalated => "escalated",
        Outcome::Blocked => "blocked",
    }
}

pub fn parse_outcome(raw: &str) -> Result<Outcome, AgentError> {
    match raw {
        "success" => Ok(Outcome::Success),
        "failure" => Ok(Outcome::Failure),
        "partial" => Ok(Outcome::Partial),
        "escalated" => Ok(Outcome::Escalated),
        "blocked" => Ok(Outcome::Blocked),
        other => Err(AgentError::StoreCorruption {
            message: format!("unknown outcome {other:?}"),
        }),
    }
}

pub fn resolution_from_row(row: &SqliteRow) -> Result<Resolution, AgentError> {
    let action_params_str: String = row.try_get("action_params").map_err(store_err)?;
    let action_params: Value =
        serde_json::from_str(&action_params_str).map_err(|e| AgentError::StoreCorruption {
            message: format!("corrupt action_params json: {e}"),
        })?;
    let resolved_at_str: String = row.try_get("resolved_at").map_err(store_err)?;
    let level_str: String = row.try_get("resolution_level").map_err(store_err)?;
    let outcome_raw: String = row.try_get("outcome").map_err(store_err)?;

    Ok(Resolution {
        incident_id: row.try_get("incident_id").map_err(store_err)?,
        resolution_level: parse_resolution_level(&level_str)?,
        action: row.try_get("action").map_err(store_err)?,
        action_params,
        outcome: parse_outcome(&outcome_raw)?,
        resolution_time_ms: row.try_get::<i64, _>("resolution_time_ms").map_err(store_err)? as u64,
        resolved_at: parse_timestamp(&resolved_at_str, "resolved_at")?,
        error_message: row.try_get("error_message").map_err(store_err)?,
        reasoning: row.try_get("reasoning").map_err(store_err)?,
        cost_usd: row.try_get("cost_usd").map_err(store_err)?,
        llm_tokens_in: row
            .try_get::<Option<i64>, _>("llm_tokens_in")
            .map_err(store_err)?
            .map(|n| n as u64),
        llm_tokens_out: row
            .try_get::<Option<i64>, _>("llm_tokens_out")
            .map_err(store_err)?
            .map(|n| n as u64),
    })
}

pub fn pattern_stats_from_row(row: &SqliteRow) -> Result<PatternStats, AgentError> {
    let action_frequencies_str: String = row.try_get("action_frequencies").map_err(store_err)?;
    let action_frequencies: BTreeMap<String, u64> =
        serde_json::from_str(&action_frequencies_str).map_err(|e| AgentError::StoreCorruption {
            message: format!("corrupt action_frequencies json: {e}"),
        })?;
    let last_seen_str: Option<String> = row.try_get("last_seen").map_err(store_err)?;
    let last_seen = last_seen_str
        .map(|s| parse_timestamp(&s, "last_seen"))
        .transpose()?;

    Ok(PatternStats {
        pattern_signature: row.try_get("pattern_signature").map_err(store_err)?,
        occurrences: row.try_get::<i64, _>("occurrences").map_err(store_err)? as u64,
        l1_resolutions: row.try_get::<i64, _>("l1_resolutions").map_err(store_err)? as u64,
        l2_resolutions: row.try_get::<i64, _>("l2_resolutions").map_err(store_err)? as u64,
        l3_resolutions: row.try_get::<i64, _>("l3_resolutions").map_err(store_err)? as u64,
        successes: row.try_get::<i64, _>("successes").map_err(store_err)? as u64,
        failures: row.try_get::<i64, _>("failures").map_err(store_err)? as u64,
        avg_resolution_time_ms: row.try_get("avg_resolution_time_ms").map_err(store_err)?,
        last_seen,
        promotion_eligible: row.try_get::<i64, _>("promotion_eligible").map_err(store_err)? != 0,
        action_frequencies,
    })
}
