//! [`IncidentStore`] — the sqlite-backed embedded database of record
//! (spec §4.10). Mirrors [`haven_queue::OfflineQueue`]'s persistence style:
//! WAL journal, embedded `sqlx::migrate!` migrations, a single-connection
//! pool so writes serialize without an application-level mutex.

use crate::schema::{
    incident_from_row, incident_severity_str, outcome_str, pattern_stats_from_row,
    resolution_from_row, resolution_level_str,
};
use chrono::Utc;
use haven_types::{AgentError, Incident, Outcome, PatternStats, Resolution, ResolutionLevel};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

/// Context handed to the L2 planner to enrich its prompt with prior
/// experience of the same `pattern_signature` (spec §4.10).
#[derive(Debug, Clone, serde::Serialize)]
pub struct PatternContext {
    pub recent_resolutions: Vec<Resolution>,
    pub action_frequencies: BTreeMap<String, u64>,
    pub success_rate: f64,
}

const RECENT_RESOLUTIONS_LIMIT: i64 = 5;

/// Promotion thresholds from spec §4.10.
pub const MIN_OCCURRENCES: u64 = 5;
pub const MIN_L2_RESOLUTIONS: u64 = 3;
pub const MIN_SUCCESS_RATE: f64 = 0.9;
pub const MAX_AVG_RESOLUTION_TIME_MS: f64 = 30_000.0;

pub struct IncidentStore {
    pool: SqlitePool,
}

fn store_err(context: &str) -> impl Fn(sqlx::Error) -> AgentError + '_ {
    move |e| AgentError::StoreCorruption {
        message: format!("{context}: {e}"),
    }
}

impl IncidentStore {
    pub async fn open(path: &Path) -> Result<Self, AgentError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| AgentError::configuration(format!("invalid store path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(store_err("failed to open incidents.db"))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AgentError::StoreCorruption {
                message: format!("incidents.db migration failed: {e}"),
            })?;

        Ok(Self { pool })
    }

    /// Inserts a new incident and bumps its pattern's `occurrences`/
    /// `last_seen`. Does not touch resolution-derived fields.
    pub async fn record_incident(&self, incident: &Incident) -> Result<(), AgentError> {
        let raw_data_json = serde_json::to_string(&incident.raw_data)
            .map_err(|e| AgentError::StoreCorruption { message: format!("encode raw_data: {e}") })?;

        let mut tx = self.pool.begin().await.map_err(store_err("begin tx"))?;

        sqlx::query(
            "INSERT INTO incidents (id, site_id, host_id, incident_type, severity, created_at, raw_data, pattern_signature)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&incident.id)
        .bind(&incident.site_id)
        .bind(&incident.host_id)
        .bind(incident.incident_type.as_str())
        .bind(incident_severity_str(incident.severity))
        .bind(incident.created_at.to_rfc3339())
        .bind(&raw_data_json)
        .bind(&incident.pattern_signature)
        .execute(&mut *tx)
        .await
        .map_err(store_err("insert incident"))?;

        let mut stats = load_stats(&mut tx, &incident.pattern_signature).await?;
        stats.occurrences += 1;
        stats.last_seen = Some(incident.created_at.max(stats.last_seen.unwrap_or(incident.created_at)));
        recompute_eligibility(&mut stats);
        upsert_stats(&mut tx, &stats).await?;

        tx.commit().await.map_err(store_err("commit tx"))?;
        Ok(())
    }

    /// Writes the (immutable, at-most-one-per-incident) [`Resolution`] and
    /// folds it into the pattern's incrementally maintained statistics —
    /// never a from-scratch rescan (spec §4.10 [EXPANDED]).
    pub async fn update_resolution(
        &self,
        incident_id: &str,
        resolution: &Resolution,
    ) -> Result<(), AgentError> {
        let action_params_json = serde_json::to_string(&resolution.action_params)
            .map_err(|e| AgentError::StoreCorruption { message: format!("encode action_params: {e}") })?;

        let mut tx = self.pool.begin().await.map_err(store_err("begin tx"))?;

        let existing = sqlx::query("SELECT incident_id FROM resolutions WHERE incident_id = ?")
            .bind(incident_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_err("check existing resolution"))?;
        if existing.is_some() {
            return Err(AgentError::StoreCorruption {
                message: format!("incident {incident_id} already has an immutable resolution"),
            });
        }

        let pattern_signature: String =
            sqlx::query("SELECT pattern_signature FROM incidents WHERE id = ?")
                .bind(incident_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(store_err("lookup incident for resolution"))?
                .get("pattern_signature");

        sqlx::query(
            "INSERT INTO resolutions (incident_id, resolution_level, action, action_params, outcome,
                resolution_time_ms, resolved_at, error_message, reasoning, cost_usd, llm_tokens_in, llm_tokens_out)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(incident_id)
        .bind(resolution_level_str(resolution.resolution_level))
        .bind(&resolution.action)
        .bind(&action_params_json)
        .bind(outcome_str(resolution.outcome))
        .bind(resolution.resolution_time_ms as i64)
        .bind(resolution.resolved_at.to_rfc3339())
        .bind(&resolution.error_message)
        .bind(&resolution.reasoning)
        .bind(resolution.cost_usd)
        .bind(resolution.llm_tokens_in.map(|n| n as i64))
        .bind(resolution.llm_tokens_out.map(|n| n as i64))
        .execute(&mut *tx)
        .await
        .map_err(store_err("insert resolution"))?;

        let mut stats = load_stats(&mut tx, &pattern_signature).await?;
        match resolution.resolution_level {
            ResolutionLevel::L1 => stats.l1_resolutions += 1,
            ResolutionLevel::L2 => stats.l2_resolutions += 1,
            ResolutionLevel::L3 => stats.l3_resolutions += 1,
        }
        let is_success = resolution.outcome == Outcome::Success;
        if is_success {
            stats.successes += 1;
        } else if matches!(resolution.outcome, Outcome::Failure | Outcome::Partial) {
            stats.failures += 1;
        }

        let total_resolved = stats.l1_resolutions + stats.l2_resolutions + stats.l3_resolutions;
        let prior_total = total_resolved - 1;
        stats.avg_resolution_time_ms = if prior_total == 0 {
            resolution.resolution_time_ms as f64
        } else {
            (stats.avg_resolution_time_ms * prior_total as f64 + resolution.resolution_time_ms as f64)
                / total_resolved as f64
        };

        if is_success {
            *stats
                .action_frequencies
                .entry(resolution.action.clone())
                .or_insert(0) += 1;
        }

        recompute_eligibility(&mut stats);
        upsert_stats(&mut tx, &stats).await?;

        tx.commit().await.map_err(store_err("commit tx"))?;
        Ok(())
    }

    /// Context to enrich an L2 planning request: recent resolutions of the
    /// same pattern, action frequencies, and success rate (spec §4.10).
    pub async fn get_pattern_context(&self, signature: &str) -> Result<PatternContext, AgentError> {
        let rows = sqlx::query(
            "SELECT r.* FROM resolutions r
             JOIN incidents i ON i.id = r.incident_id
             WHERE i.pattern_signature = ?
             ORDER BY r.resolved_at DESC LIMIT ?",
        )
        .bind(signature)
        .bind(RECENT_RESOLUTIONS_LIMIT)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("pattern context query"))?;

        let recent_resolutions = rows
            .iter()
            .map(resolution_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let stats = self.pattern_stats(signature).await?;
        let (action_frequencies, success_rate) = match stats {
            Some(s) => (s.action_frequencies, s.success_rate()),
            None => (BTreeMap::new(), 0.0),
        };

        Ok(PatternContext {
            recent_resolutions,
            action_frequencies,
            success_rate,
        })
    }

    pub async fn pattern_stats(&self, signature: &str) -> Result<Option<PatternStats>, AgentError> {
        let row = sqlx::query("SELECT * FROM pattern_stats WHERE pattern_signature = ?")
            .bind(signature)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err("pattern_stats lookup"))?;
        row.as_ref().map(pattern_stats_from_row).transpose()
    }

    /// Patterns meeting every promotion threshold of spec §4.10, in no
    /// particular order — the learning loop scores and sorts them.
    pub async fn promotion_candidates(&self) -> Result<Vec<PatternStats>, AgentError> {
        let rows = sqlx::query(
            "SELECT * FROM pattern_stats
             WHERE occurrences >= ?
               AND l2_resolutions >= ?
               AND avg_resolution_time_ms <= ?
               AND (successes * 1.0) / occurrences >= ?",
        )
        .bind(MIN_OCCURRENCES as i64)
        .bind(MIN_L2_RESOLUTIONS as i64)
        .bind(MAX_AVG_RESOLUTION_TIME_MS)
        .bind(MIN_SUCCESS_RATE)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("promotion_candidates query"))?;

        rows.iter().map(pattern_stats_from_row).collect()
    }

    pub async fn incident(&self, id: &str) -> Result<Option<Incident>, AgentError> {
        let row = sqlx::query("SELECT * FROM incidents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err("incident lookup"))?;
        row.as_ref().map(incident_from_row).transpose()
    }

    /// Queues a below-threshold (or `auto_promote=false`) candidate for
    /// operator review rather than silently dropping it (spec §4.10).
    pub async fn queue_for_review(
        &self,
        pattern_signature: &str,
        confidence: f64,
        proposed_action: &str,
    ) -> Result<(), AgentError> {
        sqlx::query(
            "INSERT INTO promotion_review_queue (pattern_signature, confidence, proposed_action, queued_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(pattern_signature) DO UPDATE SET confidence = excluded.confidence,
                proposed_action = excluded.proposed_action, queued_at = excluded.queued_at",
        )
        .bind(pattern_signature)
        .bind(confidence)
        .bind(proposed_action)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err("queue_for_review"))?;
        Ok(())
    }

    /// Full from-scratch rebuild of `pattern_stats` from the
    /// `incidents`/`resolutions` tables — the recovery path after an
    /// `AgentError::StoreCorruption` on the materialized view (spec §4.10
    /// [EXPANDED]).
    pub async fn rebuild_pattern_stats(&self) -> Result<(), AgentError> {
        let mut tx = self.pool.begin().await.map_err(store_err("begin rebuild tx"))?;
        sqlx::query("DELETE FROM pattern_stats")
            .execute(&mut *tx)
            .await
            .map_err(store_err("clear pattern_stats"))?;

        let incident_rows = sqlx::query("SELECT id, pattern_signature, created_at FROM incidents")
            .fetch_all(&mut *tx)
            .await
            .map_err(store_err("rebuild: scan incidents"))?;

        let mut by_signature: BTreeMap<String, PatternStats> = BTreeMap::new();
        for row in &incident_rows {
            let signature: String = row.get("pattern_signature");
            let created_at: String = row.get("created_at");
            let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| AgentError::StoreCorruption { message: format!("rebuild: bad timestamp: {e}") })?
                .with_timezone(&Utc);
            let entry = by_signature.entry(signature.clone()).or_insert_with(|| PatternStats {
                pattern_signature: signature,
                ..Default::default()
            });
            entry.occurrences += 1;
            entry.last_seen = Some(entry.last_seen.map_or(created_at, |prev| prev.max(created_at)));
        }

        let resolution_rows = sqlx::query(
            "SELECT r.*, i.pattern_signature AS pattern_signature FROM resolutions r
             JOIN incidents i ON i.id = r.incident_id",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(store_err("rebuild: scan resolutions"))?;

        for row in &resolution_rows {
            let signature: String = row.get("pattern_signature");
            let resolution = resolution_from_row(row)?;
            let entry = by_signature.entry(signature.clone()).or_insert_with(|| PatternStats {
                pattern_signature: signature,
                ..Default::default()
            });
            match resolution.resolution_level {
                ResolutionLevel::L1 => entry.l1_resolutions += 1,
                ResolutionLevel::L2 => entry.l2_resolutions += 1,
                ResolutionLevel::L3 => entry.l3_resolutions += 1,
            }
            let is_success = resolution.outcome == Outcome::Success;
            if is_success {
                entry.successes += 1;
                *entry.action_frequencies.entry(resolution.action.clone()).or_insert(0) += 1;
            } else if matches!(resolution.outcome, Outcome::Failure | Outcome::Partial) {
                entry.failures += 1;
            }
            let total = entry.l1_resolutions + entry.l2_resolutions + entry.l3_resolutions;
            let prior = total - 1;
            entry.avg_resolution_time_ms = if prior == 0 {
                resolution.resolution_time_ms as f64
            } else {
                (entry.avg_resolution_time_ms * prior as f64 + resolution.resolution_time_ms as f64) / total as f64
            };
        }

        for stats in by_signature.values_mut() {
            recompute_eligibility(stats);
        }
        for stats in by_signature.values() {
            upsert_stats(&mut tx, stats).await?;
        }

        tx.commit().await.map_err(store_err("commit rebuild tx"))?;
        Ok(())
    }
}

fn recompute_eligibility(stats: &mut PatternStats) {
    stats.promotion_eligible = stats.occurrences >= MIN_OCCURRENCES
        && stats.l2_resolutions >= MIN_L2_RESOLUTIONS
        && stats.success_rate() >= MIN_SUCCESS_RATE
        && stats.avg_resolution_time_ms <= MAX_AVG_RESOLUTION_TIME_MS;
}

async fn load_stats(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    signature: &str,
) -> Result<PatternStats, AgentError> {
    let row = sqlx::query("SELECT * FROM pattern_stats WHERE pattern_signature = ?")
        .bind(signature)
        .fetch_optional(&mut **tx)
        .await
        .map_err(store_err("load pattern_stats"))?;
    match row {
        Some(r) => pattern_stats_from_row(&r),
        None => Ok(PatternStats {
            pattern_signature: signature.to_string(),
            ..Default::default()
        }),
    }
}

async fn upsert_stats(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    stats: &PatternStats,
) -> Result<(), AgentError> {
    let action_frequencies_json = serde_json::to_string(&stats.action_frequencies)
        .map_err(|e| AgentError::StoreCorruption { message: format!("encode action_frequencies: {e}") })?;

    sqlx::query(
        "INSERT INTO pattern_stats (pattern_signature, occurrences, l1_resolutions, l2_resolutions,
            l3_resolutions, successes, failures, avg_resolution_time_ms, last_seen, promotion_eligible,
            action_frequencies)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(pattern_signature) DO UPDATE SET
            occurrences = excluded.occurrences,
            l1_resolutions = excluded.l1_resolutions,
            l2_resolutions = excluded.l2_resolutions,
            l3_resolutions = excluded.l3_resolutions,
            successes = excluded.successes,
            failures = excluded.failures,
            avg_resolution_time_ms = excluded.avg_resolution_time_ms,
            last_seen = excluded.last_seen,
            promotion_eligible = excluded.promotion_eligible,
            action_frequencies = excluded.action_frequencies",
    )
    .bind(&stats.pattern_signature)
    .bind(stats.occurrences as i64)
    .bind(stats.l1_resolutions as i64)
    .bind(stats.l2_resolutions as i64)
    .bind(stats.l3_resolutions as i64)
    .bind(stats.successes as i64)
    .bind(stats.failures as i64)
    .bind(stats.avg_resolution_time_ms)
    .bind(stats.last_seen.map(|t| t.to_rfc3339()))
    .bind(stats.promotion_eligible as i64)
    .bind(&action_frequencies_json)
    .execute(&mut **tx)
    .await
    .map_err(store_err("upsert pattern_stats"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_types::{IncidentType, Severity, Value};
    use tempfile::tempdir;

    async fn open_temp_store() -> (IncidentStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("incidents.db");
        let store = IncidentStore::open(&path).await.unwrap();
        (store, dir)
    }

    fn incident(id: &str) -> Incident {
        Incident::new(
            id,
            "site-a",
            "host-1",
            IncidentType::from("logging"),
            Severity::Medium,
            Utc::now(),
            Value::Null,
        )
    }

    #[tokio::test]
    async fn record_incident_then_resolution_updates_pattern_stats() {
        let (store, _dir) = open_temp_store().await;
        let inc = incident("inc-1");
        let signature = inc.pattern_signature.clone();
        store.record_incident(&inc).await.unwrap();

        let resolution = Resolution::new(
            &inc.id,
            ResolutionLevel::L2,
            "restart_logging_service",
            Value::Null,
            Outcome::Success,
            2_500,
            Utc::now(),
        );
        store.update_resolution(&inc.id, &resolution).await.unwrap();

        let stats = store.pattern_stats(&signature).await.unwrap().unwrap();
        assert_eq!(stats.occurrences, 1);
        assert_eq!(stats.l2_resolutions, 1);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.avg_resolution_time_ms, 2_500.0);
    }

    #[tokio::test]
    async fn ten_identical_incidents_become_a_promotion_candidate() {
        let (store, _dir) = open_temp_store().await;
        let mut signature = String::new();
        for n in 0..10 {
            let inc = incident(&format!("inc-{n}"));
            signature = inc.pattern_signature.clone();
            store.record_incident(&inc).await.unwrap();
            let outcome = if n == 9 { Outcome::Failure } else { Outcome::Success };
            let resolution = Resolution::new(
                &inc.id,
                ResolutionLevel::L2,
                "restart_logging_service",
                Value::Null,
                outcome,
                2_500,
                Utc::now(),
            );
            store.update_resolution(&inc.id, &resolution).await.unwrap();
        }

        let candidates = store.promotion_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].pattern_signature, signature);
        assert_eq!(candidates[0].occurrences, 10);
        assert!((candidates[0].success_rate() - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rebuild_reproduces_the_same_stats() {
        let (store, _dir) = open_temp_store().await;
        let inc = incident("inc-1");
        let signature = inc.pattern_signature.clone();
        store.record_incident(&inc).await.unwrap();
        let resolution = Resolution::new(
            &inc.id,
            ResolutionLevel::L1,
            "restart_service",
            Value::Null,
            Outcome::Success,
            500,
            Utc::now(),
        );
        store.update_resolution(&inc.id, &resolution).await.unwrap();

        let before = store.pattern_stats(&signature).await.unwrap().unwrap();
        store.rebuild_pattern_stats().await.unwrap();
        let after = store.pattern_stats(&signature).await.unwrap().unwrap();

        assert_eq!(before.occurrences, after.occurrences);
        assert_eq!(before.successes, after.successes);
        assert_eq!(before.avg_resolution_time_ms, after.avg_resolution_time_ms);
    }
}
