use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::Database;
use crate::errors::{AppError, ResultExt};
use crate::models::{
    AnalyticsLog, DashboardStats, HiddenAnalysis, Intent, TallyEntry, UNDECIDED_CANDIDATE,
    UNKNOWN_LOCATION,
};

/// Number of records the dashboard aggregates.
pub const DASHBOARD_WINDOW: i64 = 100;

const TOP_CONCERNS: usize = 5;

/// Best-effort sink for the hidden analysis of each turn.
///
/// Without a database the records are only logged.
#[derive(Clone)]
pub struct AnalyticsSink {
    db: Option<Database>,
}

#[derive(Debug, FromRow)]
struct AnalyticsLogRow {
    timestamp: DateTime<Utc>,
    ip_hash: String,
    user_location: String,
    winning_candidate: String,
    user_intents: Json<Vec<Intent>>,
    conversation_summary: Option<String>,
    conversation_length: i32,
}

impl From<AnalyticsLogRow> for AnalyticsLog {
    fn from(row: AnalyticsLogRow) -> Self {
        Self {
            timestamp: row.timestamp,
            ip_hash: row.ip_hash,
            user_location: row.user_location,
            winning_candidate: row.winning_candidate,
            user_intents: row.user_intents.0,
            conversation_summary: row.conversation_summary,
            conversation_length: row.conversation_length,
        }
    }
}

impl AnalyticsLog {
    pub fn from_analysis(
        ip: &str,
        analysis: HiddenAnalysis,
        conversation_length: usize,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            ip_hash: hash_ip(ip),
            user_location: analysis
                .user_location_inferred
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
            winning_candidate: analysis
                .winning_candidate
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| UNDECIDED_CANDIDATE.to_string()),
            user_intents: analysis.user_intents,
            conversation_summary: analysis.conversation_summary,
            conversation_length: i32::try_from(conversation_length).unwrap_or(i32::MAX),
        }
    }
}

impl AnalyticsSink {
    pub fn new(db: Option<Database>) -> Self {
        Self { db }
    }

    /// Fire-and-forget write; failures are logged and never reach the user.
    pub fn record(&self, ip: &str, analysis: HiddenAnalysis, conversation_length: usize) {
        let log = AnalyticsLog::from_analysis(ip, analysis, conversation_length, Utc::now());
        let sink = self.clone();

        tokio::spawn(async move {
            if let Err(e) = sink.save(&log).await {
                tracing::error!("Failed to save analytics: {}", e);
            }
        });
    }

    pub async fn save(&self, log: &AnalyticsLog) -> Result<(), AppError> {
        let Some(ref db) = self.db else {
            tracing::info!(
                winning_candidate = %log.winning_candidate,
                user_location = %log.user_location,
                intents = log.user_intents.len(),
                conversation_length = log.conversation_length,
                "Analytics log (no store configured)"
            );
            return Ok(());
        };
        let pool = db.ready().await?;

        sqlx::query(
            "INSERT INTO analytics_logs (
                id, timestamp, ip_hash, user_location, winning_candidate,
                user_intents, conversation_summary, conversation_length
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::new_v4())
        .bind(log.timestamp)
        .bind(&log.ip_hash)
        .bind(&log.user_location)
        .bind(&log.winning_candidate)
        .bind(Json(&log.user_intents))
        .bind(&log.conversation_summary)
        .bind(log.conversation_length)
        .execute(pool)
        .await
        .context("insert analytics log")?;

        tracing::debug!("Analytics log stored for {}", log.winning_candidate);
        Ok(())
    }

    /// Latest logs, newest first. Empty when no store is configured.
    pub async fn recent(&self, limit: i64) -> Result<Vec<AnalyticsLog>, AppError> {
        let Some(ref db) = self.db else {
            return Ok(Vec::new());
        };
        let pool = db.ready().await?;

        let rows = sqlx::query_as::<_, AnalyticsLogRow>(
            "SELECT timestamp, ip_hash, user_location, winning_candidate,
                    user_intents, conversation_summary, conversation_length
             FROM analytics_logs
             ORDER BY timestamp DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("load analytics logs")?;

        Ok(rows.into_iter().map(AnalyticsLog::from).collect())
    }
}

/// SHA-256 hex digest of the client IP; raw addresses are never stored.
pub fn hash_ip(ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.as_bytes());
    hex::encode(hasher.finalize())
}

/// Counts names keeping first-appearance order, then sorts by count
/// descending (stable, so ties stay in appearance order).
fn tally<'a>(names: impl Iterator<Item = &'a str>) -> Vec<TallyEntry> {
    let mut entries: Vec<TallyEntry> = Vec::new();
    for name in names {
        match entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.value += 1,
            None => entries.push(TallyEntry {
                name: name.to_string(),
                value: 1,
            }),
        }
    }
    entries.sort_by(|a, b| b.value.cmp(&a.value));
    entries
}

impl DashboardStats {
    pub fn from_logs(logs: &[AnalyticsLog]) -> Self {
        let concerns = tally(
            logs.iter()
                .flat_map(|log| log.user_intents.iter())
                .map(|intent| intent.topic.as_str()),
        );
        let candidates = tally(
            logs.iter()
                .map(|log| log.winning_candidate.as_str())
                .filter(|name| !name.is_empty()),
        );

        Self {
            total_conversations: logs.len(),
            top_concern: concerns
                .first()
                .map(|e| e.name.clone())
                .unwrap_or_else(|| "N/A".to_string()),
            top_candidate: candidates
                .first()
                .map(|e| e.name.clone())
                .unwrap_or_else(|| "N/A".to_string()),
            concerns: concerns.into_iter().take(TOP_CONCERNS).collect(),
            candidates,
        }
    }
}
