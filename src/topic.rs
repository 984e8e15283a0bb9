//! Topic-shift detection: cosine distance between consecutive observation
//! embeddings, compared against an EWMA-adaptive threshold. On a shift the
//! preceding thread is snapshotted into an immutable stash and a one-line
//! notification is queued.

use crate::db::Store;
use crate::embedding;
use crate::models::now_ts;
use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

pub const DEFAULT_THRESHOLD: f64 = 0.3;
const DEFAULT_ALPHA: f64 = 0.3;
const DEFAULT_SENSITIVITY_K: f64 = 1.5;
const MIN_THRESHOLD: f64 = 0.15;
const MAX_THRESHOLD: f64 = 0.6;
const MAX_SNAPSHOT_OBSERVATIONS: usize = 20;
const TOPIC_LABEL_CHARS: usize = 80;
const SUMMARY_CHARS: usize = 200;

pub const RESUME_COMMAND: &str = "/laminark:resume";

#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// Manual override: when set, the adaptive manager is bypassed entirely.
    pub manual_threshold: Option<f64>,
    pub adaptive: bool,
    pub alpha: f64,
    pub sensitivity_k: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            manual_threshold: None,
            adaptive: true,
            alpha: DEFAULT_ALPHA,
            sensitivity_k: DEFAULT_SENSITIVITY_K,
            min_threshold: MIN_THRESHOLD,
            max_threshold: MAX_THRESHOLD,
        }
    }
}

impl TopicConfig {
    /// `~/.laminark/topic-detection.json`; sensitivity presets map to the
    /// spread multiplier k.
    pub fn load() -> Self {
        let Some(v) = crate::models::read_json_config("topic-detection.json") else {
            return Self::default();
        };
        let mut config = Self::default();
        config.manual_threshold = v["threshold"].as_f64();
        if let Some(adaptive) = v["adaptive"].as_bool() {
            config.adaptive = adaptive;
        }
        if let Some(alpha) = v["alpha"].as_f64() {
            config.alpha = alpha.clamp(0.01, 1.0);
        }
        config.sensitivity_k = match v["sensitivity"].as_str() {
            Some("low") => 2.0,
            Some("high") => 1.0,
            _ => v["sensitivity_k"].as_f64().unwrap_or(DEFAULT_SENSITIVITY_K),
        };
        config
    }
}

#[derive(Debug, Clone)]
pub struct ShiftDecision {
    pub shifted: bool,
    pub distance: f64,
    pub threshold: f64,
    pub stash_id: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub content: String,
    pub source: String,
    pub timestamp: String,
    pub embedding: Vec<f32>,
}

struct TopicState {
    prev_embedding: Option<Vec<f32>>,
    ewma_mean: f64,
    ewma_var: f64,
    samples: i64,
}

/// Evaluate one new observation that carries an embedding. Returns None when
/// there was no previous embedding to compare against (first observation of
/// the session). Nothing is logged in that case, only state recorded.
pub fn evaluate(
    store: &Store,
    config: &TopicConfig,
    project: &str,
    session_id: &str,
    observation_id: &str,
    vector: &[f32],
) -> Result<Option<ShiftDecision>> {
    let state = load_state(store, session_id)?;

    let Some(prev) = state.prev_embedding.as_deref() else {
        save_state(store, session_id, project, vector, state.ewma_mean, state.ewma_var, state.samples)?;
        return Ok(None);
    };

    let distance = embedding::cosine_distance(prev, vector) as f64;

    let (mean, var, threshold) = if let Some(manual) = config.manual_threshold {
        (state.ewma_mean, state.ewma_var, manual)
    } else if config.adaptive {
        // EWMA update first, then threshold = mu + k*sigma within bounds.
        let diff = distance - state.ewma_mean;
        let incr = config.alpha * diff;
        let mean = state.ewma_mean + incr;
        let var = (1.0 - config.alpha) * (state.ewma_var + diff * incr);
        let threshold = (mean + config.sensitivity_k * var.sqrt())
            .clamp(config.min_threshold, config.max_threshold);
        (mean, var, threshold)
    } else {
        (state.ewma_mean, state.ewma_var, DEFAULT_THRESHOLD)
    };

    let shifted = distance > threshold;
    let confidence = if shifted {
        ((distance - threshold) / threshold).clamp(0.0, 1.0)
    } else {
        ((threshold - distance) / threshold).clamp(0.0, 1.0)
    };

    let stash_id = if shifted {
        stash_previous_thread(store, project, session_id, observation_id)?
    } else {
        None
    };

    store.conn.execute(
        "INSERT INTO shift_log
            (project, session_id, observation_id, distance, threshold, ewma_mean, ewma_var, shifted, confidence, stash_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            project,
            session_id,
            observation_id,
            distance,
            threshold,
            mean,
            var,
            shifted as i64,
            confidence,
            stash_id,
            now_ts()
        ],
    )?;

    save_state(store, session_id, project, vector, mean, var, state.samples + 1)?;

    Ok(Some(ShiftDecision {
        shifted,
        distance,
        threshold,
        stash_id,
    }))
}

/// Snapshot up to 20 observations strictly older than the current one,
/// ascending by time, and queue the resume notification. Returns None when
/// there is nothing to stash; the decision is still logged by the caller.
fn stash_previous_thread(
    store: &Store,
    project: &str,
    session_id: &str,
    current_observation_id: &str,
) -> Result<Option<String>> {
    let snapshots = collect_snapshots(store, session_id, current_observation_id)?;
    if snapshots.is_empty() {
        return Ok(None);
    }

    let topic = derive_topic_label(store, &snapshots)?;
    let summary = derive_summary(&snapshots);
    let stash_id = Uuid::new_v4().to_string();

    store.conn.execute(
        "INSERT INTO stashes (id, project, session_id, topic, summary, snapshots, created_at, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'stashed')",
        params![
            stash_id,
            project,
            session_id,
            topic,
            summary,
            serde_json::to_string(&snapshots)?,
            now_ts()
        ],
    )?;

    store.add_notification(
        project,
        &format!(
            "Topic shift detected. Previous context stashed: \"{topic}\". Use {RESUME_COMMAND} to return."
        ),
    )?;

    Ok(Some(stash_id))
}

fn collect_snapshots(
    store: &Store,
    session_id: &str,
    current_observation_id: &str,
) -> Result<Vec<Snapshot>> {
    let current_created: Option<String> = store
        .conn
        .query_row(
            "SELECT created_at FROM observations WHERE id = ?1",
            [current_observation_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(current_created) = current_created else {
        return Ok(Vec::new());
    };

    let mut stmt = store.conn.prepare(
        "SELECT id, content, source, created_at FROM observations
         WHERE session_id = ?1 AND deleted_at IS NULL AND created_at < ?2
         ORDER BY created_at DESC LIMIT ?3",
    )?;
    let mut rows: Vec<(String, String, String, String)> = stmt
        .query_map(
            params![session_id, current_created, MAX_SNAPSHOT_OBSERVATIONS as i64],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.reverse(); // ascending time order

    let mut snapshots = Vec::with_capacity(rows.len());
    for (id, content, source, timestamp) in rows {
        let embedding = store.get_embedding(&id)?.unwrap_or_default();
        snapshots.push(Snapshot {
            id,
            content,
            source,
            timestamp,
            embedding,
        });
    }
    Ok(snapshots)
}

/// First non-empty observation title in the thread, else the first 80 chars
/// of the oldest content.
fn derive_topic_label(store: &Store, snapshots: &[Snapshot]) -> Result<String> {
    for snap in snapshots {
        let title: Option<String> = store
            .conn
            .query_row("SELECT title FROM observations WHERE id = ?1", [&snap.id], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();
        if let Some(title) = title {
            if !title.trim().is_empty() {
                return Ok(title);
            }
        }
    }
    let oldest = &snapshots[0].content;
    Ok(truncate_chars(oldest.trim(), TOPIC_LABEL_CHARS))
}

/// Oldest three contents joined by " | ", capped at 200 chars.
fn derive_summary(snapshots: &[Snapshot]) -> String {
    let joined = snapshots
        .iter()
        .take(3)
        .map(|s| s.content.replace('\n', " "))
        .collect::<Vec<_>>()
        .join(" | ");
    truncate_chars(&joined, SUMMARY_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect()
}

fn load_state(store: &Store, session_id: &str) -> Result<TopicState> {
    let row = store
        .conn
        .query_row(
            "SELECT prev_embedding, ewma_mean, ewma_var, samples FROM topic_state WHERE session_id = ?1",
            [session_id],
            |row| {
                let blob: Option<Vec<u8>> = row.get(0)?;
                Ok(TopicState {
                    prev_embedding: blob.map(|b| embedding::from_blob(&b)),
                    ewma_mean: row.get(1)?,
                    ewma_var: row.get(2)?,
                    samples: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row.unwrap_or(TopicState {
        prev_embedding: None,
        ewma_mean: 0.0,
        ewma_var: 0.0,
        samples: 0,
    }))
}

fn save_state(
    store: &Store,
    session_id: &str,
    project: &str,
    vector: &[f32],
    mean: f64,
    var: f64,
    samples: i64,
) -> Result<()> {
    store.conn.execute(
        "INSERT INTO topic_state (session_id, project, prev_embedding, ewma_mean, ewma_var, samples)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(session_id) DO UPDATE SET
            prev_embedding = ?3, ewma_mean = ?4, ewma_var = ?5, samples = ?6",
        params![session_id, project, embedding::to_blob(vector), mean, var, samples],
    )?;
    Ok(())
}

impl Store {
    /// Stashes still waiting to be resumed, newest first.
    pub fn recent_stashes(&self, project: &str, limit: usize) -> Result<Vec<(String, String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, topic, created_at FROM stashes
             WHERE project = ?1 AND status = 'stashed'
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![project, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
