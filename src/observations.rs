use crate::db::Store;
use crate::embedding;
use crate::models::{now_ts, ObservationKind};
use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Observation {
    pub id: String,
    pub project: String,
    pub session_id: Option<String>,
    pub kind: Option<String>,
    pub title: Option<String>,
    pub content: String,
    pub source: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewObservation {
    pub project: String,
    pub session_id: Option<String>,
    pub kind: Option<ObservationKind>,
    pub title: Option<String>,
    pub content: String,
    pub source: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub project: String,
    pub session_id: Option<String>,
    pub limit: usize,
    pub include_unclassified: bool,
}

/// Reciprocal-rank-fusion constant; the standard damping value.
const RRF_K: f64 = 60.0;

const OBS_COLUMNS: &str = "id, project, session_id, kind, title, content, source, created_at";

fn row_to_observation(row: &rusqlite::Row) -> rusqlite::Result<Observation> {
    Ok(Observation {
        id: row.get(0)?,
        project: row.get(1)?,
        session_id: row.get(2)?,
        kind: row.get(3)?,
        title: row.get(4)?,
        content: row.get(5)?,
        source: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl Store {
    /// Insert a live observation; the FTS trigger indexes it in the same
    /// statement. Empty content is a caller bug surfaced as an error.
    pub fn insert_observation(&self, new: &NewObservation) -> Result<String> {
        anyhow::ensure!(!new.content.trim().is_empty(), "observation content is empty");
        let id = Uuid::new_v4().to_string();
        let ts = now_ts();
        self.conn.execute(
            "INSERT INTO observations (id, project, session_id, kind, title, content, source, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                id,
                new.project,
                new.session_id,
                new.kind.map(|k| k.as_str()),
                new.title,
                new.content,
                new.source,
                ts
            ],
        )?;
        Ok(id)
    }

    pub fn get_observation(&self, id: &str) -> Result<Option<Observation>> {
        let obs = self
            .conn
            .query_row(
                &format!("SELECT {OBS_COLUMNS} FROM observations WHERE id = ?1 AND deleted_at IS NULL"),
                [id],
                row_to_observation,
            )
            .optional()?;
        Ok(obs)
    }

    pub fn list_observations(&self, query: &ListQuery) -> Result<Vec<Observation>> {
        let kind_clause = if query.include_unclassified {
            ""
        } else {
            "AND kind IS NOT NULL"
        };
        let rows = if let Some(session) = &query.session_id {
            self.conn
                .prepare(&format!(
                    "SELECT {OBS_COLUMNS} FROM observations
                     WHERE project = ?1 AND session_id = ?2 AND deleted_at IS NULL {kind_clause}
                     ORDER BY created_at DESC LIMIT ?3"
                ))?
                .query_map(
                    params![query.project, session, query.limit as i64],
                    row_to_observation,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            self.conn
                .prepare(&format!(
                    "SELECT {OBS_COLUMNS} FROM observations
                     WHERE project = ?1 AND deleted_at IS NULL {kind_clause}
                     ORDER BY created_at DESC LIMIT ?2"
                ))?
                .query_map(params![query.project, query.limit as i64], row_to_observation)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
    }

    /// The 20-most-recent window the save guard compares against.
    pub fn recent_observations(&self, project: &str, limit: usize) -> Result<Vec<Observation>> {
        self.list_observations(&ListQuery {
            project: project.to_string(),
            session_id: None,
            limit,
            include_unclassified: true,
        })
    }

    /// Soft delete: the row persists, the sync triggers clear both indexes.
    pub fn soft_delete_observation(&self, id: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE observations SET deleted_at = ?1, updated_at = ?1
             WHERE id = ?2 AND deleted_at IS NULL",
            params![now_ts(), id],
        )?;
        Ok(changed > 0)
    }

    /// BM25-ranked keyword search. The raw query is sanitised into bare
    /// quoted terms so FTS operators from user text cannot break the MATCH.
    pub fn keyword_search(
        &self,
        projects: &[String],
        query: &str,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        let fts_query = sanitize_fts_query(query);
        if fts_query.is_empty() || projects.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (0..projects.len())
            .map(|i| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT o.id, o.project, o.session_id, o.kind, o.title, o.content, o.source, o.created_at
             FROM obs_fts
             JOIN observations o ON o.id = obs_fts.observation_id
             WHERE obs_fts MATCH ?1 AND o.deleted_at IS NULL AND o.project IN ({placeholders})
             ORDER BY bm25(obs_fts) LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(fts_query), Box::new(limit as i64)];
        for p in projects {
            params_vec.push(Box::new(p.clone()));
        }
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(params_vec.iter().map(|b| b.as_ref())),
                row_to_observation,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn set_embedding(&self, observation_id: &str, vector: &[f32]) -> Result<()> {
        self.conn.execute(
            "INSERT INTO obs_vectors (observation_id, vector, dim) VALUES (?1, ?2, ?3)
             ON CONFLICT(observation_id) DO UPDATE SET vector = ?2, dim = ?3",
            params![observation_id, embedding::to_blob(vector), vector.len() as i64],
        )?;
        Ok(())
    }

    pub fn get_embedding(&self, observation_id: &str) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT vector FROM obs_vectors WHERE observation_id = ?1",
                [observation_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.map(|b| embedding::from_blob(&b)))
    }

    pub fn has_vectors(&self, project: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM obs_vectors v
             JOIN observations o ON o.id = v.observation_id
             WHERE o.project = ?1 AND o.deleted_at IS NULL",
            [project],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// K-nearest neighbours by cosine distance, ascending. The project's
    /// vector set is scanned in full; observation volume per project is
    /// small enough that this beats maintaining an ANN structure.
    pub fn vector_search(
        &self,
        project: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        let mut stmt = self.conn.prepare(
            "SELECT v.observation_id, v.vector FROM obs_vectors v
             JOIN observations o ON o.id = v.observation_id
             WHERE o.project = ?1 AND o.deleted_at IS NULL",
        )?;
        let mut scored: Vec<(String, f32)> = stmt
            .query_map([project], |row| {
                let id: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((id, blob))
            })?
            .filter_map(|r| r.ok())
            .map(|(id, blob)| {
                let vec = embedding::from_blob(&blob);
                let dist = embedding::cosine_distance(query, &vec);
                (id, dist)
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Hybrid search: keyword and vector ranks fused with reciprocal-rank
    /// fusion, then resolved back to observations.
    pub fn hybrid_search(
        &self,
        project: &str,
        query: &str,
        query_vector: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        let keyword = self.keyword_search(&[project.to_string()], query, limit * 2)?;
        let vector = match query_vector {
            Some(v) => self.vector_search(project, v, limit * 2)?,
            None => Vec::new(),
        };

        let mut scores: std::collections::HashMap<String, f64> = std::collections::HashMap::new();
        for (rank, obs) in keyword.iter().enumerate() {
            *scores.entry(obs.id.clone()).or_default() += 1.0 / (RRF_K + rank as f64 + 1.0);
        }
        for (rank, (id, _)) in vector.iter().enumerate() {
            *scores.entry(id.clone()).or_default() += 1.0 / (RRF_K + rank as f64 + 1.0);
        }

        let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(limit);

        let mut out = Vec::with_capacity(ranked.len());
        for (id, _) in ranked {
            if let Some(obs) = self.get_observation(&id)? {
                out.push(obs);
            }
        }
        Ok(out)
    }
}

/// Projects readable from `project`: itself plus any grants in
/// `cross-access.json` (`{"grants": {"<project>": ["<other>", ...]}}`).
pub fn readable_projects(project: &str) -> Vec<String> {
    let mut out = vec![project.to_string()];
    if let Some(config) = crate::models::read_json_config("cross-access.json") {
        for granted in config["grants"][project].as_array().into_iter().flatten() {
            if let Some(p) = granted.as_str() {
                if !out.iter().any(|existing| existing == p) {
                    out.push(p.to_string());
                }
            }
        }
    }
    out
}

/// Strip FTS5 operators: keep alphanumeric tokens, quote them, and join
/// with OR so partial matches still rank.
pub fn sanitize_fts_query(query: &str) -> String {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() >= 2)
        .take(12)
        .map(|t| format!("\"{t}\""))
        .collect();
    tokens.join(" OR ")
}
