//! Session lifecycle: SessionStart creates the row and warms everything the
//! PostToolUse path reads (registry, routing patterns); SessionEnd stamps
//! the close; Stop distils a heuristic summary.

use crate::context;
use crate::db::Store;
use crate::discovery;
use crate::models::now_ts;
use crate::router;
use anyhow::Result;
use rusqlite::params;

const SUMMARY_OBSERVATIONS: usize = 5;
const SUMMARY_CHARS: usize = 400;

/// SessionStart. Returns the context block to inject, if any.
pub async fn start(store: &Store, project: &str, session_id: &str, cwd: &str) -> Result<Option<String>> {
    store.conn.execute(
        "INSERT INTO sessions (id, project, started_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO NOTHING",
        params![session_id, project, now_ts()],
    )?;

    let discovered = discovery::scan(cwd);
    let mut seen = Vec::with_capacity(discovered.len());
    for tool in &discovered {
        if let Err(e) = store.upsert_tool(tool, project) {
            eprintln!("[laminark] registry upsert failed for {}: {e}", tool.name);
        }
        seen.push(tool.name.clone());
    }
    if let Err(e) = store.mark_stale_missing(project, &seen) {
        eprintln!("[laminark] staleness pass failed: {e}");
    }

    if let Err(e) = router::precompute_patterns(store, project) {
        eprintln!("[laminark] pattern mining failed: {e}");
    }

    store.purge_stale_research()?;

    context::assemble(store, project, session_id).await
}

/// SessionEnd stamps ended_at; repeated events are harmless.
pub fn end(store: &Store, session_id: &str) -> Result<()> {
    store.conn.execute(
        "UPDATE sessions SET ended_at = ?1 WHERE id = ?2 AND ended_at IS NULL",
        params![now_ts(), session_id],
    )?;
    Ok(())
}

/// Stop: heuristic extractive summary over the session's observations.
/// No model call: first sentences of the most recent few, deduplicated.
/// A session with zero observations keeps a NULL summary.
pub fn stop(store: &Store, project: &str, session_id: &str) -> Result<()> {
    let observations = store.list_observations(&crate::observations::ListQuery {
        project: project.to_string(),
        session_id: Some(session_id.to_string()),
        limit: SUMMARY_OBSERVATIONS,
        include_unclassified: true,
    })?;
    if observations.is_empty() {
        return Ok(());
    }

    let mut parts: Vec<String> = Vec::new();
    for obs in observations.iter().rev() {
        let line = first_sentence(obs.title.as_deref().unwrap_or(&obs.content));
        if !line.is_empty() && !parts.contains(&line) {
            parts.push(line);
        }
    }
    let mut summary = parts.join("; ");
    if summary.chars().count() > SUMMARY_CHARS {
        summary = summary.chars().take(SUMMARY_CHARS).collect();
    }

    store.conn.execute(
        "UPDATE sessions SET summary = ?1 WHERE id = ?2",
        params![summary, session_id],
    )?;
    Ok(())
}

fn first_sentence(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let end = flat
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '\n' | '!' | '?'))
        .map(|(i, _)| i)
        .unwrap_or(flat.len());
    let head = &flat[..end];
    crate::summary::first_words(head, 12)
}
