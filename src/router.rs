//! Two-tier suggestion engine. Tier A replays learned (target, preceding-5)
//! patterns mined from usage history; tier B falls back to keyword overlap
//! between recent observations and candidate tool descriptions. Both tiers
//! are gated hard: suggestions stay rare.

use crate::classify::{self, ToolType};
use crate::db::Store;
use crate::models::now_ts;
use crate::registry::RegistryRow;
use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use std::collections::HashSet;

const PATTERN_WINDOW: usize = 5;
const MIN_PATTERN_FREQUENCY: i64 = 2;
const MINING_EVENT_CAP: usize = 200;
const CONFIDENCE_THRESHOLD: f64 = 0.6;
const MAX_SUGGESTIONS_PER_SESSION: i64 = 2;
const COOLDOWN_TOOL_CALLS: i64 = 5;
const WARMUP_TOOL_CALLS: i64 = 3;
const MIN_LEARNED_HISTORY: usize = 20;
const KEYWORD_OBSERVATIONS: usize = 5;

#[derive(Debug, Clone)]
struct RoutingState {
    suggestions_made: i64,
    tool_calls_since_suggestion: i64,
    tool_calls_total: i64,
}

#[derive(Debug, Clone)]
struct Candidate {
    name: String,
    description: Option<String>,
    evidence_count: i64,
    score: f64,
}

/// SessionStart pre-computation: mine the project's recent successful usage
/// events into (target, preceding-5) patterns and cache them in the
/// transient table. Existing patterns for the project are replaced.
pub fn precompute_patterns(store: &Store, project: &str) -> Result<usize> {
    let events = recent_project_events(store, project, MINING_EVENT_CAP)?;

    let mut counts: std::collections::HashMap<(String, String), i64> =
        std::collections::HashMap::new();

    // Window per session: a pattern never crosses a session boundary.
    let mut by_session: std::collections::HashMap<String, Vec<String>> =
        std::collections::HashMap::new();
    for (session_id, tool) in events {
        by_session.entry(session_id).or_default().push(tool);
    }
    for tools in by_session.values() {
        if tools.len() <= PATTERN_WINDOW {
            continue;
        }
        for i in PATTERN_WINDOW..tools.len() {
            let target = &tools[i];
            let preceding = &tools[i - PATTERN_WINDOW..i];
            let key = (
                target.clone(),
                serde_json::to_string(preceding).unwrap_or_default(),
            );
            *counts.entry(key).or_default() += 1;
        }
    }

    let tx = store.conn.unchecked_transaction()?;
    tx.execute("DELETE FROM routing_patterns WHERE project = ?1", [project])?;
    let mut stored = 0;
    for ((target, preceding), frequency) in counts {
        if frequency < MIN_PATTERN_FREQUENCY {
            continue;
        }
        tx.execute(
            "INSERT INTO routing_patterns (project, target, preceding, frequency)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(project, target, preceding) DO UPDATE SET frequency = ?4",
            params![project, target, preceding, frequency],
        )?;
        stored += 1;
    }
    tx.commit()?;
    Ok(stored)
}

/// Evaluate one non-self-reference, non-builtin PostToolUse. May queue at
/// most one suggestion; all failure paths are contained by the caller.
pub fn evaluate(store: &Store, project: &str, session_id: &str) -> Result<()> {
    let state = bump_tool_calls(store, project, session_id)?;

    if state.tool_calls_total <= WARMUP_TOOL_CALLS {
        return Ok(());
    }
    if state.suggestions_made >= MAX_SUGGESTIONS_PER_SESSION {
        return Ok(());
    }
    if state.suggestions_made > 0 && state.tool_calls_since_suggestion < COOLDOWN_TOOL_CALLS {
        return Ok(());
    }

    let tools_in_scope = store.tools_in_scope(project)?;
    let recent_tools = store.recent_session_tools(session_id, PATTERN_WINDOW)?;

    let learned_available =
        recent_project_events(store, project, MIN_LEARNED_HISTORY)?.len() >= MIN_LEARNED_HISTORY;

    let mut candidate = if learned_available {
        learned_candidate(store, project, &recent_tools, &tools_in_scope)?
    } else {
        None
    };

    // Fall through to the heuristic tier when the learned tier is
    // unavailable or stays below threshold.
    let learned_confident = candidate
        .as_ref()
        .map(|c| c.score >= CONFIDENCE_THRESHOLD)
        .unwrap_or(false);
    if !learned_confident {
        if let Some(h) =
            heuristic_candidate(store, project, session_id, &recent_tools, &tools_in_scope)?
        {
            let better = candidate.as_ref().map(|c| h.score > c.score).unwrap_or(true);
            if better {
                candidate = Some(h);
            }
        }
    }

    let Some(candidate) = candidate else {
        return Ok(());
    };
    if candidate.score < CONFIDENCE_THRESHOLD {
        return Ok(());
    }

    emit(store, project, session_id, &candidate)?;
    Ok(())
}

/// Tier A: best cached pattern by set overlap between its preceding list
/// and the session's most recent five tools.
fn learned_candidate(
    store: &Store,
    project: &str,
    recent_tools: &[String],
    tools_in_scope: &[RegistryRow],
) -> Result<Option<Candidate>> {
    if recent_tools.is_empty() {
        return Ok(None);
    }
    let recent: HashSet<&str> = recent_tools.iter().map(|s| s.as_str()).collect();

    let mut stmt = store.conn.prepare(
        "SELECT target, preceding, frequency FROM routing_patterns WHERE project = ?1",
    )?;
    let patterns: Vec<(String, String, i64)> = stmt
        .query_map([project], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut best: Option<Candidate> = None;
    for (target, preceding_json, frequency) in patterns {
        if !is_suggestable(&target, recent_tools, tools_in_scope) {
            continue;
        }
        let preceding: Vec<String> = serde_json::from_str(&preceding_json).unwrap_or_default();
        if preceding.is_empty() {
            continue;
        }
        let overlap = preceding.iter().filter(|t| recent.contains(t.as_str())).count();
        let score = overlap as f64 / PATTERN_WINDOW as f64;
        let better = best.as_ref().map(|b| score > b.score).unwrap_or(true);
        if better {
            let description = tools_in_scope
                .iter()
                .find(|t| t.name == target)
                .and_then(|t| t.description.clone());
            best = Some(Candidate {
                name: target,
                description,
                evidence_count: frequency,
                score,
            });
        }
    }
    Ok(best)
}

/// Tier B: keyword overlap between the session's recent observation text
/// and each candidate tool's description, server name, and command path.
fn heuristic_candidate(
    store: &Store,
    project: &str,
    session_id: &str,
    recent_tools: &[String],
    tools_in_scope: &[RegistryRow],
) -> Result<Option<Candidate>> {
    let observations = store.list_observations(&crate::observations::ListQuery {
        project: project.to_string(),
        session_id: Some(session_id.to_string()),
        limit: KEYWORD_OBSERVATIONS,
        include_unclassified: true,
    })?;
    if observations.is_empty() {
        return Ok(None);
    }

    let mut context_keywords: HashSet<String> = HashSet::new();
    for obs in &observations {
        context_keywords.extend(keywords(&obs.content));
    }
    if context_keywords.is_empty() {
        return Ok(None);
    }

    let mut best: Option<Candidate> = None;
    for tool in tools_in_scope {
        if !is_suggestable(&tool.name, recent_tools, tools_in_scope) {
            continue;
        }
        let mut tool_keywords: HashSet<String> = HashSet::new();
        if let Some(desc) = &tool.description {
            tool_keywords.extend(keywords(desc));
        }
        if let Some(hints) = &tool.hints {
            tool_keywords.extend(keywords(hints));
        }
        if let Some(server) = &tool.server {
            tool_keywords.extend(keywords(server));
        }
        tool_keywords.extend(keywords(&tool.name.replace(['_', ':', '/'], " ")));
        if tool_keywords.is_empty() {
            continue;
        }

        let matched = tool_keywords
            .iter()
            .filter(|k| context_keywords.contains(*k))
            .count();
        let score = matched as f64 / tool_keywords.len() as f64;
        let better = best.as_ref().map(|b| score > b.score).unwrap_or(true);
        if score > 0.0 && better {
            best = Some(Candidate {
                name: tool.name.clone(),
                description: tool.description.clone(),
                evidence_count: tool.usage_count.max(1),
                score,
            });
        }
    }
    Ok(best)
}

/// Candidate filter applied before scoring: no builtins, no self-reference,
/// nothing outside the resolved scope, nothing demoted or stale, and nothing
/// the session just used.
fn is_suggestable(name: &str, recent_tools: &[String], tools_in_scope: &[RegistryRow]) -> bool {
    if classify::is_self_reference(name) {
        return false;
    }
    if classify::classify(name).tool_type == ToolType::Builtin {
        return false;
    }
    if recent_tools.iter().any(|t| t == name) {
        return false;
    }
    tools_in_scope
        .iter()
        .any(|t| t.name == name && t.status == "active")
}

fn emit(store: &Store, project: &str, session_id: &str, candidate: &Candidate) -> Result<()> {
    let description = candidate.description.as_deref().unwrap_or("no description");
    store.add_notification(
        project,
        &format!(
            "Tool suggestion: {} — {} (used {}x in similar contexts)",
            candidate.name, description, candidate.evidence_count
        ),
    )?;
    store.conn.execute(
        "UPDATE routing_state
         SET suggestions_made = suggestions_made + 1,
             tool_calls_since_suggestion = 0,
             last_suggestion_at = ?3
         WHERE session_id = ?1 AND project = ?2",
        params![session_id, project, now_ts()],
    )?;
    crate::models::debug_log(&format!(
        "suggested {} (score {:.2})",
        candidate.name, candidate.score
    ));
    Ok(())
}

fn bump_tool_calls(store: &Store, project: &str, session_id: &str) -> Result<RoutingState> {
    store.conn.execute(
        "INSERT INTO routing_state (session_id, project, tool_calls_since_suggestion, tool_calls_total)
         VALUES (?1, ?2, 1, 1)
         ON CONFLICT(session_id, project) DO UPDATE SET
            tool_calls_since_suggestion = tool_calls_since_suggestion + 1,
            tool_calls_total = tool_calls_total + 1",
        params![session_id, project],
    )?;
    let state = store
        .conn
        .query_row(
            "SELECT suggestions_made, tool_calls_since_suggestion, tool_calls_total
             FROM routing_state WHERE session_id = ?1 AND project = ?2",
            params![session_id, project],
            |row| {
                Ok(RoutingState {
                    suggestions_made: row.get(0)?,
                    tool_calls_since_suggestion: row.get(1)?,
                    tool_calls_total: row.get(2)?,
                })
            },
        )
        .optional()?
        .unwrap_or(RoutingState {
            suggestions_made: 0,
            tool_calls_since_suggestion: 0,
            tool_calls_total: 0,
        });
    Ok(state)
}

/// Successful usage events attributed to a project through their sessions,
/// newest first, as (session_id, tool).
fn recent_project_events(
    store: &Store,
    project: &str,
    limit: usize,
) -> Result<Vec<(String, String)>> {
    let mut stmt = store.conn.prepare(
        "SELECT e.session_id, e.tool FROM tool_events e
         JOIN sessions s ON s.id = e.session_id
         WHERE s.project = ?1 AND e.success = 1
         ORDER BY e.id DESC LIMIT ?2",
    )?;
    let mut rows: Vec<(String, String)> = stmt
        .query_map(params![project, limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.reverse(); // chronological for windowing
    Ok(rows)
}

const STOPWORDS: [&str; 24] = [
    "the", "and", "for", "with", "from", "this", "that", "into", "over", "your", "are", "was",
    "has", "have", "not", "but", "all", "out", "use", "used", "using", "run", "get", "set",
];

fn keywords(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}
