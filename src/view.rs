//! Read-mostly CLI surface over the shared database: recent observations,
//! search, sessions, stashes, and usage stats. Everything here prints to
//! stdout for a human, never for the host protocol.

use crate::db::Store;
use crate::models::{self, relative_age};
use crate::observations::{self, ListQuery};
use anyhow::Result;

#[derive(Debug, Default)]
pub struct ViewArgs {
    pub project_dir: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<usize>,
}

pub fn parse_view_args(args: &[String]) -> ViewArgs {
    ViewArgs {
        project_dir: get_flag(args, "--project"),
        session_id: get_flag(args, "--session"),
        limit: get_flag(args, "-n")
            .or_else(|| get_flag(args, "--limit"))
            .and_then(|s| s.parse().ok()),
    }
}

pub fn get_flag(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn resolve_project(args: &ViewArgs) -> String {
    let dir = args
        .project_dir
        .clone()
        .or_else(|| std::env::current_dir().ok().map(|p| p.to_string_lossy().into_owned()))
        .unwrap_or_else(|| ".".to_string());
    models::project_hash(&dir)
}

/// `laminark view` — recent observations for the current project.
pub fn recent(store: &Store, args: &ViewArgs) -> Result<()> {
    let project = resolve_project(args);
    let rows = store.list_observations(&ListQuery {
        project: project.clone(),
        session_id: args.session_id.clone(),
        limit: args.limit.unwrap_or(20),
        include_unclassified: true,
    })?;

    if rows.is_empty() {
        println!("no observations for project {project}.");
        return Ok(());
    }

    let now = chrono::Utc::now();
    println!();
    println!("── {} observation(s) ──────────────────────────", rows.len());
    println!();
    for obs in rows {
        print_observation_row(&obs, now);
    }
    println!();
    Ok(())
}

/// `laminark search <query>` — BM25 keyword search; hybrid when an
/// embedding service is reachable.
pub async fn search(store: &Store, query: &str, args: &ViewArgs) -> Result<()> {
    let project = resolve_project(args);
    let limit = args.limit.unwrap_or(10);

    let hits = match crate::embedding::EmbeddingClient::from_env() {
        Some(client) => match client.embed(query).await {
            Some(vector) => store.hybrid_search(&project, query, Some(&vector), limit)?,
            None => keyword_hits(store, &project, query, limit)?,
        },
        None => keyword_hits(store, &project, query, limit)?,
    };

    if hits.is_empty() {
        println!("no matches for {query:?}.");
        return Ok(());
    }

    let now = chrono::Utc::now();
    println!();
    println!("── {} match(es) ───────────────────────────────", hits.len());
    println!();
    for obs in hits {
        print_observation_row(&obs, now);
    }
    println!();
    Ok(())
}

fn keyword_hits(
    store: &Store,
    project: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<observations::Observation>> {
    let projects = observations::readable_projects(project);
    store.keyword_search(&projects, query, limit)
}

fn print_observation_row(obs: &observations::Observation, now: chrono::DateTime<chrono::Utc>) {
    let age = relative_age(&obs.created_at, now);
    let kind = obs.kind.as_deref().unwrap_or("-");
    let head = obs
        .title
        .clone()
        .unwrap_or_else(|| first_line(&obs.content));
    println!("  {:>8}  [{kind}] {head}", age);
    println!("  {:>8}  {} · {}", "", obs.source, short_id(&obs.id));
}

/// `laminark sessions` — session history with summaries and stash markers.
pub fn sessions(store: &Store, args: &ViewArgs) -> Result<()> {
    let project = resolve_project(args);
    let limit = args.limit.unwrap_or(10);

    let rows: Vec<(String, String, Option<String>, Option<String>)> = {
        let mut stmt = store.conn.prepare(
            "SELECT id, started_at, ended_at, summary FROM sessions
             WHERE project = ?1 ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![project, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    if rows.is_empty() {
        println!("no sessions for project {project}.");
        return Ok(());
    }

    let now = chrono::Utc::now();
    println!();
    for (id, started_at, ended_at, summary) in rows {
        let age = relative_age(&started_at, now);
        let state = if ended_at.is_some() { "closed" } else { "open" };
        println!("  {}  {age} ({state})", short_id(&id));
        if let Some(summary) = summary {
            println!("            {}", first_line(&summary));
        }
    }

    let stashes = store.recent_stashes(&project, 5)?;
    if !stashes.is_empty() {
        println!();
        println!("  stashed topics:");
        for (_, topic, created_at) in stashes {
            println!("    \"{topic}\" ({})", relative_age(&created_at, now));
        }
    }
    println!();
    Ok(())
}

/// `laminark stats` — per-tool usage and pipeline counters.
pub fn stats(store: &Store, args: &ViewArgs) -> Result<()> {
    let project = resolve_project(args);

    let tools = store.tools_in_scope(&project)?;
    let used: Vec<_> = tools.iter().filter(|t| t.usage_count > 0).collect();

    println!();
    println!("── project {project} ──────────────────────────");
    println!();
    if used.is_empty() {
        println!("  no tool usage recorded yet.");
    } else {
        println!("  tool usage:");
        for tool in used.iter().take(15) {
            let marker = match tool.status.as_str() {
                "demoted" => " (demoted)",
                "stale" => " (stale)",
                _ => "",
            };
            println!("    {:>6}x  {}{marker}", tool.usage_count, tool.name);
        }
    }

    let count = |sql: &str| -> i64 {
        store
            .conn
            .query_row(sql, [&project], |r| r.get(0))
            .unwrap_or(0)
    };
    let live = count("SELECT COUNT(*) FROM observations WHERE project = ?1 AND deleted_at IS NULL");
    let shifts = count("SELECT COUNT(*) FROM shift_log WHERE project = ?1 AND shifted = 1");
    let decisions = count("SELECT COUNT(*) FROM shift_log WHERE project = ?1");
    let pending = store.pending_notification_count(&project)?;

    println!();
    println!("  {live} live observation(s)");
    println!("  {shifts} topic shift(s) across {decisions} decision(s)");
    println!("  {pending} pending notification(s)");
    println!();
    Ok(())
}

/// `laminark forget <id>` — soft-delete one observation by id or id prefix.
pub fn forget(store: &Store, id_prefix: &str) -> Result<()> {
    let mut matches: Vec<String> = {
        let mut stmt = store.conn.prepare(
            "SELECT id FROM observations WHERE id LIKE ?1 AND deleted_at IS NULL LIMIT 2",
        )?;
        let rows = stmt
            .query_map([format!("{id_prefix}%")], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    match matches.len() {
        0 => {
            println!("no live observation matches {id_prefix:?}.");
            Ok(())
        }
        1 => {
            let id = matches.remove(0);
            store.soft_delete_observation(&id)?;
            println!("forgot {}", short_id(&id));
            Ok(())
        }
        _ => anyhow::bail!("ambiguous id prefix {id_prefix:?}: multiple observations match"),
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or("");
    let flat = line.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 90 {
        let cut: String = flat.chars().take(90).collect();
        format!("{cut}...")
    } else {
        flat
    }
}
