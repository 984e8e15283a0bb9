//! SessionStart context assembly: one plain-text block injected verbatim
//! into the assistant. Keep it short, safe, and skimmable: header, ranked
//! tools, relevant prior observations, stash resume hints.

use crate::db::Store;
use crate::models::relative_age;
use crate::observations;
use anyhow::Result;

const MAX_BLOCK_BYTES: usize = 1_500;
const RECENT_SESSIONS: usize = 3;
const TOP_TOOLS: usize = 5;
const TOP_OBSERVATIONS: usize = 3;
const STASH_HINTS: usize = 2;
const SNIPPET_CHARS: usize = 120;

pub async fn assemble(store: &Store, project: &str, session_id: &str) -> Result<Option<String>> {
    let now = chrono::Utc::now();
    let mut sections: Vec<String> = Vec::new();

    let recent = recent_sessions(store, project, session_id)?;
    let mut header = format!("Project memory ({project})");
    if !recent.is_empty() {
        header.push('\n');
        header.push_str("Recent sessions:");
        for (started_at, summary) in &recent {
            let age = relative_age(started_at, now);
            let line = summary
                .as_deref()
                .map(|s| crate::summary::first_words(s, 14))
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "(no summary)".to_string());
            header.push_str(&format!("\n- {age}: {line}"));
        }
    }
    sections.push(header);

    let tools = top_tools(store, project)?;
    if !tools.is_empty() {
        let mut block = String::from("Available tools:");
        for line in tools {
            block.push_str(&format!("\n- {line}"));
        }
        sections.push(block);
    }

    let observations = relevant_observations(store, project, &recent).await?;
    if !observations.is_empty() {
        let mut block = String::from("Relevant context:");
        for (created_at, content) in observations {
            let age = relative_age(&created_at, now);
            block.push_str(&format!("\n- [{age}] {}", snippet(&content)));
        }
        sections.push(block);
    }

    for (_, topic, created_at) in store.recent_stashes(project, STASH_HINTS)? {
        let age = relative_age(&created_at, now);
        sections.push(format!(
            "Stashed topic from {age}: \"{topic}\" — resume with {}",
            crate::topic::RESUME_COMMAND
        ));
    }

    // A header alone carries no information worth injecting.
    if sections.len() <= 1 && recent.is_empty() {
        return Ok(None);
    }

    Ok(Some(sanitize_block(&sections.join("\n\n"))))
}

fn recent_sessions(
    store: &Store,
    project: &str,
    current_session: &str,
) -> Result<Vec<(String, Option<String>)>> {
    let mut stmt = store.conn.prepare(
        "SELECT started_at, summary FROM sessions
         WHERE project = ?1 AND id != ?2
         ORDER BY started_at DESC LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(
            rusqlite::params![project, current_session, RECENT_SESSIONS as i64],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Top tools by scope-resolved relevance: active rows, heaviest usage first.
fn top_tools(store: &Store, project: &str) -> Result<Vec<String>> {
    let rows = store.tools_in_scope(project)?;
    Ok(rows
        .iter()
        .filter(|t| t.status == "active" && t.usage_count > 0)
        .take(TOP_TOOLS)
        .map(|t| {
            let description = t.description.as_deref().unwrap_or("no description");
            format!("{} — {} — used {}x", t.name, description, t.usage_count)
        })
        .collect())
}

/// Observations matching heuristics over recent session text. With an
/// embedding service available the lookup is hybrid (keyword + vector,
/// rank-fused); otherwise keyword-only, with the most recent observations
/// as the cold-start fallback.
async fn relevant_observations(
    store: &Store,
    project: &str,
    recent: &[(String, Option<String>)],
) -> Result<Vec<(String, String)>> {
    let query: String = recent
        .iter()
        .filter_map(|(_, s)| s.as_deref())
        .collect::<Vec<_>>()
        .join(" ");

    let mut hits = Vec::new();
    if !query.trim().is_empty() {
        let query_vector = match crate::embedding::EmbeddingClient::from_env() {
            Some(client) => client.embed(&query).await,
            None => None,
        };
        hits = match query_vector {
            Some(vector) => store.hybrid_search(project, &query, Some(&vector), TOP_OBSERVATIONS)?,
            None => {
                let projects = observations::readable_projects(project);
                store.keyword_search(&projects, &query, TOP_OBSERVATIONS)?
            }
        };
    }
    if hits.is_empty() {
        hits = store.recent_observations(project, TOP_OBSERVATIONS)?;
    }
    Ok(hits
        .into_iter()
        .map(|o| (o.created_at, o.title.unwrap_or(o.content)))
        .collect())
}

fn snippet(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SNIPPET_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(SNIPPET_CHARS).collect();
        format!("{cut}...")
    }
}

/// The block is injected verbatim: strip control characters (newlines
/// excepted), drop leading whitespace, and stay under the byte budget.
fn sanitize_block(block: &str) -> String {
    let mut clean: String = block
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .collect();
    clean = clean.trim_start().trim_end().to_string();
    if clean.len() > MAX_BLOCK_BYTES {
        let mut cut = MAX_BLOCK_BYTES;
        while !clean.is_char_boundary(cut) {
            cut -= 1;
        }
        clean.truncate(cut);
    }
    clean
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now_ts, ObservationKind};
    use crate::observations::NewObservation;

    fn seed_session(store: &Store, id: &str, summary: Option<&str>) {
        store
            .conn
            .execute(
                "INSERT INTO sessions (id, project, started_at, summary) VALUES (?1, 'p', ?2, ?3)",
                rusqlite::params![id, now_ts(), summary],
            )
            .unwrap();
    }

    #[tokio::test]
    async fn empty_project_produces_no_block() {
        let store = Store::open_in_memory().unwrap();
        seed_session(&store, "current", None);
        assert!(assemble(&store, "p", "current").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn block_contains_header_tools_and_context() {
        let store = Store::open_in_memory().unwrap();
        seed_session(&store, "old", Some("refactored the parser and fixed two bugs"));
        seed_session(&store, "current", None);

        store.record_or_create("mcp__gh__pr", "p", "old", true).unwrap();
        store
            .insert_observation(&NewObservation {
                project: "p".to_string(),
                session_id: Some("old".to_string()),
                kind: Some(ObservationKind::Change),
                title: Some("Fixed parser bug".to_string()),
                content: "fixed the parser bug in tokenizer".to_string(),
                source: "hook:Edit".to_string(),
            })
            .unwrap();

        let block = assemble(&store, "p", "current").await.unwrap().unwrap();
        assert!(block.contains("Project memory (p)"));
        assert!(block.contains("refactored the parser"));
        assert!(block.contains("Available tools:"));
        assert!(block.contains("mcp__gh__pr"));
        assert!(block.contains("used 1x"));
        assert!(block.contains("Relevant context:"));
        assert!(block.contains("Fixed parser bug"));
    }

    #[tokio::test]
    async fn stash_hint_included() {
        let store = Store::open_in_memory().unwrap();
        seed_session(&store, "old", Some("auth work"));
        seed_session(&store, "current", None);
        store
            .conn
            .execute(
                "INSERT INTO stashes (id, project, session_id, topic, summary, snapshots, created_at, status)
                 VALUES ('st1', 'p', 'old', 'JWT middleware', 'sum', '[]', ?1, 'stashed')",
                [now_ts()],
            )
            .unwrap();

        let block = assemble(&store, "p", "current").await.unwrap().unwrap();
        assert!(block.contains("JWT middleware"));
        assert!(block.contains(crate::topic::RESUME_COMMAND));
    }

    #[tokio::test]
    async fn resumed_stashes_are_not_hinted() {
        let store = Store::open_in_memory().unwrap();
        seed_session(&store, "old", Some("auth work"));
        seed_session(&store, "current", None);
        store
            .conn
            .execute(
                "INSERT INTO stashes (id, project, session_id, topic, summary, snapshots, created_at, status)
                 VALUES ('st1', 'p', 'old', 'finished topic', 'sum', '[]', ?1, 'resumed')",
                [now_ts()],
            )
            .unwrap();
        let block = assemble(&store, "p", "current").await.unwrap().unwrap();
        assert!(!block.contains("finished topic"));
    }

    #[tokio::test]
    async fn block_is_injection_safe() {
        let store = Store::open_in_memory().unwrap();
        seed_session(&store, "old", Some("work\twith\u{7}control\u{1b}chars"));
        seed_session(&store, "current", None);

        let block = assemble(&store, "p", "current").await.unwrap().unwrap();
        assert!(!block.starts_with(char::is_whitespace));
        assert!(block.chars().all(|c| !c.is_control() || c == '\n'));
    }

    #[tokio::test]
    async fn block_respects_byte_budget() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..10 {
            seed_session(&store, &format!("old{i}"), Some(&"long summary words ".repeat(40)));
        }
        seed_session(&store, "current", None);
        for i in 0..20 {
            store
                .insert_observation(&NewObservation {
                    project: "p".to_string(),
                    session_id: Some("old0".to_string()),
                    kind: Some(ObservationKind::Finding),
                    title: None,
                    content: format!("observation with long summary words repeated {i} times"),
                    source: "hook:Bash".to_string(),
                })
                .unwrap();
        }

        let block = assemble(&store, "p", "current").await.unwrap().unwrap();
        assert!(block.len() <= MAX_BLOCK_BYTES);
    }

    #[tokio::test]
    async fn demoted_tools_not_listed() {
        let store = Store::open_in_memory().unwrap();
        seed_session(&store, "old", Some("some work"));
        seed_session(&store, "current", None);
        for _ in 0..3 {
            store.record_or_create("mcp__flaky__op", "p", "old", false).unwrap();
        }
        let block = assemble(&store, "p", "current").await.unwrap().unwrap();
        assert!(!block.contains("mcp__flaky__op"));
    }
}
