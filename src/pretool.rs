//! PreToolUse context: a fast, bounded lookup of prior observations (and
//! graph neighbours for file targets) relevant to the tool about to run.
//! The budget is tight: one FTS query, one optional graph probe, no
//! embedding call.

use crate::admission;
use crate::db::Store;
use crate::models::relative_age;
use crate::observations;
use crate::summary;
use anyhow::Result;
use rusqlite::params;

const MAX_BLOCK_CHARS: usize = 500;
const MAX_SNIPPETS: usize = 3;
const MAX_ENTITIES: usize = 5;
const SNIPPET_CHARS: usize = 110;

pub fn build(store: &Store, project: &str, tool: &str, input: &serde_json::Value) -> Result<Option<String>> {
    let Some(query) = derive_query(tool, input) else {
        return Ok(None);
    };

    let projects = observations::readable_projects(project);
    let hits = store.keyword_search(&projects, &query, MAX_SNIPPETS)?;

    let entities = match file_target(tool, input) {
        Some(path) => related_entities(store, project, &summary::basename(&path))?,
        None => Vec::new(),
    };

    if hits.is_empty() && entities.is_empty() {
        return Ok(None);
    }

    let now = chrono::Utc::now();
    let mut block = String::new();
    for obs in hits {
        let age = relative_age(&obs.created_at, now);
        let line = format!("[{age}] {}", snippet(&obs.content));
        if block.len() + line.len() + 1 > MAX_BLOCK_CHARS {
            break;
        }
        if !block.is_empty() {
            block.push('\n');
        }
        block.push_str(&line);
    }
    if !entities.is_empty() {
        let line = format!("Related: {}", entities.join(", "));
        if block.len() + line.len() + 1 <= MAX_BLOCK_CHARS {
            if !block.is_empty() {
                block.push('\n');
            }
            block.push_str(&line);
        }
    }

    if block.is_empty() {
        Ok(None)
    } else {
        Ok(Some(block))
    }
}

/// A short query string describing what the tool is about to touch.
pub fn derive_query(tool: &str, input: &serde_json::Value) -> Option<String> {
    match tool {
        "Write" | "Edit" | "MultiEdit" | "Read" => {
            let path = input.get("file_path").and_then(|v| v.as_str())?;
            Some(summary::basename(path))
        }
        "Grep" => {
            let pattern = input.get("pattern").and_then(|v| v.as_str())?;
            let cleaned: String = pattern
                .chars()
                .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
                .collect();
            let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
            if cleaned.is_empty() { None } else { Some(cleaned) }
        }
        "Bash" => {
            let command = input.get("command").and_then(|v| v.as_str())?;
            if admission::is_navigation_command(command.trim()) {
                return None;
            }
            let words = summary::first_words(command, 4);
            if words.is_empty() { None } else { Some(words) }
        }
        "WebFetch" => {
            let url = input.get("url").and_then(|v| v.as_str())?;
            let host = url.split("://").nth(1).unwrap_or(url).split('/').next()?;
            if host.is_empty() { None } else { Some(host.to_string()) }
        }
        "WebSearch" => input
            .get("query")
            .and_then(|v| v.as_str())
            .filter(|q| !q.trim().is_empty())
            .map(|q| q.to_string()),
        _ => None,
    }
}

fn file_target(tool: &str, input: &serde_json::Value) -> Option<String> {
    match tool {
        "Write" | "Edit" | "MultiEdit" | "Read" => input
            .get("file_path")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        _ => None,
    }
}

/// Names of entities connected to the file entity, when the graph knows it.
fn related_entities(store: &Store, project: &str, name: &str) -> Result<Vec<String>> {
    let mut stmt = store.conn.prepare(
        "SELECT DISTINCT other.name FROM graph_entities me
         JOIN graph_edges e ON e.source_id = me.id OR e.target_id = me.id
         JOIN graph_entities other
           ON other.id = CASE WHEN e.source_id = me.id THEN e.target_id ELSE e.source_id END
         WHERE me.project = ?1 AND me.name = ?2 AND other.name != ?2
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![project, name, MAX_ENTITIES as i64], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(rows)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObservationKind;
    use crate::observations::NewObservation;

    fn seed_obs(store: &Store, content: &str) {
        store
            .insert_observation(&NewObservation {
                project: "p".to_string(),
                session_id: Some("s1".to_string()),
                kind: Some(ObservationKind::Change),
                title: None,
                content: content.to_string(),
                source: "hook:Edit".to_string(),
            })
            .unwrap();
    }

    #[test]
    fn query_from_file_tools_is_basename() {
        let input = serde_json::json!({ "file_path": "/deep/path/parser.rs" });
        assert_eq!(derive_query("Edit", &input).as_deref(), Some("parser.rs"));
        assert_eq!(derive_query("Read", &input).as_deref(), Some("parser.rs"));
    }

    #[test]
    fn query_from_grep_strips_regex_metachars() {
        let input = serde_json::json!({ "pattern": "fn\\s+parse_(token|expr)" });
        assert_eq!(derive_query("Grep", &input).as_deref(), Some("fn s parse_ token expr"));
    }

    #[test]
    fn query_from_bash_skips_navigation() {
        assert!(derive_query("Bash", &serde_json::json!({ "command": "ls -la" })).is_none());
        assert_eq!(
            derive_query("Bash", &serde_json::json!({ "command": "cargo test parser --verbose --all" }))
                .as_deref(),
            Some("cargo test parser --verbose")
        );
    }

    #[test]
    fn query_from_web_tools() {
        assert_eq!(
            derive_query("WebFetch", &serde_json::json!({ "url": "https://docs.rs/regex/latest" })).as_deref(),
            Some("docs.rs")
        );
        assert_eq!(
            derive_query("WebSearch", &serde_json::json!({ "query": "sqlite wal mode" })).as_deref(),
            Some("sqlite wal mode")
        );
    }

    #[test]
    fn unknown_tools_produce_no_query() {
        assert!(derive_query("mcp__gh__pr", &serde_json::json!({})).is_none());
        assert!(derive_query("Task", &serde_json::json!({})).is_none());
    }

    #[test]
    fn block_contains_ranked_snippets_with_ages() {
        let store = Store::open_in_memory().unwrap();
        seed_obs(&store, "[Edit] Modified /src/parser.rs fixed tokenizer lookahead");

        let input = serde_json::json!({ "file_path": "/src/parser.rs" });
        let block = build(&store, "p", "Edit", &input).unwrap().unwrap();
        assert!(block.contains("ago]") || block.contains("just now"));
        assert!(block.contains("parser.rs"));
        assert!(block.len() <= MAX_BLOCK_CHARS);
    }

    #[test]
    fn silent_when_nothing_found() {
        let store = Store::open_in_memory().unwrap();
        let input = serde_json::json!({ "file_path": "/src/new_file.rs" });
        assert!(build(&store, "p", "Write", &input).unwrap().is_none());
    }

    #[test]
    fn graph_entities_appended_for_file_targets() {
        let store = Store::open_in_memory().unwrap();
        seed_obs(&store, "touched parser.rs while wiring tokens");
        store
            .conn
            .execute_batch(
                "INSERT INTO graph_entities (id, project, name, kind, created_at)
                 VALUES (1, 'p', 'parser.rs', 'file', '2026-01-01T00:00:00.000000Z'),
                        (2, 'p', 'tokenizer.rs', 'file', '2026-01-01T00:00:00.000000Z'),
                        (3, 'p', 'Lexer', 'type', '2026-01-01T00:00:00.000000Z');
                 INSERT INTO graph_edges (source_id, target_id, relation, created_at)
                 VALUES (1, 2, 'imports', '2026-01-01T00:00:00.000000Z'),
                        (3, 1, 'defined_in', '2026-01-01T00:00:00.000000Z');",
            )
            .unwrap();

        let input = serde_json::json!({ "file_path": "/src/parser.rs" });
        let block = build(&store, "p", "Edit", &input).unwrap().unwrap();
        assert!(block.contains("Related:"));
        assert!(block.contains("tokenizer.rs"));
        assert!(block.contains("Lexer"));
    }

    #[test]
    fn block_stays_under_budget() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..5 {
            seed_obs(&store, &format!("parser.rs long note {} {}", i, "words ".repeat(60)));
        }
        let input = serde_json::json!({ "file_path": "/src/parser.rs" });
        let block = build(&store, "p", "Edit", &input).unwrap().unwrap();
        assert!(block.len() <= MAX_BLOCK_CHARS);
    }
}
