//! Short-TTL buffer linking exploration (Read/Glob/Grep) to the change that
//! follows it. Exploration never produces observations directly; the buffer
//! rows become a footer on the next Write/Edit observation in the session.

use crate::db::Store;
use crate::models::now_ts;
use anyhow::Result;
use rusqlite::params;

pub const EXPLORATION_TOOLS: [&str; 3] = ["Read", "Glob", "Grep"];

const CONTEXT_WINDOW_MINUTES: i64 = 5;
const PURGE_AFTER_MINUTES: i64 = 30;
const MAX_FOOTER_ENTRIES: usize = 10;

pub fn is_exploration_tool(tool: &str) -> bool {
    EXPLORATION_TOOLS.contains(&tool)
}

/// The string worth remembering about one exploration call.
pub fn exploration_target(tool: &str, input: &serde_json::Value) -> Option<String> {
    let target = match tool {
        "Read" => input.get("file_path").and_then(|v| v.as_str()),
        "Glob" => input.get("pattern").and_then(|v| v.as_str()),
        "Grep" => input.get("pattern").and_then(|v| v.as_str()),
        _ => None,
    }?;
    let target = target.trim();
    if target.is_empty() {
        None
    } else {
        Some(target.to_string())
    }
}

impl Store {
    pub fn push_research(&self, session_id: &str, tool: &str, target: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO research_buffer (session_id, tool, target, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, tool, target, now_ts()],
        )?;
        self.purge_stale_research()?;
        Ok(())
    }

    /// Footer describing the session's exploration over the last five
    /// minutes, oldest first. None when the window is empty.
    pub fn research_footer(&self, session_id: &str) -> Result<Option<String>> {
        let cutoff = cutoff_ts(CONTEXT_WINDOW_MINUTES);
        let mut stmt = self.conn.prepare(
            "SELECT tool, target FROM research_buffer
             WHERE session_id = ?1 AND created_at >= ?2
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows: Vec<(String, String)> = stmt
            .query_map(params![session_id, cutoff], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if rows.is_empty() {
            return Ok(None);
        }
        let mut footer = String::from("Recent exploration:");
        for (tool, target) in rows.iter().take(MAX_FOOTER_ENTRIES) {
            footer.push_str(&format!("\n- {tool} {target}"));
        }
        Ok(Some(footer))
    }

    /// Rows older than 30 minutes are dead weight in any session.
    pub fn purge_stale_research(&self) -> Result<usize> {
        let cutoff = cutoff_ts(PURGE_AFTER_MINUTES);
        let removed = self
            .conn
            .execute("DELETE FROM research_buffer WHERE created_at < ?1", [cutoff])?;
        Ok(removed)
    }
}

fn cutoff_ts(minutes: i64) -> String {
    (chrono::Utc::now() - chrono::Duration::minutes(minutes))
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exploration_tools_recognised() {
        assert!(is_exploration_tool("Read"));
        assert!(is_exploration_tool("Glob"));
        assert!(is_exploration_tool("Grep"));
        assert!(!is_exploration_tool("Write"));
        assert!(!is_exploration_tool("Bash"));
    }

    #[test]
    fn targets_extracted_per_tool() {
        assert_eq!(
            exploration_target("Read", &serde_json::json!({ "file_path": "/src/a.rs" })).as_deref(),
            Some("/src/a.rs")
        );
        assert_eq!(
            exploration_target("Glob", &serde_json::json!({ "pattern": "**/*.rs" })).as_deref(),
            Some("**/*.rs")
        );
        assert_eq!(
            exploration_target("Grep", &serde_json::json!({ "pattern": "fn main" })).as_deref(),
            Some("fn main")
        );
        assert!(exploration_target("Read", &serde_json::json!({})).is_none());
        assert!(exploration_target("Read", &serde_json::json!({ "file_path": "  " })).is_none());
    }

    #[test]
    fn footer_lists_recent_rows_in_order() {
        let store = Store::open_in_memory().unwrap();
        store.push_research("s1", "Read", "/src/a.rs").unwrap();
        store.push_research("s1", "Grep", "parse_token").unwrap();

        let footer = store.research_footer("s1").unwrap().unwrap();
        assert!(footer.starts_with("Recent exploration:"));
        let read_pos = footer.find("Read /src/a.rs").unwrap();
        let grep_pos = footer.find("Grep parse_token").unwrap();
        assert!(read_pos < grep_pos);
    }

    #[test]
    fn footer_is_session_scoped() {
        let store = Store::open_in_memory().unwrap();
        store.push_research("s1", "Read", "/src/a.rs").unwrap();
        assert!(store.research_footer("s2").unwrap().is_none());
    }

    #[test]
    fn footer_ignores_rows_outside_window() {
        let store = Store::open_in_memory().unwrap();
        let old = (chrono::Utc::now() - chrono::Duration::minutes(10))
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        store
            .conn
            .execute(
                "INSERT INTO research_buffer (session_id, tool, target, created_at)
                 VALUES ('s1', 'Read', '/old.rs', ?1)",
                [old],
            )
            .unwrap();
        assert!(store.research_footer("s1").unwrap().is_none());
    }

    #[test]
    fn purge_removes_only_stale_rows() {
        let store = Store::open_in_memory().unwrap();
        let stale = (chrono::Utc::now() - chrono::Duration::minutes(45))
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        store
            .conn
            .execute(
                "INSERT INTO research_buffer (session_id, tool, target, created_at)
                 VALUES ('s1', 'Read', '/stale.rs', ?1)",
                [stale],
            )
            .unwrap();
        store.push_research("s1", "Read", "/fresh.rs").unwrap();

        let count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM research_buffer", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
