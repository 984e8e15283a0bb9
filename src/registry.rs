//! Cross-project tool registry. Rows come from two places: configuration
//! scans at SessionStart, and organic observation of tools the host actually
//! invoked.

use crate::classify::{self, ToolScope, ToolType};
use crate::db::Store;
use crate::models::now_ts;
use anyhow::Result;
use rusqlite::{params, OptionalExtension};

/// Global rows use the empty-string project key so the (name, project)
/// primary key and upserts behave; NULLs never collide in SQLite keys.
pub const GLOBAL_PROJECT: &str = "";

const DEMOTION_WINDOW: usize = 5;
const DEMOTION_FAILURES: usize = 3;

#[derive(Debug, Clone)]
pub struct DiscoveredTool {
    pub name: String,
    pub tool_type: ToolType,
    pub scope: ToolScope,
    pub origin: String,
    pub description: Option<String>,
    pub server: Option<String>,
    pub hints: Option<String>,
}

impl DiscoveredTool {
    /// Registry row shape for a tool first seen in live traffic.
    pub fn observed(name: &str) -> Self {
        let info = classify::classify(name);
        Self {
            name: name.to_string(),
            tool_type: info.tool_type,
            scope: info.scope,
            origin: "observed".to_string(),
            description: None,
            server: info.server,
            hints: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryRow {
    pub name: String,
    pub project: String,
    pub tool_type: String,
    pub scope: String,
    pub origin: String,
    pub description: Option<String>,
    pub server: Option<String>,
    pub hints: Option<String>,
    pub usage_count: i64,
    pub last_used_at: Option<String>,
    pub status: String,
}

fn row_to_registry(row: &rusqlite::Row) -> rusqlite::Result<RegistryRow> {
    Ok(RegistryRow {
        name: row.get(0)?,
        project: row.get(1)?,
        tool_type: row.get(2)?,
        scope: row.get(3)?,
        origin: row.get(4)?,
        description: row.get(5)?,
        server: row.get(6)?,
        hints: row.get(7)?,
        usage_count: row.get(8)?,
        last_used_at: row.get(9)?,
        status: row.get(10)?,
    })
}

const REGISTRY_COLUMNS: &str =
    "name, project, tool_type, scope, origin, description, server, hints, usage_count, last_used_at, status";

/// Project key a tool registers under: project-scoped tools live under the
/// project hash, everything else under the global key.
pub fn registry_project(scope: ToolScope, project: &str) -> String {
    match scope {
        ToolScope::Project => project.to_string(),
        ToolScope::Global | ToolScope::Plugin => GLOBAL_PROJECT.to_string(),
    }
}

impl Store {
    /// Insert or refresh a registry row. A fresh sighting of a stale
    /// config-sourced tool reactivates it; usage counters are untouched.
    pub fn upsert_tool(&self, tool: &DiscoveredTool, project: &str) -> Result<()> {
        let key = registry_project(tool.scope, project);
        self.conn.execute(
            "INSERT INTO tool_registry
                (name, project, tool_type, scope, origin, description, server, hints, usage_count, discovered_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, 'active')
             ON CONFLICT(name, project) DO UPDATE SET
                tool_type = ?3,
                scope = ?4,
                origin = CASE WHEN tool_registry.origin = 'observed' THEN ?5 ELSE tool_registry.origin END,
                description = COALESCE(?6, tool_registry.description),
                server = COALESCE(?7, tool_registry.server),
                hints = COALESCE(?8, tool_registry.hints),
                status = CASE WHEN tool_registry.status = 'stale' THEN 'active' ELSE tool_registry.status END",
            params![
                tool.name,
                key,
                tool.tool_type.as_str(),
                tool.scope.as_str(),
                tool.origin,
                tool.description,
                tool.server,
                tool.hints,
                now_ts()
            ],
        )?;
        Ok(())
    }

    /// PostToolUse path: make sure the tool exists (organically if needed),
    /// append the usage event, bump counters, and run the demotion rule.
    pub fn record_or_create(
        &self,
        name: &str,
        project: &str,
        session_id: &str,
        success: bool,
    ) -> Result<()> {
        let tool = DiscoveredTool::observed(name);
        let key = registry_project(tool.scope, project);

        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM tool_registry WHERE name = ?1 AND project = ?2",
                params![name, key],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            self.upsert_tool(&tool, project)?;
        }

        let event_project = if tool.scope == ToolScope::Project {
            Some(project)
        } else {
            None
        };
        self.conn.execute(
            "INSERT INTO tool_events (tool, project, session_id, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, event_project, session_id, success as i64, now_ts()],
        )?;

        self.conn.execute(
            "UPDATE tool_registry SET usage_count = usage_count + 1, last_used_at = ?3
             WHERE name = ?1 AND project = ?2",
            params![name, key, now_ts()],
        )?;

        if success {
            // A single success restores a demoted tool.
            self.conn.execute(
                "UPDATE tool_registry SET status = 'active'
                 WHERE name = ?1 AND project = ?2 AND status = 'demoted'",
                params![name, key],
            )?;
        } else {
            let recent_failures = self.recent_failure_count(name)?;
            if recent_failures >= DEMOTION_FAILURES {
                self.conn.execute(
                    "UPDATE tool_registry SET status = 'demoted'
                     WHERE name = ?1 AND project = ?2",
                    params![name, key],
                )?;
            }
        }

        Ok(())
    }

    fn recent_failure_count(&self, name: &str) -> Result<usize> {
        let mut stmt = self.conn.prepare(
            "SELECT success FROM tool_events WHERE tool = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let recent: Vec<i64> = stmt
            .query_map(params![name, DEMOTION_WINDOW as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(recent.iter().filter(|s| **s == 0).count())
    }

    /// After a config re-scan: config-sourced rows for this project (or
    /// global) that the scan no longer produced go stale. Organic rows never
    /// do; absence from config is their normal condition.
    pub fn mark_stale_missing(&self, project: &str, seen_names: &[String]) -> Result<usize> {
        let mut stale = 0;
        let rows: Vec<(String, String)> = {
            let mut stmt = self.conn.prepare(
                "SELECT name, project FROM tool_registry
                 WHERE (project = ?1 OR project = '') AND origin != 'observed' AND status != 'stale'",
            )?;
            let rows = stmt
                .query_map([project], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        for (name, key) in rows {
            if !seen_names.contains(&name) {
                stale += self.conn.execute(
                    "UPDATE tool_registry SET status = 'stale' WHERE name = ?1 AND project = ?2",
                    params![name, key],
                )?;
            }
        }
        Ok(stale)
    }

    /// Scope resolution for a session: global rows plus this project's rows,
    /// plugin rows riding along when any plugin is registered.
    pub fn tools_in_scope(&self, project: &str) -> Result<Vec<RegistryRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REGISTRY_COLUMNS} FROM tool_registry
             WHERE project = ?1 OR project = ''
             ORDER BY usage_count DESC, name ASC"
        ))?;
        let rows = stmt
            .query_map([project], row_to_registry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_tool(&self, name: &str, project: &str) -> Result<Option<RegistryRow>> {
        let info = classify::classify(name);
        let key = registry_project(info.scope, project);
        let row = self
            .conn
            .query_row(
                &format!("SELECT {REGISTRY_COLUMNS} FROM tool_registry WHERE name = ?1 AND project = ?2"),
                params![name, key],
                row_to_registry,
            )
            .optional()?;
        Ok(row)
    }

    /// Most recent tool names in a session, newest first.
    pub fn recent_session_tools(&self, session_id: &str, limit: usize) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT tool FROM tool_events WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![session_id, limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
