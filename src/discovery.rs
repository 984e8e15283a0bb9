//! SessionStart configuration scan: every tool the host declares in its
//! config surfaces. Unreadable files and bad JSON are logged and skipped;
//! the scan always returns whatever succeeded.

use crate::classify::{ToolScope, ToolType};
use crate::models::home_dir;
use crate::registry::DiscoveredTool;
use std::path::Path;

/// Only this much of a command/skill file is inspected for metadata.
const DOC_PROBE_BYTES: usize = 2_000;

pub fn scan(cwd: &str) -> Vec<DiscoveredTool> {
    let mut tools = Vec::new();

    scan_user_mcp_config(&home_dir().join(".claude.json"), cwd, &mut tools);
    scan_mcp_manifest(&Path::new(cwd).join(".mcp.json"), ToolScope::Project, "mcp-manifest", &mut tools);

    scan_command_dir(&Path::new(cwd).join(".claude/commands"), ToolScope::Project, &mut tools);
    scan_command_dir(&home_dir().join(".claude/commands"), ToolScope::Global, &mut tools);

    scan_skill_dir(&Path::new(cwd).join(".claude/skills"), ToolScope::Project, &mut tools);
    scan_skill_dir(&home_dir().join(".claude/skills"), ToolScope::Global, &mut tools);

    scan_installed_plugins(&home_dir().join(".claude/plugins/installed_plugins.json"), &mut tools);

    tools
}

/// Per-user host config: a top-level MCP server map plus optional
/// per-project maps keyed by working directory.
fn scan_user_mcp_config(path: &Path, cwd: &str, out: &mut Vec<DiscoveredTool>) {
    let Some(config) = read_json(path) else { return };

    if let Some(servers) = config["mcpServers"].as_object() {
        for name in servers.keys() {
            out.push(mcp_server_tool(name, ToolScope::Global, "user-config"));
        }
    }
    if let Some(servers) = config["projects"][cwd]["mcpServers"].as_object() {
        for name in servers.keys() {
            out.push(mcp_server_tool(name, ToolScope::Project, "user-config"));
        }
    }
}

fn scan_mcp_manifest(path: &Path, scope: ToolScope, origin: &str, out: &mut Vec<DiscoveredTool>) {
    let Some(config) = read_json(path) else { return };
    if let Some(servers) = config["mcpServers"].as_object() {
        for name in servers.keys() {
            out.push(mcp_server_tool(name, scope, origin));
        }
    }
}

fn mcp_server_tool(server: &str, scope: ToolScope, origin: &str) -> DiscoveredTool {
    DiscoveredTool {
        name: format!("mcp__{server}"),
        tool_type: ToolType::McpServer,
        scope,
        origin: origin.to_string(),
        description: None,
        server: Some(server.to_string()),
        hints: None,
    }
}

/// Command markdown files, with one level of namespacing via subdirectory:
/// `commands/deploy.md` -> `/deploy`, `commands/infra/plan.md` -> `/infra:plan`.
fn scan_command_dir(dir: &Path, scope: ToolScope, out: &mut Vec<DiscoveredTool>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            let Some(ns) = file_stem(&path) else { continue };
            let Ok(nested) = std::fs::read_dir(&path) else { continue };
            for sub in nested.filter_map(|e| e.ok()) {
                let sub_path = sub.path();
                if is_markdown(&sub_path) {
                    if let Some(stem) = file_stem(&sub_path) {
                        out.push(command_tool(&format!("/{ns}:{stem}"), &sub_path, scope));
                    }
                }
            }
        } else if is_markdown(&path) {
            if let Some(stem) = file_stem(&path) {
                out.push(command_tool(&format!("/{stem}"), &path, scope));
            }
        }
    }
}

fn command_tool(name: &str, path: &Path, scope: ToolScope) -> DiscoveredTool {
    let (description, hints) = parse_doc_metadata(path);
    DiscoveredTool {
        name: name.to_string(),
        tool_type: ToolType::SlashCommand,
        scope,
        origin: "command-file".to_string(),
        description,
        server: None,
        hints,
    }
}

/// Skill directories: one `SKILL.md` per skill, same metadata extraction as
/// command files.
fn scan_skill_dir(dir: &Path, scope: ToolScope, out: &mut Vec<DiscoveredTool>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let skill_md = path.join("SKILL.md");
        if !skill_md.exists() {
            continue;
        }
        let Some(name) = file_stem(&path) else { continue };
        let (description, hints) = parse_doc_metadata(&skill_md);
        out.push(DiscoveredTool {
            name,
            tool_type: ToolType::Skill,
            scope,
            origin: "skill-dir".to_string(),
            description,
            server: None,
            hints,
        });
    }
}

/// Installed-plugin manifest: a map of plugin name to its installations.
fn scan_installed_plugins(path: &Path, out: &mut Vec<DiscoveredTool>) {
    let Some(config) = read_json(path) else { return };
    let map = config["plugins"].as_object().or_else(|| config.as_object());
    let Some(map) = map else { return };
    for (name, installs) in map {
        if !installs.is_array() {
            continue;
        }
        out.push(DiscoveredTool {
            name: name.clone(),
            tool_type: ToolType::Plugin,
            scope: ToolScope::Plugin,
            origin: "plugin-manifest".to_string(),
            description: None,
            server: None,
            hints: None,
        });
    }
}

/// First 2000 bytes of a command/skill file: YAML front-matter `description:`
/// becomes the description, an `<objective>...</objective>` block becomes the
/// trigger hints.
pub fn parse_doc_metadata(path: &Path) -> (Option<String>, Option<String>) {
    let Ok(raw) = std::fs::read(path) else {
        return (None, None);
    };
    let probe = &raw[..raw.len().min(DOC_PROBE_BYTES)];
    let text = String::from_utf8_lossy(probe);
    (front_matter_description(&text), objective_block(&text))
}

fn front_matter_description(text: &str) -> Option<String> {
    let rest = text.strip_prefix("---")?;
    let end = rest.find("\n---")?;
    for line in rest[..end].lines() {
        if let Some(value) = line.trim().strip_prefix("description:") {
            let value = value.trim().trim_matches('"').trim_matches('\'').trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn objective_block(text: &str) -> Option<String> {
    let start = text.find("<objective>")? + "<objective>".len();
    let end = text[start..].find("</objective>")? + start;
    let block = text[start..end].trim();
    if block.is_empty() {
        None
    } else {
        Some(block.to_string())
    }
}

fn read_json(path: &Path) -> Option<serde_json::Value> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(v) => Some(v),
        Err(e) => {
            eprintln!("[laminark] skipping malformed config {}: {e}", path.display());
            None
        }
    }
}

fn is_markdown(path: &Path) -> bool {
    path.extension().map(|e| e == "md").unwrap_or(false)
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn scans_user_mcp_config_global_and_project() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join(".claude.json");
        write(
            &config,
            r#"{
                "mcpServers": { "github": { "command": "gh-mcp" } },
                "projects": { "/work/api": { "mcpServers": { "db": {} } } }
            }"#,
        );
        let mut tools = Vec::new();
        scan_user_mcp_config(&config, "/work/api", &mut tools);
        assert_eq!(tools.len(), 2);
        let global = tools.iter().find(|t| t.name == "mcp__github").unwrap();
        assert_eq!(global.scope, ToolScope::Global);
        let project = tools.iter().find(|t| t.name == "mcp__db").unwrap();
        assert_eq!(project.scope, ToolScope::Project);
    }

    #[test]
    fn unrelated_project_servers_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join(".claude.json");
        write(&config, r#"{ "projects": { "/other": { "mcpServers": { "x": {} } } } }"#);
        let mut tools = Vec::new();
        scan_user_mcp_config(&config, "/work/api", &mut tools);
        assert!(tools.is_empty());
    }

    #[test]
    fn scans_project_mcp_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join(".mcp.json");
        write(&manifest, r#"{ "mcpServers": { "search": {} } }"#);
        let mut tools = Vec::new();
        scan_mcp_manifest(&manifest, ToolScope::Project, "mcp-manifest", &mut tools);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "mcp__search");
        assert_eq!(tools[0].tool_type, ToolType::McpServer);
        assert_eq!(tools[0].server.as_deref(), Some("search"));
    }

    #[test]
    fn malformed_config_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join(".mcp.json");
        write(&manifest, "{ not json");
        let mut tools = Vec::new();
        scan_mcp_manifest(&manifest, ToolScope::Project, "mcp-manifest", &mut tools);
        assert!(tools.is_empty());
    }

    #[test]
    fn scans_commands_with_namespacing() {
        let dir = tempfile::tempdir().unwrap();
        let commands = dir.path().join("commands");
        write(
            &commands.join("deploy.md"),
            "---\ndescription: Deploy the stack\n---\nBody",
        );
        write(&commands.join("infra/plan.md"), "# plan");

        let mut tools = Vec::new();
        scan_command_dir(&commands, ToolScope::Project, &mut tools);
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "/deploy");
        assert_eq!(tools[0].description.as_deref(), Some("Deploy the stack"));
        assert_eq!(tools[1].name, "/infra:plan");
        assert!(tools[1].description.is_none());
    }

    #[test]
    fn extracts_objective_block_as_hints() {
        let dir = tempfile::tempdir().unwrap();
        let md = dir.path().join("review.md");
        write(
            &md,
            "---\ndescription: Review code\n---\n<objective>\nFind correctness bugs\n</objective>",
        );
        let (desc, hints) = parse_doc_metadata(&md);
        assert_eq!(desc.as_deref(), Some("Review code"));
        assert_eq!(hints.as_deref(), Some("Find correctness bugs"));
    }

    #[test]
    fn metadata_probe_respects_byte_cap() {
        let dir = tempfile::tempdir().unwrap();
        let md = dir.path().join("big.md");
        let mut content = "x".repeat(3_000);
        content.push_str("\n<objective>too deep</objective>");
        write(&md, &content);
        let (desc, hints) = parse_doc_metadata(&md);
        assert!(desc.is_none());
        assert!(hints.is_none());
    }

    #[test]
    fn scans_skill_directories() {
        let dir = tempfile::tempdir().unwrap();
        let skills = dir.path().join("skills");
        write(
            &skills.join("release/SKILL.md"),
            "---\ndescription: Cut a release\n---\nSteps",
        );
        write(&skills.join("no-manifest/notes.md"), "not a skill");

        let mut tools = Vec::new();
        scan_skill_dir(&skills, ToolScope::Global, &mut tools);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "release");
        assert_eq!(tools[0].tool_type, ToolType::Skill);
        assert_eq!(tools[0].description.as_deref(), Some("Cut a release"));
    }

    #[test]
    fn scans_installed_plugins() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("installed_plugins.json");
        write(
            &manifest,
            r#"{ "plugins": { "acme-tools": [{ "version": "1.0" }], "empty": [] } }"#,
        );
        let mut tools = Vec::new();
        scan_installed_plugins(&manifest, &mut tools);
        assert_eq!(tools.len(), 2);
        assert!(tools.iter().all(|t| t.tool_type == ToolType::Plugin));
        assert!(tools.iter().all(|t| t.scope == ToolScope::Plugin));
    }

    #[test]
    fn scan_tolerates_missing_everything() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("HOME", dir.path().to_str().unwrap());
        let tools = scan(dir.path().join("project").to_str().unwrap());
        assert!(tools.is_empty());
        std::env::remove_var("HOME");
    }
}
