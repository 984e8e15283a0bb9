//! Tool-name classification. Pure string parsing, no I/O.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolType {
    McpServer,
    McpTool,
    SlashCommand,
    Skill,
    Plugin,
    Builtin,
    Unknown,
}

impl ToolType {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolType::McpServer => "mcp_server",
            ToolType::McpTool => "mcp_tool",
            ToolType::SlashCommand => "slash_command",
            ToolType::Skill => "skill",
            ToolType::Plugin => "plugin",
            ToolType::Builtin => "builtin",
            ToolType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolScope {
    Global,
    Project,
    Plugin,
}

impl ToolScope {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolScope::Global => "global",
            ToolScope::Project => "project",
            ToolScope::Plugin => "plugin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInfo {
    pub tool_type: ToolType,
    pub scope: ToolScope,
    pub server: Option<String>,
}

/// The system's own tool prefixes: project-scoped and plugin-scoped installs.
/// Recognised but never captured as observations.
pub const SELF_PREFIXES: [&str; 2] = ["mcp__laminark__", "mcp__plugin_laminark_laminark__"];

pub fn is_self_reference(tool_name: &str) -> bool {
    SELF_PREFIXES.iter().any(|p| tool_name.starts_with(p))
}

/// Parse a tool name into {type, scope, server}.
///
///   mcp__<server>__<name>                   -> mcp_tool, project scope
///   mcp__plugin_<plugin>_<server>__<name>   -> mcp_tool, plugin scope
///   [A-Z][A-Za-z]+                          -> builtin, global scope
///   /command                                -> slash_command, global scope
///   anything else                           -> unknown, global scope
pub fn classify(tool_name: &str) -> ToolInfo {
    if let Some(rest) = tool_name.strip_prefix("mcp__") {
        if let Some((server_part, _name)) = rest.split_once("__") {
            if let Some(plugin_rest) = server_part.strip_prefix("plugin_") {
                // plugin_<plugin>_<server>: the server is the last underscore segment
                let server = plugin_rest
                    .rsplit_once('_')
                    .map(|(_, s)| s)
                    .unwrap_or(plugin_rest);
                return ToolInfo {
                    tool_type: ToolType::McpTool,
                    scope: ToolScope::Plugin,
                    server: Some(server.to_string()),
                };
            }
            return ToolInfo {
                tool_type: ToolType::McpTool,
                scope: ToolScope::Project,
                server: Some(server_part.to_string()),
            };
        }
    }

    if tool_name.starts_with('/') && tool_name.len() > 1 {
        return ToolInfo {
            tool_type: ToolType::SlashCommand,
            scope: ToolScope::Global,
            server: None,
        };
    }

    if is_builtin_name(tool_name) {
        return ToolInfo {
            tool_type: ToolType::Builtin,
            scope: ToolScope::Global,
            server: None,
        };
    }

    ToolInfo {
        tool_type: ToolType::Unknown,
        scope: ToolScope::Global,
        server: None,
    }
}

/// One uppercase letter followed by letters: Write, Bash, WebFetch, ...
fn is_builtin_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    let mut rest_len = 0;
    for c in chars {
        if !c.is_ascii_alphabetic() {
            return false;
        }
        rest_len += 1;
    }
    rest_len > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_project_mcp_tool() {
        let info = classify("mcp__github__create_issue");
        assert_eq!(info.tool_type, ToolType::McpTool);
        assert_eq!(info.scope, ToolScope::Project);
        assert_eq!(info.server.as_deref(), Some("github"));
    }

    #[test]
    fn classify_plugin_mcp_tool() {
        let info = classify("mcp__plugin_acme_tracker__list_issues");
        assert_eq!(info.tool_type, ToolType::McpTool);
        assert_eq!(info.scope, ToolScope::Plugin);
        assert_eq!(info.server.as_deref(), Some("tracker"));
    }

    #[test]
    fn classify_builtins() {
        for name in ["Write", "Edit", "Bash", "WebFetch", "Read"] {
            let info = classify(name);
            assert_eq!(info.tool_type, ToolType::Builtin, "{name}");
            assert_eq!(info.scope, ToolScope::Global);
            assert!(info.server.is_none());
        }
    }

    #[test]
    fn classify_slash_command() {
        let info = classify("/deploy");
        assert_eq!(info.tool_type, ToolType::SlashCommand);
        assert_eq!(info.scope, ToolScope::Global);
    }

    #[test]
    fn classify_unknown() {
        for name in ["x", "lowercase_tool", "W1thDigits", "", "ALL CAPS SPACED"] {
            assert_eq!(classify(name).tool_type, ToolType::Unknown, "{name}");
        }
    }

    #[test]
    fn self_reference_prefixes_match() {
        assert!(is_self_reference("mcp__laminark__save_memory"));
        assert!(is_self_reference("mcp__plugin_laminark_laminark__recall"));
        assert!(!is_self_reference("mcp__github__create_issue"));
        assert!(!is_self_reference("Write"));
    }

    #[test]
    fn self_reference_still_classifies_as_mcp_tool() {
        let info = classify("mcp__laminark__save_memory");
        assert_eq!(info.tool_type, ToolType::McpTool);
        assert_eq!(info.server.as_deref(), Some("laminark"));
    }
}
