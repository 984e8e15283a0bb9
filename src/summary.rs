use crate::admission;
use crate::classify::{self, ToolType};
use crate::models::ObservationKind;

const MAX_DIFF_BYTES: usize = 4_096;
const MAX_EXCERPT: usize = 1_500;
const MAX_INPUT_JSON: usize = 600;

/// A summarised tool event, ready for filtering and storage.
#[derive(Debug, Clone)]
pub struct Summary {
    pub content: String,
    pub title: Option<String>,
    pub kind: ObservationKind,
    /// The file path this event touches, when it touches one.
    pub file_path: Option<String>,
    /// The Bash command string, for the admission filter.
    pub command: Option<String>,
}

/// Extract the semantic core of a tool payload. A small match-table knows the
/// tool-specific fields; everything else is treated as opaque text for
/// redaction downstream. Returns None for tools with nothing worth keeping.
pub fn extract(
    tool: &str,
    input: &serde_json::Value,
    response: &serde_json::Value,
    success: bool,
) -> Option<Summary> {
    let mut summary = match tool {
        "Write" => {
            let path = str_field(input, "file_path")?;
            let body = str_field(input, "content").unwrap_or_default();
            Summary {
                content: join_sections(&format!("[Write] Created {path}"), &excerpt(&body)),
                title: Some(format!("Created {}", basename(&path))),
                kind: ObservationKind::Change,
                file_path: Some(path),
                command: None,
            }
        }
        "Edit" | "MultiEdit" | "NotebookEdit" => {
            let path = str_field(input, "file_path")?;
            let diff = edit_diff(input);
            Summary {
                content: join_sections(
                    &format!("[Edit] Modified {path}"),
                    diff.as_deref().unwrap_or(""),
                ),
                title: Some(format!("Modified {}", basename(&path))),
                kind: ObservationKind::Change,
                file_path: Some(path),
                command: None,
            }
        }
        "Bash" => {
            let command = str_field(input, "command")?;
            let output = response_text(response);
            Summary {
                content: join_sections(&format!("[Bash] $ {command}"), &excerpt(&output)),
                title: Some(first_words(&command, 8)),
                kind: bash_kind(&command, success),
                file_path: None,
                command: Some(command),
            }
        }
        "WebFetch" => {
            let url = str_field(input, "url")?;
            let prompt = str_field(input, "prompt").unwrap_or_default();
            Summary {
                content: join_sections(&format!("[WebFetch] Fetched {url}"), &excerpt(&prompt)),
                title: Some(format!("Fetched {}", hostname(&url))),
                kind: ObservationKind::Reference,
                file_path: None,
                command: None,
            }
        }
        "WebSearch" => {
            let query = str_field(input, "query")?;
            Summary {
                content: format!("[WebSearch] Searched: {query}"),
                title: Some(format!("Searched: {}", first_words(&query, 8))),
                kind: ObservationKind::Reference,
                file_path: None,
                command: None,
            }
        }
        _ => {
            let info = classify::classify(tool);
            match info.tool_type {
                ToolType::McpTool => {
                    let server = info.server.as_deref().unwrap_or("mcp");
                    let short = tool.rsplit("__").next().unwrap_or(tool);
                    Summary {
                        content: join_sections(
                            &format!("[{server}] {short}"),
                            &compact_json(input),
                        ),
                        title: Some(format!("{server}: {short}")),
                        kind: ObservationKind::Finding,
                        file_path: str_field(input, "file_path"),
                        command: None,
                    }
                }
                // Exploration builtins are routed to the research buffer by
                // the dispatcher; everything else builtin is noise here.
                _ => return None,
            }
        }
    };

    if !success {
        let err = error_message(response);
        summary.content = format!("{}\n\nFailed: {err}", summary.content);
        summary.kind = ObservationKind::Finding;
    }

    Some(summary)
}

fn bash_kind(command: &str, success: bool) -> ObservationKind {
    if !success {
        return ObservationKind::Finding;
    }
    let is_test = ["cargo test", "npm test", "yarn test", "pnpm test", "pytest", "go test", "jest", "vitest"]
        .iter()
        .any(|p| command.starts_with(p));
    if is_test {
        ObservationKind::Verification
    } else if admission::is_meaningful_command(command) {
        ObservationKind::Change
    } else {
        ObservationKind::Finding
    }
}

/// Unified diff for Edit payloads carrying old_string + new_string.
pub fn edit_diff(input: &serde_json::Value) -> Option<String> {
    let old = str_field(input, "old_string")?;
    let new = str_field(input, "new_string")?;
    compute_unified_diff(&old, &new)
}

pub fn compute_unified_diff(old: &str, new: &str) -> Option<String> {
    use similar::{ChangeTag, TextDiff};

    let diff = TextDiff::from_lines(old, new);
    let mut out = String::new();
    for group in diff.grouped_ops(3) {
        for op in &group {
            for change in diff.iter_changes(op) {
                let prefix = match change.tag() {
                    ChangeTag::Delete => "-",
                    ChangeTag::Insert => "+",
                    ChangeTag::Equal => " ",
                };
                out.push_str(prefix);
                out.push_str(change.value());
            }
        }
    }
    if out.len() > MAX_DIFF_BYTES {
        out.truncate(MAX_DIFF_BYTES);
        out.push_str("... (truncated)\n");
    }
    if out.trim().is_empty() {
        None
    } else {
        Some(out)
    }
}

fn str_field(value: &serde_json::Value, field: &str) -> Option<String> {
    value.get(field).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Tool responses arrive in several shapes; probe the common ones.
fn response_text(response: &serde_json::Value) -> String {
    if let Some(s) = response.as_str() {
        return s.to_string();
    }
    for field in ["stdout", "output", "text", "result"] {
        if let Some(s) = response.get(field).and_then(|v| v.as_str()) {
            return s.to_string();
        }
    }
    response
        .get("content")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|v| v.get("text"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

pub fn error_message(response: &serde_json::Value) -> String {
    response
        .get("error")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            let text = response_text(response);
            if text.is_empty() { None } else { Some(text) }
        })
        .unwrap_or_else(|| "error".to_string())
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= MAX_EXCERPT {
        return trimmed.to_string();
    }
    let mut cut = MAX_EXCERPT;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... (truncated)", &trimmed[..cut])
}

fn compact_json(value: &serde_json::Value) -> String {
    let s = serde_json::to_string(value).unwrap_or_default();
    if s == "null" || s == "{}" {
        return String::new();
    }
    if s.len() <= MAX_INPUT_JSON {
        s
    } else {
        let mut cut = MAX_INPUT_JSON;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &s[..cut])
    }
}

fn join_sections(head: &str, body: &str) -> String {
    if body.is_empty() {
        head.to_string()
    } else {
        format!("{head}\n\n{body}")
    }
}

pub fn basename(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

fn hostname(url: &str) -> String {
    url.split("://")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or(url)
        .to_string()
}

pub fn first_words(text: &str, n: usize) -> String {
    text.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_summary_contains_path_and_content() {
        let input = serde_json::json!({
            "file_path": "/src/app.ts",
            "content": "export const g='hi';"
        });
        let s = extract("Write", &input, &serde_json::Value::Null, true).unwrap();
        assert!(s.content.contains("[Write] Created /src/app.ts"));
        assert!(s.content.contains("hi"));
        assert_eq!(s.kind, ObservationKind::Change);
        assert_eq!(s.file_path.as_deref(), Some("/src/app.ts"));
        assert_eq!(s.title.as_deref(), Some("Created app.ts"));
    }

    #[test]
    fn edit_summary_includes_diff() {
        let input = serde_json::json!({
            "file_path": "/src/lib.rs",
            "old_string": "let x = 1;\n",
            "new_string": "let x = 2;\n"
        });
        let s = extract("Edit", &input, &serde_json::Value::Null, true).unwrap();
        assert!(s.content.contains("[Edit] Modified /src/lib.rs"));
        assert!(s.content.contains("-let x = 1;"));
        assert!(s.content.contains("+let x = 2;"));
    }

    #[test]
    fn bash_summary_includes_command_and_output() {
        let input = serde_json::json!({ "command": "cargo test" });
        let response = serde_json::json!({ "stdout": "test result: ok. 12 passed" });
        let s = extract("Bash", &input, &response, true).unwrap();
        assert!(s.content.contains("[Bash] $ cargo test"));
        assert!(s.content.contains("12 passed"));
        assert_eq!(s.kind, ObservationKind::Verification);
        assert_eq!(s.command.as_deref(), Some("cargo test"));
    }

    #[test]
    fn bash_mutation_is_change() {
        let input = serde_json::json!({ "command": "git commit -m 'fix parser'" });
        let s = extract("Bash", &input, &serde_json::Value::Null, true).unwrap();
        assert_eq!(s.kind, ObservationKind::Change);
    }

    #[test]
    fn failure_appends_error_and_becomes_finding() {
        let input = serde_json::json!({ "command": "cargo build" });
        let response = serde_json::json!({ "error": "error[E0308]: mismatched types" });
        let s = extract("Bash", &input, &response, false).unwrap();
        assert!(s.content.contains("Failed: error[E0308]"));
        assert_eq!(s.kind, ObservationKind::Finding);
    }

    #[test]
    fn webfetch_summary() {
        let input = serde_json::json!({ "url": "https://docs.rs/rusqlite", "prompt": "check api" });
        let s = extract("WebFetch", &input, &serde_json::Value::Null, true).unwrap();
        assert!(s.content.contains("[WebFetch] Fetched https://docs.rs/rusqlite"));
        assert_eq!(s.kind, ObservationKind::Reference);
        assert_eq!(s.title.as_deref(), Some("Fetched docs.rs"));
    }

    #[test]
    fn websearch_summary() {
        let input = serde_json::json!({ "query": "rusqlite fts5 bm25" });
        let s = extract("WebSearch", &input, &serde_json::Value::Null, true).unwrap();
        assert_eq!(s.content, "[WebSearch] Searched: rusqlite fts5 bm25");
    }

    #[test]
    fn mcp_tool_summary_uses_server_name() {
        let input = serde_json::json!({ "owner": "acme", "repo": "api" });
        let s = extract("mcp__github__create_issue", &input, &serde_json::Value::Null, true).unwrap();
        assert!(s.content.contains("[github] create_issue"));
        assert!(s.content.contains("acme"));
    }

    #[test]
    fn exploration_builtins_produce_nothing() {
        let input = serde_json::json!({ "file_path": "/src/main.rs" });
        assert!(extract("Read", &input, &serde_json::Value::Null, true).is_none());
        assert!(extract("Glob", &input, &serde_json::Value::Null, true).is_none());
        assert!(extract("Grep", &input, &serde_json::Value::Null, true).is_none());
    }

    #[test]
    fn missing_required_field_produces_nothing() {
        assert!(extract("Write", &serde_json::json!({}), &serde_json::Value::Null, true).is_none());
        assert!(extract("Bash", &serde_json::json!({}), &serde_json::Value::Null, true).is_none());
    }

    #[test]
    fn long_output_is_truncated() {
        let input = serde_json::json!({ "command": "./run.sh" });
        let response = serde_json::json!({ "stdout": "z".repeat(10_000) });
        let s = extract("Bash", &input, &response, true).unwrap();
        assert!(s.content.len() < 2_500);
        assert!(s.content.contains("(truncated)"));
    }

    #[test]
    fn compute_unified_diff_none_for_identical() {
        assert!(compute_unified_diff("same\n", "same\n").is_none());
    }

    #[test]
    fn response_text_probes_common_shapes() {
        assert_eq!(response_text(&serde_json::json!("plain")), "plain");
        assert_eq!(response_text(&serde_json::json!({ "output": "o" })), "o");
        assert_eq!(
            response_text(&serde_json::json!({ "content": [{ "text": "t" }] })),
            "t"
        );
        assert_eq!(response_text(&serde_json::Value::Null), "");
    }
}
