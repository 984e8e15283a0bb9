use anyhow::Result;
use std::io::{self, Write};

/// Events the memory layer listens on. Each gets its own hook entry in
/// ~/.claude/settings.json, all pointing at `laminark hook`.
const HOOK_EVENTS: [&str; 6] = [
    "SessionStart",
    "PreToolUse",
    "PostToolUse",
    "PostToolUseFailure",
    "SessionEnd",
    "Stop",
];

const HOOK_COMMAND: &str = "laminark hook";

pub async fn run() -> Result<()> {
    println!("\nlaminark setup\n");

    let has_claude = detect_claude();
    if has_claude {
        println!("  Claude Code detected ✓");
    } else {
        println!("  Claude Code not detected.");
        println!("  You can still finish setup — hooks activate once the host exists.");
    }
    println!();

    let dir = crate::models::laminark_dir();
    std::fs::create_dir_all(&dir)?;
    println!("[1/2] Data directory");
    println!("      ✓ {}", dir.display());

    println!("\n[2/2] Claude Code hooks");
    println!("      Registers `{HOOK_COMMAND}` for: {}", HOOK_EVENTS.join(", "));
    if prompt_yn("      Configure ~/.claude/settings.json?", true)? {
        if let Err(e) = install_hooks() {
            eprintln!("      ! Error: {e}");
        }
    }

    print_completion();
    Ok(())
}

fn print_completion() {
    println!("\n  Done.\n");
    println!("  Start a new assistant session and make some tool calls, then run:");
    println!("    laminark doctor\n");
    println!("  Optional: point LAMINARK_EMBED_URL at an embedding service to enable");
    println!("  semantic duplicate detection and topic-shift stashing.");
    println!();
}

fn install_hooks() -> Result<()> {
    let path = crate::models::home_dir()
        .join(".claude/settings.json")
        .to_string_lossy()
        .into_owned();
    let mut config: serde_json::Value = read_json_or_empty(&path);

    if config["hooks"].is_null() {
        config["hooks"] = serde_json::json!({});
    }
    for event in HOOK_EVENTS {
        ensure_hook_entry(&mut config["hooks"], event);
    }

    write_json(&path, &config)?;
    println!("      ✓ ~/.claude/settings.json");
    Ok(())
}

/// Append our hook for one event unless it is already present. Existing
/// entries from other tools are left untouched.
pub(crate) fn ensure_hook_entry(hooks: &mut serde_json::Value, event: &str) {
    if is_laminark_hook_present(&hooks[event]) {
        return;
    }
    let mut entries = hooks[event].as_array().cloned().unwrap_or_default();
    entries.push(serde_json::json!({
        "matcher": ".*",
        "hooks": [{ "type": "command", "command": HOOK_COMMAND }]
    }));
    hooks[event] = serde_json::Value::Array(entries);
}

pub(crate) fn is_laminark_hook_present(event_hooks: &serde_json::Value) -> bool {
    event_hooks
        .as_array()
        .map(|arr| {
            arr.iter().any(|entry| {
                entry["hooks"]
                    .as_array()
                    .map(|hooks| {
                        hooks
                            .iter()
                            .any(|h| h["command"].as_str() == Some(HOOK_COMMAND))
                    })
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

fn detect_claude() -> bool {
    crate::models::home_dir().join(".claude").exists() || which("claude").is_some()
}

fn which(cmd: &str) -> Option<String> {
    std::process::Command::new("which")
        .arg(cmd)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn read_json_or_empty(path: &str) -> serde_json::Value {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::json!({}))
}

fn write_json(path: &str, value: &serde_json::Value) -> Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)? + "\n")?;
    Ok(())
}

fn prompt_yn(question: &str, default_yes: bool) -> Result<bool> {
    let hint = if default_yes { "Y/n" } else { "y/N" };
    print!("  {question} [{hint}]: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(match input.trim().to_lowercase().as_str() {
        "y" | "yes" => true,
        "n" | "no" => false,
        _ => default_yes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_present_detects_configured_entry() {
        let val = serde_json::json!([{
            "matcher": ".*",
            "hooks": [{ "type": "command", "command": "laminark hook" }]
        }]);
        assert!(is_laminark_hook_present(&val));
    }

    #[test]
    fn hook_present_false_for_empty_or_null() {
        assert!(!is_laminark_hook_present(&serde_json::json!([])));
        assert!(!is_laminark_hook_present(&serde_json::Value::Null));
    }

    #[test]
    fn hook_present_false_for_other_tool() {
        let val = serde_json::json!([{
            "matcher": ".*",
            "hooks": [{ "type": "command", "command": "other-tool hook" }]
        }]);
        assert!(!is_laminark_hook_present(&val));
    }

    #[test]
    fn ensure_hook_entry_adds_all_events() {
        let mut hooks = serde_json::json!({});
        for event in HOOK_EVENTS {
            ensure_hook_entry(&mut hooks, event);
        }
        for event in HOOK_EVENTS {
            assert!(is_laminark_hook_present(&hooks[event]), "{event}");
        }
    }

    #[test]
    fn ensure_hook_entry_is_idempotent() {
        let mut hooks = serde_json::json!({});
        ensure_hook_entry(&mut hooks, "PostToolUse");
        ensure_hook_entry(&mut hooks, "PostToolUse");
        assert_eq!(hooks["PostToolUse"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn ensure_hook_entry_preserves_existing_entries() {
        let mut hooks = serde_json::json!({
            "PostToolUse": [{
                "matcher": ".*",
                "hooks": [{ "type": "command", "command": "other-tool hook" }]
            }]
        });
        ensure_hook_entry(&mut hooks, "PostToolUse");
        let arr = hooks["PostToolUse"].as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["hooks"][0]["command"], "other-tool hook");
        assert_eq!(arr[1]["hooks"][0]["command"], "laminark hook");
    }

    #[test]
    fn read_json_or_empty_handles_missing_and_invalid() {
        assert_eq!(read_json_or_empty("/nonexistent/path.json"), serde_json::json!({}));

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json at all").expect("write");
        assert_eq!(read_json_or_empty(path.to_str().unwrap()), serde_json::json!({}));
    }

    #[test]
    fn write_json_creates_parent_dirs() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("sub/dir/settings.json");
        write_json(path.to_str().unwrap(), &serde_json::json!({"hooks": {}})).expect("write_json");
        let contents = std::fs::read_to_string(&path).expect("read");
        let parsed: serde_json::Value = serde_json::from_str(contents.trim()).expect("parse");
        assert!(parsed["hooks"].is_object());
    }
}
