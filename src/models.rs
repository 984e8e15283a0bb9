use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Returns the user's home directory as a `PathBuf`.
pub fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .ok()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns `~/.laminark`.
pub fn laminark_dir() -> PathBuf {
    home_dir().join(".laminark")
}

/// Returns `~/.laminark/<subpath>`.
pub fn laminark_path(subpath: &str) -> PathBuf {
    laminark_dir().join(subpath)
}

/// Database file path. `LAMINARK_DB` overrides the default location.
pub fn db_path() -> PathBuf {
    std::env::var("LAMINARK_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| laminark_path("laminark.db"))
}

pub fn shorten_home(path: &str) -> String {
    let h = home_dir();
    let h_str = h.to_string_lossy();
    if !h_str.is_empty() && path.starts_with(h_str.as_ref()) {
        format!("~{}", &path[h_str.len()..])
    } else {
        path.to_string()
    }
}

/// Read a JSON config file from `~/.laminark/`. Bad JSON or a missing file
/// both yield `None`; config errors never fail a hook.
pub fn read_json_config(name: &str) -> Option<serde_json::Value> {
    let path = laminark_path(name);
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(v) => Some(v),
        Err(e) => {
            eprintln!("[laminark] ignoring malformed config {name}: {e}");
            None
        }
    }
}

pub fn debug_enabled() -> bool {
    matches!(
        std::env::var("LAMINARK_DEBUG").unwrap_or_default().to_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

/// Debug-level diagnostics. Stdout is reserved for context injection, so
/// everything lands on stderr, gated on LAMINARK_DEBUG.
pub fn debug_log(msg: &str) {
    if debug_enabled() {
        eprintln!("[laminark] {msg}");
    }
}

/// Fixed namespace UUID for deriving stable identifiers via UUID v5 (SHA-1).
/// Changing this value would split every project's history in two.
const PROJECT_NAMESPACE: Uuid = Uuid::from_bytes([
    0x5e, 0x1f, 0x2a, 0x9c, 0xd4, 0x0b, 0x4f, 0x31, 0x8e, 0x67, 0x12, 0xab, 0x90, 0xfe, 0x34, 0x56,
]);

/// Stable project hash: the first 16 hex chars of UUIDv5(namespace, cwd).
/// Deterministic across processes and platforms.
pub fn project_hash(cwd: &str) -> String {
    let id = Uuid::new_v5(&PROJECT_NAMESPACE, cwd.as_bytes());
    id.simple().to_string()[..16].to_string()
}

/// RFC 3339 UTC timestamp with fixed microsecond precision, so stored
/// strings compare lexicographically in insertion order.
pub fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// One hook event as delivered by the host on stdin.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HookPayload {
    #[serde(default)]
    pub hook_event_name: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    #[serde(default)]
    pub tool_response: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
}

impl HookPayload {
    /// The host marks failures either with `is_error` or `success: false`.
    pub fn tool_succeeded(&self) -> bool {
        if self.hook_event_name == "PostToolUseFailure" {
            return false;
        }
        let is_error = self
            .tool_response
            .get("is_error")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let failed = self
            .tool_response
            .get("success")
            .and_then(|v| v.as_bool())
            .map(|s| !s)
            .unwrap_or(false);
        !(is_error || failed)
    }
}

/// Semantic category of a stored observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    Change,
    Finding,
    Reference,
    Decision,
    Verification,
}

impl ObservationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObservationKind::Change => "change",
            ObservationKind::Finding => "finding",
            ObservationKind::Reference => "reference",
            ObservationKind::Decision => "decision",
            ObservationKind::Verification => "verification",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "change" => Some(ObservationKind::Change),
            "finding" => Some(ObservationKind::Finding),
            "reference" => Some(ObservationKind::Reference),
            "decision" => Some(ObservationKind::Decision),
            "verification" => Some(ObservationKind::Verification),
            _ => None,
        }
    }
}

/// Relative age for display: "3h ago", "2d ago".
pub fn relative_age(ts: &str, now: chrono::DateTime<chrono::Utc>) -> String {
    let Ok(then) = chrono::DateTime::parse_from_rfc3339(ts) else {
        return "recently".to_string();
    };
    let mins = (now - then.with_timezone(&chrono::Utc)).num_minutes().max(0);
    match mins {
        0 => "just now".to_string(),
        1..=59 => format!("{mins}m ago"),
        60..=1439 => format!("{}h ago", mins / 60),
        _ => format!("{}d ago", mins / 1440),
    }
}
