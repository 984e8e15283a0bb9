use crate::db::Store;
use std::path::Path;

/// Read-only health report: database, hooks, configuration, embedding
/// service. Prints a pass/fail summary and never mutates anything.
pub async fn run() {
    println!();
    println!("── laminark doctor ─────────────────────────────");
    println!();

    let mut pass = 0;
    let mut fail = 0;

    check_database(&mut pass, &mut fail);
    check_hooks(&mut pass, &mut fail);
    check_configs(&mut pass, &mut fail);
    check_embedding_service(&mut pass, &mut fail).await;

    println!();
    println!("  {pass} passed  {fail} failed");
    println!();
}

fn check_database(pass: &mut u32, fail: &mut u32) {
    let path = crate::models::db_path();
    if !path.exists() {
        info(&format!(
            "no database yet at {} — created on first hook event",
            crate::models::shorten_home(&path.to_string_lossy())
        ));
        return;
    }

    match Store::open(&path) {
        Ok(store) => {
            ok("database opens", pass);
            match store.journal_mode() {
                Ok(mode) if mode.eq_ignore_ascii_case("wal") => ok("journal mode is WAL", pass),
                Ok(mode) => err(&format!("journal mode is {mode}, expected WAL"), fail),
                Err(e) => err(&format!("journal mode check failed: {e}"), fail),
            }
            report_counts(&store);
        }
        Err(e) => err(&format!("database open failed: {e}"), fail),
    }
}

fn report_counts(store: &Store) {
    let count = |sql: &str| -> i64 {
        store.conn.query_row(sql, [], |r| r.get(0)).unwrap_or(0)
    };
    let observations = count("SELECT COUNT(*) FROM observations WHERE deleted_at IS NULL");
    let sessions = count("SELECT COUNT(*) FROM sessions");
    let tools = count("SELECT COUNT(*) FROM tool_registry");
    let stashes = count("SELECT COUNT(*) FROM stashes");
    info(&format!(
        "{observations} observations, {sessions} sessions, {tools} registry rows, {stashes} stashes"
    ));
}

fn check_hooks(pass: &mut u32, fail: &mut u32) {
    let path = crate::models::home_dir().join(".claude/settings.json");
    if !path.exists() {
        err("~/.claude/settings.json missing — run `laminark setup`", fail);
        return;
    }
    let Ok(content) = std::fs::read_to_string(&path) else {
        err("~/.claude/settings.json unreadable", fail);
        return;
    };
    let Ok(config) = serde_json::from_str::<serde_json::Value>(&content) else {
        err("~/.claude/settings.json is not valid JSON", fail);
        return;
    };

    let registered = crate::setup::is_laminark_hook_present(&config["hooks"]["PostToolUse"]);
    if registered {
        ok("PostToolUse hook registered", pass);
    } else {
        err("PostToolUse hook not registered — run `laminark setup`", fail);
    }
}

fn check_configs(pass: &mut u32, fail: &mut u32) {
    let dir = crate::models::laminark_dir();
    if !dir.exists() {
        info("~/.laminark does not exist yet — run `laminark setup`");
        return;
    }
    ok("~/.laminark exists", pass);

    for name in ["privacy.json", "topic-detection.json", "cross-access.json", "embedding.json"] {
        let path = dir.join(name);
        if !Path::new(&path).exists() {
            continue;
        }
        match std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
        {
            Some(_) => ok(&format!("{name} parses"), pass),
            None => err(&format!("{name} is not valid JSON"), fail),
        }
    }
}

async fn check_embedding_service(pass: &mut u32, _fail: &mut u32) {
    match crate::embedding::EmbeddingClient::from_env() {
        None => info("embedding service not configured — vector tier off"),
        Some(client) => match client.embed("health check").await {
            Some(vec) => ok(&format!("embedding service reachable ({}-dim)", vec.len()), pass),
            // Unreachable embeddings degrade features, they never break hooks.
            None => info("embedding service configured but unreachable — vector tier off"),
        },
    }
}

fn ok(msg: &str, pass: &mut u32) {
    println!("  ✓  {msg}");
    *pass += 1;
}

fn err(msg: &str, fail: &mut u32) {
    println!("  ✗  {msg}");
    *fail += 1;
}

fn info(msg: &str) {
    println!("  i  {msg}");
}
