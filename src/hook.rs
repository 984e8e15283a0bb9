use crate::classify::{self, ToolType};
use crate::db::Store;
use crate::embedding::EmbeddingClient;
use crate::models::{self, HookPayload};
use crate::{admission, dedup, pretool, privacy, research, router, session, summary, topic};
use anyhow::Result;

/// Hook entry point: one JSON event on stdin, zero exit on every path.
/// Stdout is written only for SessionStart and PreToolUse; a stray byte on
/// any other event is a protocol error on the host side, so all diagnostics
/// go to stderr.
pub async fn run() -> Result<()> {
    use std::io::Read;
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;

    let Ok(payload) = serde_json::from_str::<HookPayload>(&input) else {
        eprintln!("[laminark] dropping malformed hook payload");
        return Ok(());
    };

    let store = match Store::open(&models::db_path()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("[laminark] cannot open database: {e}");
            return Ok(());
        }
    };

    match dispatch(&store, &payload).await {
        Ok(Some(block)) => println!("{block}"),
        Ok(None) => {}
        Err(e) => eprintln!("[laminark] {} failed: {e}", payload.hook_event_name),
    }
    Ok(())
}

/// Route one event. The returned string, if any, is the context block for
/// the host to inject; only SessionStart and PreToolUse may produce one.
pub async fn dispatch(store: &Store, payload: &HookPayload) -> Result<Option<String>> {
    let project = models::project_hash(&payload.cwd);

    match payload.hook_event_name.as_str() {
        "SessionStart" => session::start(store, &project, &payload.session_id, &payload.cwd).await,
        "PreToolUse" => {
            if payload.tool_name.is_empty() || classify::is_self_reference(&payload.tool_name) {
                return Ok(None);
            }
            pretool::build(store, &project, &payload.tool_name, &payload.tool_input)
        }
        "PostToolUse" | "PostToolUseFailure" => {
            handle_post_tool_use(store, payload, &project).await?;
            Ok(None)
        }
        "SessionEnd" => {
            session::end(store, &payload.session_id)?;
            Ok(None)
        }
        "Stop" => {
            session::stop(store, &project, &payload.session_id)?;
            Ok(None)
        }
        other => {
            models::debug_log(&format!("ignoring unknown event {other:?}"));
            Ok(None)
        }
    }
}

/// The PostToolUse pipeline. Registry recording always happens; the
/// observation pipeline and the router are each contained so one failing
/// never takes down the other.
async fn handle_post_tool_use(store: &Store, payload: &HookPayload, project: &str) -> Result<()> {
    let tool = payload.tool_name.as_str();
    if tool.is_empty() {
        return Ok(());
    }
    let success = payload.tool_succeeded();

    if let Err(e) = store.record_or_create(tool, project, &payload.session_id, success) {
        eprintln!("[laminark] registry recording failed for {tool}: {e}");
    }

    // Recognised but never captured.
    if classify::is_self_reference(tool) {
        return Ok(());
    }

    // Exploration feeds the research buffer instead of the observation store.
    if research::is_exploration_tool(tool) {
        if success {
            if let Some(target) = research::exploration_target(tool, &payload.tool_input) {
                if let Err(e) = store.push_research(&payload.session_id, tool, &target) {
                    eprintln!("[laminark] research buffer append failed: {e}");
                }
            }
        }
        return Ok(());
    }

    if let Err(e) = capture_observation(store, payload, project, success).await {
        eprintln!("[laminark] observation pipeline failed for {tool}: {e}");
    }

    if classify::classify(tool).tool_type != ToolType::Builtin {
        if let Err(e) = router::evaluate(store, project, &payload.session_id) {
            eprintln!("[laminark] router evaluation failed: {e}");
        }
    }

    Ok(())
}

/// Summary -> privacy -> admission -> research footer -> save guard ->
/// store -> topic detection. Any stage either short-circuits cleanly
/// (filter rejection) or fails the whole capture, never a half-stored row.
async fn capture_observation(
    store: &Store,
    payload: &HookPayload,
    project: &str,
    success: bool,
) -> Result<()> {
    let tool = payload.tool_name.as_str();
    let Some(extracted) =
        summary::extract(tool, &payload.tool_input, &payload.tool_response, success)
    else {
        return Ok(());
    };

    let filter = privacy::filter();
    if let Some(path) = &extracted.file_path {
        if filter.is_excluded_path(path) {
            models::debug_log(&format!("excluded sensitive path {path}"));
            return Ok(());
        }
    }
    let mut content = filter.redact(&extracted.content);
    let title = extracted.title.as_deref().map(|t| filter.redact(t));

    if let admission::Admission::Reject(reason) =
        admission::admit(tool, &content, extracted.command.as_deref(), success)
    {
        models::debug_log(&format!("{tool} rejected: {reason}"));
        return Ok(());
    }

    // A change absorbs the exploration that led to it.
    if matches!(tool, "Write" | "Edit" | "MultiEdit" | "NotebookEdit") {
        if let Some(footer) = store.research_footer(&payload.session_id)? {
            content.push_str("\n\n");
            content.push_str(&footer);
        }
    }

    let vector = match EmbeddingClient::from_env() {
        Some(client) => client.embed(&content).await,
        None => None,
    };

    let decision = dedup::check(store, project, &content, vector.as_deref())?;
    if !decision.save {
        models::debug_log(&format!(
            "duplicate of {}",
            decision.duplicate_of.as_deref().unwrap_or("?")
        ));
        return Ok(());
    }

    let session_id = if payload.session_id.is_empty() {
        None
    } else {
        Some(payload.session_id.clone())
    };
    let id = store.insert_observation(&crate::observations::NewObservation {
        project: project.to_string(),
        session_id,
        kind: Some(extracted.kind),
        title,
        content,
        source: format!("hook:{tool}"),
    })?;

    if let Some(vector) = vector {
        store.set_embedding(&id, &vector)?;
        let config = topic::TopicConfig::load();
        if let Err(e) = topic::evaluate(store, &config, project, &payload.session_id, &id, &vector)
        {
            eprintln!("[laminark] topic detection failed: {e}");
        }
    }

    Ok(())
}
