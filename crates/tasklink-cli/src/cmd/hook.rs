//! Hook entry points. Both read one JSON payload from stdin and never fail
//! the host: task sync always exits 0, plan review always prints exactly one
//! decision.

use crate::cmd::review::{self, ReviewError};
use crate::context::resolve_cwd;
use anyhow::Context;
use clap::Subcommand;
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use tasklink_core::api::ApiClient;
use tasklink_core::hook::{HookInput, PermissionDecision};
use tasklink_core::paths;
use tasklink_core::plan;
use tasklink_core::store::Store;
use tasklink_core::types::{NewTask, TaskPatch, TaskStatus};

#[derive(Subcommand)]
pub enum HookSubcommand {
    /// Mirror TaskCreate / TaskUpdate / Task tool calls to the linked project
    TaskSync,
    /// Gate plan approval on a browser review
    PlanReview,
}

pub fn run(config_dir: Option<&Path>, cwd: Option<&Path>, subcmd: HookSubcommand) {
    let mut raw = String::new();
    let input = std::io::stdin().read_to_string(&mut raw).map(|_| raw);
    let store = Store::open(config_dir);

    match subcmd {
        HookSubcommand::TaskSync => match store {
            Ok(store) => task_sync(&store, cwd, input),
            Err(e) => tracing::warn!("task sync skipped: {e}"),
        },
        HookSubcommand::PlanReview => {
            let decision = match store {
                Ok(store) => plan_review(&store, cwd, input),
                Err(e) => {
                    tracing::warn!("plan review skipped, allowing: {e}");
                    PermissionDecision::Allow
                }
            };
            println!("{}", decision.to_hook_output());
        }
    }
}

/// Working folder of the hook: the payload's `cwd`, else `--cwd`, else the
/// process directory.
fn hook_cwd(input: &HookInput, fallback: Option<&Path>) -> PathBuf {
    resolve_cwd(input.cwd.as_deref().or(fallback))
}

fn log(store: &Store, message: &str) {
    if let Err(e) = store.append_log(message) {
        tracing::warn!("could not write sync log: {e}");
    }
}

// ---------------------------------------------------------------------------
// Task sync
// ---------------------------------------------------------------------------

pub fn task_sync(store: &Store, cwd: Option<&Path>, input: std::io::Result<String>) {
    if let Err(e) = sync(store, cwd, input) {
        tracing::warn!("task sync failed: {e:#}");
        log(store, &format!("task-sync error: {e:#}"));
    }
}

fn sync(store: &Store, cwd: Option<&Path>, input: std::io::Result<String>) -> anyhow::Result<()> {
    let raw = input.context("failed to read hook input")?;
    let input = HookInput::parse(&raw).context("invalid hook input")?;

    let tool = input.tool_name();
    if !matches!(tool, "TaskCreate" | "TaskUpdate" | "Task") {
        return Ok(());
    }
    let cwd = hook_cwd(&input, cwd);
    let Some(link) = store.find_link(&cwd) else {
        tracing::debug!("no project linked for {}; skipping {tool}", cwd.display());
        return Ok(());
    };
    let mut client = ApiClient::new(store, link)?;

    match tool {
        "TaskCreate" => sync_create(store, &mut client, &input),
        "TaskUpdate" => sync_update(store, &mut client, &input),
        _ => sync_subagent(store, &mut client, &input),
    }
}

fn sync_create(store: &Store, client: &mut ApiClient<'_>, input: &HookInput) -> anyhow::Result<()> {
    let Some(subject) = input.input_str("subject") else {
        log(store, "TaskCreate without subject; skipped");
        return Ok(());
    };
    let task = NewTask {
        description: input.input_str("description").map(str::to_string),
        ..NewTask::new(subject)
    };
    let created = client
        .create_task(&task)
        .with_context(|| format!("creating task '{subject}'"))?;

    match local_task_id(&input.tool_response) {
        Some(local) => {
            store.map_task(&local, &created.id)?;
            log(store, &format!("created {} for local task {local}", created.id));
        }
        None => log(
            store,
            &format!("created {} but the tool response carried no task id", created.id),
        ),
    }
    Ok(())
}

fn sync_update(store: &Store, client: &mut ApiClient<'_>, input: &HookInput) -> anyhow::Result<()> {
    let Some(local) = id_value(input.tool_input.get("taskId")) else {
        return Ok(());
    };
    let Some(remote) = store.remote_task_id(&local) else {
        tracing::debug!("local task {local} is not mapped; skipping update");
        return Ok(());
    };
    let status = input.input_str("status");

    if status == Some("deleted") {
        client
            .delete_task(&remote)
            .with_context(|| format!("deleting task {remote}"))?;
        store.unmap_task(&local)?;
        clear_active_if(store, &remote)?;
        log(store, &format!("deleted {remote} (local task {local})"));
        return Ok(());
    }

    let patch = TaskPatch {
        title: input.input_str("subject").map(str::to_string),
        description: input.input_str("description").map(str::to_string),
        project_status: status.and_then(TaskStatus::from_local),
        complexity: None,
    };
    if patch.is_empty() {
        tracing::debug!("update of {local} has nothing to sync");
        return Ok(());
    }
    client
        .update_task(&remote, &patch)
        .with_context(|| format!("updating task {remote}"))?;

    match patch.project_status {
        Some(TaskStatus::InProgress) => store.set_active_task(&remote)?,
        Some(TaskStatus::Done) => clear_active_if(store, &remote)?,
        _ => {}
    }
    log(store, &format!("updated {remote} (local task {local})"));
    Ok(())
}

fn sync_subagent(store: &Store, client: &mut ApiClient<'_>, input: &HookInput) -> anyhow::Result<()> {
    let Some(active) = store.active_task() else {
        return Ok(());
    };
    let mut body = format!(
        "Spawned sub-agent: {}",
        input.input_str("description").unwrap_or("(no description)")
    );
    if let Some(kind) = input.input_str("subagent_type") {
        body.push_str(&format!(" [{kind}]"));
    }
    client
        .add_comment(&active.task_id, &body)
        .with_context(|| format!("commenting on task {}", active.task_id))?;
    log(store, &format!("commented on {}", active.task_id));
    Ok(())
}

fn clear_active_if(store: &Store, remote: &str) -> tasklink_core::Result<()> {
    match store.active_task() {
        Some(active) if active.task_id == remote => store.clear_active_task(),
        _ => Ok(()),
    }
}

/// Local task id from a tool response: `task.id`, `id` or `taskId`.
fn local_task_id(response: &Value) -> Option<String> {
    [
        response.get("task").and_then(|t| t.get("id")),
        response.get("id"),
        response.get("taskId"),
    ]
    .into_iter()
    .find_map(id_value)
}

fn id_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Plan review
// ---------------------------------------------------------------------------

/// Fail-open boundary: every error allows.
pub fn plan_review(
    store: &Store,
    cwd: Option<&Path>,
    input: std::io::Result<String>,
) -> PermissionDecision {
    match review_pipeline(store, cwd, input) {
        Ok(decision) => decision,
        Err(e) => {
            tracing::warn!("plan review skipped, allowing: {e}");
            log(store, &format!("plan-review allowed without review: {e}"));
            PermissionDecision::Allow
        }
    }
}

fn review_pipeline(
    store: &Store,
    cwd: Option<&Path>,
    input: std::io::Result<String>,
) -> Result<PermissionDecision, ReviewError> {
    let raw = input.map_err(|e| ReviewError::Input(e.to_string()))?;
    let input = HookInput::parse(&raw).map_err(|e| ReviewError::Input(e.to_string()))?;

    let cwd = hook_cwd(&input, cwd);
    let link = store
        .find_link(&cwd)
        .ok_or_else(|| ReviewError::NotConnected(paths::folder_key(&cwd)))?;
    let plan = plan::resolve_plan(&input.tool_input, input.transcript_path.as_deref(), &cwd)
        .ok_or(ReviewError::NoPlan)?;
    tracing::info!("reviewing plan from {:?}", plan.source);

    let mut client = ApiClient::new(store, link)?;
    let review = review::submit_and_wait(
        &mut client,
        store,
        &plan.content,
        input.session_id.as_deref(),
    )?;
    Ok(review::to_permission(&review))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn local_id_lookup_order() {
        assert_eq!(
            local_task_id(&json!({ "task": { "id": "7" }, "id": "x" })).as_deref(),
            Some("7")
        );
        assert_eq!(local_task_id(&json!({ "id": 12 })).as_deref(), Some("12"));
        assert_eq!(local_task_id(&json!({ "taskId": "t3" })).as_deref(), Some("t3"));
        assert_eq!(local_task_id(&json!({ "task": {} })), None);
        assert_eq!(local_task_id(&Value::Null), None);
    }

    #[test]
    fn malformed_input_allows() {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path());
        let decision = plan_review(&store, Some(dir.path()), Ok("{not json".into()));
        assert!(decision.is_allow());
        let log = std::fs::read_to_string(store.log_path()).unwrap();
        assert!(log.contains("plan-review allowed"));
    }

    #[test]
    fn unreadable_input_allows() {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path());
        let err = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad utf-8");
        assert!(plan_review(&store, Some(dir.path()), Err(err)).is_allow());
    }

    #[test]
    fn sync_without_link_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path().join("cfg"));
        let payload = json!({
            "tool_name": "TaskCreate",
            "tool_input": { "subject": "Write tests" },
            "tool_response": { "task": { "id": "1" } },
            "cwd": dir.path(),
        });
        task_sync(&store, None, Ok(payload.to_string()));
        assert!(store.task_map().is_empty());
        assert!(!store.log_path().exists());
    }

    #[test]
    fn other_tools_are_ignored() {
        let dir = TempDir::new().unwrap();
        let store = Store::at(dir.path());
        let payload = json!({ "tool_name": "Bash", "tool_input": { "command": "ls" } });
        task_sync(&store, Some(dir.path()), Ok(payload.to_string()));
        assert!(!store.log_path().exists());
    }
}
