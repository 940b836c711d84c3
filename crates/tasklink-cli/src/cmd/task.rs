use crate::context::Ctx;
use crate::output::print_json;
use anyhow::Context;
use tasklink_core::types::{Complexity, NewTask, Task, TaskPatch, TaskStatus};

pub fn list(ctx: &Ctx, status: Option<TaskStatus>) -> anyhow::Result<()> {
    let mut client = ctx.client()?;
    let tasks = client.list_tasks(status).context("failed to list tasks")?;

    if ctx.json {
        return print_json(&tasks);
    }
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    for line in task_lines(&tasks) {
        println!("{line}");
    }
    Ok(())
}

pub fn create(
    ctx: &Ctx,
    title: &str,
    description: Option<String>,
    complexity: Option<Complexity>,
    status: Option<TaskStatus>,
) -> anyhow::Result<()> {
    if title.trim().is_empty() {
        anyhow::bail!("task title must not be empty");
    }
    let mut client = ctx.client()?;
    let task = NewTask {
        description,
        complexity,
        project_status: status.unwrap_or_default(),
        ..NewTask::new(title)
    };
    let created = client.create_task(&task).context("failed to create task")?;

    if ctx.json {
        print_json(&created)?;
    } else {
        println!("Created task {}: {}", created.id, created.title);
    }
    Ok(())
}

pub fn update(ctx: &Ctx, task_id: &str, patch: TaskPatch) -> anyhow::Result<()> {
    if patch.is_empty() {
        anyhow::bail!(
            "nothing to update: pass at least one of --title, --description, --status, --complexity"
        );
    }
    let mut client = ctx.client()?;
    let updated = client
        .update_task(task_id, &patch)
        .with_context(|| format!("failed to update task '{task_id}'"))?;

    if ctx.json {
        match updated {
            Some(task) => print_json(&task)?,
            None => print_json(&serde_json::json!({ "id": task_id, "updated": true }))?,
        }
    } else {
        println!("Updated task {task_id}");
    }
    Ok(())
}

pub fn get(ctx: &Ctx, task_id: &str) -> anyhow::Result<()> {
    let mut client = ctx.client()?;
    let task = client
        .get_task(task_id)
        .with_context(|| format!("task '{task_id}' not found"))?;

    if ctx.json {
        return print_json(&task);
    }
    print_task(&task);
    Ok(())
}

/// Start work on a task and make it the target for sub-agent comments.
pub fn claim(ctx: &Ctx, task_id: &str) -> anyhow::Result<()> {
    let mut client = ctx.client()?;
    let patch = TaskPatch {
        project_status: Some(TaskStatus::InProgress),
        ..TaskPatch::default()
    };
    client
        .update_task(task_id, &patch)
        .with_context(|| format!("failed to claim task '{task_id}'"))?;
    ctx.store
        .set_active_task(task_id)
        .context("failed to record active task")?;

    if ctx.json {
        print_json(&serde_json::json!({ "id": task_id, "status": TaskStatus::InProgress }))?;
    } else {
        println!("Claimed task {task_id}");
    }
    Ok(())
}

pub fn comment(ctx: &Ctx, task_id: &str, body: &str) -> anyhow::Result<()> {
    if body.trim().is_empty() {
        anyhow::bail!("comment body must not be empty");
    }
    let mut client = ctx.client()?;
    let created = client
        .add_comment(task_id, body)
        .with_context(|| format!("failed to comment on task '{task_id}'"))?;

    if ctx.json {
        let id = created.and_then(|c| c.id);
        print_json(&serde_json::json!({ "taskId": task_id, "commentId": id, "body": body }))?;
    } else {
        println!("Commented on task {task_id}");
    }
    Ok(())
}

/// One line per task, id/status/complexity aligned and the title left ragged.
fn task_lines(tasks: &[Task]) -> Vec<String> {
    let status = |t: &Task| t.project_status.clone().unwrap_or_else(|| "-".into());
    let complexity = |t: &Task| t.complexity.clone().unwrap_or_else(|| "-".into());

    let id_w = tasks.iter().map(|t| t.id.chars().count()).fold(2, usize::max);
    let status_w = tasks.iter().map(|t| status(t).chars().count()).fold(6, usize::max);
    let cx_w = tasks.iter().map(|t| complexity(t).chars().count()).fold(10, usize::max);

    let mut lines = Vec::with_capacity(tasks.len() + 2);
    lines.push(format!(
        "{:<id_w$}  {:<status_w$}  {:<cx_w$}  TITLE",
        "ID", "STATUS", "COMPLEXITY"
    ));
    lines.push("-".repeat(id_w + status_w + cx_w + 11));
    for t in tasks {
        lines.push(format!(
            "{:<id_w$}  {:<status_w$}  {:<cx_w$}  {}",
            t.id,
            status(t),
            complexity(t),
            t.title
        ));
    }
    lines
}

fn print_task(task: &Task) {
    println!("{}: {}", task.id, task.title);
    println!(
        "  status:     {}",
        task.project_status.as_deref().unwrap_or("-")
    );
    println!("  complexity: {}", task.complexity.as_deref().unwrap_or("-"));
    if let Some(assignee) = &task.assignee {
        println!("  assignee:   {assignee}");
    }
    if let Some(desc) = task.description.as_deref().filter(|d| !d.trim().is_empty()) {
        println!();
        println!("{desc}");
    }
}
