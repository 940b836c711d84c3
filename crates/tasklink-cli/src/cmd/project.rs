use crate::context::Ctx;
use crate::output::{print_json, relative_time};
use anyhow::Context;

pub fn whoami(ctx: &Ctx) -> anyhow::Result<()> {
    let mut client = ctx.client()?;
    let info = client
        .project_info()
        .context("failed to fetch project info")?;

    if ctx.json {
        return print_json(&info);
    }
    println!("Project: {} ({})", info.project_name, info.project_id);
    if info.scopes.is_empty() {
        println!("Scopes:  -");
    } else {
        println!("Scopes:  {}", info.scopes.join(", "));
    }
    Ok(())
}

/// Local link state for the working folder. Reads only the config store.
pub fn status(ctx: &Ctx) -> anyhow::Result<()> {
    let Some(resolved) = ctx.link() else {
        if ctx.json {
            print_json(&serde_json::json!({
                "connected": false,
                "cwd": ctx.cwd,
            }))?;
        } else {
            println!(
                "Not connected: {} has no linked project. Run 'tasklink connect'.",
                ctx.cwd.display()
            );
        }
        return Ok(());
    };
    let link = &resolved.link;
    let active_plan = ctx
        .store
        .active_plan()
        .filter(|p| p.project_id == link.project_id);
    let active_task = ctx.store.active_task();

    if ctx.json {
        return print_json(&serde_json::json!({
            "connected": true,
            "folder": resolved.folder,
            "projectId": link.project_id,
            "projectName": link.project_name,
            "baseUrl": link.base_url,
            "expiresAt": link.expires_at,
            "refreshable": link.refresh_token.is_some(),
            "activePlan": active_plan.as_ref().map(|p| &p.plan_id),
            "activeTask": active_task.as_ref().map(|t| &t.task_id),
        }));
    }

    println!("Folder:      {}", resolved.folder);
    println!("Project:     {} ({})", link.project_name, link.project_id);
    println!("Service:     {}", link.base_url);
    let expiry = if link.expires_at <= chrono::Utc::now() {
        format!("expired {}", relative_time(link.expires_at))
    } else {
        format!("expires {}", relative_time(link.expires_at))
    };
    println!("Token:       {expiry}");
    if link.refresh_token.is_none() {
        println!("             no refresh token; run 'tasklink upgrade'");
    }
    println!(
        "Active plan: {}",
        active_plan.as_ref().map_or("-", |p| p.plan_id.as_str())
    );
    println!(
        "Active task: {}",
        active_task.as_ref().map_or("-", |t| t.task_id.as_str())
    );
    Ok(())
}
