use crate::browser;
use crate::context::Ctx;
use crate::output::print_json;
use anyhow::Context;
use chrono::Utc;
use reqwest::Url;
use std::path::Path;
use tasklink_core::paths;
use tasklink_core::store::{expiry_after, ProjectLink, Store};
use tasklink_server::{block_on_callback, CallbackListener, OAuthCallback, OAUTH_TIMEOUT};

/// Run the browser OAuth flow for `folder` against `base_url`.
///
/// Returns the saved link, or `None` when the user skipped connecting this
/// folder in the browser.
pub fn authorize(store: &Store, folder: &str, base_url: &str) -> anyhow::Result<Option<ProjectLink>> {
    let base = base_url.trim_end_matches('/');
    let listener = CallbackListener::bind().context("failed to bind local callback port")?;

    let folder_name = Path::new(folder)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| folder.to_string());
    let mut url = Url::parse(&format!("{base}/oauth/authorize"))
        .with_context(|| format!("invalid base URL '{base_url}'"))?;
    url.query_pairs_mut()
        .append_pair("redirect_uri", &listener.callback_url())
        .append_pair("folder", &folder_name);

    browser::open_url(url.as_str());
    let params = block_on_callback(listener, OAUTH_TIMEOUT)
        .context("browser authorization did not complete")?;

    match OAuthCallback::from_params(&params).context("invalid authorization callback")? {
        OAuthCallback::Skipped => {
            tracing::info!("user skipped connecting {folder}");
            Ok(None)
        }
        OAuthCallback::Connected(tokens) => {
            let expires_at = expiry_after(Utc::now(), tokens.expires_in).with_context(|| {
                format!("token lifetime out of range: {}", tokens.expires_in)
            })?;
            let link = ProjectLink {
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                expires_at,
                project_id: tokens.project_id,
                project_name: tokens.project_name,
                base_url: base.to_string(),
            };
            store
                .save_link(folder, &link)
                .context("failed to save project link")?;
            tracing::info!("connected {folder} to project {}", link.project_id);
            Ok(Some(link))
        }
    }
}

pub fn connect(ctx: &Ctx, base_url: Option<&str>) -> anyhow::Result<()> {
    let folder = paths::folder_key(&ctx.cwd);
    let base_url = base_url
        .map(str::to_string)
        .unwrap_or_else(paths::default_base_url);

    if let Some(existing) = ctx.store.links().get(&folder) {
        eprintln!(
            "{folder} is already connected to '{}'; re-authorizing.",
            existing.project_name
        );
    }

    let outcome = authorize(&ctx.store, &folder, &base_url)?;
    report(ctx, &folder, outcome.as_ref())
}

/// Re-authorize the linked folder with its stored base URL.
pub fn upgrade(ctx: &Ctx) -> anyhow::Result<()> {
    let resolved = ctx
        .link()
        .with_context(|| format!("no project connected for {}", ctx.cwd.display()))?;
    eprintln!(
        "Re-authorizing {} ({})",
        resolved.folder, resolved.link.project_name
    );
    let outcome = authorize(&ctx.store, &resolved.folder, &resolved.link.base_url)?;
    if outcome.is_none() {
        anyhow::bail!("authorization skipped; existing credentials left unchanged");
    }
    report(ctx, &resolved.folder, outcome.as_ref())
}

pub fn disconnect(ctx: &Ctx) -> anyhow::Result<()> {
    let resolved = ctx
        .link()
        .with_context(|| format!("no project connected for {}", ctx.cwd.display()))?;
    ctx.store
        .remove_link(&resolved.folder)
        .context("failed to update projects.json")?;

    if ctx.json {
        print_json(&serde_json::json!({
            "folder": resolved.folder,
            "projectId": resolved.link.project_id,
            "disconnected": true,
        }))?;
    } else {
        println!(
            "Disconnected {} from '{}'",
            resolved.folder, resolved.link.project_name
        );
    }
    Ok(())
}

fn report(ctx: &Ctx, folder: &str, link: Option<&ProjectLink>) -> anyhow::Result<()> {
    if ctx.json {
        return print_json(&serde_json::json!({
            "folder": folder,
            "connected": link.is_some(),
            "projectId": link.map(|l| l.project_id.as_str()),
            "projectName": link.map(|l| l.project_name.as_str()),
        }));
    }
    match link {
        Some(l) => println!("Connected {folder} to '{}' ({})", l.project_name, l.project_id),
        None => println!("Skipped: {folder} was left unconnected."),
    }
    Ok(())
}
