//! Plan review: upload a plan, send a human to the review page, and block
//! until the page calls back with a decision.

use crate::browser;
use crate::context::Ctx;
use crate::output::print_json;
use anyhow::Context;
use chrono::Utc;
use reqwest::Url;
use std::path::Path;
use std::time::Duration;
use tasklink_core::api::ApiClient;
use tasklink_core::hook::PermissionDecision;
use tasklink_core::plan::{self, ResolvedPlan};
use tasklink_core::store::{ActivePlan, Store};
use tasklink_core::types::{NewPlan, Plan};
use tasklink_core::TasklinkError;
use tasklink_server::{
    block_on_callback, CallbackError, CallbackListener, Decision, ReviewDecision,
    PLAN_REVIEW_TIMEOUT,
};

/// Overrides the review wait, in seconds.
pub const REVIEW_TIMEOUT_ENV: &str = "TASKLINK_REVIEW_TIMEOUT_SECS";

/// Message sent back to the agent when a reviewer denies without feedback.
pub const DEFAULT_DENY_MESSAGE: &str = "Plan changes requested.";

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("unreadable hook input: {0}")]
    Input(String),

    #[error("no project connected for {0}")]
    NotConnected(String),

    #[error("no plan found to review")]
    NoPlan,

    #[error(transparent)]
    Api(#[from] TasklinkError),

    #[error(transparent)]
    Callback(#[from] CallbackError),

    #[error("invalid review URL: {0}")]
    Url(String),
}

pub fn review_timeout() -> Duration {
    std::env::var(REVIEW_TIMEOUT_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(PLAN_REVIEW_TIMEOUT)
}

pub fn to_permission(review: &ReviewDecision) -> PermissionDecision {
    match review.decision {
        Decision::Allow => PermissionDecision::Allow,
        Decision::Deny => PermissionDecision::Deny {
            message: review
                .feedback
                .clone()
                .unwrap_or_else(|| DEFAULT_DENY_MESSAGE.to_string()),
        },
    }
}

/// Upload `content`, open the review page and wait for the reviewer.
///
/// An allowed plan clears the ActivePlan; a denied one keeps it so the
/// revised plan is uploaded as a new version.
pub fn submit_and_wait(
    client: &mut ApiClient<'_>,
    store: &Store,
    content: &str,
    session_id: Option<&str>,
) -> Result<ReviewDecision, ReviewError> {
    let plan = upload(client, store, content, session_id)?;

    let listener = CallbackListener::bind()?;
    let url = review_url(client, &plan, &listener.callback_url())?;
    browser::open_url(url.as_str());

    let params = block_on_callback(listener, review_timeout())?;
    let review = ReviewDecision::from_params(&params);
    tracing::info!("plan {} reviewed: {:?}", plan.id, review.decision);

    if review.decision == Decision::Allow {
        store.clear_active_plan()?;
    }
    Ok(review)
}

/// Add a version to this project's ActivePlan, or create a new plan. An
/// ActivePlan the service no longer knows is dropped and replaced.
fn upload(
    client: &mut ApiClient<'_>,
    store: &Store,
    content: &str,
    session_id: Option<&str>,
) -> Result<Plan, ReviewError> {
    let active = store
        .active_plan()
        .filter(|p| p.project_id == client.project_id());

    let plan = match active {
        Some(active) => match client.add_plan_version(&active.plan_id, content) {
            Ok(plan) => {
                tracing::info!("uploaded new version of plan {}", plan.id);
                plan
            }
            Err(e) if e.status() == Some(404) => {
                tracing::warn!("plan {} no longer exists; creating a new one", active.plan_id);
                create(client, content, session_id)?
            }
            Err(e) => return Err(e.into()),
        },
        None => create(client, content, session_id)?,
    };

    store.set_active_plan(&ActivePlan {
        plan_id: plan.id.clone(),
        project_id: client.project_id().to_string(),
        session_id: session_id.map(str::to_string),
        updated_at: Utc::now(),
    })?;
    Ok(plan)
}

fn create(
    client: &mut ApiClient<'_>,
    content: &str,
    session_id: Option<&str>,
) -> Result<Plan, ReviewError> {
    let plan = client.create_plan(&NewPlan {
        title: plan::plan_title(content),
        content: content.to_string(),
        session_id: session_id.map(str::to_string),
    })?;
    tracing::info!("created plan {}", plan.id);
    Ok(plan)
}

fn review_url(client: &ApiClient<'_>, plan: &Plan, callback: &str) -> Result<Url, ReviewError> {
    let link = client.link();
    let page = match plan.review_url.as_deref() {
        Some(given) => {
            let base = Url::parse(&format!("{}/", link.base()))
                .map_err(|e| ReviewError::Url(e.to_string()))?;
            base.join(given)
        }
        None => Url::parse(&format!(
            "{}/projects/{}/plans/{}/review",
            link.base(),
            link.project_id,
            plan.id
        )),
    };
    let mut url = page.map_err(|e| ReviewError::Url(e.to_string()))?;
    url.query_pairs_mut().append_pair("callback", callback);
    Ok(url)
}

// ---------------------------------------------------------------------------
// `tasklink review-plan`
// ---------------------------------------------------------------------------

pub fn run(ctx: &Ctx, file: Option<&Path>, transcript: Option<&Path>) -> anyhow::Result<()> {
    let resolved = match file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            if content.trim().is_empty() {
                anyhow::bail!("{} is empty", path.display());
            }
            ResolvedPlan {
                content,
                source: plan::PlanSource::File(path.to_path_buf()),
            }
        }
        None => plan::resolve_plan(&serde_json::Value::Null, transcript, &ctx.cwd)
            .context("no plan found: pass --file or write a plan.md")?,
    };
    tracing::info!("reviewing plan from {:?}", resolved.source);

    let mut client = ctx.client()?;
    let review = match submit_and_wait(&mut client, &ctx.store, &resolved.content, None) {
        Ok(review) => review,
        Err(ReviewError::Callback(e)) if e.is_timeout() => {
            anyhow::bail!("review timed out: {e}");
        }
        Err(e) => return Err(anyhow::Error::new(e).context("plan review failed")),
    };

    let decision = to_permission(&review);
    if ctx.json {
        return print_json(&decision);
    }
    match decision {
        PermissionDecision::Allow => println!("Plan approved."),
        PermissionDecision::Deny { message } => println!("Changes requested: {message}"),
    }
    Ok(())
}
