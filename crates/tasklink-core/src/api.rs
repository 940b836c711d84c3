//! Authenticated client for the remote project service.
//!
//! Every call first checks the stored token. When it expires within
//! [`REFRESH_WINDOW_MINUTES`] the client exchanges the refresh token at
//! `/oauth/token`, persists the new credentials into the folder's
//! [`ProjectLink`], and only then issues the data request. A failed refresh
//! aborts the call with [`TasklinkError::ReauthRequired`]. Requests are
//! attempted exactly once.

use crate::error::{Result, TasklinkError};
use crate::store::{expiry_after, ProjectLink, ResolvedLink, Store};
use crate::types::{Comment, NewPlan, NewTask, Plan, ProjectInfo, Task, TaskPatch, TaskStatus};
use chrono::{Duration, Utc};
use reqwest::blocking::Client;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tokens expiring within this many minutes are refreshed before use.
pub const REFRESH_WINDOW_MINUTES: i64 = 5;

const USER_AGENT: &str = concat!("tasklink/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Token exchange
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// Client bound to one connected folder.
pub struct ApiClient<'a> {
    store: &'a Store,
    folder: String,
    link: ProjectLink,
    http: Client,
}

impl<'a> ApiClient<'a> {
    pub fn new(store: &'a Store, resolved: ResolvedLink) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            store,
            folder: resolved.folder,
            link: resolved.link,
            http,
        })
    }

    pub fn link(&self) -> &ProjectLink {
        &self.link
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn project_id(&self) -> &str {
        &self.link.project_id
    }

    /// Refresh the access token if it expires within the refresh window.
    /// Returns whether a refresh happened.
    pub fn ensure_fresh_token(&mut self) -> Result<bool> {
        let window = Duration::minutes(REFRESH_WINDOW_MINUTES);
        if !self.link.expires_within(window, Utc::now()) {
            return Ok(false);
        }
        self.refresh()?;
        Ok(true)
    }

    /// Exchange the refresh token and persist the new credentials.
    pub fn refresh(&mut self) -> Result<()> {
        let Some(refresh_token) = self.link.refresh_token.clone() else {
            return Err(TasklinkError::ReauthRequired(
                "no refresh token stored".to_string(),
            ));
        };
        tracing::debug!("refreshing access token for {}", self.folder);

        let url = format!("{}/oauth/token", self.link.base());
        let response = self
            .http
            .post(&url)
            .json(&RefreshRequest {
                grant_type: "refresh_token",
                refresh_token: &refresh_token,
            })
            .send()
            .map_err(|e| TasklinkError::ReauthRequired(format!("token refresh failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TasklinkError::ReauthRequired(format!(
                "token refresh rejected ({}): {}",
                status.as_u16(),
                body.trim()
            )));
        }
        let tokens: TokenResponse = response
            .json()
            .map_err(|e| TasklinkError::ReauthRequired(format!("bad token response: {e}")))?;

        let expires_at = expiry_after(Utc::now(), tokens.expires_in).ok_or_else(|| {
            TasklinkError::ReauthRequired(format!(
                "token lifetime out of range: {}",
                tokens.expires_in
            ))
        })?;

        self.link.access_token = tokens.access_token;
        if let Some(rt) = tokens.refresh_token {
            self.link.refresh_token = Some(rt);
        }
        self.link.expires_at = expires_at;
        self.store.save_link(&self.folder, &self.link)?;
        tracing::info!("refreshed access token for {}", self.link.project_name);
        Ok(())
    }

    /// Service URL for `segments` appended to the base URL. Each segment is
    /// percent-encoded, so an id can never address a different route.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let invalid = || TasklinkError::InvalidValue {
            field: "baseUrl",
            value: self.link.base_url.clone(),
        };
        let mut url = Url::parse(self.link.base()).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Issue one authenticated request. `Ok(None)` for 204 or an empty body.
    pub fn request(
        &mut self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        self.ensure_fresh_token()?;

        tracing::debug!("{method} {url}");
        let mut req = self
            .http
            .request(method, url)
            .bearer_auth(&self.link.access_token);
        if let Some(b) = body {
            req = req.json(b);
        }
        let response = req.send()?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let text = response.text()?;
        if !status.is_success() {
            return Err(TasklinkError::Api {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn call<T: DeserializeOwned>(
        &mut self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        wrapper: &str,
    ) -> Result<T> {
        let path = url.path().to_string();
        let value = self
            .request(method, url, body)?
            .ok_or(TasklinkError::EmptyResponse(path))?;
        Ok(serde_json::from_value(unwrap_envelope(value, wrapper))?)
    }

    // -- typed operations ---------------------------------------------------

    fn project_tasks(&self) -> Result<Url> {
        self.endpoint(&["api", "projects", &self.link.project_id, "tasks"])
    }

    fn task(&self, task_id: &str) -> Result<Url> {
        self.endpoint(&["api", "tasks", task_id])
    }

    pub fn project_info(&mut self) -> Result<ProjectInfo> {
        let url = self.endpoint(&["api", "project-key", "info"])?;
        self.call(Method::GET, url, None, "project")
    }

    pub fn list_tasks(&mut self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let mut url = self.project_tasks()?;
        if let Some(s) = status {
            url.query_pairs_mut().append_pair("status", &s.to_string());
        }
        self.call(Method::GET, url, None, "tasks")
    }

    pub fn get_task(&mut self, task_id: &str) -> Result<Task> {
        let url = self.task(task_id)?;
        self.call(Method::GET, url, None, "task")
    }

    pub fn create_task(&mut self, task: &NewTask) -> Result<Task> {
        let url = self.project_tasks()?;
        let body = serde_json::to_value(task)?;
        self.call(Method::POST, url, Some(&body), "task")
    }

    /// Apply `patch`. Returns the updated task when the service echoes it.
    pub fn update_task(&mut self, task_id: &str, patch: &TaskPatch) -> Result<Option<Task>> {
        let url = self.task(task_id)?;
        let body = serde_json::to_value(patch)?;
        let value = self.request(Method::PATCH, url, Some(&body))?;
        Ok(value.and_then(|v| serde_json::from_value(unwrap_envelope(v, "task")).ok()))
    }

    pub fn delete_task(&mut self, task_id: &str) -> Result<()> {
        let url = self.task(task_id)?;
        self.request(Method::DELETE, url, None)?;
        Ok(())
    }

    pub fn add_comment(&mut self, task_id: &str, body: &str) -> Result<Option<Comment>> {
        let url = self.endpoint(&["api", "tasks", task_id, "comments"])?;
        let payload = serde_json::json!({ "body": body });
        let value = self.request(Method::POST, url, Some(&payload))?;
        Ok(value.and_then(|v| serde_json::from_value(unwrap_envelope(v, "comment")).ok()))
    }

    pub fn create_plan(&mut self, plan: &NewPlan) -> Result<Plan> {
        let url = self.endpoint(&["api", "projects", &self.link.project_id, "plans"])?;
        let body = serde_json::to_value(plan)?;
        self.call(Method::POST, url, Some(&body), "plan")
    }

    /// Upload `content` as a new version of an existing plan.
    pub fn add_plan_version(&mut self, plan_id: &str, content: &str) -> Result<Plan> {
        let url = self.endpoint(&["api", "plans", plan_id, "versions"])?;
        let body = serde_json::json!({ "content": content });
        match self.request(Method::PUT, url, Some(&body))? {
            Some(v) => Ok(serde_json::from_value(unwrap_envelope(v, "plan"))
                .unwrap_or_else(|_| plan_stub(plan_id))),
            None => Ok(plan_stub(plan_id)),
        }
    }
}

fn plan_stub(plan_id: &str) -> Plan {
    Plan {
        id: plan_id.to_string(),
        version: None,
        review_url: None,
    }
}

/// Responses come either bare or wrapped as `{ "<key>": ... }`.
fn unwrap_envelope(value: Value, key: &str) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key(key) => {
            map.remove(key).unwrap_or(Value::Null)
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
