use crate::error::{CallbackError, Result};
use crate::CallbackParams;

fn param<'a>(params: &'a CallbackParams, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|n| params.get(*n))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.to_ascii_lowercase().as_str(),
        "false" | "0" | "no" | "off"
    )
}

// ---------------------------------------------------------------------------
// OAuth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub project_id: String,
    pub project_name: String,
}

/// Result of the browser consent step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthCallback {
    Connected(OAuthTokens),
    /// The user chose not to connect this folder.
    Skipped,
}

/// Token lifetime assumed when the service omits `expires_in`.
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Longest accepted token lifetime: ten years.
const MAX_EXPIRES_IN: i64 = 10 * 365 * 24 * 60 * 60;

impl OAuthCallback {
    pub fn from_params(params: &CallbackParams) -> Result<Self> {
        if params.get("skipped").is_some_and(|v| is_truthy(v)) {
            return Ok(OAuthCallback::Skipped);
        }
        let access_token = param(params, &["access_token", "accessToken"])
            .ok_or(CallbackError::MissingField("access_token"))?;
        let project_id = param(params, &["project_id", "projectId"])
            .ok_or(CallbackError::MissingField("project_id"))?;
        let expires_in = match param(params, &["expires_in", "expiresIn"]) {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|secs| (0..=MAX_EXPIRES_IN).contains(secs))
                .ok_or_else(|| CallbackError::InvalidField {
                    field: "expires_in",
                    value: raw.to_string(),
                })?,
            None => DEFAULT_EXPIRES_IN,
        };
        Ok(OAuthCallback::Connected(OAuthTokens {
            access_token: access_token.to_string(),
            refresh_token: param(params, &["refresh_token", "refreshToken"]).map(str::to_string),
            expires_in,
            project_id: project_id.to_string(),
            project_name: param(params, &["project_name", "projectName"])
                .unwrap_or(project_id)
                .to_string(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Plan review
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    /// Absent or unrecognized values allow.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("deny" | "denied" | "reject" | "rejected") => Decision::Deny,
            Some("allow" | "allowed") | None => Decision::Allow,
            Some(other) => {
                tracing::warn!("unknown review decision '{other}', allowing");
                Decision::Allow
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewDecision {
    pub decision: Decision,
    pub feedback: Option<String>,
}

impl ReviewDecision {
    pub fn from_params(params: &CallbackParams) -> Self {
        Self {
            decision: Decision::parse(params.get("decision").map(String::as_str)),
            feedback: param(params, &["feedback"]).map(str::to_string),
        }
    }
}
