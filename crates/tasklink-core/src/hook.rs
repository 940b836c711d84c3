use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Payload the host runtime writes to a hook's stdin. Only the fields
/// tasklink reads are modeled; everything is optional so a partial payload
/// still parses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub tool_response: Value,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<PathBuf>,
}

impl HookInput {
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn tool_name(&self) -> &str {
        self.tool_name.as_deref().unwrap_or("")
    }

    /// String field of `tool_input`, if present and non-empty.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        non_empty_str(&self.tool_input, key)
    }
}

pub fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Permission decision emitted by the plan review hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "behavior", rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow,
    Deny { message: String },
}

impl PermissionDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, PermissionDecision::Allow)
    }

    /// Wrap in the `hookSpecificOutput` envelope the host expects.
    pub fn to_hook_output(&self) -> Value {
        serde_json::json!({
            "hookSpecificOutput": {
                "hookEventName": "PermissionRequest",
                "decision": self,
            }
        })
    }
}
