use thiserror::Error;

#[derive(Debug, Error)]
pub enum TasklinkError {
    #[error("no project connected for {0}: run 'tasklink connect'")]
    NotConnected(String),

    #[error("authentication expired ({0}): run 'tasklink connect' to re-authenticate")]
    ReauthRequired(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("empty response from {0}")]
    EmptyResponse(String),

    #[error("invalid value '{value}' for {field}")]
    InvalidValue { field: &'static str, value: String },

    #[error("home directory not found: set HOME or TASKLINK_HOME")]
    HomeNotFound,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TasklinkError {
    /// HTTP status for remote API failures, `None` for everything else.
    pub fn status(&self) -> Option<u16> {
        match self {
            TasklinkError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TasklinkError>;
