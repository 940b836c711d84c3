use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("no browser callback received within {0:?}")]
    Timeout(Duration),

    #[error("callback server stopped before a result arrived")]
    Closed,

    #[error("callback is missing '{0}'")]
    MissingField(&'static str),

    #[error("callback field '{field}' has invalid value '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CallbackError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallbackError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, CallbackError>;
