use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// A record could not be written or read as JSON.
    #[error("allocation event encoding failed: {0}")]
    Encode(String),

    #[error("unknown allocation event action '{0}'")]
    UnknownAction(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Encode(err.to_string())
    }
}
