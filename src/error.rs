use thiserror::Error;

/// Errors raised by the REST client, the command channel and the views
/// built on top of them.
#[derive(Error, Debug)]
pub enum ClientError {
    /// A per-target operation was attempted with no target selected.
    #[error("no target selected")]
    NoTarget,

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Terminal non-2xx response.
    #[error("request failed (status {status}): {message}")]
    Http { status: u16, message: String },

    /// The target rejected the credentials supplied after a challenge.
    #[error("target authentication failed after retry")]
    AuthRejected,

    /// Re-authentication was abandoned or did not complete in time.
    #[error("target authentication was not completed")]
    AuthAbandoned,

    /// Rejected client-side before any request was sent.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("command channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// HTTP or command status carried by this error, if any.
    pub fn status(&self) -> Option<i64> {
        match self {
            Self::Http { status, .. } => Some(i64::from(*status)),
            Self::Channel(ChannelError::Command { status, .. }) => Some(i64::from(*status)),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("command channel is not connected")]
    NotReady,

    #[error("command channel closed")]
    Closed,

    #[error("no reply to '{0}' within the timeout")]
    Timeout(String),

    /// A reply arrived with a non-zero status.
    #[error("command failed (status {status}): {message}")]
    Command { status: i32, message: String },
}
