/// Errors surfaced to the caller of a chat turn.
///
/// Malformed or unmatched sentinel tags are not errors; the tag filter
/// degrades gracefully on them.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The model stream failed or the network call errored.
    /// `partial` holds whatever raw text had been received for the turn.
    #[error("transport error: {message}")]
    Transport { message: String, partial: String },

    /// Missing or invalid credentials, model identifier or sampling settings.
    /// Always raised before any network call.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("turn cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        ChatError::Transport {
            message: message.into(),
            partial: String::new(),
        }
    }

    /// Raw output received before a transport failure, if any
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            ChatError::Transport { partial, .. } if !partial.is_empty() => Some(partial),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::transport(format!("request timed out: {}", err))
        } else if err.is_connect() {
            ChatError::transport(format!("connection failed: {}", err))
        } else {
            ChatError::transport(err.to_string())
        }
    }
}
