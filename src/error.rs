use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

/// Everything that can abort a turn.
///
/// None of these are recovered locally: the turn stops, the error is shown,
/// and the session log keeps whatever was appended before the failure.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The model stream produced an event sequence the decoder cannot accept.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("tool input for block {index} is not valid JSON: {source}")]
    MalformedToolInput {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("model requested unknown tool `{0}`")]
    UnknownTool(String),

    #[error("invalid input for tool `{tool}`: {message}")]
    InvalidToolInput { tool: String, message: String },

    #[error("search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("model stream aborted ({kind}): {message}")]
    StreamAborted { kind: String, message: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("could not decode stream payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("gave up after {0} model calls; the model kept requesting tools")]
    IterationLimit(usize),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChatError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}
