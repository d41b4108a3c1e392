use crate::session::TranscriptEntry;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreateResponse {
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub entries: Vec<TranscriptEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialKind {
    Text,
    ToolInput,
    Thinking,
}

/// Events pushed to browsers following a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Accumulated content of a block still being streamed. Replaces any
    /// earlier partial with the same index.
    Partial {
        index: usize,
        kind: PartialKind,
        text: String,
    },
    ToolCall {
        name: String,
        input: serde_json::Value,
    },
    /// Settled assistant text.
    Assistant { text: String },
    Error { message: String },
    Done,
}
