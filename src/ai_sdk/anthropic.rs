use crate::decoder::{BlockStart, Delta, StreamEvent};
use crate::error::{ChatError, ChatResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub(crate) struct MessageRequest {
    pub(crate) model: String,
    pub(crate) max_tokens: u32,
    pub(crate) messages: Vec<Message>,
    pub(crate) tools: Vec<ToolDefinitionApi>,
    pub(crate) stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) thinking: Option<ThinkingConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ThinkingConfig {
    #[serde(rename = "type")]
    pub(crate) kind: &'static str,
    pub(crate) budget_tokens: u32,
}

impl ThinkingConfig {
    pub(crate) fn enabled(budget_tokens: u32) -> Self {
        Self {
            kind: "enabled",
            budget_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub(crate) fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub(crate) fn user_text(text: String) -> Self {
        Self::new(Role::User, vec![ContentBlock::Text { text }])
    }

    /// A user-role message answering a single tool invocation.
    pub(crate) fn tool_result(tool_use_id: String, text: String) -> Self {
        Self::new(
            Role::User,
            vec![ContentBlock::ToolResult {
                tool_use_id,
                content: vec![ToolResultContent::Text { text }],
            }],
        )
    }

    pub(crate) fn texts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Tool invocations in completion order.
    pub(crate) fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<ToolResultContent>,
    },
    /// Reasoning output. Kept in history so it can be sent back, never shown.
    Thinking {
        thinking: String,
        signature: String,
    },
    /// Encrypted reasoning; returned to the API verbatim.
    RedactedThinking {
        data: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContent {
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ToolCall {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ToolDefinitionApi {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) input_schema: serde_json::Value,
}

// Server-sent event payloads, as the Messages API emits them.

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ApiStreamEvent {
    MessageStart {
        message: MessageStartData,
    },
    ContentBlockStart {
        index: usize,
        content_block: ApiBlockStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: ApiDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaData,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiErrorBody,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageStartData {
    pub(crate) role: Role,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ApiBlockStart {
    Text,
    ToolUse { id: String, name: String },
    Thinking,
    RedactedThinking { data: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ApiDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageDeltaData {
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) message: String,
}

/// Folds wire events into decoder events.
///
/// The API reports the stop reason in `message_delta` and closes with a bare
/// `message_stop`; the translator carries the reason over so the decoder sees
/// a single `MessageStop { stop_reason }`.
#[derive(Debug, Default)]
pub(crate) struct EventTranslator {
    stop_reason: Option<String>,
}

impl EventTranslator {
    pub(crate) fn translate(&mut self, event: ApiStreamEvent) -> ChatResult<Option<StreamEvent>> {
        let event = match event {
            ApiStreamEvent::MessageStart { message } => StreamEvent::MessageStart { role: message.role },
            ApiStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let block = match content_block {
                    ApiBlockStart::Text => BlockStart::Text,
                    ApiBlockStart::ToolUse { id, name } => BlockStart::ToolUse { id, name },
                    ApiBlockStart::Thinking => BlockStart::Thinking,
                    ApiBlockStart::RedactedThinking { data } => BlockStart::RedactedThinking { data },
                    ApiBlockStart::Unknown => {
                        return Err(ChatError::protocol(format!(
                            "unsupported content block kind at index {index}"
                        )));
                    }
                };
                StreamEvent::ContentBlockStart { index, block }
            }
            ApiStreamEvent::ContentBlockDelta { index, delta } => {
                let delta = match delta {
                    ApiDelta::TextDelta { text } => Delta::Text(text),
                    ApiDelta::InputJsonDelta { partial_json } => Delta::ToolInput(partial_json),
                    ApiDelta::ThinkingDelta { thinking } => Delta::Thinking(thinking),
                    ApiDelta::SignatureDelta { signature } => Delta::Signature(signature),
                    ApiDelta::Unknown => return Ok(None),
                };
                StreamEvent::ContentBlockDelta { index, delta }
            }
            ApiStreamEvent::ContentBlockStop { index } => StreamEvent::ContentBlockStop { index },
            ApiStreamEvent::MessageDelta { delta } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                return Ok(None);
            }
            ApiStreamEvent::MessageStop => StreamEvent::MessageStop {
                stop_reason: self.stop_reason.take(),
            },
            ApiStreamEvent::Ping | ApiStreamEvent::Unknown => return Ok(None),
            ApiStreamEvent::Error { error } => {
                return Err(ChatError::StreamAborted {
                    kind: error.kind,
                    message: error.message,
                });
            }
        };
        Ok(Some(event))
    }

    pub(crate) fn translate_payload(&mut self, data: &str) -> ChatResult<Option<StreamEvent>> {
        let event: ApiStreamEvent = serde_json::from_str(data)?;
        self.translate(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_result_message_serializes_as_api_content() {
        let message = Message::tool_result("toolu_1".to_string(), "{\"a\":1}".to_string());
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": "toolu_1",
                    "content": [{"type": "text", "text": "{\"a\":1}"}]
                }]
            })
        );
    }

    #[test]
    fn tool_calls_keep_completion_order_and_skip_text() {
        let message = Message::new(
            Role::Assistant,
            vec![
                ContentBlock::ToolUse {
                    id: "b".to_string(),
                    name: "web_search".to_string(),
                    input: json!({"query": "second"}),
                },
                ContentBlock::Text {
                    text: "hmm".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "a".to_string(),
                    name: "web_search".to_string(),
                    input: json!({"query": "first"}),
                },
            ],
        );

        let ids: Vec<_> = message.tool_calls().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(message.texts().collect::<Vec<_>>(), vec!["hmm"]);
    }

    #[test]
    fn request_omits_thinking_unless_configured() {
        let mut request = MessageRequest {
            model: "m".to_string(),
            max_tokens: 10,
            messages: vec![Message::user_text("hi".to_string())],
            tools: Vec::new(),
            stream: true,
            thinking: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("thinking").is_none());
        assert_eq!(value["stream"], json!(true));

        request.thinking = Some(ThinkingConfig::enabled(1024));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["thinking"], json!({"type": "enabled", "budget_tokens": 1024}));
    }

    #[test]
    fn translator_carries_stop_reason_into_message_stop() {
        let mut translator = EventTranslator::default();
        let delta = translator
            .translate_payload(r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":5}}"#)
            .unwrap();
        assert!(delta.is_none());

        let stop = translator
            .translate_payload(r#"{"type":"message_stop"}"#)
            .unwrap();
        assert_eq!(
            stop,
            Some(StreamEvent::MessageStop {
                stop_reason: Some("tool_use".to_string())
            })
        );
    }

    #[test]
    fn redacted_thinking_round_trips_to_the_api() {
        let mut translator = EventTranslator::default();
        let start = translator
            .translate_payload(r#"{"type":"content_block_start","index":0,"content_block":{"type":"redacted_thinking","data":"EmwKAhgB"}}"#)
            .unwrap();
        assert_eq!(
            start,
            Some(StreamEvent::ContentBlockStart {
                index: 0,
                block: BlockStart::RedactedThinking {
                    data: "EmwKAhgB".to_string()
                }
            })
        );

        let block = ContentBlock::RedactedThinking {
            data: "EmwKAhgB".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&block).unwrap(),
            json!({"type": "redacted_thinking", "data": "EmwKAhgB"})
        );
    }

    #[test]
    fn translator_maps_block_starts_and_deltas() {
        let mut translator = EventTranslator::default();
        let start = translator
            .translate_payload(r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_9","name":"web_search","input":{}}}"#)
            .unwrap();
        assert_eq!(
            start,
            Some(StreamEvent::ContentBlockStart {
                index: 1,
                block: BlockStart::ToolUse {
                    id: "toolu_9".to_string(),
                    name: "web_search".to_string()
                }
            })
        );

        let delta = translator
            .translate_payload(r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"qu"}}"#)
            .unwrap();
        assert_eq!(
            delta,
            Some(StreamEvent::ContentBlockDelta {
                index: 1,
                delta: Delta::ToolInput("{\"qu".to_string())
            })
        );

        assert!(translator
            .translate_payload(r#"{"type":"ping"}"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn translator_surfaces_error_frames() {
        let mut translator = EventTranslator::default();
        let err = translator
            .translate_payload(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .unwrap_err();
        assert!(matches!(err, ChatError::StreamAborted { ref kind, .. } if kind == "overloaded_error"));
    }
}
