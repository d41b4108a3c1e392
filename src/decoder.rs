//! Reassembles a streamed model response into a complete [`Message`].
//!
//! Events arrive per content-block index: a start, any number of deltas, and a
//! stop. Each open index keeps its own scratch state, so blocks may interleave.
//! Completed blocks are appended in the order their stop events arrive.
//!
//! Partial output is pushed to a [`PartialSink`] as it accumulates; the sink
//! decides how to display it.

use crate::ai_sdk::{ContentBlock, Message, Role};
use crate::error::{ChatError, ChatResult};
use futures::{Stream, StreamExt};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    MessageStart { role: Role },
    ContentBlockStart { index: usize, block: BlockStart },
    ContentBlockDelta { index: usize, delta: Delta },
    ContentBlockStop { index: usize },
    MessageStop { stop_reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockStart {
    Text,
    ToolUse { id: String, name: String },
    Thinking,
    /// Arrives complete; takes no deltas.
    RedactedThinking { data: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Text(String),
    ToolInput(String),
    Thinking(String),
    Signature(String),
}

/// The accumulated, not yet finalized content of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialUpdate<'a> {
    Text(&'a str),
    /// Raw tool input; not necessarily valid JSON yet.
    ToolInput { name: &'a str, raw: &'a str },
    Thinking(&'a str),
}

pub trait PartialSink {
    fn update(&mut self, index: usize, update: PartialUpdate<'_>);
}

/// Discards partial output.
#[cfg(test)]
pub struct NoopSink;

#[cfg(test)]
impl PartialSink for NoopSink {
    fn update(&mut self, _index: usize, _update: PartialUpdate<'_>) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub message: Message,
    pub stop_reason: Option<String>,
}

#[derive(Debug)]
enum Scratch {
    Text(String),
    Tool {
        id: String,
        name: String,
        input_json: String,
    },
    Thinking {
        text: String,
        signature: String,
    },
    Redacted(String),
}

impl Scratch {
    fn kind(&self) -> &'static str {
        match self {
            Scratch::Text(_) => "text",
            Scratch::Tool { .. } => "tool_use",
            Scratch::Thinking { .. } => "thinking",
            Scratch::Redacted(_) => "redacted_thinking",
        }
    }
}

#[derive(Debug, Default)]
pub struct StreamDecoder {
    role: Option<Role>,
    content: Vec<ContentBlock>,
    open: BTreeMap<usize, Scratch>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event. Returns the finished message once `MessageStop`
    /// arrives.
    pub fn apply<S: PartialSink + ?Sized>(
        &mut self,
        event: StreamEvent,
        sink: &mut S,
    ) -> ChatResult<Option<Decoded>> {
        if self.role.is_none() && !matches!(event, StreamEvent::MessageStart { .. }) {
            return Err(ChatError::protocol(format!(
                "received {event:?} before message_start"
            )));
        }

        match event {
            StreamEvent::MessageStart { role } => {
                if self.role.is_some() {
                    return Err(ChatError::protocol("duplicate message_start"));
                }
                self.role = Some(role);
            }
            StreamEvent::ContentBlockStart { index, block } => {
                if self.open.contains_key(&index) {
                    return Err(ChatError::protocol(format!(
                        "content block {index} started twice"
                    )));
                }
                let scratch = match block {
                    BlockStart::Text => Scratch::Text(String::new()),
                    BlockStart::ToolUse { id, name } => Scratch::Tool {
                        id,
                        name,
                        input_json: String::new(),
                    },
                    BlockStart::Thinking => Scratch::Thinking {
                        text: String::new(),
                        signature: String::new(),
                    },
                    BlockStart::RedactedThinking { data } => Scratch::Redacted(data),
                };
                self.open.insert(index, scratch);
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                let scratch = self.open.get_mut(&index).ok_or_else(|| {
                    ChatError::protocol(format!("delta for unopened content block {index}"))
                })?;
                match (scratch, delta) {
                    (Scratch::Text(text), Delta::Text(fragment)) => {
                        text.push_str(&fragment);
                        sink.update(index, PartialUpdate::Text(text.as_str()));
                    }
                    (
                        Scratch::Tool {
                            name, input_json, ..
                        },
                        Delta::ToolInput(fragment),
                    ) => {
                        input_json.push_str(&fragment);
                        sink.update(
                            index,
                            PartialUpdate::ToolInput {
                                name: name.as_str(),
                                raw: input_json.as_str(),
                            },
                        );
                    }
                    (Scratch::Thinking { text, .. }, Delta::Thinking(fragment)) => {
                        text.push_str(&fragment);
                        sink.update(index, PartialUpdate::Thinking(text.as_str()));
                    }
                    (Scratch::Thinking { signature, .. }, Delta::Signature(fragment)) => {
                        signature.push_str(&fragment);
                    }
                    (scratch, delta) => {
                        return Err(ChatError::protocol(format!(
                            "{delta:?} does not belong to {} block {index}",
                            scratch.kind()
                        )));
                    }
                }
            }
            StreamEvent::ContentBlockStop { index } => {
                let scratch = self.open.remove(&index).ok_or_else(|| {
                    ChatError::protocol(format!("stop for unopened content block {index}"))
                })?;
                self.content.push(finish_block(index, scratch)?);
            }
            StreamEvent::MessageStop { stop_reason } => {
                if let Some(index) = self.open.keys().next() {
                    return Err(ChatError::protocol(format!(
                        "message_stop while content block {index} is still open"
                    )));
                }
                let role = self
                    .role
                    .take()
                    .ok_or_else(|| ChatError::protocol("message_stop without message_start"))?;
                debug!(
                    blocks = self.content.len(),
                    stop_reason = stop_reason.as_deref().unwrap_or("none"),
                    "decoded message"
                );
                return Ok(Some(Decoded {
                    message: Message::new(role, std::mem::take(&mut self.content)),
                    stop_reason,
                }));
            }
        }

        Ok(None)
    }
}

fn finish_block(index: usize, scratch: Scratch) -> ChatResult<ContentBlock> {
    Ok(match scratch {
        Scratch::Text(text) => ContentBlock::Text { text },
        Scratch::Tool {
            id,
            name,
            input_json,
        } => {
            // Tools without arguments may stream no input at all.
            let input = if input_json.trim().is_empty() {
                serde_json::Value::Object(serde_json::Map::new())
            } else {
                serde_json::from_str(&input_json)
                    .map_err(|source| ChatError::MalformedToolInput { index, source })?
            };
            ContentBlock::ToolUse { id, name, input }
        }
        Scratch::Thinking { text, signature } => ContentBlock::Thinking {
            thinking: text,
            signature,
        },
        Scratch::Redacted(data) => ContentBlock::RedactedThinking { data },
    })
}

/// Drives a [`StreamDecoder`] over an event stream until `MessageStop`.
pub async fn decode_stream<St, S>(mut events: St, sink: &mut S) -> ChatResult<Decoded>
where
    St: Stream<Item = ChatResult<StreamEvent>> + Unpin,
    S: PartialSink + ?Sized,
{
    let mut decoder = StreamDecoder::new();
    while let Some(event) = events.next().await {
        if let Some(decoded) = decoder.apply(event?, sink)? {
            return Ok(decoded);
        }
    }
    Err(ChatError::protocol("stream closed before message_stop"))
}
