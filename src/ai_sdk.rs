mod anthropic;
mod client;
mod sse;

pub use anthropic::{ContentBlock, Message, Role, ToolResultContent};
pub(crate) use anthropic::{MessageRequest, ThinkingConfig, ToolCall, ToolDefinitionApi};
pub(crate) use client::{AnthropicClient, EventStream, ModelApi};
