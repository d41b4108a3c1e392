use crate::ai_sdk::{Message, MessageRequest, ModelApi, ThinkingConfig, ToolCall};
use crate::decoder::{decode_stream, PartialSink};
use crate::error::{ChatError, ChatResult};
use crate::session::SessionLog;
use crate::tools::ToolRegistry;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub(crate) struct AgentConfig {
    pub(crate) model: String,
    pub(crate) max_tokens: u32,
    /// Model calls allowed per turn.
    pub(crate) max_iterations: usize,
    pub(crate) thinking_budget: Option<u32>,
}

/// Receives everything a turn produces while it runs.
pub(crate) trait TurnObserver: PartialSink {
    fn message_appended(&mut self, _message: &Message) {}

    fn tool_invoked(&mut self, _call: &ToolCall) {}
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TurnOutcome {
    pub(crate) model_calls: usize,
    pub(crate) stop_reason: Option<String>,
}

pub struct Agent<M> {
    model: M,
    tools: ToolRegistry,
    config: AgentConfig,
}

impl<M: ModelApi> Agent<M> {
    pub(crate) fn new(model: M, tools: ToolRegistry, config: AgentConfig) -> Self {
        Self {
            model,
            tools,
            config,
        }
    }

    fn request(&self, log: &SessionLog) -> MessageRequest {
        MessageRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            messages: log.messages().to_vec(),
            tools: self.tools.api_definitions(),
            stream: true,
            thinking: self.config.thinking_budget.map(ThinkingConfig::enabled),
        }
    }

    /// Calls the model until it answers without requesting a tool.
    ///
    /// Each model call appends one assistant message; each tool invocation
    /// appends one user message carrying its result. On error the log keeps
    /// whatever was appended so far.
    pub(crate) async fn run_turn<O>(
        &self,
        log: &mut SessionLog,
        observer: &mut O,
    ) -> ChatResult<TurnOutcome>
    where
        O: TurnObserver + Send,
    {
        for model_calls in 1..=self.config.max_iterations {
            let request = self.request(log);
            let events = self.model.stream_message(&request).await?;
            let decoded = decode_stream(events, observer).await?;

            let calls = decoded.message.tool_calls();
            observer.message_appended(log.append(decoded.message));

            if calls.is_empty() {
                info!(model_calls, messages = log.len(), "turn complete");
                return Ok(TurnOutcome {
                    model_calls,
                    stop_reason: decoded.stop_reason,
                });
            }

            for call in calls {
                debug!(tool = %call.name, id = %call.id, "dispatching tool");
                observer.tool_invoked(&call);
                let result = self.tools.invoke(&call.name, call.input).await?;
                let text = serde_json::to_string(&result)?;
                observer.message_appended(log.append(Message::tool_result(call.id, text)));
            }
        }

        warn!(
            limit = self.config.max_iterations,
            "model kept requesting tools"
        );
        Err(ChatError::IterationLimit(self.config.max_iterations))
    }
}
