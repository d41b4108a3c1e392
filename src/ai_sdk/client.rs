use super::anthropic::{EventTranslator, MessageRequest};
use super::sse::SseBuffer;
use crate::decoder::StreamEvent;
use crate::error::{ChatError, ChatResult};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use reqwest::Client;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

pub(crate) type EventStream = BoxStream<'static, ChatResult<StreamEvent>>;

/// A hosted model that answers a request with a stream of decoder events.
pub(crate) trait ModelApi: Send + Sync {
    fn stream_message(
        &self,
        request: &MessageRequest,
    ) -> impl Future<Output = ChatResult<EventStream>> + Send;
}

pub(crate) struct AnthropicClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub(crate) fn new(api_key: String, base_url: &str, idle_timeout: Duration) -> ChatResult<Self> {
        // A total timeout would cut long streams; bound connect and idle reads instead.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(idle_timeout)
            .build()?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl ModelApi for AnthropicClient {
    async fn stream_message(&self, request: &MessageRequest) -> ChatResult<EventStream> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "opening model stream"
        );

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(events_from_bytes(response.bytes_stream()))
    }
}

struct SseState<S> {
    bytes: Pin<Box<S>>,
    frames: SseBuffer,
    translator: EventTranslator,
    pending: VecDeque<ChatResult<StreamEvent>>,
    finished: bool,
}

impl<S> SseState<S> {
    fn accept(&mut self, payload: String) {
        match self.translator.translate_payload(&payload) {
            Ok(Some(event)) => self.pending.push_back(Ok(event)),
            Ok(None) => {}
            Err(err) => self.pending.push_back(Err(err)),
        }
    }
}

/// Turns a raw SSE body into decoder events.
pub(crate) fn events_from_bytes<S, B, E>(bytes: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ChatError> + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        frames: SseBuffer::default(),
        translator: EventTranslator::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for payload in state.frames.push(chunk.as_ref()) {
                        state.accept(payload);
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err.into()), state));
                }
                None => {
                    state.finished = true;
                    if let Some(payload) = state.frames.finish() {
                        state.accept(payload);
                    }
                }
            }
        }
    })
    .boxed()
}
