use crate::agent::{Agent, TurnObserver};
use crate::ai_sdk::{Message, ModelApi, Role, ToolCall};
use crate::decoder::{PartialSink, PartialUpdate};
use crate::error::ChatResult;
use crate::protocol::{
    PartialKind, SendMessageRequest, SessionCreateResponse, SessionEvent, TranscriptResponse,
};
use crate::session::SessionLog;
use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use std::collections::HashMap;
use std::convert::Infallible;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

pub struct ServerConfig {
    pub listen: String,
    pub auth_token: String,
}

struct ServerState<M> {
    agent: Arc<Agent<M>>,
    sessions: Mutex<HashMap<String, Arc<SessionState>>>,
    auth_token: String,
}

/// One conversation. The log lock doubles as the "turn in progress" flag.
struct SessionState {
    log: Arc<Mutex<SessionLog>>,
    events: broadcast::Sender<SessionEvent>,
}

type ServerResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

pub(crate) async fn run<M: ModelApi + 'static>(config: ServerConfig, agent: Agent<M>) -> ServerResult<()> {
    let state = Arc::new(ServerState {
        agent: Arc::new(agent),
        sessions: Mutex::new(HashMap::new()),
        auth_token: config.auth_token,
    });

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!(listen = %config.listen, token_file = %token_path().display(), "seeker server listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}

fn router<M: ModelApi + 'static>(state: Arc<ServerState<M>>) -> Router {
    Router::new()
        .route("/sessions", post(create_session::<M>))
        .route("/sessions/:id/messages", post(send_message::<M>))
        .route("/sessions/:id/stream", get(stream_session::<M>))
        .route("/sessions/:id/transcript", get(transcript::<M>))
        .with_state(state)
}

pub fn resolve_token(explicit: Option<String>) -> ServerResult<String> {
    let path = token_path();
    if let Some(token) = explicit {
        write_token_file(&path, &token)?;
        return Ok(token);
    }

    if let Ok(token) = read_token_file(&path) {
        return Ok(token);
    }

    let token = Uuid::new_v4().to_string();
    write_token_file(&path, &token)?;
    Ok(token)
}

async fn create_session<M: ModelApi + 'static>(
    State(state): State<Arc<ServerState<M>>>,
    headers: HeaderMap,
) -> Result<Json<SessionCreateResponse>, StatusCode> {
    authorize(&headers, &state.auth_token)?;

    let session_id = Uuid::new_v4().to_string();
    let (events, _) = broadcast::channel(512);
    let session = Arc::new(SessionState {
        log: Arc::new(Mutex::new(SessionLog::new())),
        events,
    });

    state
        .sessions
        .lock()
        .await
        .insert(session_id.clone(), session);
    info!(%session_id, "session created");

    Ok(Json(SessionCreateResponse { session_id }))
}

async fn find_session<M>(state: &ServerState<M>, session_id: &str) -> Result<Arc<SessionState>, StatusCode> {
    let sessions = state.sessions.lock().await;
    sessions.get(session_id).cloned().ok_or(StatusCode::NOT_FOUND)
}

async fn send_message<M: ModelApi + 'static>(
    State(state): State<Arc<ServerState<M>>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<SendMessageRequest>,
) -> Result<StatusCode, StatusCode> {
    authorize(&headers, &state.auth_token)?;

    if payload.content.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let session = find_session(&state, &session_id).await?;
    let mut log = Arc::clone(&session.log)
        .try_lock_owned()
        .map_err(|_| StatusCode::CONFLICT)?;

    let agent = Arc::clone(&state.agent);
    tokio::spawn(async move {
        let mut observer = BroadcastObserver {
            events: session.events.clone(),
        };
        log.append_user_input(&payload.content);
        if let Err(err) = agent.run_turn(&mut log, &mut observer).await {
            warn!(%session_id, error = %err, "turn failed");
            let _ = session.events.send(SessionEvent::Error {
                message: err.to_string(),
            });
        }
        let _ = session.events.send(SessionEvent::Done);
    });

    Ok(StatusCode::ACCEPTED)
}

async fn stream_session<M: ModelApi + 'static>(
    State(state): State<Arc<ServerState<M>>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&headers, &state.auth_token)?;

    let session = find_session(&state, &session_id).await?;

    let stream = BroadcastStream::new(session.events.subscribe()).filter_map(|item| async move {
        match item {
            Ok(event) => {
                let data = serde_json::to_string(&event).unwrap_or_default();
                Some(Ok::<Event, Infallible>(Event::default().data(data)))
            }
            Err(_) => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

/// Replays the settled conversation. Busy while a turn is running.
async fn transcript<M: ModelApi + 'static>(
    State(state): State<Arc<ServerState<M>>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TranscriptResponse>, StatusCode> {
    authorize(&headers, &state.auth_token)?;

    let session = find_session(&state, &session_id).await?;
    let log = session.log.try_lock().map_err(|_| StatusCode::CONFLICT)?;
    Ok(Json(TranscriptResponse {
        entries: log.transcript(),
    }))
}

struct BroadcastObserver {
    events: broadcast::Sender<SessionEvent>,
}

impl PartialSink for BroadcastObserver {
    fn update(&mut self, index: usize, update: PartialUpdate<'_>) {
        let (kind, text) = match update {
            PartialUpdate::Text(text) => (PartialKind::Text, text),
            PartialUpdate::ToolInput { raw, .. } => (PartialKind::ToolInput, raw),
            PartialUpdate::Thinking(text) => (PartialKind::Thinking, text),
        };
        let _ = self.events.send(SessionEvent::Partial {
            index,
            kind,
            text: text.to_string(),
        });
    }
}

impl TurnObserver for BroadcastObserver {
    fn message_appended(&mut self, message: &Message) {
        if message.role != Role::Assistant {
            return;
        }
        for text in message.texts() {
            let _ = self.events.send(SessionEvent::Assistant {
                text: text.to_string(),
            });
        }
    }

    fn tool_invoked(&mut self, call: &ToolCall) {
        let _ = self.events.send(SessionEvent::ToolCall {
            name: call.name.clone(),
            input: call.input.clone(),
        });
    }
}

fn authorize(headers: &HeaderMap, token: &str) -> Result<(), StatusCode> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match header {
        Some(value) if value == format!("Bearer {}", token) => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

fn read_token_file(path: &std::path::Path) -> ChatResult<String> {
    let token = std::fs::read_to_string(path)?;
    Ok(token.trim().to_string())
}

fn write_token_file(path: &std::path::Path, token: &str) -> ChatResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    use std::io::Write;
    file.write_all(token.as_bytes())?;
    Ok(())
}

fn token_path() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        return PathBuf::from(home).join(".seeker").join("server.token");
    }

    PathBuf::from("seeker.token")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::ai_sdk::{EventStream, MessageRequest};
    use crate::decoder::{BlockStart, Delta, StreamEvent};
    use crate::error::ChatError;
    use crate::tools::ToolRegistry;

    /// Answers every request with "echo: <message count>".
    struct CountingModel;

    impl ModelApi for CountingModel {
        async fn stream_message(&self, request: &MessageRequest) -> ChatResult<EventStream> {
            let text = format!("echo: {}", request.messages.len());
            let events = vec![
                StreamEvent::MessageStart {
                    role: Role::Assistant,
                },
                StreamEvent::ContentBlockStart {
                    index: 0,
                    block: BlockStart::Text,
                },
                StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: Delta::Text(text),
                },
                StreamEvent::ContentBlockStop { index: 0 },
                StreamEvent::MessageStop { stop_reason: None },
            ];
            Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed())
        }
    }

    async fn spawn_server() -> String {
        let agent = Agent::new(
            CountingModel,
            ToolRegistry::new(),
            AgentConfig {
                model: "test".to_string(),
                max_tokens: 64,
                max_iterations: 2,
                thinking_budget: None,
            },
        );
        let state = Arc::new(ServerState {
            agent: Arc::new(agent),
            sessions: Mutex::new(HashMap::new()),
            auth_token: "secret".to_string(),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn wait_for_transcript(
        http: &reqwest::Client,
        url: &str,
        len: usize,
    ) -> serde_json::Value {
        for _ in 0..100 {
            let response = http.get(url).bearer_auth("secret").send().await.unwrap();
            if response.status().is_success() {
                let body: serde_json::Value = response.json().await.unwrap();
                if body["entries"].as_array().map(Vec::len) == Some(len) {
                    return body;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("transcript never reached {len} entries");
    }

    #[tokio::test]
    async fn requests_without_token_are_rejected() {
        let base = spawn_server().await;
        let response = reqwest::Client::new()
            .post(format!("{}/sessions", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);
    }

    #[tokio::test]
    async fn sessions_keep_independent_logs() {
        let base = spawn_server().await;
        let http = reqwest::Client::new();

        let mut ids = Vec::new();
        for _ in 0..2 {
            let created: SessionCreateResponse = http
                .post(format!("{}/sessions", base))
                .bearer_auth("secret")
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            ids.push(created.session_id);
        }

        let send = |id: &str, content: &str| {
            http.post(format!("{}/sessions/{}/messages", base, id))
                .bearer_auth("secret")
                .json(&SendMessageRequest {
                    content: content.to_string(),
                })
                .send()
        };

        assert_eq!(send(&ids[0], "first").await.unwrap().status().as_u16(), 202);
        let url = format!("{}/sessions/{}/transcript", base, ids[0]);
        wait_for_transcript(&http, &url, 2).await;

        assert_eq!(send(&ids[0], "second").await.unwrap().status().as_u16(), 202);
        let body = wait_for_transcript(&http, &url, 4).await;
        // The whole log is resent each call: 1 message, then 3.
        assert_eq!(body["entries"][1]["text"], "echo: 1");
        assert_eq!(body["entries"][3]["text"], "echo: 3");
        assert_eq!(body["entries"][3]["role"], "assistant");

        let other = format!("{}/sessions/{}/transcript", base, ids[1]);
        wait_for_transcript(&http, &other, 0).await;
    }

    #[test]
    fn token_file_round_trips_and_reports_missing_files() {
        let dir = std::env::temp_dir().join(format!("seeker-token-{}", Uuid::new_v4()));
        let path = dir.join("server.token");

        let err = read_token_file(&path).unwrap_err();
        assert!(matches!(err, ChatError::Io(_)));

        write_token_file(&path, "abc123").unwrap();
        assert_eq!(read_token_file(&path).unwrap(), "abc123");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let base = spawn_server().await;
        let response = reqwest::Client::new()
            .get(format!("{}/sessions/nope/transcript", base))
            .bearer_auth("secret")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);
    }
}
