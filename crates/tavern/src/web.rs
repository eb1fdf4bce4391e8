//! The web front-end: a small JSON + server-sent events API and a static
//! chat page.

use std::collections::HashMap;
use std::convert::Infallible;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::json;
use subtle::ConstantTimeEq;
use tavern_core::AgentEvent;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::Instrument;
use uuid::Uuid;

use crate::session::{Session, SessionError, SessionFactory};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// A suggested first message.
#[derive(Clone, Debug, Serialize)]
pub struct Starter {
    /// Short text shown on the button.
    pub label: &'static str,
    /// The message sent when clicked.
    pub message: &'static str,
}

/// The conversation starters shown on an empty chat.
pub static STARTERS: [Starter; 4] = [
    Starter {
        label: "Roll a 7-faced dice. Outcome?",
        message: "Roll a 7-faced dice just for fun. What's the outcome?",
    },
    Starter {
        label: "I'm stuck in a cave. What skills to use?",
        message: "I'm stuck in a dark cave. What can I do?",
    },
    Starter {
        label: "Create a character for me.",
        message: "Can you generate a character for me? Let's call him \"Don Joe\". Describe what kind of guy he is.",
    },
    Starter {
        label: "What's the story background?",
        message: "Briefly describe the story background of the module we are playing today.",
    },
];

/// Username and password required by every route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    /// The expected username.
    pub username: String,
    /// The expected password.
    pub password: String,
}

impl Credentials {
    fn matches(&self, authorization: &str) -> bool {
        let Some(encoded) = authorization.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = BASE64.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        let Some((username, password)) = decoded.split_once(':') else {
            return false;
        };
        let username = username.as_bytes().ct_eq(self.username.as_bytes());
        let password = password.as_bytes().ct_eq(self.password.as_bytes());
        (username & password).into()
    }
}

type SharedSession = Arc<AsyncMutex<Session>>;

#[derive(Clone)]
struct AppState {
    factory: Arc<SessionFactory>,
    sessions: Arc<Mutex<HashMap<Uuid, SharedSession>>>,
    credentials: Option<Arc<Credentials>>,
}

impl AppState {
    fn session(&self, id: &str) -> Result<SharedSession, ApiError> {
        let id = Uuid::parse_str(id).map_err(|_| ApiError::SessionNotFound)?;
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(ApiError::SessionNotFound)
    }
}

/// The web application: a session factory plus the live sessions.
#[derive(Clone)]
pub struct WebApp {
    state: AppState,
}

impl WebApp {
    /// Creates the application. With `credentials`, every route requires
    /// HTTP basic authentication.
    pub fn new(factory: Arc<SessionFactory>, credentials: Option<Credentials>) -> Self {
        Self {
            state: AppState {
                factory,
                sessions: Arc::default(),
                credentials: credentials.map(Arc::new),
            },
        }
    }

    /// Builds the router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index))
            .route("/api/starters", get(starters))
            .route("/api/sessions", post(create_session))
            .route("/api/sessions/:id", axum::routing::delete(end_session))
            .route("/api/sessions/:id/messages", post(post_message))
            .route("/api/sessions/:id/stream", post(stream_message))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                require_auth,
            ))
            .with_state(self.state.clone())
    }

    /// Ends every live session.
    pub async fn end_all_sessions(&self) {
        let sessions: Vec<_> = self
            .state
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (id, session) in sessions {
            debug!("ending session {id}");
            session.lock().await.end().await;
        }
    }

    /// Returns how many sessions are live.
    pub fn session_count(&self) -> usize {
        self.state
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Serves `app` on `listener` until `shutdown` resolves, then ends all
/// sessions.
pub async fn serve<S>(app: WebApp, listener: TcpListener, shutdown: S) -> io::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("listening on http://{addr}");
    }
    axum::serve(listener, app.router())
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("shutting down, ending {} sessions", app.session_count());
    app.end_all_sessions().await;
    Ok(())
}

#[derive(Debug, Error)]
enum ApiError {
    #[error("no such session")]
    SessionNotFound,
    #[error("the message is empty")]
    EmptyMessage,
    #[error("{0}")]
    Agent(SessionError),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Terminated => ApiError::SessionNotFound,
            err => ApiError::Agent(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::SessionNotFound => StatusCode::NOT_FOUND,
            ApiError::EmptyMessage => StatusCode::BAD_REQUEST,
            ApiError::Agent(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(credentials) = &state.credentials else {
        return next.run(req).await;
    };
    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| credentials.matches(v));
    if authorized {
        return next.run(req).await;
    }
    debug!("rejected unauthenticated request to {}", req.uri().path());
    let mut resp = StatusCode::UNAUTHORIZED.into_response();
    resp.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static(r#"Basic realm="tavern""#),
    );
    resp
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn starters() -> Json<&'static [Starter]> {
    Json(&STARTERS[..])
}

#[derive(Serialize)]
struct SessionCreated {
    id: Uuid,
}

async fn create_session(State(state): State<AppState>) -> Json<SessionCreated> {
    let id = Uuid::new_v4();
    let session = state.factory.start();
    state
        .sessions
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(id, Arc::new(AsyncMutex::new(session)));
    info!("web session {id} started");
    Json(SessionCreated { id })
}

#[derive(Deserialize)]
struct MessageBody {
    content: String,
}

#[derive(Serialize)]
struct MessageReply {
    content: String,
    tool_calls: usize,
}

fn message_content(body: MessageBody) -> Result<String, ApiError> {
    let content = body.content.trim();
    if content.is_empty() {
        return Err(ApiError::EmptyMessage);
    }
    Ok(content.to_owned())
}

async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<MessageBody>,
) -> Result<Json<MessageReply>, ApiError> {
    let session = state.session(&id)?;
    let content = message_content(body)?;
    let resp = async { session.lock().await.on_message(&content).await }
        .instrument(info_span!("web session", id = %id))
        .await?;
    Ok(Json(MessageReply {
        content: resp.content,
        tool_calls: resp.tool_calls,
    }))
}

/// SSE data lines can't carry a carriage return.
fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn agent_event(event: AgentEvent) -> Event {
    match event {
        AgentEvent::MessageDelta(delta) => {
            Event::default().event("delta").data(normalize_newlines(&delta))
        }
        AgentEvent::ToolCall { name, arguments } => Event::default()
            .event("tool_call")
            .data(json!({ "name": name, "arguments": arguments }).to_string()),
        AgentEvent::ToolResult {
            name,
            output,
            is_error,
        } => Event::default().event("tool_result").data(
            json!({ "name": name, "output": output, "is_error": is_error }).to_string(),
        ),
    }
}

async fn stream_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<MessageBody>,
) -> Result<Response, ApiError> {
    let session = state.session(&id)?;
    let content = message_content(body)?;

    let (event_tx, event_rx) = mpsc::unbounded_channel::<Result<Event, Infallible>>();
    let span = info_span!("web session", id = %id);
    tokio::spawn(
        async move {
            let mut session = session.lock().await;
            let result = session
                .on_message_streaming(&content, {
                    let event_tx = event_tx.clone();
                    move |event| {
                        event_tx.send(Ok(agent_event(event))).ok();
                    }
                })
                .await;
            let last = match result {
                Ok(resp) => Event::default().event("done").data(
                    json!({ "content": resp.content, "tool_calls": resp.tool_calls })
                        .to_string(),
                ),
                Err(err) => {
                    warn!("turn failed: {err}");
                    Event::default()
                        .event("error")
                        .data(json!({ "error": err.to_string() }).to_string())
                }
            };
            event_tx.send(Ok(last)).ok();
        }
        .instrument(span),
    );

    let stream = UnboundedReceiverStream::new(event_rx);
    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response())
}

async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session = state.session(&id)?;
    if let Ok(id) = Uuid::parse_str(&id) {
        state
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
    session.lock().await.end().await;
    info!("web session {id} ended");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials() {
        let credentials = Credentials {
            username: "admin".to_owned(),
            password: "hunter:2".to_owned(),
        };
        let header = format!("Basic {}", BASE64.encode("admin:hunter:2"));
        assert!(credentials.matches(&header));
        assert!(!credentials.matches(&format!("Basic {}", BASE64.encode("admin:nope"))));
        assert!(!credentials.matches("Bearer abc"));
        assert!(!credentials.matches("Basic !!!"));
        assert!(!credentials.matches(&format!("Basic {}", BASE64.encode("admin"))));
        assert!(!credentials.matches(&format!("Basic {}", BASE64.encode("adm:hunter:2"))));
    }

    #[test]
    fn test_normalize_newlines() {
        assert_eq!(normalize_newlines("a\r\nb\rc\nd"), "a\nb\nc\nd");
        let _ = Event::default().data(normalize_newlines("line one\r\nline two\r"));
    }
}
