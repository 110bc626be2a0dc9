//! `POST /v1/chat/stream`: the request gate and the streamed turn.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::CONTENT_LENGTH;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use concierge_agent::{EngineError, StreamEmitter, StreamEvent, TurnOutcome, TurnRequest};
use concierge_core::identity::CallerIdentity;
use concierge_core::message::{Attachment, Message, Role, SessionId, ToolInvocation, title_from};
use http_body_util::LengthLimitError;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::GatewayState;
use crate::auth::bearer_token;
use crate::error::GateError;

/// Events buffered per stream before the engine waits on the client.
const EVENT_BUFFER: usize = 64;

/// Inbound chat request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<MessageDto>,

    #[serde(default)]
    pub session_id: Option<String>,

    /// Domain correlation id (e.g. the project the user is working on)
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub role: Role,

    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub attachments: Vec<AttachmentDto>,

    #[serde(default)]
    pub tool_invocations: Vec<ToolInvocation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDto {
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub data: Option<String>,
}

impl From<MessageDto> for Message {
    fn from(dto: MessageDto) -> Self {
        let base = match dto.role {
            Role::User => Message::user(dto.content),
            Role::Assistant => Message::assistant(dto.content),
        };
        base.with_attachments(
            dto.attachments
                .into_iter()
                .map(|a| Attachment::new(a.name, a.mime_type, a.data))
                .collect(),
        )
        .with_tool_invocations(dto.tool_invocations)
    }
}

impl ChatRequest {
    /// Parse and validate a raw body.
    pub fn parse(body: &[u8]) -> Result<Self, GateError> {
        let request: Self = serde_json::from_slice(body).map_err(|e| GateError::Malformed(e.to_string()))?;
        let Some(last) = request.messages.last() else {
            return Err(GateError::Malformed("at least one message is required".into()));
        };
        if last.role != Role::User {
            return Err(GateError::Malformed("the last message must come from the user".into()));
        }
        let has_payload = last.attachments.iter().any(|a| a.data.as_deref().is_some_and(|d| !d.is_empty()));
        if last.content.trim().is_empty() && !has_payload {
            return Err(GateError::Malformed("the last message is empty".into()));
        }
        Ok(request)
    }
}

pub(crate) async fn chat_stream_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, GateError> {
    let limit = state.config.gateway.max_request_bytes;

    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        warn!(declared = ?declared, limit, "Rejecting oversized request");
        return Err(GateError::PayloadTooLarge { limit });
    }

    let caller = state
        .identity
        .resolve(bearer_token(&headers))
        .await
        .ok_or(GateError::Unauthorized)?;

    let bytes = axum::body::to_bytes(body, limit).await.map_err(|e| {
        if is_length_limit(&e) {
            GateError::PayloadTooLarge { limit }
        } else {
            warn!(error = %e, "Failed to read request body");
            GateError::Malformed(format!("could not read request body: {e}"))
        }
    })?;
    let request = ChatRequest::parse(&bytes)?;

    info!(
        user = %caller.user_id,
        messages = request.messages.len(),
        session = ?request.session_id,
        "Chat stream request"
    );

    let rx = stream_turn(state, caller, request).await?;
    let stream = ReceiverStream::new(rx).map(|event| {
        Ok::<_, Infallible>(
            SseEvent::default()
                .event(event.event_type())
                .data(event.payload().to_string()),
        )
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn is_length_limit(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

/// Budget check, session resolution, then the turn on a background task.
///
/// The returned receiver yields `conversation_info` first and `done`
/// last, unless the client goes away first.
pub async fn stream_turn(
    state: Arc<GatewayState>,
    caller: CallerIdentity,
    request: ChatRequest,
) -> Result<mpsc::Receiver<StreamEvent>, GateError> {
    match state.usage.current_monthly_usage().await {
        Ok(month) if month.is_exhausted() => {
            warn!(cost = month.cost, limit = month.limit, "Monthly budget exhausted");
            return Err(GateError::BudgetExceeded {
                cost: month.cost,
                limit: month.limit,
            });
        }
        Ok(month) => debug!(percent_used = month.percent_used, "Budget check passed"),
        Err(e) => warn!(error = %e, "Usage recorder unreachable, skipping budget check"),
    }

    let messages: Vec<Message> = request.messages.into_iter().map(Message::from).collect();
    let opening_text = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
    let (session_id, title) = resolve_session(&state, &caller, request.session_id, opening_text).await;

    let (emitter, rx) = StreamEmitter::channel(EVENT_BUFFER);
    let turn = TurnRequest {
        messages,
        session_id: session_id.clone(),
        caller,
        correlation_id: request.correlation_id,
    };
    tokio::spawn(drive_turn(state, turn, title, emitter));
    Ok(rx)
}

async fn drive_turn(state: Arc<GatewayState>, turn: TurnRequest, title: String, emitter: StreamEmitter) {
    let session_id = turn.session_id.clone();
    let info = StreamEvent::ConversationInfo {
        session_id: session_id.to_string(),
        title,
    };
    if !emitter.emit(info).await {
        return;
    }

    match state.engine.run(turn, &emitter).await {
        Ok(outcome) => {
            persist(&state, &session_id, &outcome).await;
            emitter.emit(StreamEvent::Done).await;
        }
        Err(EngineError::Provider(_)) => {
            emitter.emit(StreamEvent::Done).await;
        }
        Err(EngineError::Cancelled) => {
            info!(session_id = %session_id, "Client disconnected, turn abandoned");
        }
    }
}

async fn persist(state: &GatewayState, session_id: &SessionId, outcome: &TurnOutcome) {
    let user = outcome.user_message.for_storage();
    let assistant = outcome.assistant_message();
    if let Err(e) = state.store.append_message_pair(session_id, &user, &assistant).await {
        warn!(session_id = %session_id, error = %e, "Failed to persist message pair");
    }
}

/// Reuse a supplied session the caller owns, otherwise create one.
///
/// Store failures never block the turn: a fresh id is used instead.
async fn resolve_session(
    state: &GatewayState,
    caller: &CallerIdentity,
    supplied: Option<String>,
    opening_text: &str,
) -> (SessionId, String) {
    let title = title_from(opening_text);

    if let Some(id) = supplied.filter(|s| !s.trim().is_empty()) {
        let id = SessionId::from(id);
        match state.store.load_session(&id).await {
            Ok(Some(session)) if session.owner == caller.user_id => return (id, session.title),
            Ok(Some(_)) => warn!(session_id = %id, "Session belongs to another caller, starting a new one"),
            Ok(None) => debug!(session_id = %id, "Unknown session, starting a new one"),
            Err(e) => {
                warn!(session_id = %id, error = %e, "Could not load session, continuing with supplied id");
                return (id, title);
            }
        }
    }

    match state.store.create_session(&caller.user_id, &title).await {
        Ok(id) => (id, title),
        Err(e) => {
            warn!(error = %e, "Could not create session, continuing unsaved");
            (SessionId::new(), title)
        }
    }
}
