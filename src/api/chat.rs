//! The chat-completions pipeline: admission, auth, validation, task
//! lifecycle, and the buffered / streaming renders.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::time::{sleep_until, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use uuid::Uuid;

use crate::history::{MessageRole, MessageStatus};
use crate::ws::{Frame, FrameType, ReplyPayload, ReplyStatus, SendMessagePayload};

use super::error::ApiError;
use super::openai::{ChatMessage, ChatRequest, ChatResponse, Choice, Usage};
use super::prompt::messages_to_xml;
use super::state::AppState;

/// End-to-end deadline from command dispatch to terminal frame.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Admission first: one in-flight request, contention is a 429 the
    // client can retry.
    let permit = match state.gate.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            return ApiError::rate_limited(
                "server is already processing a request, please try again later",
            )
            .into_response();
        }
    };

    match handle_chat(state, headers, body, permit).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle_chat(
    state: AppState,
    headers: HeaderMap,
    body: Bytes,
    permit: OwnedSemaphorePermit,
) -> Result<Response, ApiError> {
    authorize(&state, &headers)?;

    let req: ChatRequest = serde_json::from_slice(&body)
        .map_err(|err| ApiError::bad_request(format!("invalid request: {err}")))?;

    let has_user_message = req
        .messages
        .iter()
        .any(|message| message.role.as_deref() == Some("user"));
    if !has_user_message {
        return Err(ApiError::bad_request("no user message found"));
    }

    let prompt = messages_to_xml(&req.messages);

    if state.hub.current().is_none() {
        return Err(ApiError::service_unavailable("extension not connected"));
    }
    if !state.hub.is_ready() {
        return Err(ApiError::rate_limited(
            "extension is busy, please try again later",
        ));
    }

    let task_id = format!("chatcmpl-{}", Uuid::new_v4());

    // Audit trail: the outgoing prompt, pending until the command is on
    // the wire. A degraded trail never fails the request.
    let user_row = match state
        .history
        .append("", MessageRole::User, &prompt, MessageStatus::Pending)
        .await
    {
        Ok(id) => Some(id),
        Err(err) => {
            warn!("failed to persist user message: {err:#}");
            None
        }
    };

    let inbox = state.tasks.create(&task_id);

    let payload = SendMessagePayload {
        prompt,
        conversation_id: String::new(),
    };
    let frame = Frame {
        id: Some(task_id.clone()),
        reply_to: None,
        frame_type: FrameType::CmdSendMessage,
        payload: serde_json::to_value(&payload).ok(),
    };

    if let Err(err) = state.hub.send(&frame) {
        warn!("send to extension failed: {err}");
        state.tasks.remove(&task_id);
        return Err(ApiError::service_unavailable("extension not connected"));
    }

    if let Some(id) = user_row {
        if let Err(err) = state.history.update_status(id, MessageStatus::Sent).await {
            warn!("failed to update message status: {err:#}");
        }
    }

    let model = if req.model.is_empty() {
        "gemini".to_string()
    } else {
        req.model
    };

    if req.stream {
        Ok(render_stream(state, permit, task_id, model, inbox, user_row))
    } else {
        let result = render_buffered(&state, &task_id, &model, inbox, user_row).await;
        state.tasks.remove(&task_id);
        result.map(IntoResponse::into_response)
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if state.api_key.is_empty() {
        return Ok(());
    }
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing Authorization header"))?;
    let token = auth
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthorized("invalid API key"))?;
    if token != state.api_key {
        return Err(ApiError::unauthorized("invalid API key"));
    }
    Ok(())
}

/// Wait for the terminal reply and emit a single `chat.completion`.
async fn render_buffered(
    state: &AppState,
    task_id: &str,
    model: &str,
    mut inbox: mpsc::Receiver<ReplyPayload>,
    user_row: Option<i64>,
) -> Result<Json<ChatResponse>, ApiError> {
    let reply = state
        .tasks
        .wait_for_done(&mut inbox, REQUEST_TIMEOUT)
        .await
        .map_err(|err| {
            warn!("task failed: {err}");
            ApiError::internal(err.to_string())
        })?;

    persist_exchange(state, user_row, &reply).await;

    Ok(Json(ChatResponse {
        id: task_id.to_string(),
        object: "chat.completion".to_string(),
        created: Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: Some(ChatMessage {
                role: Some("assistant".to_string()),
                content: Some(reply.text.clone()),
            }),
            delta: None,
            finish_reason: Some("stop".to_string()),
        }],
        usage: Usage::default(),
    }))
}

/// Stream `chat.completion.chunk` objects as SSE, computing content deltas
/// from the cumulative PROCESSING text.
fn render_stream(
    state: AppState,
    permit: OwnedSemaphorePermit,
    task_id: String,
    model: String,
    mut inbox: mpsc::Receiver<ReplyPayload>,
    user_row: Option<i64>,
) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(16);

    tokio::spawn(async move {
        // The admission permit rides with the stream: the gate reopens only
        // once this task reaches a terminal state (or times out).
        let _permit = permit;

        let role_chunk = chunk(&task_id, &model, Some("assistant"), None, None);
        if send_event(&tx, &role_chunk).await.is_err() {
            state.tasks.remove(&task_id);
            return;
        }

        let deadline = Instant::now() + REQUEST_TIMEOUT;
        let mut prev_text = String::new();

        loop {
            let payload = tokio::select! {
                payload = inbox.recv() => match payload {
                    Some(payload) => payload,
                    None => break,
                },
                _ = sleep_until(deadline) => {
                    warn!("stream timeout for task {task_id}");
                    break;
                }
            };

            match payload.status {
                ReplyStatus::Error => {
                    error!(
                        "stream error: {}",
                        payload.error.as_deref().unwrap_or("unknown error from extension")
                    );
                    break;
                }
                ReplyStatus::Processing => {
                    // Normally each PROCESSING text extends the previous
                    // one; if not, fall back to emitting the whole text.
                    let delta = match payload.text.strip_prefix(prev_text.as_str()) {
                        Some(suffix) => suffix.to_string(),
                        None => payload.text.clone(),
                    };
                    prev_text = payload.text;
                    if !delta.is_empty() {
                        let content_chunk = chunk(&task_id, &model, None, Some(&delta), None);
                        if send_event(&tx, &content_chunk).await.is_err() {
                            break;
                        }
                    }
                }
                ReplyStatus::Done => {
                    // DONE carries the canonical form (often Markdown) which
                    // need not extend the PROCESSING accumulation; persist it
                    // but never re-emit it as a delta.
                    persist_exchange(&state, user_row, &payload).await;

                    let finish_chunk =
                        chunk(&task_id, &model, None, None, Some("stop"));
                    let _ = send_event(&tx, &finish_chunk).await;
                    let _ = tx.send(Ok(Bytes::from_static(b"data: [DONE]\n\n"))).await;
                    break;
                }
            }
        }

        state.tasks.remove(&task_id);
    });

    let body = Body::from_stream(ReceiverStream::new(rx));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Mark the user row received and append the model reply.
async fn persist_exchange(state: &AppState, user_row: Option<i64>, reply: &ReplyPayload) {
    if let Some(id) = user_row {
        if let Err(err) = state.history.update_status(id, MessageStatus::Received).await {
            warn!("failed to update message status: {err:#}");
        }
    }
    if let Err(err) = state
        .history
        .append(
            &reply.conversation_id,
            MessageRole::Model,
            &reply.text,
            MessageStatus::Received,
        )
        .await
    {
        warn!("failed to persist model reply: {err:#}");
    }
}

fn chunk(
    id: &str,
    model: &str,
    role: Option<&str>,
    content: Option<&str>,
    finish_reason: Option<&str>,
) -> ChatResponse {
    ChatResponse {
        id: id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created: Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: None,
            delta: Some(ChatMessage {
                role: role.map(str::to_string),
                content: content.map(str::to_string),
            }),
            finish_reason: finish_reason.map(str::to_string),
        }],
        usage: Usage::default(),
    }
}

async fn send_event(
    tx: &mpsc::Sender<Result<Bytes, Infallible>>,
    chunk: &ChatResponse,
) -> Result<(), ()> {
    let Ok(json) = serde_json::to_string(chunk) else {
        return Ok(());
    };
    tx.send(Ok(Bytes::from(format!("data: {json}\n\n"))))
        .await
        .map_err(|_| ())
}
