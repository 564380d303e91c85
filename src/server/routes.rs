//! HTTP route handlers for the chat API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use futures::stream::unfold;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::chat::core::config::ModelSpec;
use crate::chat::core::conversation::{Conversation, Project};
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{ConversationId, ProjectId, UserId};
use crate::chat::core::message::ChatMessage;
use crate::chat::engine::{DATA_STREAM_HEADER, DATA_STREAM_VERSION, StreamFrame};
use crate::chat::service::ChatRequest;

use super::state::AppState;

/// Response header carrying the conversation id of a chat stream.
pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/models", get(list_models))
        .route("/api/chat", post(chat).delete(delete_chat))
        .route("/api/history", get(history))
        .route("/api/chat/{id}/messages", get(chat_messages))
        .route("/api/chat/{id}/project", put(assign_project))
        .route("/api/projects", post(create_project).get(list_projects))
        .route("/api/projects/{id}", delete(delete_project))
        .with_state(state)
}

fn caller(state: &AppState, headers: &HeaderMap) -> ChatResult<UserId> {
    state.identity.identify(headers).ok_or(ChatError::Unauthorized)
}

/// Health check endpoint.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let backend = match &state.backend {
        Some(backend) => {
            if backend.is_ready().await {
                "up"
            } else {
                "down"
            }
        }
        None => "unknown",
    };
    Json(serde_json::json!({
        "status": "ok",
        "service": "parley-chat",
        "version": env!("CARGO_PKG_VERSION"),
        "model_backend": backend,
    }))
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<Vec<ModelSpec>> {
    Json(state.chat.models().to_vec())
}

/// Start a turn and stream its frames.
async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ChatError> {
    let owner = caller(&state, &headers)?;
    let Json(request) = body?;
    let handle = state.chat.start_turn(owner, request).await?;

    let mut response = Body::from_stream(frame_stream(handle.frames)).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(
        HeaderName::from_static(DATA_STREAM_HEADER),
        HeaderValue::from_static(DATA_STREAM_VERSION),
    );
    if let Ok(value) = HeaderValue::from_str(&handle.conversation_id.to_string()) {
        headers.insert(HeaderName::from_static(CONVERSATION_ID_HEADER), value);
    }
    Ok(response)
}

/// Encode frames until the terminal one.
fn frame_stream(
    frames: UnboundedReceiver<StreamFrame>,
) -> impl futures::Stream<Item = Result<String, Infallible>> + Send + 'static {
    unfold((frames, false), |(mut frames, done)| async move {
        if done {
            return None;
        }
        let frame = frames.recv().await?;
        let terminal = matches!(frame, StreamFrame::Finish { .. } | StreamFrame::Error(_));
        let line = frame.encode().unwrap_or_else(|err| {
            tracing::error!(error = %err, "failed to encode stream frame");
            String::new()
        });
        Some((Ok(line), (frames, terminal)))
    })
}

#[derive(Debug, Deserialize)]
struct DeleteChatQuery {
    id: ConversationId,
}

async fn delete_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<DeleteChatQuery>,
) -> Result<StatusCode, ChatError> {
    let owner = caller(&state, &headers)?;
    state.chat.delete_conversation(owner, query.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Conversation>>, ChatError> {
    let owner = caller(&state, &headers)?;
    Ok(Json(state.chat.history(owner).await?))
}

/// A stored message as returned to clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageView {
    id: String,
    #[serde(flatten)]
    message: ChatMessage,
    created_at: chrono::DateTime<chrono::Utc>,
}

async fn chat_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ConversationId>,
) -> Result<Json<Vec<MessageView>>, ChatError> {
    let owner = caller(&state, &headers)?;
    let messages = state.chat.messages(owner, id).await?;
    Ok(Json(
        messages
            .into_iter()
            .map(|stored| MessageView {
                id: stored.id.to_string(),
                message: stored.to_chat(),
                created_at: stored.created_at,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignProjectBody {
    project_id: Option<ProjectId>,
}

async fn assign_project(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ConversationId>,
    body: Result<Json<AssignProjectBody>, JsonRejection>,
) -> Result<StatusCode, ChatError> {
    let owner = caller(&state, &headers)?;
    let Json(body) = body?;
    state.chat.assign_project(owner, id, body.project_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CreateProjectBody {
    name: String,
}

async fn create_project(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<CreateProjectBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Project>), ChatError> {
    let owner = caller(&state, &headers)?;
    let Json(body) = body?;
    let project = state.chat.create_project(owner, &body.name).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn list_projects(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Project>>, ChatError> {
    let owner = caller(&state, &headers)?;
    Ok(Json(state.chat.projects(owner).await?))
}

async fn delete_project(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ProjectId>,
) -> Result<StatusCode, ChatError> {
    let owner = caller(&state, &headers)?;
    state.chat.delete_project(owner, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
