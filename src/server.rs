use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::Deserialize;
use tokio::task;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::AppConfig,
    error::ServiceError,
    generation::{GenerationResult, Generator},
    prompt::{Message, Role},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub generator: Arc<Generator>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Model path used if this request is the one that loads the engine.
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
}

pub fn build_router(config: Arc<AppConfig>, generator: Arc<Generator>) -> Router {
    let state = AppState { config, generator };

    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<GenerationResult>, ServiceError> {
    let ChatRequest {
        model,
        messages,
        min_len,
        max_len,
    } = request;
    if messages.is_empty() {
        return Err(ServiceError::BadRequest("messages must not be empty".into()));
    }

    let messages = with_system_prompt(state.config.system_prompt.as_deref(), messages);
    info!(
        messages = messages.len(),
        strategy = %state.generator.strategy(),
        "chat request"
    );

    let generator = state.generator.clone();
    let result = task::spawn_blocking(move || {
        generator.generate(&messages, min_len, max_len, model.as_deref())
    })
    .await
    .map_err(|err| ServiceError::Task(err.to_string()))??;

    Ok(Json(result))
}

/// A configured system prompt replaces any system messages from the caller.
fn with_system_prompt(system_prompt: Option<&str>, messages: Vec<Message>) -> Vec<Message> {
    match system_prompt {
        Some(prompt) => std::iter::once(Message::system(prompt))
            .chain(messages.into_iter().filter(|m| m.role != Role::System))
            .collect(),
        None => messages,
    }
}
