//! Tripdesk HTTP 前端
//!
//! 启动: cargo run --bin tripdesk-server --features server
//! 每个请求处理一个轮次；同一会话的轮次串行，不同会话并发。

#![cfg(feature = "server")]

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use tripdesk::config::load_config;
use tripdesk::core::{
    ConversationManager, ConversationSnapshot, DispatchError, Dispatcher, InboundTurn, OutboundTurn,
};
use tripdesk::observability;
use tripdesk::travel::{build_runtime, open_store};

struct AppState {
    conversations: ConversationManager,
}

#[derive(Debug, Serialize)]
struct StartResponse {
    conversation_id: String,
}

type ApiError = (StatusCode, String);

fn api_error(e: DispatchError) -> ApiError {
    let status = match &e {
        DispatchError::UnknownConversation(_) => StatusCode::NOT_FOUND,
        DispatchError::ConversationAborted(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

async fn start_conversation(State(state): State<Arc<AppState>>) -> Json<StartResponse> {
    let conversation_id = state.conversations.start().await;
    Json(StartResponse { conversation_id })
}

async fn post_turn(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(inbound): Json<InboundTurn>,
) -> Result<Json<OutboundTurn>, ApiError> {
    state
        .conversations
        .handle(&id, inbound)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationSnapshot>, ApiError> {
    state
        .conversations
        .snapshot(&id)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn end_conversation(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> StatusCode {
    if state.conversations.end(&id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config = load_config(None)?;
    let bind = config.server.bind.clone();
    let store = open_store(&config)?;
    let runtime = build_runtime(config, &store)?;
    let state = Arc::new(AppState {
        conversations: ConversationManager::new(Dispatcher::new(Arc::new(runtime))),
    });

    let app = Router::new()
        .route("/conversations", post(start_conversation))
        .route(
            "/conversations/:id",
            get(get_conversation).delete(end_conversation),
        )
        .route("/conversations/:id/turns", post(post_turn))
        .route("/health", get(|| async { "OK" }))
        .with_state(state);

    tracing::info!("Tripdesk server: http://{}", bind);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
