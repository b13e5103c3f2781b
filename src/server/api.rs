use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::assistant::{Assistant, Exchange};
use crate::conversation::ExportFormat;

#[derive(Clone)]
struct AppState {
    assistant: Arc<Mutex<Assistant>>,
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    #[serde(flatten)]
    exchange: Exchange,
    total_cost: f64,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct CostReport {
    total_cost: f64,
    total_input_tokens: u64,
    total_output_tokens: u64,
    calls: usize,
    by_provider: HashMap<String, f64>,
    by_model: HashMap<String, f64>,
    warning_threshold: f64,
    hard_limit: Option<f64>,
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    message: String,
}

#[derive(Deserialize)]
struct ProviderRequest {
    provider: String,
}

#[derive(Serialize)]
struct ProviderResponse {
    provider: String,
    model: String,
    available: Vec<&'static str>,
}

#[derive(Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

pub async fn start_http_server(
    addr: &str,
    assistant: Arc<Mutex<Assistant>>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = addr.parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);

    let state = AppState { assistant };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/history", get(history_handler))
        .route("/api/clear", post(clear_handler))
        .route("/api/cost", get(cost_handler))
        .route("/api/cost/reset", post(cost_reset_handler))
        .route("/api/provider", get(provider_handler).post(switch_provider_handler))
        .route("/api/export", get(export_handler))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    let mut assistant = state.assistant.lock().await;

    if !assistant.can_spend() {
        let limit = assistant.costs().hard_limit().unwrap_or_default();
        return (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: format!(
                    "hard cost limit of ${:.2} reached; no further API calls allowed",
                    limit
                ),
            }),
        )
            .into_response();
    }

    match assistant.send(&req.message).await {
        Ok(exchange) => {
            let total_cost = assistant.costs().total_cost();
            (
                StatusCode::OK,
                Json(ChatResponse {
                    exchange,
                    total_cost,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Chat request failed: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn history_handler(State(state): State<AppState>) -> impl IntoResponse {
    let assistant = state.assistant.lock().await;
    Json(assistant.conversation().messages().to_vec())
}

async fn clear_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut assistant = state.assistant.lock().await;
    assistant.clear_conversation();
    Json(StatusResponse {
        success: true,
        message: "Conversation history cleared".to_string(),
    })
}

async fn cost_handler(State(state): State<AppState>) -> impl IntoResponse {
    let assistant = state.assistant.lock().await;
    let costs = assistant.costs();
    Json(CostReport {
        total_cost: costs.total_cost(),
        total_input_tokens: costs.total_input_tokens(),
        total_output_tokens: costs.total_output_tokens(),
        calls: costs.entries().len(),
        by_provider: costs.cost_by_provider(),
        by_model: costs.cost_by_model(),
        warning_threshold: costs.warning_threshold(),
        hard_limit: costs.hard_limit(),
    })
}

async fn cost_reset_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut assistant = state.assistant.lock().await;
    assistant.reset_costs();
    Json(StatusResponse {
        success: true,
        message: "Cost tracker reset".to_string(),
    })
}

async fn provider_handler(State(state): State<AppState>) -> impl IntoResponse {
    let assistant = state.assistant.lock().await;
    Json(ProviderResponse {
        provider: assistant.provider_name().to_string(),
        model: assistant.model(),
        available: assistant.available_providers(),
    })
}

async fn switch_provider_handler(
    State(state): State<AppState>,
    Json(req): Json<ProviderRequest>,
) -> impl IntoResponse {
    let mut assistant = state.assistant.lock().await;
    match assistant.switch_provider(&req.provider) {
        Ok(()) => Json(ProviderResponse {
            provider: assistant.provider_name().to_string(),
            model: assistant.model(),
            available: assistant.available_providers(),
        })
        .into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

async fn export_handler(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> impl IntoResponse {
    let assistant = state.assistant.lock().await;
    let format = query
        .format
        .as_deref()
        .unwrap_or("json")
        .parse::<ExportFormat>();

    match format {
        Ok(ExportFormat::Json) => Json(assistant.conversation().to_json_document()).into_response(),
        Ok(ExportFormat::Markdown) => assistant.conversation().to_markdown().into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: e })).into_response(),
    }
}
