//! REST API for the budget assistant engine
//!
//! Thin surface: one chat endpoint that runs the intent producer and
//! the engine, a context endpoint for external producers, and a
//! service-token-guarded ingest endpoint for externally-detected
//! pending expenses.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::engine::Engine;
use crate::models::month_key;
use crate::producer::{self, IntentProducer};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
    /// Pending-expense row this message resolves, if the caller is the
    /// ingestion follow-up flow.
    pub pending_ref: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PendingIngestRequest {
    pub user_id: String,
    pub amount: i64,
    pub concept: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
    pub producer: Arc<dyn IntentProducer>,
}

fn parse_user_id(value: &str) -> Result<Uuid, (StatusCode, Json<ApiResponse>)> {
    Uuid::parse_str(value.trim()).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!("Invalid user_id: {}", value))),
        )
    })
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "mirror_failures": state.engine.mirror().failure_count(),
        "mirror_dropped": state.engine.mirror().dropped_count(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = match parse_user_id(&req.user_id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    let message = req.message.trim();
    if message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Empty message".into())),
        );
    }

    info!("Chat message from {}", user_id);

    let month = month_key(chrono::Utc::now().date_naive());
    let window = state.engine.config().memory_window;

    let result = async {
        let context = producer::gather_context(state.engine.ledger(), user_id, &month).await?;
        let turns = state.engine.memory().recent_turns(user_id, window).await?;
        let batch = state.producer.produce(message, &context, &turns).await?;
        state
            .engine
            .handle_message(user_id, message, batch, req.pending_ref)
            .await
    }
    .await;

    match result {
        Ok(reply) => (StatusCode::OK, Json(ApiResponse::success(reply))),
        Err(e) => {
            error!("Chat handling failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(
                    "Tuve un problema técnico, inténtalo de nuevo.".into(),
                )),
            )
        }
    }
}

/// =============================
/// Context Endpoint
/// =============================

async fn context_handler(
    State(state): State<ApiState>,
    Query(query): Query<ContextQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = match parse_user_id(&query.user_id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };

    let month = month_key(chrono::Utc::now().date_naive());
    match producer::gather_context(state.engine.ledger(), user_id, &month).await {
        Ok(context) => (StatusCode::OK, Json(ApiResponse::success(context))),
        Err(e) => {
            error!("Context read failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Context read failed".into())),
            )
        }
    }
}

/// =============================
/// Pending Ingest Endpoint
/// =============================

async fn pending_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<PendingIngestRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let Some(expected) = state.engine.config().service_token.as_deref() else {
        return (
            StatusCode::FORBIDDEN,
            Json(ApiResponse::error("Service path disabled".into())),
        );
    };

    let supplied = headers
        .get("x-service-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if supplied != expected {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("Invalid service token".into())),
        );
    }

    let user_id = match parse_user_id(&req.user_id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    if req.amount <= 0 || req.concept.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                "Pending expense needs a positive amount and a concept".into(),
            )),
        );
    }

    match state
        .engine
        .ledger()
        .insert_pending_expense(user_id, req.amount, req.concept.trim())
        .await
    {
        Ok(pending) => {
            info!("Ingested pending expense {} for {}", pending.id, user_id);
            (StatusCode::OK, Json(ApiResponse::success(pending)))
        }
        Err(e) => {
            error!("Pending ingest failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Pending ingest failed".into())),
            )
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(engine: Arc<Engine>, producer: Arc<dyn IntentProducer>) -> Router {
    let state = ApiState { engine, producer };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/context", get(context_handler))
        .route("/api/pending", post(pending_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    engine: Arc<Engine>,
    producer: Arc<dyn IntentProducer>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(engine, producer);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ledger::{InMemoryLedgerStore, LedgerStore};
    use crate::memory::ConversationMemory;
    use crate::mirror::{Mirror, NullMirror};
    use crate::models::RawIntent;
    use crate::producer::MockProducer;
    use serde_json::json;

    fn test_state(config: EngineConfig, batch: Vec<RawIntent>) -> ApiState {
        let engine = Arc::new(Engine::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(ConversationMemory::in_memory()),
            Mirror::spawn(Arc::new(NullMirror), &config),
            config,
        ));
        ApiState {
            engine,
            producer: Arc::new(MockProducer::new(batch)),
        }
    }

    #[tokio::test]
    async fn chat_runs_producer_then_engine() {
        let state = test_state(
            EngineConfig::default(),
            vec![RawIntent {
                intent: Some("CREATE".into()),
                section: Some("CASA".into()),
                category: Some("Luz".into()),
                amount: Some(json!(10000)),
                ..Default::default()
            }],
        );
        let user = Uuid::new_v4();

        let (status, Json(response)) = chat_handler(
            State(state.clone()),
            Json(ChatRequest {
                user_id: user.to_string(),
                message: "Luz 10000".into(),
                pending_ref: None,
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(response.success);
        assert_eq!(
            state.engine.ledger().recent_expenses(user, 10).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn chat_rejects_bad_user_id() {
        let state = test_state(EngineConfig::default(), Vec::new());

        let (status, Json(response)) = chat_handler(
            State(state),
            Json(ChatRequest {
                user_id: "not-a-uuid".into(),
                message: "hola".into(),
                pending_ref: None,
            }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!response.success);
    }

    #[tokio::test]
    async fn pending_ingest_requires_matching_token() {
        let mut config = EngineConfig::default();
        config.service_token = Some("secreto".into());
        let state = test_state(config, Vec::new());
        let user = Uuid::new_v4();

        let mut wrong = HeaderMap::new();
        wrong.insert("x-service-token", "otro".parse().unwrap());
        let (status, _) = pending_handler(
            State(state.clone()),
            wrong,
            Json(PendingIngestRequest {
                user_id: user.to_string(),
                amount: 45_000,
                concept: "Compra Jumbo".into(),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let mut right = HeaderMap::new();
        right.insert("x-service-token", "secreto".parse().unwrap());
        let (status, Json(response)) = pending_handler(
            State(state),
            right,
            Json(PendingIngestRequest {
                user_id: user.to_string(),
                amount: 45_000,
                concept: "Compra Jumbo".into(),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(response.success);
    }

    #[tokio::test]
    async fn pending_ingest_disabled_without_configured_token() {
        let state = test_state(EngineConfig::default(), Vec::new());

        let (status, _) = pending_handler(
            State(state),
            HeaderMap::new(),
            Json(PendingIngestRequest {
                user_id: Uuid::new_v4().to_string(),
                amount: 1000,
                concept: "x".into(),
            }),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
