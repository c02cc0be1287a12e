//! HTTP API module - REST endpoints

mod combat;
mod dice;

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::combat::CombatEngine;
use crate::db::Database;
use crate::session::{SqliteDiceLog, SqliteEventLog, SqliteSessionStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub engine: Arc<CombatEngine<SqliteSessionStore, SqliteEventLog>>,
    pub store: SqliteSessionStore,
    pub events: SqliteEventLog,
    pub dice_log: SqliteDiceLog,
}

/// Build the API router
pub fn router(db: Arc<Database>) -> Router {
    let store = SqliteSessionStore::new(db.pool().clone());
    let events = SqliteEventLog::new(db.pool().clone());
    let dice_log = SqliteDiceLog::new(db.pool().clone());
    let engine = Arc::new(CombatEngine::new(store.clone(), events.clone()));

    let state = AppState {
        db,
        engine,
        store,
        events,
        dice_log,
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
        .merge(combat::router())
        .merge(dice::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn json(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            error: message.into(),
        })
    }
}

/// Root endpoint
async fn root() -> impl IntoResponse {
    Json(RootResponse {
        name: "campd",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                database: "ok",
            }),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy",
                database: "error",
            }),
        ),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
}
