//! Combat and session API endpoints
//!
//! Handlers stay thin: parse, call the engine, map errors. Lost
//! compare-and-swap races surface as `VersionConflict`; mutating
//! handlers retry a bounded number of times (the engine re-reads the
//! session on every attempt) before giving the caller a 409.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AppState, ErrorResponse};
use crate::combat::{
    should_combat_end, ActiveEffect, CombatError, Condition, Participant,
};
use crate::session::{SessionStore, StoreError};

/// Write attempts per request before returning 409
const MAX_ATTEMPTS: usize = 3;

/// Build combat router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/events", get(list_events))
        .route("/sessions/{id}/combat/start", post(start_combat))
        .route("/sessions/{id}/combat/combatants", post(add_combatant))
        .route("/sessions/{id}/combat/next-turn", post(next_turn))
        .route("/sessions/{id}/combat/damage", post(apply_damage))
        .route("/sessions/{id}/combat/heal", post(apply_healing))
        .route("/sessions/{id}/combat/conditions/add", post(add_condition))
        .route(
            "/sessions/{id}/combat/conditions/remove",
            post(remove_condition),
        )
        .route("/sessions/{id}/combat/effects", post(add_effect))
        .route("/sessions/{id}/combat/end", post(end_combat))
}

fn status_for(err: &CombatError) -> StatusCode {
    match err {
        CombatError::NoActiveCombat | CombatError::CombatAlreadyActive => StatusCode::CONFLICT,
        CombatError::NoParticipants => StatusCode::BAD_REQUEST,
        CombatError::CombatantNotFound(_) => StatusCode::NOT_FOUND,
        CombatError::Store(StoreError::SessionNotFound(_)) => StatusCode::NOT_FOUND,
        CombatError::Store(StoreError::VersionConflict { .. }) => StatusCode::CONFLICT,
        CombatError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: CombatError) -> axum::response::Response {
    (status_for(&err), ErrorResponse::json(err.to_string())).into_response()
}

fn lost_race(err: &CombatError) -> bool {
    matches!(err, CombatError::Store(StoreError::VersionConflict { .. }))
}

/// Session creation request
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
}

/// Create a new session
async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    match state.store.create(&req.name).await {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::json(e.to_string()),
        )
            .into_response(),
    }
}

/// Fetch a session with its combat snapshot
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get(&id).await {
        Ok(session) => (StatusCode::OK, Json(session)).into_response(),
        Err(StoreError::SessionNotFound(_)) => (
            StatusCode::NOT_FOUND,
            ErrorResponse::json("session not found"),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::json(e.to_string()),
        )
            .into_response(),
    }
}

/// List a session's combat events, oldest first
async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.events.for_session(&id).await {
        Ok(events) => (StatusCode::OK, Json(events)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::json(e.to_string()),
        )
            .into_response(),
    }
}

/// Combat start request
#[derive(Debug, Deserialize)]
pub struct StartCombatRequest {
    pub participants: Vec<Participant>,
}

/// Roll initiative and begin combat
async fn start_combat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StartCombatRequest>,
) -> impl IntoResponse {
    let mut rng = StdRng::from_os_rng();
    match state.engine.start_combat(&id, &req.participants, &mut rng).await {
        Ok(combat) => (StatusCode::CREATED, Json(combat)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Add a combatant to a running encounter
async fn add_combatant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(participant): Json<Participant>,
) -> impl IntoResponse {
    let mut rng = StdRng::from_os_rng();
    let mut attempt = 0;
    loop {
        match state.engine.add_combatant(&id, &participant, &mut rng).await {
            Err(e) if lost_race(&e) && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                debug!(session = %id, attempt, "write conflict, retrying");
            }
            Ok(combat) => return (StatusCode::OK, Json(combat)).into_response(),
            Err(e) => return error_response(e),
        }
    }
}

/// Advance to the next turn
async fn next_turn(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let mut attempt = 0;
    loop {
        match state.engine.next_turn(&id).await {
            Err(e) if lost_race(&e) && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                debug!(session = %id, attempt, "write conflict, retrying");
            }
            Ok(combat) => return (StatusCode::OK, Json(combat)).into_response(),
            Err(e) => return error_response(e),
        }
    }
}

/// Damage request
#[derive(Debug, Deserialize)]
pub struct DamageRequest {
    pub target_id: String,
    pub amount: i32,
    pub damage_type: Option<String>,
}

/// Damage response: the updated combatant plus whether the fight is over
#[derive(Debug, Serialize)]
pub struct DamageResponse {
    pub combatant: crate::combat::Combatant,
    pub outcome: crate::combat::CombatOutcome,
}

/// Apply damage to a combatant
async fn apply_damage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DamageRequest>,
) -> impl IntoResponse {
    let mut attempt = 0;
    loop {
        let result = state
            .engine
            .apply_damage(&id, &req.target_id, req.amount, req.damage_type.as_deref())
            .await;
        match result {
            Err(e) if lost_race(&e) && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                debug!(session = %id, attempt, "write conflict, retrying");
            }
            Ok(combatant) => {
                let outcome = match state.store.get(&id).await {
                    Ok(session) => session
                        .combat
                        .as_ref()
                        .map(should_combat_end)
                        .unwrap_or(crate::combat::CombatOutcome::Ongoing),
                    Err(_) => crate::combat::CombatOutcome::Ongoing,
                };
                return (StatusCode::OK, Json(DamageResponse { combatant, outcome }))
                    .into_response();
            }
            Err(e) => return error_response(e),
        }
    }
}

/// Healing request
#[derive(Debug, Deserialize)]
pub struct HealRequest {
    pub target_id: String,
    pub amount: i32,
}

/// Apply healing to a combatant
async fn apply_healing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<HealRequest>,
) -> impl IntoResponse {
    let mut attempt = 0;
    loop {
        match state.engine.apply_healing(&id, &req.target_id, req.amount).await {
            Err(e) if lost_race(&e) && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                debug!(session = %id, attempt, "write conflict, retrying");
            }
            Ok(combatant) => return (StatusCode::OK, Json(combatant)).into_response(),
            Err(e) => return error_response(e),
        }
    }
}

/// Condition add request
#[derive(Debug, Deserialize)]
pub struct AddConditionRequest {
    pub target_id: String,
    pub name: String,
    pub duration: Option<u32>,
}

/// Add a condition to a combatant
async fn add_condition(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AddConditionRequest>,
) -> impl IntoResponse {
    let condition = Condition {
        name: req.name,
        duration: req.duration,
    };
    let mut attempt = 0;
    loop {
        match state
            .engine
            .add_condition(&id, &req.target_id, condition.clone())
            .await
        {
            Err(e) if lost_race(&e) && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                debug!(session = %id, attempt, "write conflict, retrying");
            }
            Ok(combatant) => return (StatusCode::OK, Json(combatant)).into_response(),
            Err(e) => return error_response(e),
        }
    }
}

/// Condition removal request
#[derive(Debug, Deserialize)]
pub struct RemoveConditionRequest {
    pub target_id: String,
    pub name: String,
}

/// Remove a condition from a combatant
async fn remove_condition(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RemoveConditionRequest>,
) -> impl IntoResponse {
    let mut attempt = 0;
    loop {
        match state
            .engine
            .remove_condition(&id, &req.target_id, &req.name)
            .await
        {
            Err(e) if lost_race(&e) && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                debug!(session = %id, attempt, "write conflict, retrying");
            }
            Ok(combatant) => return (StatusCode::OK, Json(combatant)).into_response(),
            Err(e) => return error_response(e),
        }
    }
}

/// Effect add request
#[derive(Debug, Deserialize)]
pub struct AddEffectRequest {
    pub target_id: String,
    pub name: String,
    pub duration: u32,
}

/// Add a timed effect to a combatant
async fn add_effect(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AddEffectRequest>,
) -> impl IntoResponse {
    let effect = ActiveEffect {
        name: req.name,
        duration: req.duration,
    };
    let mut attempt = 0;
    loop {
        match state
            .engine
            .add_effect(&id, &req.target_id, effect.clone())
            .await
        {
            Err(e) if lost_race(&e) && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                debug!(session = %id, attempt, "write conflict, retrying");
            }
            Ok(combatant) => return (StatusCode::OK, Json(combatant)).into_response(),
            Err(e) => return error_response(e),
        }
    }
}

/// Combat end request; outcome defaults to what the state implies
#[derive(Debug, Deserialize)]
pub struct EndCombatRequest {
    pub outcome: Option<String>,
    pub summary: Option<String>,
}

/// End the encounter and clear combat state
async fn end_combat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<EndCombatRequest>,
) -> impl IntoResponse {
    let outcome = match req.outcome {
        Some(outcome) => outcome,
        None => match state.store.get(&id).await {
            Ok(session) => session
                .combat
                .as_ref()
                .map(|c| should_combat_end(c).to_string())
                .unwrap_or_else(|| "ended".to_string()),
            Err(e) => return error_response(CombatError::Store(e)),
        },
    };

    let mut attempt = 0;
    loop {
        match state
            .engine
            .end_combat(&id, &outcome, req.summary.as_deref())
            .await
        {
            Err(e) if lost_race(&e) && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                debug!(session = %id, attempt, "write conflict, retrying");
            }
            Ok(()) => {
                return (
                    StatusCode::OK,
                    Json(EndCombatResponse {
                        outcome,
                        summary: req.summary,
                    }),
                )
                    .into_response()
            }
            Err(e) => return error_response(e),
        }
    }
}

#[derive(Debug, Serialize)]
struct EndCombatResponse {
    outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
}
