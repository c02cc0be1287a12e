//! Dice API endpoints
//!
//! Stateless rolls over the dice subsystem. Rolls carrying roller
//! identity are written to the audit log.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;

use super::{AppState, ErrorResponse};
use crate::dice::{
    roll_ability_scores_with, roll_attack_with, roll_damage_with, roll_saving_throw_with,
    roll_skill_check_with, AttackOptions, DiceExpression, RollOptions,
};

/// Build dice router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dice/roll", post(roll))
        .route("/dice/attack", post(attack))
        .route("/dice/damage", post(damage))
        .route("/dice/save", post(saving_throw))
        .route("/dice/check", post(skill_check))
        .route("/dice/ability-scores", post(ability_scores))
        .route("/sessions/{id}/rolls", get(session_rolls))
}

/// Free-form roll request
#[derive(Debug, Deserialize)]
pub struct RollRequest {
    pub expression: String,
    #[serde(default)]
    pub advantage: bool,
    #[serde(default)]
    pub disadvantage: bool,
    pub roller_id: Option<String>,
    pub roller_name: Option<String>,
    pub reason: Option<String>,
    pub session_id: Option<String>,
}

/// Roll a dice expression
async fn roll(State(state): State<AppState>, Json(req): Json<RollRequest>) -> impl IntoResponse {
    let expr = match DiceExpression::parse(&req.expression) {
        Ok(expr) => expr,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, ErrorResponse::json(e.to_string())).into_response()
        }
    };

    let opts = RollOptions {
        advantage: req.advantage,
        disadvantage: req.disadvantage,
    };
    let mut rng = StdRng::from_os_rng();
    let result = expr.roll_with_options(opts, &mut rng);

    // Identified rolls go to the audit log
    if let (Some(roller_id), Some(roller_name)) = (&req.roller_id, &req.roller_name) {
        let reason = req.reason.as_deref().unwrap_or("roll");
        let record = result.clone().into_record(roller_id, roller_name, reason);
        if let Err(e) = state
            .dice_log
            .log_roll(req.session_id.as_deref(), &record)
            .await
        {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::json(e.to_string()),
            )
                .into_response();
        }
    }

    (StatusCode::OK, Json(result)).into_response()
}

/// Attack roll request
#[derive(Debug, Deserialize)]
pub struct AttackRequest {
    #[serde(default)]
    pub modifier: i32,
    pub target_ac: i32,
    #[serde(default)]
    pub advantage: bool,
    #[serde(default)]
    pub disadvantage: bool,
    pub critical_range: Option<u32>,
}

/// Roll an attack against an armor class
async fn attack(Json(req): Json<AttackRequest>) -> impl IntoResponse {
    let opts = AttackOptions {
        advantage: req.advantage,
        disadvantage: req.disadvantage,
        critical_range: req.critical_range.unwrap_or(20),
    };
    let mut rng = StdRng::from_os_rng();
    Json(roll_attack_with(&mut rng, req.modifier, req.target_ac, opts))
}

/// Damage roll request
#[derive(Debug, Deserialize)]
pub struct DamageRollRequest {
    pub expression: String,
    pub damage_type: String,
    #[serde(default)]
    pub critical: bool,
}

/// Roll damage, doubling dice on a critical
async fn damage(Json(req): Json<DamageRollRequest>) -> impl IntoResponse {
    let mut rng = StdRng::from_os_rng();
    match roll_damage_with(&mut rng, &req.expression, &req.damage_type, req.critical) {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, ErrorResponse::json(e.to_string())).into_response(),
    }
}

/// Saving throw request
#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    #[serde(default)]
    pub modifier: i32,
    pub dc: i32,
    #[serde(default)]
    pub advantage: bool,
    #[serde(default)]
    pub disadvantage: bool,
}

/// Roll a saving throw against a DC
async fn saving_throw(Json(req): Json<SaveRequest>) -> impl IntoResponse {
    let opts = RollOptions {
        advantage: req.advantage,
        disadvantage: req.disadvantage,
    };
    let mut rng = StdRng::from_os_rng();
    Json(roll_saving_throw_with(&mut rng, req.modifier, req.dc, opts))
}

/// Skill check request; DC is optional
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    #[serde(default)]
    pub modifier: i32,
    pub dc: Option<i32>,
    #[serde(default)]
    pub advantage: bool,
    #[serde(default)]
    pub disadvantage: bool,
}

/// Roll a skill check, judged only when a DC is supplied
async fn skill_check(Json(req): Json<CheckRequest>) -> impl IntoResponse {
    let opts = RollOptions {
        advantage: req.advantage,
        disadvantage: req.disadvantage,
    };
    let mut rng = StdRng::from_os_rng();
    Json(roll_skill_check_with(&mut rng, req.modifier, req.dc, opts))
}

/// Roll a full set of six ability scores (4d6 drop lowest)
async fn ability_scores() -> impl IntoResponse {
    let mut rng = StdRng::from_os_rng();
    Json(roll_ability_scores_with(&mut rng))
}

#[derive(Debug, Deserialize)]
pub struct RollsQuery {
    pub limit: Option<i64>,
}

/// Recent logged rolls for a session, newest first
async fn session_rolls(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RollsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    match state.dice_log.for_session(&id, limit).await {
        Ok(rolls) => (StatusCode::OK, Json(rolls)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::json(e.to_string()),
        )
            .into_response(),
    }
}
