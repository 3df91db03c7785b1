use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rent_shared::errors::AppResult;
use rent_shared::types::auth::AuthUser;
use rent_shared::types::{parse_id, ApiResponse};

use crate::matching::{MatchView, PotentialMatch};
use crate::routes::run_blocking;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

/// GET /users/potential-matches?limit=
pub async fn potential_matches(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<ApiResponse<Vec<PotentialMatch>>>> {
    let limit = query.limit.unwrap_or(state.config.default_limit);
    let candidates = run_blocking(&state, move |engine| engine.get_potential_matches(user.id, limit)).await?;
    Ok(Json(ApiResponse::ok(candidates)))
}

/// GET /users/matches
pub async fn my_matches(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<MatchView>>>> {
    let matches = run_blocking(&state, move |engine| engine.get_matches(user.id)).await?;
    Ok(Json(ApiResponse::ok(matches)))
}

#[derive(Debug, Serialize)]
pub struct MatchStatus {
    pub matched: bool,
}

/// GET /users/:id/match - whether the caller is matched with `id`
pub async fn match_status(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(other_id): Path<String>,
) -> AppResult<Json<ApiResponse<MatchStatus>>> {
    let other_id = parse_id(&other_id, "user")?;
    let matched = run_blocking(&state, move |engine| engine.are_matched(user.id, other_id)).await?;
    Ok(Json(ApiResponse::ok(MatchStatus { matched })))
}

#[derive(Debug, Deserialize)]
pub struct PairQuery {
    pub a: String,
    pub b: String,
}

/// GET /internal/are-matched?a=&b= (service-to-service, no auth)
pub async fn internal_are_matched(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PairQuery>,
) -> AppResult<Json<ApiResponse<MatchStatus>>> {
    let a: Uuid = parse_id(&query.a, "user")?;
    let b: Uuid = parse_id(&query.b, "user")?;
    let matched = run_blocking(&state, move |engine| engine.are_matched(a, b)).await?;
    Ok(Json(ApiResponse::ok(MatchStatus { matched })))
}
