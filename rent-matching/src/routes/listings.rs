use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use rent_shared::errors::AppResult;
use rent_shared::types::auth::AuthUser;
use rent_shared::types::ApiResponse;

use crate::geo::Coordinate;
use crate::models::{ListingQuery, NearbyListing, PriceBand};
use crate::routes::matches::LimitQuery;
use crate::routes::run_blocking;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NearQuery {
    pub lat: f64,
    pub lon: f64,
    /// Meters.
    pub radius: f64,
    pub price_min: Option<i32>,
    pub price_max: Option<i32>,
    pub limit: Option<i64>,
}

/// GET /listings?lat=&lon=&radius=&price_min=&price_max=&limit=
pub async fn listings_near(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<NearQuery>,
) -> AppResult<Json<ApiResponse<Vec<NearbyListing>>>> {
    let query = ListingQuery::new(
        Coordinate::new(q.lat, q.lon)?,
        q.radius,
        PriceBand::new(q.price_min, q.price_max)?,
        q.limit.unwrap_or(state.config.default_limit),
    )?;

    let listings = run_blocking(&state, move |engine| engine.listings_near(query)).await?;
    Ok(Json(ApiResponse::ok(listings)))
}

/// GET /listings/search?limit= - listings inside the caller's own search area
pub async fn listings_in_my_area(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<ApiResponse<Vec<NearbyListing>>>> {
    let limit = query.limit.unwrap_or(state.config.default_limit);
    let listings = run_blocking(&state, move |engine| engine.listings_for_user(user.id, limit)).await?;
    Ok(Json(ApiResponse::ok(listings)))
}
