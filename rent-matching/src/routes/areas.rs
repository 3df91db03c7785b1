use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use rent_shared::errors::{AppError, AppResult, ErrorCode};
use rent_shared::types::auth::AuthUser;
use rent_shared::types::ApiResponse;

use crate::geo::{Coordinate, MAX_RADIUS_M};
use crate::models::{PriceBand, SearchArea};
use crate::routes::run_blocking;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct SearchAreaRequest {
    #[validate(range(min = -90.0, max = 90.0, message = "lat must be within [-90, 90]"))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0, message = "lon must be within [-180, 180]"))]
    pub lon: f64,
    /// Checked against `MAX_RADIUS_M` when the area is built.
    pub radius_m: f64,
    #[validate(range(min = 0, message = "price_min must not be negative"))]
    pub price_min: Option<i32>,
    #[validate(range(min = 0, message = "price_max must not be negative"))]
    pub price_max: Option<i32>,
}

impl SearchAreaRequest {
    fn into_area(self) -> AppResult<SearchArea> {
        self.validate()
            .map_err(|e| AppError::new(ErrorCode::InvalidSearchArea, e.to_string()))?;
        let center = Coordinate::new(self.lat, self.lon)?;
        let price = PriceBand::new(self.price_min, self.price_max)
            .map_err(|e| AppError::new(ErrorCode::InvalidSearchArea, e.to_string()))?;
        SearchArea::new(center, self.radius_m, price)
    }
}

#[derive(Debug, Serialize)]
pub struct SearchAreaResponse {
    pub lat: f64,
    pub lon: f64,
    pub radius_m: f64,
    pub price_min: Option<i32>,
    pub price_max: Option<i32>,
    pub max_radius_m: f64,
}

impl From<SearchArea> for SearchAreaResponse {
    fn from(area: SearchArea) -> Self {
        Self {
            lat: area.center.lat,
            lon: area.center.lon,
            radius_m: area.radius_m,
            price_min: area.price.min,
            price_max: area.price.max,
            max_radius_m: MAX_RADIUS_M,
        }
    }
}

/// GET /me/search-area
pub async fn get_search_area(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<SearchAreaResponse>>> {
    let area = run_blocking(&state, move |engine| engine.search_area(user.id)).await?;
    Ok(Json(ApiResponse::ok(area.into())))
}

/// PUT /me/search-area
pub async fn put_search_area(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchAreaRequest>,
) -> AppResult<Json<ApiResponse<SearchAreaResponse>>> {
    let area = req.into_area()?;
    let saved = run_blocking(&state, move |engine| engine.upsert_search_area(user.id, area)).await?;
    Ok(Json(ApiResponse::ok_with_message(saved.into(), "search area saved")))
}

/// DELETE /me/search-area
pub async fn delete_search_area(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<()>>> {
    run_blocking(&state, move |engine| engine.remove_search_area(user.id)).await?;
    Ok(Json(ApiResponse::ok_with_message((), "search area removed")))
}
