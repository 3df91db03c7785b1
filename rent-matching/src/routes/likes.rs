use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use rent_shared::errors::AppResult;
use rent_shared::types::auth::AuthUser;
use rent_shared::types::{parse_id, ApiResponse};

use crate::events::publisher;
use crate::matching::{LikeOutcome, UnlikeOutcome};
use crate::models::{Like, LikeTarget, Listing};
use crate::routes::run_blocking;
use crate::AppState;

/// POST /users/:id/like
pub async fn like_user(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(target_id): Path<String>,
) -> AppResult<Json<ApiResponse<LikeOutcome>>> {
    let target_id = parse_id(&target_id, "user")?;
    let actor_id = user.id;

    let outcome = run_blocking(&state, move |engine| engine.like_user(actor_id, target_id)).await?;

    if let Some(rabbitmq) = &state.rabbitmq {
        if outcome.created {
            publisher::publish_like_sent(rabbitmq, actor_id, LikeTarget::User(target_id)).await;
        }
        if let (true, Some(record)) = (outcome.match_created, &outcome.record) {
            publisher::publish_match_created(rabbitmq, record, actor_id).await;
        }
    }

    Ok(Json(ApiResponse::ok(outcome)))
}

/// DELETE /users/:id/like
pub async fn unlike_user(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(target_id): Path<String>,
) -> AppResult<Json<ApiResponse<UnlikeOutcome>>> {
    let target_id = parse_id(&target_id, "user")?;
    let actor_id = user.id;

    let outcome = run_blocking(&state, move |engine| engine.unlike_user(actor_id, target_id)).await?;

    if let Some(rabbitmq) = &state.rabbitmq {
        if outcome.revoked {
            publisher::publish_like_revoked(rabbitmq, actor_id, LikeTarget::User(target_id)).await;
        }
        if let Some(record) = &outcome.retracted {
            publisher::publish_match_retracted(rabbitmq, record, actor_id).await;
        }
    }

    Ok(Json(ApiResponse::ok(outcome)))
}

#[derive(Debug, Serialize)]
pub struct ListingLikeResponse {
    pub created: bool,
    pub like: Like,
}

/// POST /listings/:id/like
pub async fn like_listing(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(listing_id): Path<String>,
) -> AppResult<Json<ApiResponse<ListingLikeResponse>>> {
    let listing_id = parse_id(&listing_id, "listing")?;
    let actor_id = user.id;

    let recorded = run_blocking(&state, move |engine| engine.like_listing(actor_id, listing_id)).await?;

    if let (true, Some(rabbitmq)) = (recorded.created, &state.rabbitmq) {
        publisher::publish_like_sent(rabbitmq, actor_id, LikeTarget::Listing(listing_id)).await;
    }

    Ok(Json(ApiResponse::ok(ListingLikeResponse {
        created: recorded.created,
        like: recorded.like,
    })))
}

#[derive(Debug, Serialize)]
pub struct ListingUnlikeResponse {
    pub revoked: bool,
}

/// DELETE /listings/:id/like
pub async fn unlike_listing(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(listing_id): Path<String>,
) -> AppResult<Json<ApiResponse<ListingUnlikeResponse>>> {
    let listing_id = parse_id(&listing_id, "listing")?;
    let actor_id = user.id;

    let revoked = run_blocking(&state, move |engine| engine.unlike_listing(actor_id, listing_id)).await?;

    if let (true, Some(rabbitmq)) = (revoked.revoked, &state.rabbitmq) {
        publisher::publish_like_revoked(rabbitmq, actor_id, LikeTarget::Listing(listing_id)).await;
    }

    Ok(Json(ApiResponse::ok(ListingUnlikeResponse {
        revoked: revoked.revoked,
    })))
}

/// GET /listings/liked - the caller's own liked listings
pub async fn my_liked_listings(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<Listing>>>> {
    let listings = run_blocking(&state, move |engine| engine.liked_listings(user.id)).await?;
    Ok(Json(ApiResponse::ok(listings)))
}

/// GET /users/:id/liked-listings - only for the owner and users matched with them
pub async fn user_liked_listings(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(owner_id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<Listing>>>> {
    let owner_id = parse_id(&owner_id, "user")?;
    let gate = state.gate.clone();

    let listings = run_blocking(&state, move |_| gate.liked_listings_for(user.id, owner_id)).await?;
    Ok(Json(ApiResponse::ok(listings)))
}
