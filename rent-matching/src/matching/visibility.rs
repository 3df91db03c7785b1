use uuid::Uuid;

use rent_shared::errors::{AppError, AppResult, ErrorCode};

use crate::matching::MatchEngine;
use crate::models::Listing;

/// Decides who may see another user's liked listings: the owner, and anyone
/// currently matched with the owner.
#[derive(Clone)]
pub struct VisibilityGate {
    engine: MatchEngine,
}

impl VisibilityGate {
    pub fn new(engine: MatchEngine) -> Self {
        Self { engine }
    }

    /// Fails with `ProfileNotFound` when either user is unknown, so "no such
    /// user" never reads as "not matched".
    pub fn can_view_liked_listings(&self, requester_id: Uuid, owner_id: Uuid) -> AppResult<bool> {
        self.engine.require_known(owner_id)?;
        if requester_id == owner_id {
            return Ok(true);
        }
        self.engine.are_matched(requester_id, owner_id)
    }

    /// The owner's liked listings, or `NotMatched` (403) when the requester
    /// may not see them. A denial is never reported as an empty list.
    pub fn liked_listings_for(&self, requester_id: Uuid, owner_id: Uuid) -> AppResult<Vec<Listing>> {
        if !self.can_view_liked_listings(requester_id, owner_id)? {
            tracing::debug!(
                requester_id = %requester_id,
                owner_id = %owner_id,
                "liked listings hidden from unmatched user"
            );
            return Err(AppError::new(
                ErrorCode::NotMatched,
                "liked listings are only visible to matched users",
            ));
        }
        self.engine.liked_listings(owner_id)
    }
}
