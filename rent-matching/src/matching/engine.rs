use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use uuid::Uuid;

use rent_shared::errors::{AppError, AppResult, ErrorCode};

use crate::models::{
    positive_limit, LikeTarget, Listing, ListingQuery, Match, NearbyListing, PairKey,
    ProfileUpsert, RecordedLike, RevokedLike, SearchArea, TargetKind, UserProfile,
};
use crate::store::MatchingStore;

/// Result of `like_user`.
#[derive(Debug, Clone, Serialize)]
pub struct LikeOutcome {
    /// A new active like was recorded (false on idempotent re-like).
    pub created: bool,
    /// Both directional likes are active and a match row exists.
    pub matched: bool,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub record: Option<Match>,
    /// This call inserted the match row. True for exactly one racing caller.
    pub match_created: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnlikeOutcome {
    pub revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retracted: Option<Match>,
}

impl From<RevokedLike> for UnlikeOutcome {
    fn from(r: RevokedLike) -> Self {
        Self {
            revoked: r.revoked,
            retracted: r.retracted,
        }
    }
}

/// A candidate profile with the distance between search-area centers.
#[derive(Debug, Clone, Serialize)]
pub struct PotentialMatch {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub distance_m: f64,
}

/// A match as seen from one member.
#[derive(Debug, Clone, Serialize)]
pub struct MatchView {
    #[serde(flatten)]
    pub record: Match,
    pub partner_id: Uuid,
}

/// Likes, candidate discovery, and match lifecycle on top of a [`MatchingStore`].
///
/// All methods block on storage; async callers hop to the blocking pool.
#[derive(Clone)]
pub struct MatchEngine {
    store: Arc<dyn MatchingStore>,
    max_limit: usize,
}

impl MatchEngine {
    pub fn new(store: Arc<dyn MatchingStore>, max_limit: usize) -> Self {
        Self {
            store,
            max_limit: max_limit.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn MatchingStore> {
        &self.store
    }

    fn clamp_limit(&self, limit: i64) -> AppResult<usize> {
        Ok(positive_limit(limit)?.min(self.max_limit))
    }

    fn require_active(&self, user_id: Uuid) -> AppResult<UserProfile> {
        match self.store.find_profile(user_id)? {
            Some(profile) if profile.is_active => Ok(profile),
            _ => Err(AppError::new(ErrorCode::ProfileNotFound, "profile not found")),
        }
    }

    /// Like `require_active`, but deactivated profiles still count.
    pub(crate) fn require_known(&self, user_id: Uuid) -> AppResult<UserProfile> {
        self.store
            .find_profile(user_id)?
            .ok_or_else(|| AppError::new(ErrorCode::ProfileNotFound, "profile not found"))
    }

    // --- profiles ---

    pub fn save_profile(&self, profile: &ProfileUpsert) -> AppResult<UserProfile> {
        let saved = self.store.save_profile(profile)?;
        tracing::debug!(user_id = %saved.id, "profile mirrored");
        Ok(saved)
    }

    pub fn deactivate_profile(&self, user_id: Uuid) -> AppResult<()> {
        self.store.deactivate_profile(user_id)?;
        tracing::info!(user_id = %user_id, "profile deactivated");
        Ok(())
    }

    // --- search areas ---

    pub fn upsert_search_area(&self, user_id: Uuid, area: SearchArea) -> AppResult<SearchArea> {
        self.require_active(user_id)?;
        self.store.upsert_user_area(user_id, &area)?;
        tracing::info!(
            user_id = %user_id,
            lat = area.center.lat,
            lon = area.center.lon,
            radius_m = area.radius_m,
            "search area saved"
        );
        Ok(area)
    }

    pub fn search_area(&self, user_id: Uuid) -> AppResult<SearchArea> {
        self.require_active(user_id)?;
        self.store
            .user_area(user_id)?
            .ok_or_else(|| AppError::not_found("no search area set"))
    }

    pub fn remove_search_area(&self, user_id: Uuid) -> AppResult<()> {
        self.require_active(user_id)?;
        self.store.remove_user_area(user_id)?;
        tracing::info!(user_id = %user_id, "search area removed");
        Ok(())
    }

    // --- user likes and matches ---

    pub fn like_user(&self, actor_id: Uuid, target_id: Uuid) -> AppResult<LikeOutcome> {
        let target = LikeTarget::User(target_id);
        target.check_actor(actor_id)?;
        self.require_active(actor_id)?;

        let recorded = self.store.record_like(actor_id, target)?;
        if recorded.created {
            counter!("rent_likes_total", "kind" => "user").increment(1);
            tracing::info!(actor_id = %actor_id, target_id = %target_id, "like recorded");
        }

        let mut outcome = LikeOutcome {
            created: recorded.created,
            matched: false,
            record: None,
            match_created: false,
        };

        if !self.store.has_active_like(target_id, LikeTarget::User(actor_id))? {
            return Ok(outcome);
        }

        let pair = PairKey::new(actor_id, target_id)?;
        if let Some(creation) = self.store.materialize_match(pair)? {
            if creation.created {
                counter!("rent_matches_created_total").increment(1);
                tracing::info!(
                    match_id = %creation.record.id,
                    user_a_id = %pair.low(),
                    user_b_id = %pair.high(),
                    "match created"
                );
            }
            outcome.matched = true;
            outcome.match_created = creation.created;
            outcome.record = Some(creation.record);
        }
        Ok(outcome)
    }

    pub fn unlike_user(&self, actor_id: Uuid, target_id: Uuid) -> AppResult<UnlikeOutcome> {
        let target = LikeTarget::User(target_id);
        target.check_actor(actor_id)?;
        self.require_active(actor_id)?;

        let revoked = self.store.revoke_like(actor_id, target)?;
        if revoked.revoked {
            tracing::info!(actor_id = %actor_id, target_id = %target_id, "like revoked");
        }
        if let Some(m) = &revoked.retracted {
            counter!("rent_matches_retracted_total").increment(1);
            tracing::info!(match_id = %m.id, retracted_by = %actor_id, "match retracted");
        }
        Ok(revoked.into())
    }

    /// Active users whose search areas overlap the caller's, nearest first.
    /// Users the caller already likes, or is matched with, are left out.
    pub fn get_potential_matches(&self, user_id: Uuid, limit: i64) -> AppResult<Vec<PotentialMatch>> {
        let limit = self.clamp_limit(limit)?;
        self.require_active(user_id)?;

        let candidates = self.store.find_overlapping_users(user_id, limit)?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let matched: HashSet<Uuid> = self
            .store
            .matches_for(user_id)?
            .iter()
            .filter_map(|m| m.partner_of(user_id))
            .collect();

        let ids: Vec<Uuid> = candidates.iter().map(|c| c.user_id).collect();
        let mut profiles: HashMap<Uuid, UserProfile> = self
            .store
            .find_profiles(&ids)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        Ok(candidates
            .into_iter()
            .filter(|c| !matched.contains(&c.user_id))
            .filter_map(|c| {
                let profile = profiles.remove(&c.user_id).filter(|p| p.is_active)?;
                Some(PotentialMatch {
                    profile,
                    distance_m: c.distance_m,
                })
            })
            .collect())
    }

    /// Symmetric; a user is never matched with themselves. Both users must
    /// be known, so an unknown id is `ProfileNotFound` rather than `false`.
    pub fn are_matched(&self, a: Uuid, b: Uuid) -> AppResult<bool> {
        self.require_known(a)?;
        if a == b {
            return Ok(false);
        }
        self.require_known(b)?;
        Ok(self.store.find_match(PairKey::new(a, b)?)?.is_some())
    }

    /// Matches `user_id` belongs to, newest first.
    pub fn get_matches(&self, user_id: Uuid) -> AppResult<Vec<MatchView>> {
        self.require_active(user_id)?;
        Ok(self
            .store
            .matches_for(user_id)?
            .into_iter()
            .filter_map(|record| {
                let partner_id = record.partner_of(user_id)?;
                Some(MatchView { record, partner_id })
            })
            .collect())
    }

    // --- listings ---

    pub fn like_listing(&self, actor_id: Uuid, listing_id: Uuid) -> AppResult<RecordedLike> {
        self.require_active(actor_id)?;
        let recorded = self.store.record_like(actor_id, LikeTarget::Listing(listing_id))?;
        if recorded.created {
            counter!("rent_likes_total", "kind" => "listing").increment(1);
            tracing::info!(actor_id = %actor_id, listing_id = %listing_id, "listing liked");
        }
        Ok(recorded)
    }

    pub fn unlike_listing(&self, actor_id: Uuid, listing_id: Uuid) -> AppResult<RevokedLike> {
        self.require_active(actor_id)?;
        self.store.revoke_like(actor_id, LikeTarget::Listing(listing_id))
    }

    /// Listings `owner_id` actively likes, most recently liked first.
    pub fn liked_listings(&self, owner_id: Uuid) -> AppResult<Vec<Listing>> {
        self.require_known(owner_id)?;

        let ids = self.store.liked_targets(owner_id, TargetKind::Listing)?;
        let mut rows: HashMap<Uuid, Listing> = self
            .store
            .find_listings(&ids)?
            .into_iter()
            .map(|l| (l.id, l))
            .collect();
        Ok(ids.iter().filter_map(|id| rows.remove(id)).collect())
    }

    pub fn listings_near(&self, mut query: ListingQuery) -> AppResult<Vec<NearbyListing>> {
        query.limit = query.limit.min(self.max_limit);
        self.store.find_listings_near(&query)
    }

    /// Listings inside the user's own search area and price band.
    pub fn listings_for_user(&self, user_id: Uuid, limit: i64) -> AppResult<Vec<NearbyListing>> {
        let limit = self.clamp_limit(limit)?;
        let area = self.search_area(user_id)?;
        self.store.find_listings_near(&ListingQuery {
            center: area.center,
            radius_m: area.radius_m,
            price: area.price,
            limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use chrono::Utc;

    use super::*;
    use crate::geo::Coordinate;
    use crate::models::PriceBand;
    use crate::store::{MemoryStore, ProfileDirectory};

    const A: Uuid = Uuid::from_u128(0xa);
    const B: Uuid = Uuid::from_u128(0xb);
    const C: Uuid = Uuid::from_u128(0xc);

    fn engine() -> (MatchEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        for id in [A, B, C] {
            store.save_profile(&ProfileUpsert::new(id)).unwrap();
        }
        (MatchEngine::new(store.clone(), 100), store)
    }

    fn area(lat: f64, lon: f64, radius_m: f64) -> SearchArea {
        SearchArea::new(Coordinate::new(lat, lon).unwrap(), radius_m, PriceBand::default()).unwrap()
    }

    #[test]
    fn close_areas_are_mutual_candidates() {
        let (engine, _) = engine();
        engine.upsert_search_area(A, area(10.0, 10.0, 1000.0)).unwrap();
        engine.upsert_search_area(B, area(10.005, 10.0, 1000.0)).unwrap();

        let for_a = engine.get_potential_matches(A, 10).unwrap();
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].profile.id, B);
        assert!((for_a[0].distance_m - 556.0).abs() < 2.0);

        let for_b = engine.get_potential_matches(B, 10).unwrap();
        assert_eq!(for_b[0].profile.id, A);
    }

    #[test]
    fn like_back_creates_match_once() {
        let (engine, _) = engine();

        let first = engine.like_user(A, B).unwrap();
        assert!(first.created && !first.matched);

        let second = engine.like_user(B, A).unwrap();
        assert!(second.created && second.matched && second.match_created);
        let record = second.record.unwrap();
        assert!(record.user_a_id < record.user_b_id);

        let repeat = engine.like_user(A, B).unwrap();
        assert!(!repeat.created);
        assert!(repeat.matched);
        assert!(!repeat.match_created);
        assert_eq!(repeat.record.unwrap().id, record.id);

        assert_eq!(engine.get_matches(A).unwrap().len(), 1);
        assert_eq!(engine.get_matches(B).unwrap()[0].partner_id, A);
    }

    #[test]
    fn self_like_is_invalid_target() {
        let (engine, _) = engine();
        let err = engine.like_user(A, A).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidTarget);

        // Even for unknown users the self check comes first.
        let ghost = Uuid::from_u128(0xdead);
        assert_eq!(engine.like_user(ghost, ghost).unwrap_err().code(), ErrorCode::InvalidTarget);
    }

    #[test]
    fn unknown_users_are_not_found() {
        let (engine, _) = engine();
        let ghost = Uuid::from_u128(0xdead);
        assert_eq!(engine.like_user(A, ghost).unwrap_err().class(), ErrorCode::NotFound);
        assert_eq!(engine.like_user(ghost, A).unwrap_err().class(), ErrorCode::NotFound);
        assert_eq!(engine.get_potential_matches(ghost, 5).unwrap_err().class(), ErrorCode::NotFound);
    }

    #[test]
    fn are_matched_is_symmetric() {
        let (engine, _) = engine();
        engine.like_user(A, B).unwrap();
        engine.like_user(B, A).unwrap();
        assert!(engine.are_matched(A, B).unwrap());
        assert!(engine.are_matched(B, A).unwrap());
        assert!(!engine.are_matched(A, C).unwrap());
        assert!(!engine.are_matched(A, A).unwrap());
    }

    #[test]
    fn are_matched_rejects_unknown_users() {
        let (engine, store) = engine();
        let ghost = Uuid::from_u128(0xdead);
        assert_eq!(engine.are_matched(A, ghost).unwrap_err().code(), ErrorCode::ProfileNotFound);
        assert_eq!(engine.are_matched(ghost, A).unwrap_err().code(), ErrorCode::ProfileNotFound);
        assert_eq!(engine.are_matched(ghost, ghost).unwrap_err().class(), ErrorCode::NotFound);

        // Deactivation hides a user from candidates, not from match lookups.
        engine.like_user(A, B).unwrap();
        engine.like_user(B, A).unwrap();
        store.deactivate_profile(B).unwrap();
        assert!(engine.are_matched(A, B).unwrap());
    }

    #[test]
    fn revocation_retracts_and_relike_rematches() {
        let (engine, _) = engine();
        engine.like_user(A, B).unwrap();
        engine.like_user(B, A).unwrap();

        let unliked = engine.unlike_user(A, B).unwrap();
        assert!(unliked.revoked);
        assert!(unliked.retracted.is_some());
        assert!(!engine.are_matched(A, B).unwrap());

        let again = engine.like_user(A, B).unwrap();
        assert!(again.created && again.matched && again.match_created);
    }

    #[test]
    fn liked_and_matched_users_leave_candidates() {
        let (engine, store) = engine();
        engine.upsert_search_area(A, area(10.0, 10.0, 1000.0)).unwrap();
        engine.upsert_search_area(B, area(10.005, 10.0, 1000.0)).unwrap();
        engine.upsert_search_area(C, area(10.006, 10.0, 1000.0)).unwrap();

        engine.like_user(A, B).unwrap();
        engine.like_user(B, A).unwrap();
        let ids: Vec<Uuid> = engine
            .get_potential_matches(A, 10)
            .unwrap()
            .into_iter()
            .map(|p| p.profile.id)
            .collect();
        assert_eq!(ids, vec![C]);

        store.deactivate_profile(C).unwrap();
        assert!(engine.get_potential_matches(A, 10).unwrap().is_empty());
    }

    #[test]
    fn non_positive_limit_rejected() {
        let (engine, _) = engine();
        assert_eq!(engine.get_potential_matches(A, 0).unwrap_err().code(), ErrorCode::InvalidArgument);
        assert_eq!(engine.listings_for_user(A, -3).unwrap_err().code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn concurrent_reciprocal_likes_make_one_match() {
        for _ in 0..50 {
            let (engine, _) = engine();
            let barrier = Barrier::new(2);

            let (ab, ba) = std::thread::scope(|s| {
                let left = s.spawn(|| {
                    barrier.wait();
                    engine.like_user(A, B).unwrap()
                });
                let right = s.spawn(|| {
                    barrier.wait();
                    engine.like_user(B, A).unwrap()
                });
                (left.join().unwrap(), right.join().unwrap())
            });

            // A caller whose reverse check ran before the other like was
            // recorded reports matched=false; the other caller then sees both
            // likes. Either way exactly one of them inserts the row.
            assert!(ab.matched || ba.matched);
            assert!(engine.are_matched(A, B).unwrap());
            assert_eq!(u8::from(ab.match_created) + u8::from(ba.match_created), 1);
            assert_eq!(engine.get_matches(A).unwrap().len(), 1);
        }
    }

    #[test]
    fn listings_for_user_use_own_area_and_band() {
        let (engine, store) = engine();
        for (id, lat, price) in [(1u128, 10.001, 1200), (2, 10.002, 5000), (3, 12.0, 1200)] {
            store
                .insert_listing(Listing {
                    id: Uuid::from_u128(id),
                    title: format!("flat {id}"),
                    description: None,
                    address: None,
                    url: None,
                    lat,
                    lon: 10.0,
                    price,
                    payload: serde_json::Value::Null,
                    published_at: Utc::now(),
                })
                .unwrap();
        }
        let band = PriceBand::new(Some(1000), Some(2000)).unwrap();
        let own = SearchArea::new(Coordinate::new(10.0, 10.0).unwrap(), 1000.0, band).unwrap();
        engine.upsert_search_area(A, own).unwrap();

        let hits = engine.listings_for_user(A, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].listing.id, Uuid::from_u128(1));

        engine.like_listing(A, Uuid::from_u128(3)).unwrap();
        engine.like_listing(A, Uuid::from_u128(1)).unwrap();
        let liked: Vec<Uuid> = engine.liked_listings(A).unwrap().into_iter().map(|l| l.id).collect();
        assert_eq!(liked.len(), 2);

        assert!(engine.unlike_listing(A, Uuid::from_u128(3)).unwrap().revoked);
        let liked: Vec<Uuid> = engine.liked_listings(A).unwrap().into_iter().map(|l| l.id).collect();
        assert_eq!(liked, vec![Uuid::from_u128(1)]);
    }
}
