//! In-process backend.
//!
//! Tables live behind `RwLock`s; match evaluation and user-like revocation
//! additionally serialize on a striped mutex chosen by the pair key, so two
//! evaluations of the same pair never interleave with each other or with a
//! revocation. Lock order is: pair stripe, then `likes`, then `matches`.

use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use uuid::Uuid;

use rent_shared::errors::{AppError, AppResult, ErrorCode};

use crate::geo::BoundingBox;
use crate::models::{
    rank_by_distance, Candidate, Like, LikeTarget, Listing, ListingQuery, Match, MatchCreation,
    NearbyListing, PairKey, ProfileUpsert, RecordedLike, RevokedLike, SearchArea, TargetKind,
    UserProfile,
};
use crate::store::{
    GeoIndex, GridIndex, LikeStore, ListingCatalog, MatchLedger, MatchingStore, ProfileDirectory,
};

const PAIR_STRIPES: usize = 64;
const DEFAULT_CELL_DEG: f64 = 0.05;

type LikeKey = (Uuid, LikeTarget);

fn poisoned<T>(_: PoisonError<T>) -> AppError {
    AppError::unavailable("in-memory store lock poisoned")
}

fn profile_not_found() -> AppError {
    AppError::new(ErrorCode::ProfileNotFound, "profile not found")
}

#[derive(Debug)]
struct AreaTable {
    areas: HashMap<Uuid, SearchArea>,
    grid: GridIndex,
    /// Radius (as f64 bits, monotonic for positive values) -> number of areas using it.
    radii: BTreeMap<u64, usize>,
}

impl AreaTable {
    fn new(cell_deg: f64) -> Self {
        Self {
            areas: HashMap::new(),
            grid: GridIndex::new(cell_deg),
            radii: BTreeMap::new(),
        }
    }

    fn insert(&mut self, user_id: Uuid, area: SearchArea) {
        self.remove(user_id);
        self.grid.insert(user_id, area.center);
        *self.radii.entry(area.radius_m.to_bits()).or_insert(0) += 1;
        self.areas.insert(user_id, area);
    }

    fn remove(&mut self, user_id: Uuid) {
        let Some(old) = self.areas.remove(&user_id) else {
            return;
        };
        self.grid.remove(user_id);
        let key = old.radius_m.to_bits();
        if let Some(count) = self.radii.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.radii.remove(&key);
            }
        }
    }

    fn max_radius(&self) -> f64 {
        self.radii
            .last_key_value()
            .map(|(bits, _)| f64::from_bits(*bits))
            .unwrap_or(0.0)
    }
}

#[derive(Debug)]
struct ListingTable {
    rows: HashMap<Uuid, Listing>,
    grid: GridIndex,
}

/// Memory-resident [`MatchingStore`]. Used by tests and by single-node
/// deployments that select the `memory` storage backend.
#[derive(Debug)]
pub struct MemoryStore {
    profiles: RwLock<HashMap<Uuid, UserProfile>>,
    listings: RwLock<ListingTable>,
    areas: RwLock<AreaTable>,
    likes: RwLock<HashMap<LikeKey, Like>>,
    matches: RwLock<HashMap<PairKey, Match>>,
    pair_locks: Vec<Mutex<()>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_DEG)
    }
}

impl MemoryStore {
    /// `cell_deg` is the edge of a spatial grid cell in degrees.
    pub fn new(cell_deg: f64) -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            listings: RwLock::new(ListingTable {
                rows: HashMap::new(),
                grid: GridIndex::new(cell_deg),
            }),
            areas: RwLock::new(AreaTable::new(cell_deg)),
            likes: RwLock::new(HashMap::new()),
            matches: RwLock::new(HashMap::new()),
            pair_locks: (0..PAIR_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Add or replace a listing. Listings are ingested outside this service,
    /// so this is only used to seed the in-process backend.
    pub fn insert_listing(&self, listing: Listing) -> AppResult<()> {
        let mut table = self.listings.write().map_err(poisoned)?;
        table.grid.insert(listing.id, listing.location());
        table.rows.insert(listing.id, listing);
        Ok(())
    }

    fn lock_pair(&self, pair: PairKey) -> AppResult<MutexGuard<'_, ()>> {
        let mut hasher = DefaultHasher::new();
        pair.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.pair_locks.len();
        self.pair_locks[stripe].lock().map_err(poisoned)
    }

    fn is_active_profile(&self, user_id: Uuid) -> AppResult<bool> {
        Ok(self
            .profiles
            .read()
            .map_err(poisoned)?
            .get(&user_id)
            .is_some_and(|p| p.is_active))
    }

    fn ensure_target_exists(&self, target: LikeTarget) -> AppResult<()> {
        match target {
            LikeTarget::User(id) => {
                if !self.is_active_profile(id)? {
                    return Err(profile_not_found());
                }
            }
            LikeTarget::Listing(id) => {
                if !self.listings.read().map_err(poisoned)?.rows.contains_key(&id) {
                    return Err(AppError::new(ErrorCode::ListingNotFound, "listing not found"));
                }
            }
        }
        Ok(())
    }

    fn active_like_ids(&self, actor_id: Uuid, kind: TargetKind) -> AppResult<HashSet<Uuid>> {
        let likes = self.likes.read().map_err(poisoned)?;
        Ok(likes
            .values()
            .filter(|l| l.actor_id == actor_id && l.is_active && l.target_kind == kind.as_str())
            .map(|l| l.target_id)
            .collect())
    }
}

impl ProfileDirectory for MemoryStore {
    fn save_profile(&self, profile: &ProfileUpsert) -> AppResult<UserProfile> {
        let mut profiles = self.profiles.write().map_err(poisoned)?;
        let now = Utc::now();
        let saved = match profiles.entry(profile.id) {
            Entry::Occupied(mut e) => {
                let row = e.get_mut();
                row.display_name = profile.display_name.clone();
                row.bio = profile.bio.clone();
                row.photo_url = profile.photo_url.clone();
                row.is_active = true;
                row.updated_at = now;
                row.clone()
            }
            Entry::Vacant(e) => e
                .insert(UserProfile {
                    id: profile.id,
                    display_name: profile.display_name.clone(),
                    bio: profile.bio.clone(),
                    photo_url: profile.photo_url.clone(),
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                })
                .clone(),
        };
        Ok(saved)
    }

    fn deactivate_profile(&self, user_id: Uuid) -> AppResult<()> {
        let mut profiles = self.profiles.write().map_err(poisoned)?;
        if let Some(row) = profiles.get_mut(&user_id) {
            if row.is_active {
                row.is_active = false;
                row.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    fn find_profile(&self, user_id: Uuid) -> AppResult<Option<UserProfile>> {
        Ok(self.profiles.read().map_err(poisoned)?.get(&user_id).cloned())
    }

    fn find_profiles(&self, ids: &[Uuid]) -> AppResult<Vec<UserProfile>> {
        let profiles = self.profiles.read().map_err(poisoned)?;
        Ok(ids.iter().filter_map(|id| profiles.get(id).cloned()).collect())
    }
}

impl ListingCatalog for MemoryStore {
    fn find_listings(&self, ids: &[Uuid]) -> AppResult<Vec<Listing>> {
        let table = self.listings.read().map_err(poisoned)?;
        Ok(ids.iter().filter_map(|id| table.rows.get(id).cloned()).collect())
    }
}

impl GeoIndex for MemoryStore {
    fn upsert_user_area(&self, user_id: Uuid, area: &SearchArea) -> AppResult<()> {
        if !self.profiles.read().map_err(poisoned)?.contains_key(&user_id) {
            return Err(profile_not_found());
        }
        self.areas.write().map_err(poisoned)?.insert(user_id, *area);
        Ok(())
    }

    fn user_area(&self, user_id: Uuid) -> AppResult<Option<SearchArea>> {
        Ok(self.areas.read().map_err(poisoned)?.areas.get(&user_id).copied())
    }

    fn remove_user_area(&self, user_id: Uuid) -> AppResult<()> {
        self.areas.write().map_err(poisoned)?.remove(user_id);
        Ok(())
    }

    fn find_overlapping_users(&self, user_id: Uuid, limit: usize) -> AppResult<Vec<Candidate>> {
        let liked = self.active_like_ids(user_id, TargetKind::User)?;

        let nearby: Vec<(Uuid, f64)> = {
            let table = self.areas.read().map_err(poisoned)?;
            let Some(own) = table.areas.get(&user_id).copied() else {
                return Ok(Vec::new());
            };
            let reach = own.radius_m + table.max_radius();
            let bbox = BoundingBox::around(&own.center, reach);

            table
                .grid
                .within(bbox.as_ref())
                .into_iter()
                .filter(|(id, _)| *id != user_id && !liked.contains(id))
                .filter_map(|(id, center)| {
                    let other = table.areas.get(&id)?;
                    let distance = own.center.distance_m(&center);
                    (distance <= own.radius_m + other.radius_m).then_some((id, distance))
                })
                .collect()
        };

        let profiles = self.profiles.read().map_err(poisoned)?;
        let mut candidates: Vec<Candidate> = nearby
            .into_iter()
            .filter(|(id, _)| profiles.get(id).is_some_and(|p| p.is_active))
            .map(|(user_id, distance_m)| Candidate { user_id, distance_m })
            .collect();

        rank_by_distance(&mut candidates, limit, |c| (c.distance_m, c.user_id));
        Ok(candidates)
    }

    fn find_listings_near(&self, query: &ListingQuery) -> AppResult<Vec<NearbyListing>> {
        let table = self.listings.read().map_err(poisoned)?;
        let bbox = BoundingBox::around(&query.center, query.radius_m);

        let mut hits: Vec<NearbyListing> = table
            .grid
            .within(bbox.as_ref())
            .into_iter()
            .filter_map(|(id, point)| {
                let listing = table.rows.get(&id)?;
                let distance_m = query.center.distance_m(&point);
                (distance_m <= query.radius_m && query.price.contains(listing.price)).then(|| {
                    NearbyListing {
                        listing: listing.clone(),
                        distance_m,
                    }
                })
            })
            .collect();

        rank_by_distance(&mut hits, query.limit, |n| (n.distance_m, n.listing.id));
        Ok(hits)
    }
}

impl LikeStore for MemoryStore {
    fn record_like(&self, actor_id: Uuid, target: LikeTarget) -> AppResult<RecordedLike> {
        target.check_actor(actor_id)?;
        self.ensure_target_exists(target)?;

        let mut likes = self.likes.write().map_err(poisoned)?;
        let recorded = match likes.entry((actor_id, target)) {
            Entry::Occupied(mut e) => {
                let row = e.get_mut();
                if row.is_active {
                    RecordedLike {
                        like: row.clone(),
                        created: false,
                    }
                } else {
                    row.is_active = true;
                    row.revoked_at = None;
                    row.created_at = Utc::now();
                    RecordedLike {
                        like: row.clone(),
                        created: true,
                    }
                }
            }
            Entry::Vacant(e) => RecordedLike {
                like: e.insert(Like::new(actor_id, target)).clone(),
                created: true,
            },
        };
        Ok(recorded)
    }

    fn has_active_like(&self, actor_id: Uuid, target: LikeTarget) -> AppResult<bool> {
        Ok(self
            .likes
            .read()
            .map_err(poisoned)?
            .get(&(actor_id, target))
            .is_some_and(|l| l.is_active))
    }

    fn revoke_like(&self, actor_id: Uuid, target: LikeTarget) -> AppResult<RevokedLike> {
        target.check_actor(actor_id)?;

        let _guard = match target {
            LikeTarget::User(other) => Some(self.lock_pair(PairKey::new(actor_id, other)?)?),
            LikeTarget::Listing(_) => None,
        };

        let mut likes = self.likes.write().map_err(poisoned)?;
        let Some(row) = likes.get_mut(&(actor_id, target)).filter(|l| l.is_active) else {
            return Ok(RevokedLike::default());
        };
        row.is_active = false;
        row.revoked_at = Some(Utc::now());

        let retracted = match target {
            LikeTarget::User(other) => {
                let pair = PairKey::new(actor_id, other)?;
                self.matches.write().map_err(poisoned)?.remove(&pair)
            }
            LikeTarget::Listing(_) => None,
        };

        Ok(RevokedLike {
            revoked: true,
            retracted,
        })
    }

    fn liked_targets(&self, actor_id: Uuid, kind: TargetKind) -> AppResult<Vec<Uuid>> {
        let likes = self.likes.read().map_err(poisoned)?;
        let mut rows: Vec<&Like> = likes
            .values()
            .filter(|l| l.actor_id == actor_id && l.is_active && l.target_kind == kind.as_str())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(rows.into_iter().map(|l| l.target_id).collect())
    }
}

impl MatchLedger for MemoryStore {
    fn materialize_match(&self, pair: PairKey) -> AppResult<Option<MatchCreation>> {
        let _guard = self.lock_pair(pair)?;

        let mutual = {
            let likes = self.likes.read().map_err(poisoned)?;
            let active = |actor: Uuid, target: Uuid| {
                likes
                    .get(&(actor, LikeTarget::User(target)))
                    .is_some_and(|l| l.is_active)
            };
            active(pair.low(), pair.high()) && active(pair.high(), pair.low())
        };
        if !mutual {
            return Ok(None);
        }

        let mut matches = self.matches.write().map_err(poisoned)?;
        let creation = match matches.entry(pair) {
            Entry::Occupied(e) => MatchCreation {
                record: e.get().clone(),
                created: false,
            },
            Entry::Vacant(e) => MatchCreation {
                record: e.insert(Match::new(pair)).clone(),
                created: true,
            },
        };
        Ok(Some(creation))
    }

    fn find_match(&self, pair: PairKey) -> AppResult<Option<Match>> {
        Ok(self.matches.read().map_err(poisoned)?.get(&pair).cloned())
    }

    fn matches_for(&self, user_id: Uuid) -> AppResult<Vec<Match>> {
        let matches = self.matches.read().map_err(poisoned)?;
        let mut rows: Vec<Match> = matches
            .iter()
            .filter(|(pair, _)| pair.contains(user_id))
            .map(|(_, m)| m.clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(rows)
    }
}

impl MatchingStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn ping(&self) -> AppResult<()> {
        let _matches = self.matches.read().map_err(poisoned)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;
    use crate::geo::Coordinate;
    use crate::models::PriceBand;

    fn store_with_users(n: u128) -> MemoryStore {
        let store = MemoryStore::default();
        for i in 1..=n {
            store.save_profile(&ProfileUpsert::new(Uuid::from_u128(i))).unwrap();
        }
        store
    }

    fn area(lat: f64, lon: f64, radius_m: f64) -> SearchArea {
        SearchArea::new(Coordinate::new(lat, lon).unwrap(), radius_m, PriceBand::default()).unwrap()
    }

    fn listing(id: u128, lat: f64, lon: f64, price: i32) -> Listing {
        Listing {
            id: Uuid::from_u128(id),
            title: format!("listing {id}"),
            description: None,
            address: None,
            url: None,
            lat,
            lon,
            price,
            payload: serde_json::json!({}),
            published_at: Utc::now(),
        }
    }

    #[test]
    fn relike_is_idempotent_and_revoke_reactivates() {
        let store = store_with_users(2);
        let (a, b) = (Uuid::from_u128(1), Uuid::from_u128(2));

        assert!(store.record_like(a, LikeTarget::User(b)).unwrap().created);
        assert!(!store.record_like(a, LikeTarget::User(b)).unwrap().created);

        assert!(store.revoke_like(a, LikeTarget::User(b)).unwrap().revoked);
        assert!(!store.revoke_like(a, LikeTarget::User(b)).unwrap().revoked);
        assert!(!store.has_active_like(a, LikeTarget::User(b)).unwrap());

        let again = store.record_like(a, LikeTarget::User(b)).unwrap();
        assert!(again.created);
        assert!(again.like.revoked_at.is_none());
    }

    #[test]
    fn unknown_or_self_targets_rejected() {
        let store = store_with_users(1);
        let a = Uuid::from_u128(1);

        let err = store.record_like(a, LikeTarget::User(a)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidTarget);

        let err = store.record_like(a, LikeTarget::User(Uuid::from_u128(99))).unwrap_err();
        assert_eq!(err.class(), ErrorCode::NotFound);

        let err = store.record_like(a, LikeTarget::Listing(Uuid::from_u128(99))).unwrap_err();
        assert_eq!(err.class(), ErrorCode::NotFound);
    }

    #[test]
    fn overlapping_users_sorted_and_filtered() {
        let store = store_with_users(5);
        let me = Uuid::from_u128(1);
        store.upsert_user_area(me, &area(10.0, 10.0, 1000.0)).unwrap();
        store.upsert_user_area(Uuid::from_u128(2), &area(10.01, 10.0, 1000.0)).unwrap();
        store.upsert_user_area(Uuid::from_u128(3), &area(10.005, 10.0, 1000.0)).unwrap();
        store.upsert_user_area(Uuid::from_u128(4), &area(10.5, 10.0, 1000.0)).unwrap();
        // Far away but with a radius large enough to reach us.
        store.upsert_user_area(Uuid::from_u128(5), &area(10.3, 10.0, 40_000.0)).unwrap();

        let ids: Vec<Uuid> = store
            .find_overlapping_users(me, 10)
            .unwrap()
            .into_iter()
            .map(|c| c.user_id)
            .collect();
        assert_eq!(ids, vec![Uuid::from_u128(3), Uuid::from_u128(2), Uuid::from_u128(5)]);

        store.record_like(me, LikeTarget::User(Uuid::from_u128(3))).unwrap();
        store.deactivate_profile(Uuid::from_u128(2)).unwrap();
        let ids: Vec<Uuid> = store
            .find_overlapping_users(me, 10)
            .unwrap()
            .into_iter()
            .map(|c| c.user_id)
            .collect();
        assert_eq!(ids, vec![Uuid::from_u128(5)]);
    }

    #[test]
    fn caller_without_area_gets_nothing() {
        let store = store_with_users(2);
        store.upsert_user_area(Uuid::from_u128(2), &area(0.0, 0.0, 1000.0)).unwrap();
        assert!(store.find_overlapping_users(Uuid::from_u128(1), 5).unwrap().is_empty());
    }

    #[test]
    fn area_for_unknown_user_is_not_found() {
        let store = MemoryStore::default();
        let err = store.upsert_user_area(Uuid::from_u128(1), &area(0.0, 0.0, 10.0)).unwrap_err();
        assert_eq!(err.class(), ErrorCode::NotFound);
    }

    #[test]
    fn removing_area_shrinks_reach() {
        let store = store_with_users(3);
        store.upsert_user_area(Uuid::from_u128(1), &area(10.0, 10.0, 500.0)).unwrap();
        store.upsert_user_area(Uuid::from_u128(2), &area(10.5, 10.0, 60_000.0)).unwrap();
        assert_eq!(store.find_overlapping_users(Uuid::from_u128(1), 5).unwrap().len(), 1);

        store.remove_user_area(Uuid::from_u128(2)).unwrap();
        assert!(store.areas.read().unwrap().max_radius() == 500.0);
        assert!(store.find_overlapping_users(Uuid::from_u128(1), 5).unwrap().is_empty());
    }

    #[test]
    fn listings_respect_radius_and_price_band() {
        let store = MemoryStore::default();
        store.insert_listing(listing(1, 10.001, 10.0, 1500)).unwrap();
        store.insert_listing(listing(2, 10.002, 10.0, 3000)).unwrap();
        store.insert_listing(listing(3, 11.0, 10.0, 1000)).unwrap();

        let center = Coordinate::new(10.0, 10.0).unwrap();
        let band = PriceBand::new(Some(1000), Some(2000)).unwrap();
        let hits = store
            .find_listings_near(&ListingQuery::new(center, 1000.0, band, 10).unwrap())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].listing.id, Uuid::from_u128(1));

        let all = store
            .find_listings_near(&ListingQuery::new(center, 1000.0, PriceBand::default(), 10).unwrap())
            .unwrap();
        let ids: Vec<Uuid> = all.iter().map(|n| n.listing.id).collect();
        assert_eq!(ids, vec![Uuid::from_u128(1), Uuid::from_u128(2)]);
    }

    #[test]
    fn listing_limit_applies_after_price_filter() {
        let store = MemoryStore::default();
        // Nearest listing is out of budget; the one behind it is not.
        store.insert_listing(listing(1, 10.001, 10.0, 4000)).unwrap();
        store.insert_listing(listing(2, 10.003, 10.0, 1200)).unwrap();

        let center = Coordinate::new(10.0, 10.0).unwrap();
        let band = PriceBand::new(None, Some(2000)).unwrap();
        let hits = store
            .find_listings_near(&ListingQuery::new(center, 1000.0, band, 1).unwrap())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].listing.id, Uuid::from_u128(2));
    }

    #[test]
    fn materialize_requires_both_directions() {
        let store = store_with_users(2);
        let (a, b) = (Uuid::from_u128(1), Uuid::from_u128(2));
        let pair = PairKey::new(a, b).unwrap();

        store.record_like(a, LikeTarget::User(b)).unwrap();
        assert!(store.materialize_match(pair).unwrap().is_none());

        store.record_like(b, LikeTarget::User(a)).unwrap();
        assert!(store.materialize_match(pair).unwrap().unwrap().created);
        assert!(!store.materialize_match(pair).unwrap().unwrap().created);
        assert_eq!(store.matches_for(a).unwrap().len(), 1);

        let revoked = store.revoke_like(b, LikeTarget::User(a)).unwrap();
        assert!(revoked.retracted.is_some());
        assert!(store.find_match(pair).unwrap().is_none());
    }

    #[test]
    fn concurrent_materialize_creates_once() {
        let store = store_with_users(2);
        let (a, b) = (Uuid::from_u128(1), Uuid::from_u128(2));
        store.record_like(a, LikeTarget::User(b)).unwrap();
        store.record_like(b, LikeTarget::User(a)).unwrap();
        let pair = PairKey::new(a, b).unwrap();

        let barrier = Barrier::new(8);
        let created: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        store.materialize_match(pair).unwrap().unwrap().created
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap() as usize).sum()
        });
        assert_eq!(created, 1);
    }

    #[test]
    fn liked_listings_newest_first() {
        let store = store_with_users(1);
        let me = Uuid::from_u128(1);
        store.insert_listing(listing(10, 0.0, 0.0, 100)).unwrap();
        store.insert_listing(listing(11, 0.0, 0.0, 100)).unwrap();

        store.record_like(me, LikeTarget::Listing(Uuid::from_u128(10))).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.record_like(me, LikeTarget::Listing(Uuid::from_u128(11))).unwrap();

        assert_eq!(
            store.liked_targets(me, TargetKind::Listing).unwrap(),
            vec![Uuid::from_u128(11), Uuid::from_u128(10)]
        );
        assert!(store.liked_targets(me, TargetKind::User).unwrap().is_empty());
    }
}
