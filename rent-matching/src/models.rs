use std::fmt;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rent_shared::errors::{AppError, AppResult, ErrorCode};

use crate::geo::{self, Circle, Coordinate};
use crate::schema::{likes, listings, matches, profiles, search_areas};

// --- Profile ---

/// Profile as mirrored from the profile store. Display fields are opaque here.
#[derive(Debug, Queryable, Identifiable, Serialize, Clone, PartialEq)]
#[diesel(table_name = profiles)]
pub struct UserProfile {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub photo_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable, AsChangeset, Clone, Default)]
#[diesel(table_name = profiles)]
#[diesel(treat_none_as_null = true)]
pub struct ProfileUpsert {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub photo_url: Option<String>,
}

impl ProfileUpsert {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

// --- Search area ---

/// Optional inclusive price bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PriceBand {
    pub min: Option<i32>,
    pub max: Option<i32>,
}

impl PriceBand {
    pub fn new(min: Option<i32>, max: Option<i32>) -> AppResult<Self> {
        if min.is_some_and(|m| m < 0) || max.is_some_and(|m| m < 0) {
            return Err(AppError::invalid_argument("price bounds must not be negative"));
        }
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(AppError::invalid_argument("price_min must not exceed price_max"));
            }
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, price: i32) -> bool {
        self.min.map_or(true, |lo| price >= lo) && self.max.map_or(true, |hi| price <= hi)
    }
}

/// A user's declared region of housing interest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchArea {
    pub center: Coordinate,
    pub radius_m: f64,
    pub price: PriceBand,
}

impl SearchArea {
    pub fn new(center: Coordinate, radius_m: f64, price: PriceBand) -> AppResult<Self> {
        let radius_m = geo::validate_radius(radius_m)
            .map_err(|e| AppError::new(ErrorCode::InvalidSearchArea, e.to_string()))?;
        Ok(Self {
            center,
            radius_m,
            price,
        })
    }

    pub fn circle(&self) -> Circle {
        Circle::new(self.center, self.radius_m)
    }
}

#[derive(Debug, Queryable, Insertable, AsChangeset, Clone)]
#[diesel(table_name = search_areas)]
#[diesel(treat_none_as_null = true)]
pub struct SearchAreaRow {
    pub user_id: Uuid,
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_m: f64,
    pub price_min: Option<i32>,
    pub price_max: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

impl SearchAreaRow {
    pub fn from_area(user_id: Uuid, area: &SearchArea) -> Self {
        Self {
            user_id,
            center_lat: area.center.lat,
            center_lon: area.center.lon,
            radius_m: area.radius_m,
            price_min: area.price.min,
            price_max: area.price.max,
            updated_at: Utc::now(),
        }
    }

    /// Rows were validated on write; the check constraints keep them that way.
    pub fn to_area(&self) -> SearchArea {
        SearchArea {
            center: Coordinate {
                lat: self.center_lat,
                lon: self.center_lon,
            },
            radius_m: self.radius_m,
            price: PriceBand {
                min: self.price_min,
                max: self.price_max,
            },
        }
    }
}

// --- Listing ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone, PartialEq)]
#[diesel(table_name = listings)]
pub struct Listing {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub url: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub price: i32,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

impl Listing {
    pub fn location(&self) -> Coordinate {
        Coordinate {
            lat: self.lat,
            lon: self.lon,
        }
    }
}

/// Listing plus its distance from the query center.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NearbyListing {
    #[serde(flatten)]
    pub listing: Listing,
    pub distance_m: f64,
}

/// Point-in-circle listing search with an optional price band.
#[derive(Debug, Clone, Copy)]
pub struct ListingQuery {
    pub center: Coordinate,
    pub radius_m: f64,
    pub price: PriceBand,
    pub limit: usize,
}

impl ListingQuery {
    pub fn new(center: Coordinate, radius_m: f64, price: PriceBand, limit: i64) -> AppResult<Self> {
        Ok(Self {
            center,
            radius_m: geo::validate_radius(radius_m)?,
            price,
            limit: positive_limit(limit)?,
        })
    }

    pub fn circle(&self) -> Circle {
        Circle::new(self.center, self.radius_m)
    }
}

/// Validate a caller-supplied result limit.
pub fn positive_limit(limit: i64) -> AppResult<usize> {
    if limit <= 0 {
        return Err(AppError::invalid_argument("limit must be greater than zero"));
    }
    Ok(usize::try_from(limit).unwrap_or(usize::MAX))
}

// --- Like ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    User,
    Listing,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::User => "user",
            TargetKind::Listing => "listing",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a like points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum LikeTarget {
    User(Uuid),
    Listing(Uuid),
}

impl LikeTarget {
    pub fn id(&self) -> Uuid {
        match self {
            LikeTarget::User(id) | LikeTarget::Listing(id) => *id,
        }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            LikeTarget::User(_) => TargetKind::User,
            LikeTarget::Listing(_) => TargetKind::Listing,
        }
    }

    /// A user may like any listing, and any user but themselves.
    pub fn check_actor(&self, actor_id: Uuid) -> AppResult<()> {
        match self {
            LikeTarget::User(id) if *id == actor_id => {
                Err(AppError::invalid_target("users cannot like themselves"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Queryable, Identifiable, Serialize, Clone, PartialEq)]
#[diesel(table_name = likes)]
pub struct Like {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub target_id: Uuid,
    pub target_kind: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Like {
    pub fn new(actor_id: Uuid, target: LikeTarget) -> Self {
        Self {
            id: Uuid::now_v7(),
            actor_id,
            target_id: target.id(),
            target_kind: target.kind().as_str().to_string(),
            is_active: true,
            created_at: Utc::now(),
            revoked_at: None,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = likes)]
pub struct NewLike<'a> {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub target_id: Uuid,
    pub target_kind: &'a str,
}

/// Result of recording a like. `created` is false when an active like already existed.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedLike {
    pub like: Like,
    pub created: bool,
}

/// Result of revoking a like. `retracted` holds the match the revocation dissolved.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RevokedLike {
    pub revoked: bool,
    pub retracted: Option<Match>,
}

// --- Match ---

/// Order-independent key for an unordered pair of distinct users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    low: Uuid,
    high: Uuid,
}

impl PairKey {
    pub fn new(a: Uuid, b: Uuid) -> AppResult<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Ok(Self { low: a, high: b }),
            std::cmp::Ordering::Greater => Ok(Self { low: b, high: a }),
            std::cmp::Ordering::Equal => Err(AppError::invalid_target("a match needs two distinct users")),
        }
    }

    pub fn low(&self) -> Uuid {
        self.low
    }

    pub fn high(&self) -> Uuid {
        self.high
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.low == user_id || self.high == user_id
    }
}

#[derive(Debug, Queryable, Identifiable, Serialize, Clone, PartialEq)]
#[diesel(table_name = matches)]
pub struct Match {
    pub id: Uuid,
    pub user_a_id: Uuid,
    pub user_b_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Match {
    pub fn new(pair: PairKey) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_a_id: pair.low(),
            user_b_id: pair.high(),
            created_at: Utc::now(),
        }
    }

    /// The other member of the match, if `user_id` is a member at all.
    pub fn partner_of(&self, user_id: Uuid) -> Option<Uuid> {
        if self.user_a_id == user_id {
            Some(self.user_b_id)
        } else if self.user_b_id == user_id {
            Some(self.user_a_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = matches)]
pub struct NewMatch {
    pub id: Uuid,
    pub user_a_id: Uuid,
    pub user_b_id: Uuid,
}

impl From<PairKey> for NewMatch {
    fn from(pair: PairKey) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_a_id: pair.low(),
            user_b_id: pair.high(),
        }
    }
}

/// Outcome of the atomic insert-if-absent on a pair. Exactly one concurrent
/// caller sees `created = true`.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCreation {
    pub record: Match,
    pub created: bool,
}

/// A user whose search area overlaps the caller's.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub user_id: Uuid,
    pub distance_m: f64,
}

/// Sort by ascending distance with ties broken by id, then truncate.
pub fn rank_by_distance<T>(items: &mut Vec<T>, limit: usize, key: impl Fn(&T) -> (f64, Uuid)) {
    items.sort_by(|a, b| {
        let (da, ia) = key(a);
        let (db, ib) = key(b);
        da.total_cmp(&db).then_with(|| ia.cmp(&ib))
    });
    items.truncate(limit);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(PairKey::new(a, b).unwrap(), PairKey::new(b, a).unwrap());
        let key = PairKey::new(a, b).unwrap();
        assert!(key.low() < key.high());
    }

    #[test]
    fn pair_key_rejects_self_pair() {
        let a = Uuid::new_v4();
        assert_eq!(PairKey::new(a, a).unwrap_err().code(), ErrorCode::InvalidTarget);
    }

    #[test]
    fn self_like_only_blocked_for_users() {
        let me = Uuid::new_v4();
        assert!(LikeTarget::User(me).check_actor(me).is_err());
        assert!(LikeTarget::Listing(me).check_actor(me).is_ok());
    }

    #[test]
    fn price_band_is_inclusive() {
        let band = PriceBand::new(Some(1000), Some(2000)).unwrap();
        assert!(band.contains(1000));
        assert!(band.contains(2000));
        assert!(!band.contains(999));
        assert!(!band.contains(2001));
        assert!(PriceBand::default().contains(i32::MAX));
    }

    #[test]
    fn inverted_price_band_rejected() {
        assert!(PriceBand::new(Some(3000), Some(1000)).is_err());
        assert!(PriceBand::new(Some(-1), None).is_err());
    }

    #[test]
    fn ranking_breaks_ties_by_id() {
        let lo = Uuid::from_u128(1);
        let hi = Uuid::from_u128(2);
        let mut items = vec![(5.0, hi), (5.0, lo), (1.0, hi)];
        rank_by_distance(&mut items, 2, |(d, id)| (*d, *id));
        assert_eq!(items, vec![(1.0, hi), (5.0, lo)]);
    }

    #[test]
    fn like_target_serializes_as_tagged_union() {
        let id = Uuid::from_u128(7);
        let json = serde_json::to_value(LikeTarget::Listing(id)).unwrap();
        assert_eq!(json["kind"], "listing");
        assert_eq!(json["id"], id.to_string());
    }

    #[test]
    fn partner_lookup() {
        let pair = PairKey::new(Uuid::from_u128(1), Uuid::from_u128(2)).unwrap();
        let m = Match::new(pair);
        assert_eq!(m.partner_of(Uuid::from_u128(1)), Some(Uuid::from_u128(2)));
        assert_eq!(m.partner_of(Uuid::from_u128(3)), None);
    }
}
