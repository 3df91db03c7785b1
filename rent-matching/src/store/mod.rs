//! Storage seams for the matching core.
//!
//! Each trait is one collaborator the engine talks to. Both backends
//! implement all of them on a single type so that cross-cutting queries
//! (candidate search excluding liked users, match evaluation over two like
//! rows) stay one logical operation.
//!
//! All methods are blocking; async callers go through
//! [`crate::routes::run_blocking`], which bounds them by the request timeout.

use uuid::Uuid;

use rent_shared::errors::AppResult;

use crate::models::{
    Candidate, LikeTarget, Listing, ListingQuery, Match, MatchCreation, NearbyListing,
    PairKey, ProfileUpsert, RecordedLike, RevokedLike, SearchArea, TargetKind, UserProfile,
};

mod grid;
pub mod memory;
pub mod postgres;

pub use grid::GridIndex;
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Mirror of the external profile store, limited to what matching needs.
pub trait ProfileDirectory: Send + Sync {
    /// Create on first save, update display fields afterwards. Saving
    /// reactivates a deactivated profile.
    fn save_profile(&self, profile: &ProfileUpsert) -> AppResult<UserProfile>;

    /// Soft-deactivate. Likes and matches are kept. Idempotent.
    fn deactivate_profile(&self, user_id: Uuid) -> AppResult<()>;

    fn find_profile(&self, user_id: Uuid) -> AppResult<Option<UserProfile>>;

    /// Profiles for `ids`, in no particular order; unknown ids are skipped.
    fn find_profiles(&self, ids: &[Uuid]) -> AppResult<Vec<UserProfile>>;
}

/// Read access to externally ingested listings.
pub trait ListingCatalog: Send + Sync {
    /// Listings for `ids`, in no particular order; unknown ids are skipped.
    fn find_listings(&self, ids: &[Uuid]) -> AppResult<Vec<Listing>>;
}

/// Search-area geometry and listing locations.
pub trait GeoIndex: Send + Sync {
    /// Replace the user's search area. Idempotent.
    fn upsert_user_area(&self, user_id: Uuid, area: &SearchArea) -> AppResult<()>;

    fn user_area(&self, user_id: Uuid) -> AppResult<Option<SearchArea>>;

    /// Drop the user's search area. Idempotent.
    fn remove_user_area(&self, user_id: Uuid) -> AppResult<()>;

    /// Active users whose areas overlap `user_id`'s, closest centers first,
    /// ties broken by id. Excludes the caller and anyone the caller has an
    /// active like on. Empty when the caller has no area.
    fn find_overlapping_users(&self, user_id: Uuid, limit: usize) -> AppResult<Vec<Candidate>>;

    /// Listings inside the query circle and price band, nearest first.
    fn find_listings_near(&self, query: &ListingQuery) -> AppResult<Vec<NearbyListing>>;
}

/// Ledger of directional likes.
pub trait LikeStore: Send + Sync {
    /// Record `actor -> target`. Returns `created = false` when an active like
    /// already exists. Fails `InvalidTarget` on self-likes and `NotFound` when
    /// the target does not resolve.
    fn record_like(&self, actor_id: Uuid, target: LikeTarget) -> AppResult<RecordedLike>;

    fn has_active_like(&self, actor_id: Uuid, target: LikeTarget) -> AppResult<bool>;

    /// Mark the like inactive. For user targets the pair's match is retracted
    /// in the same atomic step. Idempotent.
    fn revoke_like(&self, actor_id: Uuid, target: LikeTarget) -> AppResult<RevokedLike>;

    /// Ids the actor actively likes, newest first.
    fn liked_targets(&self, actor_id: Uuid, kind: TargetKind) -> AppResult<Vec<Uuid>>;
}

/// Canonical match rows.
pub trait MatchLedger: Send + Sync {
    /// Atomically re-check that both directional likes of `pair` are active
    /// and insert the match if absent. `None` when the pair is not mutual.
    fn materialize_match(&self, pair: PairKey) -> AppResult<Option<MatchCreation>>;

    fn find_match(&self, pair: PairKey) -> AppResult<Option<Match>>;

    /// Matches `user_id` belongs to, newest first.
    fn matches_for(&self, user_id: Uuid) -> AppResult<Vec<Match>>;
}

/// Everything the engine needs from one backend.
pub trait MatchingStore: ProfileDirectory + ListingCatalog + GeoIndex + LikeStore + MatchLedger {
    /// Short name for logs and health checks.
    fn backend(&self) -> &'static str;

    /// Cheap liveness check of the underlying storage.
    fn ping(&self) -> AppResult<()>;
}
