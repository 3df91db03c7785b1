//! Diesel/Postgres backend.
//!
//! Match evaluation takes `FOR SHARE` locks on both directional like rows
//! (canonical order) and inserts with `ON CONFLICT DO NOTHING`; revocation
//! flips the like row and deletes the match inside one transaction. Either a
//! revocation waits for an in-flight evaluation and then removes its match,
//! or the evaluation waits for the revocation and sees the inactive row.

use chrono::{DateTime, Utc};
use diesel::dsl::{self, exists, max};
use diesel::prelude::*;
use uuid::Uuid;

use rent_shared::clients::db::{checkout, DbConn, DbPool};
use rent_shared::errors::{AppError, AppResult, ErrorCode};

use crate::geo::BoundingBox;
use crate::models::{
    rank_by_distance, Candidate, Like, LikeTarget, Listing, ListingQuery, Match, MatchCreation,
    NearbyListing, NewLike, NewMatch, PairKey, ProfileUpsert, RecordedLike, RevokedLike,
    SearchArea, SearchAreaRow, TargetKind, UserProfile,
};
use crate::schema::{likes, listings, matches, profiles, search_areas};
use crate::store::{
    GeoIndex, LikeStore, ListingCatalog, MatchLedger, MatchingStore, ProfileDirectory,
};

type LikeKey = dsl::And<
    dsl::And<dsl::Eq<likes::actor_id, Uuid>, dsl::Eq<likes::target_id, Uuid>>,
    dsl::Eq<likes::target_kind, &'static str>,
>;

fn like_key(actor_id: Uuid, target: LikeTarget) -> LikeKey {
    likes::actor_id
        .eq(actor_id)
        .and(likes::target_id.eq(target.id()))
        .and(likes::target_kind.eq(target.kind().as_str()))
}

type PairFilter = dsl::And<dsl::Eq<matches::user_a_id, Uuid>, dsl::Eq<matches::user_b_id, Uuid>>;

fn pair_filter(pair: PairKey) -> PairFilter {
    matches::user_a_id
        .eq(pair.low())
        .and(matches::user_b_id.eq(pair.high()))
}

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> AppResult<DbConn> {
        checkout(&self.pool)
    }
}

fn ensure_target_exists(conn: &mut PgConnection, target: LikeTarget) -> AppResult<()> {
    let found = match target {
        LikeTarget::User(id) => diesel::select(exists(
            profiles::table
                .filter(profiles::id.eq(id))
                .filter(profiles::is_active.eq(true)),
        ))
        .get_result::<bool>(conn)?,
        LikeTarget::Listing(id) => {
            diesel::select(exists(listings::table.filter(listings::id.eq(id)))).get_result::<bool>(conn)?
        }
    };

    match (found, target) {
        (true, _) => Ok(()),
        (false, LikeTarget::User(_)) => Err(AppError::new(ErrorCode::ProfileNotFound, "profile not found")),
        (false, LikeTarget::Listing(_)) => Err(AppError::new(ErrorCode::ListingNotFound, "listing not found")),
    }
}

fn load_area(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Option<SearchArea>> {
    let row = search_areas::table
        .find(user_id)
        .first::<SearchAreaRow>(conn)
        .optional()?;
    Ok(row.map(|r| r.to_area()))
}

fn active_targets(conn: &mut PgConnection, actor_id: Uuid, kind: TargetKind) -> AppResult<Vec<Uuid>> {
    let ids = likes::table
        .filter(likes::actor_id.eq(actor_id))
        .filter(likes::target_kind.eq(kind.as_str()))
        .filter(likes::is_active.eq(true))
        .order((likes::created_at.desc(), likes::id.desc()))
        .select(likes::target_id)
        .load::<Uuid>(conn)?;
    Ok(ids)
}

impl ProfileDirectory for PgStore {
    fn save_profile(&self, profile: &ProfileUpsert) -> AppResult<UserProfile> {
        let mut conn = self.conn()?;
        let saved = diesel::insert_into(profiles::table)
            .values(profile)
            .on_conflict(profiles::id)
            .do_update()
            .set((
                profile,
                profiles::is_active.eq(true),
                profiles::updated_at.eq(Utc::now()),
            ))
            .get_result::<UserProfile>(&mut conn)?;
        Ok(saved)
    }

    fn deactivate_profile(&self, user_id: Uuid) -> AppResult<()> {
        let mut conn = self.conn()?;
        diesel::update(
            profiles::table
                .filter(profiles::id.eq(user_id))
                .filter(profiles::is_active.eq(true)),
        )
        .set((profiles::is_active.eq(false), profiles::updated_at.eq(Utc::now())))
        .execute(&mut conn)?;
        Ok(())
    }

    fn find_profile(&self, user_id: Uuid) -> AppResult<Option<UserProfile>> {
        let mut conn = self.conn()?;
        Ok(profiles::table
            .find(user_id)
            .first::<UserProfile>(&mut conn)
            .optional()?)
    }

    fn find_profiles(&self, ids: &[Uuid]) -> AppResult<Vec<UserProfile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        Ok(profiles::table
            .filter(profiles::id.eq_any(ids))
            .load::<UserProfile>(&mut conn)?)
    }
}

impl ListingCatalog for PgStore {
    fn find_listings(&self, ids: &[Uuid]) -> AppResult<Vec<Listing>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        Ok(listings::table
            .filter(listings::id.eq_any(ids))
            .load::<Listing>(&mut conn)?)
    }
}

impl GeoIndex for PgStore {
    fn upsert_user_area(&self, user_id: Uuid, area: &SearchArea) -> AppResult<()> {
        let mut conn = self.conn()?;
        let known = diesel::select(exists(profiles::table.filter(profiles::id.eq(user_id))))
            .get_result::<bool>(&mut conn)?;
        if !known {
            return Err(AppError::new(ErrorCode::ProfileNotFound, "profile not found"));
        }

        let row = SearchAreaRow::from_area(user_id, area);
        diesel::insert_into(search_areas::table)
            .values(&row)
            .on_conflict(search_areas::user_id)
            .do_update()
            .set(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    fn user_area(&self, user_id: Uuid) -> AppResult<Option<SearchArea>> {
        let mut conn = self.conn()?;
        load_area(&mut conn, user_id)
    }

    fn remove_user_area(&self, user_id: Uuid) -> AppResult<()> {
        let mut conn = self.conn()?;
        diesel::delete(search_areas::table.find(user_id)).execute(&mut conn)?;
        Ok(())
    }

    fn find_overlapping_users(&self, user_id: Uuid, limit: usize) -> AppResult<Vec<Candidate>> {
        let mut conn = self.conn()?;
        let Some(own) = load_area(&mut conn, user_id)? else {
            return Ok(Vec::new());
        };

        let widest = search_areas::table
            .inner_join(profiles::table)
            .filter(profiles::is_active.eq(true))
            .select(max(search_areas::radius_m))
            .first::<Option<f64>>(&mut conn)?
            .unwrap_or(0.0);
        let liked = active_targets(&mut conn, user_id, TargetKind::User)?;

        let mut query = search_areas::table
            .inner_join(profiles::table)
            .filter(profiles::is_active.eq(true))
            .filter(search_areas::user_id.ne(user_id))
            .select(search_areas::all_columns)
            .into_boxed();
        if !liked.is_empty() {
            query = query.filter(search_areas::user_id.ne_all(liked));
        }
        if let Some(bbox) = BoundingBox::around(&own.center, own.radius_m + widest) {
            query = query
                .filter(search_areas::center_lat.between(bbox.min_lat, bbox.max_lat))
                .filter(search_areas::center_lon.between(bbox.min_lon, bbox.max_lon));
        }
        let rows = query.load::<SearchAreaRow>(&mut conn)?;

        let own_circle = own.circle();
        let mut candidates: Vec<Candidate> = rows
            .iter()
            .map(|row| (row.user_id, row.to_area().circle()))
            .filter(|(_, other)| own_circle.overlaps(other))
            .map(|(user_id, other)| Candidate {
                user_id,
                distance_m: own.center.distance_m(&other.center),
            })
            .collect();

        rank_by_distance(&mut candidates, limit, |c| (c.distance_m, c.user_id));
        Ok(candidates)
    }

    fn find_listings_near(&self, query: &ListingQuery) -> AppResult<Vec<NearbyListing>> {
        let mut conn = self.conn()?;

        let mut sql = listings::table.into_boxed();
        if let Some(bbox) = BoundingBox::around(&query.center, query.radius_m) {
            sql = sql
                .filter(listings::lat.between(bbox.min_lat, bbox.max_lat))
                .filter(listings::lon.between(bbox.min_lon, bbox.max_lon));
        }
        if let Some(lo) = query.price.min {
            sql = sql.filter(listings::price.ge(lo));
        }
        if let Some(hi) = query.price.max {
            sql = sql.filter(listings::price.le(hi));
        }
        let rows = sql.load::<Listing>(&mut conn)?;

        let circle = query.circle();
        let mut hits: Vec<NearbyListing> = rows
            .into_iter()
            .filter(|l| circle.contains(&l.location()))
            .map(|listing| NearbyListing {
                distance_m: query.center.distance_m(&listing.location()),
                listing,
            })
            .collect();

        rank_by_distance(&mut hits, query.limit, |n| (n.distance_m, n.listing.id));
        Ok(hits)
    }
}

impl LikeStore for PgStore {
    fn record_like(&self, actor_id: Uuid, target: LikeTarget) -> AppResult<RecordedLike> {
        target.check_actor(actor_id)?;
        let mut conn = self.conn()?;

        conn.transaction::<_, AppError, _>(|conn| {
            ensure_target_exists(conn, target)?;

            let new_like = NewLike {
                id: Uuid::now_v7(),
                actor_id,
                target_id: target.id(),
                target_kind: target.kind().as_str(),
            };
            let inserted = diesel::insert_into(likes::table)
                .values(&new_like)
                .on_conflict((likes::actor_id, likes::target_id, likes::target_kind))
                .do_nothing()
                .get_result::<Like>(conn)
                .optional()?;
            if let Some(like) = inserted {
                return Ok(RecordedLike { like, created: true });
            }

            let reactivated = diesel::update(
                likes::table
                    .filter(like_key(actor_id, target))
                    .filter(likes::is_active.eq(false)),
            )
            .set((
                likes::is_active.eq(true),
                likes::revoked_at.eq(None::<DateTime<Utc>>),
                likes::created_at.eq(Utc::now()),
            ))
            .get_result::<Like>(conn)
            .optional()?;
            if let Some(like) = reactivated {
                return Ok(RecordedLike { like, created: true });
            }

            let like = likes::table
                .filter(like_key(actor_id, target))
                .first::<Like>(conn)?;
            Ok(RecordedLike { like, created: false })
        })
    }

    fn has_active_like(&self, actor_id: Uuid, target: LikeTarget) -> AppResult<bool> {
        let mut conn = self.conn()?;
        let active = diesel::select(exists(
            likes::table
                .filter(like_key(actor_id, target))
                .filter(likes::is_active.eq(true)),
        ))
        .get_result::<bool>(&mut conn)?;
        Ok(active)
    }

    fn revoke_like(&self, actor_id: Uuid, target: LikeTarget) -> AppResult<RevokedLike> {
        target.check_actor(actor_id)?;
        let mut conn = self.conn()?;

        conn.transaction::<_, AppError, _>(|conn| {
            let updated = diesel::update(
                likes::table
                    .filter(like_key(actor_id, target))
                    .filter(likes::is_active.eq(true)),
            )
            .set((likes::is_active.eq(false), likes::revoked_at.eq(Some(Utc::now()))))
            .execute(conn)?;
            if updated == 0 {
                return Ok(RevokedLike::default());
            }

            let retracted = match target {
                LikeTarget::User(other) => {
                    let pair = PairKey::new(actor_id, other)?;
                    diesel::delete(matches::table.filter(pair_filter(pair)))
                        .get_result::<Match>(conn)
                        .optional()?
                }
                LikeTarget::Listing(_) => None,
            };

            Ok(RevokedLike {
                revoked: true,
                retracted,
            })
        })
    }

    fn liked_targets(&self, actor_id: Uuid, kind: TargetKind) -> AppResult<Vec<Uuid>> {
        let mut conn = self.conn()?;
        active_targets(&mut conn, actor_id, kind)
    }
}

impl MatchLedger for PgStore {
    fn materialize_match(&self, pair: PairKey) -> AppResult<Option<MatchCreation>> {
        let mut conn = self.conn()?;

        conn.transaction::<_, AppError, _>(|conn| {
            for (actor, target) in [(pair.low(), pair.high()), (pair.high(), pair.low())] {
                let held = likes::table
                    .filter(like_key(actor, LikeTarget::User(target)))
                    .filter(likes::is_active.eq(true))
                    .select(likes::id)
                    .for_share()
                    .first::<Uuid>(conn)
                    .optional()?;
                if held.is_none() {
                    return Ok(None);
                }
            }

            let inserted = diesel::insert_into(matches::table)
                .values(&NewMatch::from(pair))
                .on_conflict((matches::user_a_id, matches::user_b_id))
                .do_nothing()
                .get_result::<Match>(conn)
                .optional()?;

            let creation = match inserted {
                Some(record) => MatchCreation { record, created: true },
                None => MatchCreation {
                    record: matches::table.filter(pair_filter(pair)).first::<Match>(conn)?,
                    created: false,
                },
            };
            Ok(Some(creation))
        })
    }

    fn find_match(&self, pair: PairKey) -> AppResult<Option<Match>> {
        let mut conn = self.conn()?;
        Ok(matches::table
            .filter(pair_filter(pair))
            .first::<Match>(&mut conn)
            .optional()?)
    }

    fn matches_for(&self, user_id: Uuid) -> AppResult<Vec<Match>> {
        let mut conn = self.conn()?;
        Ok(matches::table
            .filter(matches::user_a_id.eq(user_id).or(matches::user_b_id.eq(user_id)))
            .order((matches::created_at.desc(), matches::id.desc()))
            .load::<Match>(&mut conn)?)
    }
}

impl MatchingStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn()?;
        diesel::sql_query("SELECT 1").execute(&mut conn)?;
        Ok(())
    }
}
