//! Social Rent matching service: search-area overlap, directional likes,
//! mutual matches, and match-gated visibility of liked listings.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use rent_shared::clients::rabbitmq::RabbitMQClient;
use rent_shared::middleware::metrics_middleware;

pub mod config;
pub mod events;
pub mod geo;
pub mod matching;
pub mod models;
pub mod routes;
pub mod schema;
pub mod store;

use config::AppConfig;
use matching::{MatchEngine, VisibilityGate};
use store::MatchingStore;

pub struct AppState {
    pub engine: MatchEngine,
    pub gate: VisibilityGate,
    pub config: AppConfig,
    /// `None` when no broker is configured; events are then not published.
    pub rabbitmq: Option<RabbitMQClient>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(store: Arc<dyn MatchingStore>, config: AppConfig) -> Self {
        let engine = MatchEngine::new(store, config.max_limit);
        Self {
            gate: VisibilityGate::new(engine.clone()),
            engine,
            config,
            rabbitmq: None,
            metrics: None,
        }
    }

    pub fn with_rabbitmq(mut self, rabbitmq: RabbitMQClient) -> Self {
        self.rabbitmq = Some(rabbitmq);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        // Users: likes and matches
        .route("/users/potential-matches", get(routes::matches::potential_matches))
        .route("/users/matches", get(routes::matches::my_matches))
        .route(
            "/users/:id/like",
            post(routes::likes::like_user).delete(routes::likes::unlike_user),
        )
        .route("/users/:id/match", get(routes::matches::match_status))
        .route("/users/:id/liked-listings", get(routes::likes::user_liked_listings))
        // Listings
        .route("/listings", get(routes::listings::listings_near))
        .route("/listings/search", get(routes::listings::listings_in_my_area))
        .route("/listings/liked", get(routes::likes::my_liked_listings))
        .route(
            "/listings/:id/like",
            post(routes::likes::like_listing).delete(routes::likes::unlike_listing),
        )
        // Search area
        .route(
            "/me/search-area",
            get(routes::areas::get_search_area)
                .put(routes::areas::put_search_area)
                .delete(routes::areas::delete_search_area),
        )
        // Internal (service-to-service, no auth)
        .route("/internal/are-matched", get(routes::matches::internal_are_matched))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    use rent_shared::middleware::encode_claims_for_env;
    use rent_shared::types::auth::Claims;

    use super::*;
    use crate::models::{Listing, ProfileUpsert};
    use crate::store::{MemoryStore, ProfileDirectory};

    const ALICE: Uuid = Uuid::from_u128(0xa11ce);
    const BOB: Uuid = Uuid::from_u128(0xb0b);
    const CAROL: Uuid = Uuid::from_u128(0xca401);
    const FLAT: Uuid = Uuid::from_u128(0xf1a7);

    fn app() -> Router {
        let store = Arc::new(MemoryStore::default());
        for id in [ALICE, BOB, CAROL] {
            store.save_profile(&ProfileUpsert::new(id)).unwrap();
        }
        store
            .insert_listing(Listing {
                id: FLAT,
                title: "two rooms near the park".into(),
                description: None,
                address: None,
                url: None,
                lat: 10.001,
                lon: 10.0,
                price: 1400,
                payload: serde_json::json!({ "rooms": 2 }),
                published_at: chrono::Utc::now(),
            })
            .unwrap();
        build_router(Arc::new(AppState::new(store, AppConfig::default())))
    }

    fn token(user: Uuid) -> String {
        encode_claims_for_env(&Claims::new(user, 3600)).unwrap()
    }

    async fn call(app: &Router, method: Method, uri: &str, user: Option<Uuid>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header("authorization", format!("Bearer {}", token(user)));
        }
        let req = match body {
            Some(json) => req
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_memory_backend() {
        let app = app();
        let (status, json) = call(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["checks"][0]["name"], "memory");
    }

    #[tokio::test]
    async fn requires_bearer_token() {
        let app = app();
        let (status, _) = call(&app, Method::GET, "/users/matches", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn reciprocal_likes_match_over_http() {
        let app = app();
        let uri = |id: Uuid| format!("/users/{id}/like");

        let (status, json) = call(&app, Method::POST, &uri(BOB), Some(ALICE), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["matched"], false);

        let (_, json) = call(&app, Method::POST, &uri(ALICE), Some(BOB), None).await;
        assert_eq!(json["data"]["matched"], true);
        assert_eq!(json["data"]["match_created"], true);

        let (_, json) = call(&app, Method::GET, &format!("/users/{BOB}/match"), Some(ALICE), None).await;
        assert_eq!(json["data"]["matched"], true);

        let (_, json) = call(&app, Method::GET, &format!("/internal/are-matched?a={BOB}&b={ALICE}"), None, None).await;
        assert_eq!(json["data"]["matched"], true);

        let (_, json) = call(&app, Method::DELETE, &uri(BOB), Some(ALICE), None).await;
        assert_eq!(json["data"]["revoked"], true);
        assert!(json["data"]["retracted"].is_object());

        let (_, json) = call(&app, Method::GET, "/users/matches", Some(BOB), None).await;
        assert_eq!(json["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn self_like_is_unprocessable() {
        let app = app();
        let (status, json) = call(&app, Method::POST, &format!("/users/{ALICE}/like"), Some(ALICE), None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "E3001");
    }

    #[tokio::test]
    async fn malformed_id_is_bad_request() {
        let app = app();
        let (status, json) = call(&app, Method::POST, "/users/not-a-uuid/like", Some(ALICE), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "E0002");
    }

    #[tokio::test]
    async fn liked_listings_visible_only_after_match() {
        let app = app();
        call(&app, Method::POST, &format!("/listings/{FLAT}/like"), Some(ALICE), None).await;

        let (_, json) = call(&app, Method::GET, "/listings/liked", Some(ALICE), None).await;
        assert_eq!(json["data"][0]["id"], FLAT.to_string());
        assert_eq!(json["data"][0]["payload"]["rooms"], 2);

        let gated = format!("/users/{ALICE}/liked-listings");
        let (status, json) = call(&app, Method::GET, &gated, Some(CAROL), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"]["code"], "E3003");

        call(&app, Method::POST, &format!("/users/{ALICE}/like"), Some(CAROL), None).await;
        call(&app, Method::POST, &format!("/users/{CAROL}/like"), Some(ALICE), None).await;
        let (status, json) = call(&app, Method::GET, &gated, Some(CAROL), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_users_are_not_found_on_match_paths() {
        let app = app();
        let ghost = Uuid::from_u128(0xdead);

        let uri = format!("/internal/are-matched?a={ALICE}&b={ghost}");
        let (status, json) = call(&app, Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "E2001");

        let uri = format!("/users/{ghost}/liked-listings");
        let (status, json) = call(&app, Method::GET, &uri, Some(ALICE), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "E2001");
    }

    #[tokio::test]
    async fn search_area_round_trip_and_candidates() {
        let app = app();
        let body = |lat: f64| serde_json::json!({ "lat": lat, "lon": 10.0, "radius_m": 1000.0 });

        let (status, _) = call(&app, Method::PUT, "/me/search-area", Some(ALICE), Some(body(10.0))).await;
        assert_eq!(status, StatusCode::OK);
        call(&app, Method::PUT, "/me/search-area", Some(BOB), Some(body(10.005))).await;

        let (_, json) = call(&app, Method::GET, "/me/search-area", Some(ALICE), None).await;
        assert_eq!(json["data"]["radius_m"], 1000.0);

        let (_, json) = call(&app, Method::GET, "/users/potential-matches?limit=5", Some(ALICE), None).await;
        assert_eq!(json["data"][0]["id"], BOB.to_string());
        assert!(json["data"][0]["distance_m"].as_f64().unwrap() < 600.0);

        let (status, _) = call(&app, Method::GET, "/users/potential-matches?limit=0", Some(ALICE), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, json) = call(&app, Method::GET, "/listings/search", Some(ALICE), None).await;
        assert_eq!(json["data"][0]["id"], FLAT.to_string());

        call(&app, Method::DELETE, "/me/search-area", Some(ALICE), None).await;
        let (status, _) = call(&app, Method::GET, "/me/search-area", Some(ALICE), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_search_area_rejected() {
        let app = app();
        let body = serde_json::json!({ "lat": 95.0, "lon": 10.0, "radius_m": 1000.0 });
        let (status, _) = call(&app, Method::PUT, "/me/search-area", Some(ALICE), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let body = serde_json::json!({ "lat": 10.0, "lon": 10.0, "radius_m": 0.0 });
        let (status, json) = call(&app, Method::PUT, "/me/search-area", Some(ALICE), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "E2002");
    }

    #[tokio::test]
    async fn listings_near_filters_by_price() {
        let app = app();
        let uri = "/listings?lat=10.0&lon=10.0&radius=1000&price_min=1500";
        let (_, json) = call(&app, Method::GET, uri, Some(ALICE), None).await;
        assert_eq!(json["data"], serde_json::json!([]));

        let uri = "/listings?lat=10.0&lon=10.0&radius=1000&price_max=1500";
        let (_, json) = call(&app, Method::GET, uri, Some(ALICE), None).await;
        assert_eq!(json["data"][0]["id"], FLAT.to_string());
    }
}
