use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::middleware;
use axum::routing::{get, patch, post};
use axum::{Extension, Router};
use deadpool_sqlite::Pool;
use std::sync::Arc;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::middleware::{require_admin, require_key_or_user, require_user};
use crate::auth::{self, AuthState};
use crate::config::AppConfig;
use crate::ingest::handler::{self as ingest_handler, IngestState};
use crate::metrics::{handler as metrics_handler, MetricsState};
use crate::query::handler::{self as query_handler, QueryState};
use crate::{account, admin};

/// Largest accepted usage event body.
const MAX_EVENT_BYTES: usize = 256 * 1024;

/// Assemble the full HTTP surface. Shared by `pulse serve` and the
/// integration tests.
pub fn build_router(
    config: &AppConfig,
    pool: Pool,
) -> Result<Router, Box<dyn std::error::Error>> {
    let auth_state = Arc::new(AuthState::new(&config.auth, pool.clone()));
    let metrics_state = Arc::new(MetricsState::new(pool.clone(), config.metrics.cache_ttl_secs));
    let query_state = Arc::new(QueryState { pool: pool.clone() });
    let ingest_state = Arc::new(IngestState { pool: pool.clone() });
    let shared_pool = Arc::new(pool);

    // ── Auth routes (public, optionally rate-limited) ──
    let mut auth_routes = Router::new()
        .route("/api/auth/register", post(auth::handler::register))
        .route("/api/auth/login", post(auth::handler::login))
        .with_state(auth_state.clone());

    if config.rate_limit.enabled {
        let governor_conf = GovernorConfigBuilder::default()
            .key_extractor(SmartIpKeyExtractor)
            .per_second(config.rate_limit.per_second)
            .burst_size(config.rate_limit.burst_size)
            .finish()
            .ok_or("invalid rate_limit settings: per_second and burst_size must be non-zero")?;
        auth_routes = auth_routes.layer(GovernorLayer::new(governor_conf));
    }

    let me_route = Router::new()
        .route("/api/auth/me", get(auth::handler::me))
        .route_layer(middleware::from_fn(require_user));

    // ── API key management (JWT + admin) ──
    let key_routes = Router::new()
        .route(
            "/api/apikeys",
            post(auth::key_routes::create_key).get(auth::key_routes::list_keys),
        )
        .route(
            "/api/apikeys/{id}/disable",
            patch(auth::key_routes::disable_key),
        )
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn(require_user))
        .with_state(auth_state.clone());

    // ── Ingest (API key or JWT) ──
    let ingest_routes = Router::new()
        .route("/api/usage", post(ingest_handler::ingest_event))
        .layer(DefaultBodyLimit::max(MAX_EVENT_BYTES))
        .route_layer(middleware::from_fn(require_key_or_user))
        .with_state(ingest_state);

    // ── Usage reads ──
    let usage_user_route = Router::new()
        .route("/api/usage/user", get(query_handler::user_usage))
        .route_layer(middleware::from_fn(require_user))
        .with_state(query_state.clone());

    let usage_admin_route = Router::new()
        .route("/api/usage/admin/global", get(query_handler::global_usage))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn(require_user))
        .with_state(query_state.clone());

    let debug_route = Router::new()
        .route("/api/debug/stats", get(query_handler::debug_stats))
        .route_layer(middleware::from_fn(require_key_or_user))
        .with_state(query_state.clone());

    // ── Metrics (API key or JWT; cohorts also admin) ──
    let metrics_routes = Router::new()
        .route("/api/metrics/dau", get(metrics_handler::dau))
        .route("/api/metrics/mau", get(metrics_handler::mau))
        .route("/api/metrics/stickiness", get(metrics_handler::stickiness))
        .route(
            "/api/metrics/feature-usage",
            get(metrics_handler::feature_usage),
        )
        .route_layer(middleware::from_fn(require_key_or_user))
        .with_state(metrics_state.clone());

    let cohort_route = Router::new()
        .route("/api/metrics/cohorts", get(metrics_handler::cohorts))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn(require_key_or_user))
        .with_state(metrics_state);

    // ── Account (JWT) ──
    let account_routes = Router::new()
        .route("/api/user/dashboard", get(account::dashboard))
        .route("/api/user/subscription", get(account::subscription))
        .route("/api/user/profile", patch(account::update_profile))
        .route_layer(middleware::from_fn(require_user))
        .with_state(shared_pool.clone());

    // ── Admin (JWT + admin) ──
    let admin_routes = Router::new()
        .route("/api/admin/users", get(admin::list_users))
        .route(
            "/api/admin/users/{id}",
            get(admin::get_user).delete(admin::delete_user),
        )
        .route("/api/admin/users/{id}/role", patch(admin::update_role))
        .route("/api/admin/users/{id}/plan", patch(admin::update_plan))
        .route("/api/admin/stats/global", get(admin::global_stats))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn(require_user))
        .with_state(shared_pool);

    // ── Public ──
    let public_routes = Router::new()
        .route("/", get(query_handler::root))
        .route("/health", get(query_handler::health))
        .with_state(query_state);

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(HeaderValue::from_str(
            &config.cors.allowed_origin,
        )?))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static("x-ingest-api-key"),
        ])
        .allow_credentials(true);

    Ok(Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(me_route)
        .merge(key_routes)
        .merge(ingest_routes)
        .merge(usage_user_route)
        .merge(usage_admin_route)
        .merge(debug_route)
        .merge(metrics_routes)
        .merge(cohort_route)
        .merge(account_routes)
        .merge(admin_routes)
        .layer(Extension(auth_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}
