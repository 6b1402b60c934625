use axum::extract::State;
use axum::{Extension, Json};
use deadpool_sqlite::Pool;
use serde::Serialize;
use std::sync::Arc;

use crate::auth::middleware::CurrentUser;
use crate::error::{pooled, AppResult};
use crate::types::HealthResponse;

pub struct QueryState {
    pub pool: Pool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductUsage {
    pub product_id: String,
    pub total_value: f64,
    pub count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUsageResponse {
    pub usage_by_product: Vec<ProductUsage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub total_events: f64,
    pub events_count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopProduct {
    pub product_id: String,
    pub total_value: f64,
    pub events: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalUsageResponse {
    pub totals: UsageTotals,
    pub unique_users: i64,
    pub top_products: Vec<TopProduct>,
}

#[derive(Debug, Serialize)]
pub struct DebugStats {
    pub users: i64,
    pub events: i64,
    pub apikeys: i64,
}

/// GET /api/usage/user - Usage per product for the calling user.
pub async fn user_usage(
    State(state): State<Arc<QueryState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> AppResult<Json<UserUsageResponse>> {
    let conn = pooled(&state.pool).await?;
    let usage_by_product = conn
        .interact(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT product_id, SUM(value), COUNT(*)
                 FROM usage_events
                 WHERE user_id = ?1
                 GROUP BY product_id
                 ORDER BY product_id",
            )?;
            let rows = stmt.query_map(rusqlite::params![user.id], |row| {
                Ok(ProductUsage {
                    product_id: row.get(0)?,
                    total_value: row.get(1)?,
                    count: row.get(2)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await??;

    Ok(Json(UserUsageResponse { usage_by_product }))
}

/// GET /api/usage/admin/global - Totals across all events.
pub async fn global_usage(
    State(state): State<Arc<QueryState>>,
) -> AppResult<Json<GlobalUsageResponse>> {
    let conn = pooled(&state.pool).await?;
    let response = conn
        .interact(|conn| {
            let totals = conn.query_row(
                "SELECT COALESCE(SUM(value), 0), COUNT(*) FROM usage_events",
                [],
                |row| {
                    Ok(UsageTotals {
                        total_events: row.get(0)?,
                        events_count: row.get(1)?,
                    })
                },
            )?;

            let unique_users: i64 = conn.query_row(
                "SELECT COUNT(DISTINCT user_id) FROM usage_events WHERE user_id IS NOT NULL",
                [],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT product_id, SUM(value) AS total, COUNT(*)
                 FROM usage_events
                 GROUP BY product_id
                 ORDER BY total DESC
                 LIMIT 10",
            )?;
            let top_products = stmt
                .query_map([], |row| {
                    Ok(TopProduct {
                        product_id: row.get(0)?,
                        total_value: row.get(1)?,
                        events: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok::<_, rusqlite::Error>(GlobalUsageResponse {
                totals,
                unique_users,
                top_products,
            })
        })
        .await??;

    Ok(Json(response))
}

/// GET /api/debug/stats - Row counts for a quick sanity check.
pub async fn debug_stats(State(state): State<Arc<QueryState>>) -> AppResult<Json<DebugStats>> {
    let conn = pooled(&state.pool).await?;
    let stats = conn
        .interact(|conn| {
            conn.query_row(
                "SELECT (SELECT COUNT(*) FROM users),
                        (SELECT COUNT(*) FROM usage_events),
                        (SELECT COUNT(*) FROM api_keys)",
                [],
                |row| {
                    Ok(DebugStats {
                        users: row.get(0)?,
                        events: row.get(1)?,
                        apikeys: row.get(2)?,
                    })
                },
            )
        })
        .await??;

    Ok(Json(stats))
}

/// GET /health - Health check.
pub async fn health(State(state): State<Arc<QueryState>>) -> Json<HealthResponse> {
    let db_ok = match state.pool.get().await {
        Ok(conn) => matches!(
            conn.interact(|conn| conn.execute_batch("SELECT 1")).await,
            Ok(Ok(()))
        ),
        Err(_) => false,
    };

    Json(HealthResponse {
        status: if db_ok {
            "ok".into()
        } else {
            "degraded".into()
        },
        db_ok,
    })
}

/// GET / - Liveness banner.
pub async fn root() -> &'static str {
    "API is running..."
}
