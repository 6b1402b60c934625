use axum::extract::{Query, State};
use axum::Json;
use chrono::{Duration, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::cache::MetricsCache;
use super::cohort::{self, DAY_FORMAT, RETENTION_DAYS};
use super::queries;
use super::types::*;
use super::MetricsState;
use crate::error::{pooled, AppError, AppResult};

/// Serve from the response cache when possible, otherwise compute and store.
macro_rules! cached_or_compute {
    ($state:expr, $endpoint:expr, $window:expr, $compute:expr) => {{
        let key = MetricsCache::cache_key($endpoint, $window);
        if let Some(cached) = $state.cache.get(&key) {
            let val: serde_json::Value = serde_json::from_str(&cached)
                .map_err(|e| AppError::Internal(format!("cache deserialize: {e}")))?;
            return Ok(Json(val));
        }
        let result = $compute;
        let val = serde_json::to_value(&result)
            .map_err(|e| AppError::Internal(format!("serialize: {e}")))?;
        $state.cache.insert(key, val.to_string());
        Ok(Json(val))
    }};
}

/// GET /api/metrics/dau?days=N
pub async fn dau(
    State(state): State<Arc<MetricsState>>,
    Query(qp): Query<MetricsQueryParams>,
) -> AppResult<Json<serde_json::Value>> {
    let days = qp.dau_days();

    cached_or_compute!(state, "dau", days, {
        let end = Utc::now();
        let start = cohort::window_start(end, days);
        let (start_ms, end_ms) = (start.timestamp_millis(), end.timestamp_millis());

        let conn = pooled(&state.pool).await?;
        let counts = conn
            .interact(move |conn| {
                let mut stmt = conn.prepare(queries::DAILY_ACTIVE_SQL)?;
                let rows = stmt.query_map(rusqlite::params![start_ms, end_ms], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                rows.collect::<Result<HashMap<_, _>, _>>()
            })
            .await??;

        DauResponse {
            data: cohort::fill_days(&cohort::days_between(start, end), &counts),
        }
    })
}

/// GET /api/metrics/mau?months=N
pub async fn mau(
    State(state): State<Arc<MetricsState>>,
    Query(qp): Query<MetricsQueryParams>,
) -> AppResult<Json<serde_json::Value>> {
    let months = qp.months();

    cached_or_compute!(state, "mau", months, {
        let end = Utc::now();
        let start = cohort::month_window_start(end, months);
        let mau = count_active(&state, start.timestamp_millis(), end.timestamp_millis()).await?;
        MauResponse { mau }
    })
}

/// GET /api/metrics/stickiness - average DAU over MAU for the last 30 days.
pub async fn stickiness(
    State(state): State<Arc<MetricsState>>,
) -> AppResult<Json<serde_json::Value>> {
    cached_or_compute!(state, "stickiness", STICKINESS_WINDOW_DAYS, {
        let end = Utc::now();
        let start = end - Duration::days(STICKINESS_WINDOW_DAYS);
        let (start_ms, end_ms) = (start.timestamp_millis(), end.timestamp_millis());

        let conn = pooled(&state.pool).await?;
        let daily = conn
            .interact(move |conn| {
                let mut stmt = conn.prepare(queries::DAILY_ACTIVE_SQL)?;
                let rows = stmt.query_map(rusqlite::params![start_ms, end_ms], |row| {
                    row.get::<_, i64>(1)
                })?;
                rows.collect::<Result<Vec<_>, _>>()
            })
            .await??;
        drop(conn);

        let avg_dau = cohort::average_active(&daily);
        let mau = count_active(&state, start_ms, end_ms).await?;
        StickinessResponse {
            avg_dau,
            mau,
            stickiness: cohort::stickiness(avg_dau, mau),
        }
    })
}

/// GET /api/metrics/feature-usage
pub async fn feature_usage(
    State(state): State<Arc<MetricsState>>,
) -> AppResult<Json<serde_json::Value>> {
    cached_or_compute!(state, "feature-usage", 0, {
        let conn = pooled(&state.pool).await?;
        let features = conn
            .interact(|conn| {
                let mut stmt = conn.prepare(queries::FEATURE_USAGE_SQL)?;
                let rows = stmt.query_map([], |row| {
                    Ok(FeatureUsage {
                        event_type: row.get(0)?,
                        total: row.get(1)?,
                        count: row.get(2)?,
                    })
                })?;
                rows.collect::<Result<Vec<_>, _>>()
            })
            .await??;

        FeatureUsageResponse { features }
    })
}

/// GET /api/metrics/cohorts?days=N - Day 0/1/7/30 retention per signup day.
pub async fn cohorts(
    State(state): State<Arc<MetricsState>>,
    Query(qp): Query<MetricsQueryParams>,
) -> AppResult<Json<serde_json::Value>> {
    let days = qp.cohort_days();

    cached_or_compute!(state, "cohorts", days, {
        let end = Utc::now();
        let start = cohort::window_start(end, days);
        let signup_from = start.timestamp_millis();
        let signup_to = end.timestamp_millis();
        // Activity can matter from the first cohort day up to the end of the
        // last offset window of the newest cohort.
        let activity_from = cohort::start_of_day(start).timestamp_millis();
        let last_offset = RETENTION_DAYS[RETENTION_DAYS.len() - 1];
        let activity_to =
            (cohort::start_of_day(end) + Duration::days(last_offset + 1)).timestamp_millis();

        let conn = pooled(&state.pool).await?;
        let (members, pairs) = conn
            .interact(move |conn| {
                let mut stmt = conn.prepare(queries::COHORT_MEMBERS_SQL)?;
                let members = stmt
                    .query_map(rusqlite::params![signup_from, signup_to], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut stmt = conn.prepare(queries::COHORT_ACTIVITY_SQL)?;
                let pairs = stmt
                    .query_map(
                        rusqlite::params![signup_from, signup_to, activity_from, activity_to],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                    )?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok::<_, rusqlite::Error>((members, pairs))
            })
            .await??;

        let members = members
            .into_iter()
            .map(|(id, day)| Ok((id, parse_day(&day)?)))
            .collect::<AppResult<Vec<_>>>()?;

        let mut activity: HashMap<String, HashSet<NaiveDate>> = HashMap::new();
        for (user_id, day) in pairs {
            let day = parse_day(&day)?;
            activity.entry(user_id).or_default().insert(day);
        }

        tracing::debug!(
            days,
            members = members.len(),
            active_users = activity.len(),
            "cohort retention computed"
        );

        CohortResponse {
            cohorts: cohort::build_cohorts(&members, &activity),
            retention_days: RETENTION_DAYS.to_vec(),
        }
    })
}

async fn count_active(state: &MetricsState, start_ms: i64, end_ms: i64) -> AppResult<i64> {
    let conn = pooled(&state.pool).await?;
    let count = conn
        .interact(move |conn| {
            conn.query_row(
                queries::ACTIVE_USERS_SQL,
                rusqlite::params![start_ms, end_ms],
                |row| row.get(0),
            )
        })
        .await??;
    Ok(count)
}

fn parse_day(day: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(day, DAY_FORMAT)
        .map_err(|e| AppError::Internal(format!("bad day bucket {day}: {e}")))
}
