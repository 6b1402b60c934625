use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Datelike, Months, Utc};
use deadpool_sqlite::Pool;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{pooled, AppError, AppResult, LoggedJson};
use crate::metrics::cohort::month_window_start;
use crate::types::{now_millis, Plan, Role, User, UserSummary};

/// Months shown in the signup growth series, oldest first.
const GROWTH_MONTHS: i64 = 6;

const SUBSCRIPTION_PERIOD_MS: i64 = 30 * 24 * 60 * 60 * 1000;

#[derive(Debug, Deserialize)]
pub struct UpdateRole {
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlan {
    pub plan: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GrowthPoint {
    pub name: String,
    pub users: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub total_users: i64,
    pub revenue: f64,
    pub growth: Vec<GrowthPoint>,
}

fn not_found() -> AppError {
    AppError::NotFound("User not found".to_string())
}

/// GET /api/admin/users
pub async fn list_users(State(pool): State<Arc<Pool>>) -> AppResult<Json<Vec<User>>> {
    let conn = pooled(&pool).await?;
    let users = conn
        .interact(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users ORDER BY created_at",
                User::COLUMNS
            ))?;
            let rows = stmt
                .query_map([], User::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, rusqlite::Error>(rows)
        })
        .await??;

    Ok(Json(users))
}

/// GET /api/admin/users/{id}
pub async fn get_user(
    State(pool): State<Arc<Pool>>,
    Path(id): Path<String>,
) -> AppResult<Json<User>> {
    let conn = pooled(&pool).await?;
    let user = conn
        .interact(move |conn| User::find(conn, &id))
        .await??
        .ok_or_else(not_found)?;

    Ok(Json(user))
}

/// PATCH /api/admin/users/{id}/role
pub async fn update_role(
    State(pool): State<Arc<Pool>>,
    Path(id): Path<String>,
    LoggedJson(input): LoggedJson<UpdateRole>,
) -> AppResult<Json<UserSummary>> {
    let role = input
        .role
        .filter(|r| !r.is_empty())
        .map(|r| Role::parse(&r).ok_or_else(|| AppError::Validation(format!("invalid role: {r}"))))
        .transpose()?;

    let conn = pooled(&pool).await?;
    let user = conn
        .interact(move |conn| {
            if let Some(role) = role {
                conn.execute(
                    "UPDATE users SET role = ?1 WHERE id = ?2",
                    rusqlite::params![role.as_str(), id],
                )?;
            }
            User::find(conn, &id)
        })
        .await??
        .ok_or_else(not_found)?;

    tracing::info!(user_id = %user.id, role = %user.role, "user role updated");
    Ok(Json(user.into()))
}

/// PATCH /api/admin/users/{id}/plan - Also creates or updates the subscription.
pub async fn update_plan(
    State(pool): State<Arc<Pool>>,
    Path(id): Path<String>,
    LoggedJson(input): LoggedJson<UpdatePlan>,
) -> AppResult<Json<User>> {
    let plan = input
        .plan
        .filter(|p| !p.is_empty())
        .map(|p| Plan::parse(&p).ok_or_else(|| AppError::Validation(format!("invalid plan: {p}"))))
        .transpose()?;

    let conn = pooled(&pool).await?;
    let user = conn
        .interact(move |conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let Some(mut user) = User::find(&tx, &id)? else {
                return Ok(None);
            };
            if let Some(plan) = plan {
                tx.execute(
                    "UPDATE users SET plan = ?1 WHERE id = ?2",
                    rusqlite::params![plan.as_str(), id],
                )?;
                user.plan = plan;
            }

            let now = now_millis();
            tx.execute(
                "INSERT INTO subscriptions (user_id, plan, amount, start_date, end_date)
                 VALUES (?1, ?2, 0, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET plan = excluded.plan",
                rusqlite::params![id, user.plan.as_str(), now, now + SUBSCRIPTION_PERIOD_MS],
            )?;
            tx.commit()?;
            Ok::<_, rusqlite::Error>(Some(user))
        })
        .await??
        .ok_or_else(not_found)?;

    tracing::info!(user_id = %user.id, plan = user.plan.as_str(), "user plan updated");
    Ok(Json(user))
}

/// DELETE /api/admin/users/{id}
pub async fn delete_user(
    State(pool): State<Arc<Pool>>,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = pooled(&pool).await?;
    let user_id = id.clone();
    let deleted = conn
        .interact(move |conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            tx.execute(
                "UPDATE usage_events SET user_id = NULL WHERE user_id = ?1",
                rusqlite::params![user_id],
            )?;
            tx.execute(
                "UPDATE api_keys SET owner = NULL WHERE owner = ?1",
                rusqlite::params![user_id],
            )?;
            tx.execute(
                "DELETE FROM subscriptions WHERE user_id = ?1",
                rusqlite::params![user_id],
            )?;
            tx.execute(
                "DELETE FROM user_stats WHERE user_id = ?1",
                rusqlite::params![user_id],
            )?;
            let deleted = tx.execute("DELETE FROM users WHERE id = ?1", rusqlite::params![user_id])?;
            if deleted > 0 {
                tx.commit()?;
            }
            Ok::<_, rusqlite::Error>(deleted)
        })
        .await??;

    if deleted == 0 {
        return Err(not_found());
    }

    tracing::info!(user_id = %id, "user deleted");
    Ok(Json(serde_json::json!({ "message": "User removed" })))
}

/// GET /api/admin/stats/global
pub async fn global_stats(State(pool): State<Arc<Pool>>) -> AppResult<Json<GlobalStats>> {
    let now = Utc::now();
    let since = month_window_start(now, GROWTH_MONTHS).timestamp_millis();

    let conn = pooled(&pool).await?;
    let (total_users, revenue, signups) = conn
        .interact(move |conn| {
            let total_users: i64 =
                conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            let revenue: f64 = conn.query_row(
                "SELECT COALESCE(SUM(amount), 0.0) FROM subscriptions",
                [],
                |row| row.get(0),
            )?;
            let mut stmt = conn.prepare(
                "SELECT strftime('%Y-%m', created_at / 1000, 'unixepoch') AS month, COUNT(*)
                 FROM users
                 WHERE created_at >= ?1
                 GROUP BY month",
            )?;
            let signups = stmt
                .query_map(rusqlite::params![since], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<Result<HashMap<_, _>, _>>()?;
            Ok::<_, rusqlite::Error>((total_users, revenue, signups))
        })
        .await??;

    Ok(Json(GlobalStats {
        total_users,
        revenue,
        growth: growth_series(now, &signups),
    }))
}

/// One point per month for the last `GROWTH_MONTHS` months, zero-filled.
/// `signups` is keyed by `YYYY-MM`.
fn growth_series(now: DateTime<Utc>, signups: &HashMap<String, i64>) -> Vec<GrowthPoint> {
    let first = month_window_start(now, GROWTH_MONTHS).date_naive();
    (0..GROWTH_MONTHS as u32)
        .filter_map(|i| first.checked_add_months(Months::new(i)))
        .map(|month| GrowthPoint {
            name: month.format("%b").to_string(),
            users: signups
                .get(&format!("{:04}-{:02}", month.year(), month.month()))
                .copied()
                .unwrap_or(0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_series_spans_six_months_ending_now() {
        let now = DateTime::parse_from_rfc3339("2024-03-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let signups = HashMap::from([("2024-03".to_string(), 4), ("2023-11".to_string(), 2)]);
        let growth = growth_series(now, &signups);
        let names: Vec<&str> = growth.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Oct", "Nov", "Dec", "Jan", "Feb", "Mar"]);
        assert_eq!(growth[1].users, 2);
        assert_eq!(growth[5].users, 4);
        assert_eq!(growth[0].users, 0);
    }
}
