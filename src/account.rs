use axum::extract::State;
use axum::{Extension, Json};
use deadpool_sqlite::Pool;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::handler::is_valid_email;
use crate::auth::middleware::CurrentUser;
use crate::auth::password::spawn_hash_password;
use crate::error::{pooled, AppError, AppResult, LoggedJson};
use crate::types::{from_millis, Subscription, User, UserStats, UserSummary};

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub user: User,
    pub subscription: Option<Subscription>,
    pub stats: Option<UserStats>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfile {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

enum ProfileUpdate {
    Updated(User),
    EmailTaken,
    Missing,
}

fn find_subscription(
    conn: &rusqlite::Connection,
    user_id: &str,
) -> rusqlite::Result<Option<Subscription>> {
    conn.query_row(
        "SELECT user_id, plan, amount, start_date, end_date
         FROM subscriptions WHERE user_id = ?1",
        rusqlite::params![user_id],
        |row| {
            Ok(Subscription {
                user_id: row.get(0)?,
                plan: row.get(1)?,
                amount: row.get(2)?,
                start_date: from_millis(row.get(3)?),
                end_date: from_millis(row.get(4)?),
            })
        },
    )
    .optional()
}

fn find_stats(conn: &rusqlite::Connection, user_id: &str) -> rusqlite::Result<Option<UserStats>> {
    conn.query_row(
        "SELECT user_id, api_calls, storage_used, last_active
         FROM user_stats WHERE user_id = ?1",
        rusqlite::params![user_id],
        |row| {
            Ok(UserStats {
                user_id: row.get(0)?,
                api_calls: row.get(1)?,
                storage_used: row.get(2)?,
                last_active: from_millis(row.get(3)?),
            })
        },
    )
    .optional()
}

/// GET /api/user/dashboard
pub async fn dashboard(
    State(pool): State<Arc<Pool>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> AppResult<Json<Dashboard>> {
    let conn = pooled(&pool).await?;
    let user_id = user.id.clone();
    let (subscription, stats) = conn
        .interact(move |conn| {
            Ok::<_, rusqlite::Error>((
                find_subscription(conn, &user_id)?,
                find_stats(conn, &user_id)?,
            ))
        })
        .await??;

    Ok(Json(Dashboard {
        user,
        subscription,
        stats,
    }))
}

/// GET /api/user/subscription - `null` when the user has none.
pub async fn subscription(
    State(pool): State<Arc<Pool>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> AppResult<Json<Option<Subscription>>> {
    let conn = pooled(&pool).await?;
    let subscription = conn
        .interact(move |conn| find_subscription(conn, &user.id))
        .await??;
    Ok(Json(subscription))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// PATCH /api/user/profile - Empty fields keep their current value.
pub async fn update_profile(
    State(pool): State<Arc<Pool>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    LoggedJson(input): LoggedJson<UpdateProfile>,
) -> AppResult<Json<UserSummary>> {
    let name = input
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or(user.name);
    let email = input
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .unwrap_or(user.email);
    if !is_valid_email(&email) {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    let password_hash = match input.password.filter(|p| !p.is_empty()) {
        Some(password) => Some(spawn_hash_password(password).await?),
        None => None,
    };

    let conn = pooled(&pool).await?;
    let user_id = user.id;
    let updated = conn
        .interact(move |conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let taken: bool = tx.query_row(
                "SELECT COUNT(*) > 0 FROM users WHERE email = ?1 AND id != ?2",
                rusqlite::params![email, user_id],
                |row| row.get(0),
            )?;
            if taken {
                return Ok(ProfileUpdate::EmailTaken);
            }
            let updated = tx.execute(
                "UPDATE users
                 SET name = ?1, email = ?2, password_hash = COALESCE(?3, password_hash)
                 WHERE id = ?4",
                rusqlite::params![name, email, password_hash, user_id],
            );
            match updated {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => return Ok(ProfileUpdate::EmailTaken),
                Err(e) => return Err(e),
            }
            let result = match User::find(&tx, &user_id)? {
                Some(user) => ProfileUpdate::Updated(user),
                None => ProfileUpdate::Missing,
            };
            tx.commit()?;
            Ok::<_, rusqlite::Error>(result)
        })
        .await??;

    let updated = match updated {
        ProfileUpdate::Updated(user) => user,
        ProfileUpdate::EmailTaken => {
            return Err(AppError::Validation("Email already in use".to_string()))
        }
        ProfileUpdate::Missing => return Err(AppError::NotFound("User not found".to_string())),
    };

    tracing::info!(user_id = %updated.id, "profile updated");
    Ok(Json(updated.into()))
}
