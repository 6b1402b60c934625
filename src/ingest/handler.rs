use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use deadpool_sqlite::Pool;
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::api_key::KeyAuth;
use crate::auth::middleware::CurrentUser;
use crate::error::{pooled, AppError, AppResult, LoggedJson};
use crate::types::{from_millis, now_millis, UsageEvent};

pub struct IngestState {
    pub pool: Pool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub user_id: Option<String>,
    pub product_id: Option<String>,
    pub event_type: Option<String>,
    pub value: Option<f64>,
    pub metadata: Option<serde_json::Value>,
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Build the event to store. A bearer-authenticated caller always owns the
/// event; key-authenticated calls may attribute it through `userId`.
fn build_event(input: IngestRequest, caller: Option<&str>) -> AppResult<UsageEvent> {
    let (Some(product_id), Some(event_type)) =
        (required(input.product_id), required(input.event_type))
    else {
        return Err(AppError::Validation(
            "productId and eventType are required".to_string(),
        ));
    };

    let user_id = caller
        .map(str::to_string)
        .or_else(|| input.user_id.filter(|u| !u.is_empty()));

    Ok(UsageEvent {
        id: uuid::Uuid::new_v4().to_string(),
        user_id,
        product_id,
        event_type,
        value: input.value.unwrap_or(1.0),
        metadata: input.metadata.filter(|m| !m.is_null()),
        created_at: from_millis(now_millis()),
    })
}

/// POST /api/usage - Record one usage event.
pub async fn ingest_event(
    State(state): State<Arc<IngestState>>,
    current_user: Option<Extension<CurrentUser>>,
    key_auth: Option<Extension<KeyAuth>>,
    LoggedJson(input): LoggedJson<IngestRequest>,
) -> AppResult<(StatusCode, Json<UsageEvent>)> {
    let caller = current_user.map(|Extension(CurrentUser(u))| u.id);
    let event = build_event(input, caller.as_deref())?;

    let row = event.clone();
    let metadata = row.metadata.as_ref().map(|m| m.to_string());
    let conn = pooled(&state.pool).await?;
    let stored = conn
        .interact(move |conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            if let Some(ref uid) = row.user_id {
                let known: bool = tx.query_row(
                    "SELECT COUNT(*) > 0 FROM users WHERE id = ?1",
                    rusqlite::params![uid],
                    |r| r.get(0),
                )?;
                if !known {
                    return Ok(false);
                }
            }

            let created_at = row.created_at.timestamp_millis();
            tx.execute(
                "INSERT INTO usage_events (id, user_id, product_id, event_type, value, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    row.id,
                    row.user_id,
                    row.product_id,
                    row.event_type,
                    row.value,
                    metadata,
                    created_at
                ],
            )?;

            if let Some(ref uid) = row.user_id {
                tx.execute(
                    "INSERT INTO user_stats (user_id, api_calls, storage_used, last_active)
                     VALUES (?1, 1, 0, ?2)
                     ON CONFLICT(user_id) DO UPDATE SET
                        api_calls = api_calls + 1,
                        last_active = excluded.last_active",
                    rusqlite::params![uid, created_at],
                )?;
            }
            tx.commit()?;
            Ok::<_, rusqlite::Error>(true)
        })
        .await??;

    if !stored {
        return Err(AppError::Validation("Unknown userId".to_string()));
    }

    tracing::debug!(
        event_id = %event.id,
        event_type = %event.event_type,
        key_id = key_auth.as_ref().map(|Extension(k)| k.key_id.as_str()).unwrap_or("-"),
        "usage event ingested"
    );

    Ok((StatusCode::CREATED, Json(event)))
}
