use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::api_key::{generate_key, hash_token, VALID_SCOPES};
use super::middleware::CurrentUser;
use super::AuthState;
use crate::error::{pooled, AppError, AppResult, LoggedJson};
use crate::types::{from_millis, now_millis};

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: Option<String>,
    pub scopes: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct CreateKeyResponse {
    pub key: String, // keyId.secret, shown once
    pub id: String,
    pub name: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub id: String,
    pub name: String,
    pub key_id: String,
    pub scopes: Vec<String>,
    pub owner: Option<String>,
    pub disabled: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn validate_scopes(scopes: &[String]) -> AppResult<()> {
    match scopes
        .iter()
        .find(|s| !VALID_SCOPES.contains(&s.as_str()))
    {
        Some(bad) => Err(AppError::Validation(format!("invalid scope: {bad}"))),
        None => Ok(()),
    }
}

/// POST /api/apikeys
pub async fn create_key(
    State(state): State<Arc<AuthState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    LoggedJson(input): LoggedJson<CreateKeyRequest>,
) -> AppResult<(StatusCode, Json<CreateKeyResponse>)> {
    let name = input
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "key".to_string());
    if name.len() > 100 {
        return Err(AppError::Validation(
            "name must be at most 100 characters".to_string(),
        ));
    }

    let scopes = input.scopes.unwrap_or_default();
    validate_scopes(&scopes)?;

    let (key_id, secret) = generate_key();
    let id = uuid::Uuid::new_v4().to_string();
    let scopes_json = serde_json::to_string(&scopes)
        .map_err(|e| AppError::Internal(format!("scope encoding failed: {e}")))?;

    let conn = pooled(&state.pool).await?;
    let row_id = id.clone();
    let row_name = name.clone();
    let row_key_id = key_id.clone();
    let row_hash = hash_token(&secret);
    let owner = user.id.clone();
    conn.interact(move |conn| {
        conn.execute(
            "INSERT INTO api_keys (id, name, key_id, hash, scopes, owner, disabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            rusqlite::params![
                row_id,
                row_name,
                row_key_id,
                row_hash,
                scopes_json,
                owner,
                now_millis()
            ],
        )
    })
    .await??;

    tracing::info!(key_id = %key_id, owner = %user.id, "api key created");

    Ok((
        StatusCode::CREATED,
        Json(CreateKeyResponse {
            key: format!("{key_id}.{secret}"),
            id,
            name,
            scopes,
        }),
    ))
}

/// GET /api/apikeys
pub async fn list_keys(State(state): State<Arc<AuthState>>) -> AppResult<Json<Vec<KeyInfo>>> {
    let conn = pooled(&state.pool).await?;
    let keys = conn
        .interact(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, key_id, scopes, owner, disabled, last_used_at, created_at
                 FROM api_keys
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                let scopes_json: String = row.get(3)?;
                let last_used: Option<i64> = row.get(6)?;
                Ok(KeyInfo {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    key_id: row.get(2)?,
                    scopes: serde_json::from_str(&scopes_json).unwrap_or_default(),
                    owner: row.get(4)?,
                    disabled: row.get(5)?,
                    last_used: last_used.map(from_millis),
                    created_at: from_millis(row.get(7)?),
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await??;

    Ok(Json(keys))
}

/// PATCH /api/apikeys/{id}/disable
pub async fn disable_key(
    State(state): State<Arc<AuthState>>,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = pooled(&state.pool).await?;
    let key_id = id.clone();
    let affected = conn
        .interact(move |conn| {
            conn.execute(
                "UPDATE api_keys SET disabled = 1 WHERE id = ?1",
                rusqlite::params![key_id],
            )
        })
        .await??;

    if affected == 0 {
        return Err(AppError::NotFound("Key not found".to_string()));
    }

    state.keys.invalidate_all();
    tracing::info!(id = %id, "api key disabled");

    Ok(Json(serde_json::json!({ "message": "Key disabled" })))
}
