use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::middleware::CurrentUser;
use super::password::{spawn_hash_password, spawn_verify_password};
use super::AuthState;
use crate::error::{pooled, AppError, AppResult, LoggedJson};
use crate::types::{Plan, Role, User};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid"));

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub admin_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub token: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Decide the role for a registration. `None` code means a regular user.
fn role_for_admin_code(provided: Option<&str>, configured: Option<&str>) -> AppResult<Role> {
    let Some(provided) = provided.filter(|c| !c.is_empty()) else {
        return Ok(Role::User);
    };
    let Some(configured) = configured else {
        return Err(AppError::Forbidden(
            "Admin registration is disabled on this server".to_string(),
        ));
    };
    if bool::from(provided.as_bytes().ct_eq(configured.as_bytes())) {
        Ok(Role::Admin)
    } else {
        Err(AppError::Validation(
            "Invalid admin registration code".to_string(),
        ))
    }
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AuthState>>,
    LoggedJson(input): LoggedJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let (Some(name), Some(email), Some(password)) = (
        non_empty(input.name),
        non_empty(input.email).map(|e| e.to_lowercase()),
        input.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::Validation("Please add all fields".to_string()));
    };

    let lookup_email = email.clone();
    let exists: bool = pooled(&state.pool)
        .await?
        .interact(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) > 0 FROM users WHERE email = ?1",
                rusqlite::params![lookup_email],
                |row| row.get(0),
            )
        })
        .await??;
    if exists {
        return Err(AppError::Validation("User already exists".to_string()));
    }

    if !is_valid_email(&email) {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }

    let role = role_for_admin_code(
        input.admin_code.as_deref(),
        state.admin_registration_code.as_deref(),
    )?;

    let password_hash = spawn_hash_password(password).await?;
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        name,
        email,
        role,
        plan: Plan::Free,
        created_at: chrono::Utc::now(),
    };

    let row = user.clone();
    let inserted = pooled(&state.pool)
        .await?
        .interact(move |conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, password_hash, role, plan, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    row.id,
                    row.name,
                    row.email,
                    password_hash,
                    row.role.as_str(),
                    row.plan.as_str(),
                    row.created_at.timestamp_millis(),
                ],
            )
        })
        .await?;

    match inserted {
        Ok(_) => {}
        // Lost a race with a concurrent registration for the same email
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(AppError::Validation("User already exists".to_string()));
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(user_id = %user.id, role = %user.role, "user registered");

    let token = state.jwt.sign(&user.id)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            token,
        }),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AuthState>>,
    LoggedJson(input): LoggedJson<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let invalid = || AppError::Validation("Invalid credentials".to_string());

    let (Some(email), Some(password)) = (
        non_empty(input.email).map(|e| e.to_lowercase()),
        input.password,
    ) else {
        return Err(invalid());
    };

    let found = pooled(&state.pool)
        .await?
        .interact(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {}, password_hash FROM users WHERE email = ?1",
                    User::COLUMNS
                ),
                rusqlite::params![email],
                |row| Ok((User::from_row(row)?, row.get::<_, String>(6)?)),
            )
            .optional()
        })
        .await??;

    let Some((user, password_hash)) = found else {
        return Err(invalid());
    };
    if !spawn_verify_password(password, password_hash).await? {
        tracing::info!(user_id = %user.id, "login rejected: wrong password");
        return Err(invalid());
    }

    let token = state.jwt.sign(&user.id)?;
    Ok(Json(AuthResponse {
        id: user.id,
        name: user.name,
        email: user.email,
        role: user.role,
        token,
    }))
}

/// GET /api/auth/me
pub async fn me(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<User> {
    Json(user)
}
