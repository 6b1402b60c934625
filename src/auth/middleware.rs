use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::api_key::{KeyAuth, API_KEY_HEADERS};
use super::AuthState;
use crate::error::{pooled, AppError, AppResult};
use crate::types::{Role, User};

/// Injected into request extensions after successful bearer token validation.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

fn auth_state(request: &Request) -> AppResult<Arc<AuthState>> {
    request
        .extensions()
        .get::<Arc<AuthState>>()
        .cloned()
        .ok_or_else(|| AppError::Internal("auth state not configured".to_string()))
}

/// Extract Bearer token from Authorization header.
fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

/// First non-empty API key header, trimmed. Blank headers count as absent.
fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    API_KEY_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

async fn authenticate_user(state: &AuthState, headers: &HeaderMap) -> AppResult<User> {
    let token = extract_bearer(headers)
        .ok_or_else(|| AppError::Auth("Not authorized, no token".to_string()))?;

    let claims = state.jwt.verify(&token).map_err(|e| {
        tracing::warn!(error = %e, "token verification failed");
        AppError::Auth("Not authorized, token failed".to_string())
    })?;

    let conn = pooled(&state.pool).await?;
    let user_id = claims.id.clone();
    let user = conn
        .interact(move |conn| User::find(conn, &user_id))
        .await??;

    user.ok_or_else(|| {
        tracing::warn!(user_id = %claims.id, "token valid but user not found");
        AppError::Auth("Not authorized, user not found".to_string())
    })
}

/// Middleware: requires a valid bearer JWT for an existing user.
/// On success, injects `CurrentUser` into extensions.
pub async fn require_user(mut request: Request, next: Next) -> Result<Response, AppError> {
    let state = auth_state(&request)?;
    let user = authenticate_user(&state, request.headers()).await?;
    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

/// Middleware: an API key header, when present, must resolve; otherwise
/// falls back to bearer JWT auth. Injects `KeyAuth` or `CurrentUser`.
pub async fn require_key_or_user(mut request: Request, next: Next) -> Result<Response, AppError> {
    let state = auth_state(&request)?;

    if let Some(presented) = extract_api_key(request.headers()) {
        let auth = state.keys.resolve(&presented).await?.ok_or_else(|| {
            tracing::warn!(path = %request.uri().path(), "auth rejected: invalid api key");
            AppError::Auth("Invalid API key".to_string())
        })?;

        state.keys.touch_last_used(auth.id.clone());
        request.extensions_mut().insert(auth);
        return Ok(next.run(request).await);
    }

    let user = authenticate_user(&state, request.headers()).await?;
    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

/// Middleware: must run after `require_user` or `require_key_or_user`.
/// Passes admins and keys carrying an elevated scope.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    let user_is_admin = request
        .extensions()
        .get::<CurrentUser>()
        .is_some_and(|u| u.0.role == Role::Admin);
    let key_is_elevated = request
        .extensions()
        .get::<KeyAuth>()
        .is_some_and(KeyAuth::is_elevated);

    if user_is_admin || key_is_elevated {
        return Ok(next.run(request).await);
    }

    tracing::warn!(path = %request.uri().path(), "auth rejected: admin required");
    Err(AppError::Forbidden("Not authorized as an admin".to_string()))
}
