use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("pool error: {0}")]
    Pool(#[from] deadpool_sqlite::InteractError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Validation(msg)
            | AppError::Auth(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg) => msg.clone(),
            // Server errors are reported with their message, unredacted
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => {
                tracing::error!(error = %self, "request failed");
                self.to_string()
            }
        };

        (status, axum::Json(json!({ "message": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Checkout a pooled connection, mapping pool failures to `AppError::Internal`.
pub async fn pooled(pool: &deadpool_sqlite::Pool) -> AppResult<deadpool_sqlite::Object> {
    pool.get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))
}

/// JSON extractor that logs deserialization errors before returning them as 400s.
/// Drop-in replacement for `axum::Json<T>`.
pub struct LoggedJson<T>(pub T);

impl<S, T> FromRequest<S> for LoggedJson<T>
where
    axum::Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(
        req: axum::extract::Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let path = req.uri().path().to_string();
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(LoggedJson(value)),
            Err(rejection) => {
                tracing::warn!(
                    path = %path,
                    status = %rejection.status(),
                    error = %rejection,
                    "rejected request body"
                );
                Err(AppError::Validation(rejection.body_text()))
            }
        }
    }
}
