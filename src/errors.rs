use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Message returned to citizens who used up their daily quota.
pub const RATE_LIMITED_MESSAGE: &str =
    "Has alcanzado el límite de consultas por hoy. Vuelve mañana para más análisis.";

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// The caller exhausted the daily quota.
    RateLimited(String),
    /// Error interacting with an LLM provider.
    ExternalApiError(String),
    /// The provider answered with something that is not a valid response object.
    InvalidLlmResponse(String),
    /// Internal server error.
    InternalError(String),
    /// Unauthorized access error.
    Unauthorized(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::InvalidLlmResponse(msg) => write!(f, "Invalid LLM response: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::DatabaseError(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::ExternalApiError(_) | AppError::InvalidLlmResponse(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::WithContext { source, .. } => source.status(),
        }
    }
}

impl IntoResponse for AppError {
    /// Answers `{"error": ...}` with the variant's status. Provider and
    /// database details only go to the log.
    fn into_response(self) -> Response {
        let status = self.status();
        let public_message = match self {
            AppError::WithContext { source, context } => {
                tracing::error!("{}: {}", context, source);
                return (*source).into_response();
            }
            AppError::RateLimited(ip) => {
                tracing::info!("Daily quota exhausted for {}", ip);
                RATE_LIMITED_MESSAGE.to_string()
            }
            AppError::BadRequest(msg) => {
                tracing::debug!("Rejected request: {}", msg);
                msg
            }
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized access: {}", msg);
                "Unauthorized".to_string()
            }
            AppError::ExternalApiError(_) | AppError::InvalidLlmResponse(_) => {
                tracing::error!("{}", self);
                "El asistente no está disponible en este momento.".to_string()
            }
            AppError::DatabaseError(_) | AppError::InternalError(_) => {
                tracing::error!("{}", self);
                "Internal Server Error".to_string()
            }
        };

        (status, Json(json!({ "error": public_message }))).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

/// Attaches a description of the failed step, like `anyhow::Context`.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T, E: Into<AppError>> ResultExt<T> for Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e.into()),
            context: context.into(),
        })
    }
}
