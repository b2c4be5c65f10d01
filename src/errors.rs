// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    #[error("BSON error: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),

    #[error("{0}")]
    Validation(String),

    #[error("Booking not found")]
    BookingNotFound,

    #[error("Payment not found")]
    PaymentNotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("Dispute not found")]
    DisputeNotFound,

    // Illegal booking/payment transitions carry the exact server message so
    // the client can toast it verbatim.
    #[error("{0}")]
    IllegalTransition(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("{0}")]
    Forbidden(String),

    #[error("Duplicate entry")]
    DuplicateKey,

    #[error("M-Pesa error: {0}")]
    Mpesa(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("Service error: {0}")]
    Service(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::MongoDB(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error"),
            AppError::Bson(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "Validation failed"),
            AppError::BookingNotFound => (StatusCode::NOT_FOUND, "Booking not found"),
            AppError::PaymentNotFound => (StatusCode::NOT_FOUND, "Payment not found"),
            AppError::UserNotFound => (StatusCode::NOT_FOUND, "User not found"),
            AppError::DisputeNotFound => (StatusCode::NOT_FOUND, "Dispute not found"),
            AppError::IllegalTransition(_) => (StatusCode::BAD_REQUEST, "Illegal state transition"),
            AppError::AuthError => (StatusCode::UNAUTHORIZED, "Authentication failed"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "Unauthorized access"),
            AppError::DuplicateKey => (StatusCode::CONFLICT, "Duplicate entry"),
            AppError::Mpesa(_) => (StatusCode::BAD_GATEWAY, "M-Pesa error"),
            AppError::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error"),
            AppError::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable"),
            AppError::ExternalApi(_) => (StatusCode::BAD_GATEWAY, "External API error"),
            AppError::Service(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Service error"),
        };

        let body = Json(json!({
            "error": error_message,
            "message": self.to_string(),
            "success": false,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(format!("JSON parsing error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalApi(format!("HTTP request failed: {}", err))
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AppError::Service(format!("Password hashing failed: {}", err))
    }
}

// Helper conversion functions
impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn mpesa(msg: impl Into<String>) -> Self {
        AppError::Mpesa(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        AppError::Configuration(msg.into())
    }

    pub fn service(msg: impl Into<String>) -> Self {
        AppError::Service(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
