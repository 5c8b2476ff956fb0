use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed input (missing title, invalid plan value, bad event payload).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced project/chapter/user/export is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller does not own the resource, a plan limit was hit,
    /// or a downgrade precondition failed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Webhook payload failed its authenticity check.
    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),

    /// Billing provider or rendering backend failure.
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Storage unavailable.
    #[error("Storage error: {0}")]
    Unavailable(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP archive error (EPUB packaging).
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// PDF composition error.
    #[error("PDF error: {0}")]
    Pdf(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::SignatureVerification(_) => StatusCode::BAD_REQUEST,
            AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(error = %self, "Request error");

        (status, self.to_string()).into_response()
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;
