/*
 * Responsibility
 * - HTTP-facing AppError shared by all middleware
 * - IntoResponse: status code only, no body (rejections terminate the response)
 */
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("origin is not allowed")]
    OriginRejected,
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("malformed JSON body: {0}")]
    MalformedJson(String),
    #[error("HTTPS is required")]
    HttpsRequired,
    #[error("request context missing")]
    MissingContext,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::OriginRejected | AppError::MalformedJson(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::HttpsRequired => StatusCode::FORBIDDEN,
            AppError::MissingContext => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.status().into_response()
    }
}
