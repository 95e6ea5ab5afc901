use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the HTTP endpoints
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Store(StoreError::Timeout(_)) => "STORE_TIMEOUT",
            AppError::Store(_) => "STORE_UNAVAILABLE",
        }
    }

    /// Message shown to clients; production hides backend details
    fn client_message(&self) -> String {
        if !is_production() {
            return self.to_string();
        }
        match self {
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::Store(_) => "Service temporarily unavailable".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %self,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code,
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_store_timeout_maps_to_service_unavailable() {
        let response = AppError::Store(StoreError::Timeout(500)).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "STORE_TIMEOUT");
    }

    #[test]
    fn test_codes() {
        assert_eq!(AppError::Internal("x".into()).code(), "INTERNAL_ERROR");
        assert_eq!(
            AppError::Store(StoreError::Unavailable("open".into())).code(),
            "STORE_UNAVAILABLE"
        );
        assert_eq!(
            AppError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
