//! HTTP mapping of the shop's error taxonomy.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::domain::Error;

/// Result type for handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::Unauthorized => StatusCode::FORBIDDEN,
            Error::InvalidRequest(_) | Error::InvalidTier(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::PaymentNotCompleted { .. }
            | Error::UnknownTier { .. }
            | Error::CaptureDenied { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            // only escapes the capture client if the lookup itself failed
            Error::AlreadyCaptured(_) => StatusCode::CONFLICT,
            Error::OrderOwnedElsewhere { .. } => StatusCode::CONFLICT,
            Error::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::ProviderProtocol(_) => StatusCode::BAD_GATEWAY,
            Error::IO(_) | Error::Storage(_) | Error::Config(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "request failed");
        }

        // Only the stable code goes out; messages may carry internals.
        let body = Json(json!({
            "success": false,
            "error": self.0.code(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        assert_eq!(
            ApiError(Error::Unauthorized).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError(Error::InvalidTier("1.23".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(Error::OrderOwnedElsewhere {
                order_id: "O".into()
            })
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError(Error::ProviderUnavailable("timeout".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(Error::PaymentNotCompleted {
                order_id: "O".into(),
                status: "PENDING".into()
            })
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[tokio::test]
    async fn responses_do_not_leak_details() {
        let response = ApiError(Error::Internal("disk /var/lib/shop.db full".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "success": false, "error": "internal" }));
    }
}
