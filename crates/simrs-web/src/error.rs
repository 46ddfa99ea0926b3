//! HTTP 错误响应

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use simrs_core::SimrsError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// 包装业务错误，统一转换为 JSON 错误响应
#[derive(Debug)]
pub struct ApiError(pub SimrsError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            SimrsError::Validation(_) => StatusCode::BAD_REQUEST,
            SimrsError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            SimrsError::Permission(_) => StatusCode::FORBIDDEN,
            SimrsError::NotFound(_) => StatusCode::NOT_FOUND,
            SimrsError::Conflict(_)
            | SimrsError::InvalidStateTransition { .. }
            | SimrsError::InsufficientStock { .. } => StatusCode::CONFLICT,
            SimrsError::Serialization(_) => StatusCode::BAD_REQUEST,
            SimrsError::Config(_)
            | SimrsError::Database(_)
            | SimrsError::Storage(_)
            | SimrsError::Network(_)
            | SimrsError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn unauthorized(message: &str) -> Self {
        ApiError(SimrsError::Unauthorized(message.to_string()))
    }
}

impl From<SimrsError> for ApiError {
    fn from(err: SimrsError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
            // 内部细节只写日志
            "internal server error".to_string()
        } else {
            tracing::debug!(status = status.as_u16(), "Request rejected: {}", self.0);
            self.0.to_string()
        };

        let body = Json(json!({
            "error": true,
            "message": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (SimrsError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (SimrsError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (SimrsError::Permission("x".into()), StatusCode::FORBIDDEN),
            (SimrsError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (SimrsError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                SimrsError::InvalidStateTransition {
                    from: "waiting".into(),
                    event: "complete".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                SimrsError::InsufficientStock {
                    item: "PCT".into(),
                    requested: 5,
                    available: 2,
                },
                StatusCode::CONFLICT,
            ),
            (SimrsError::Database("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).status(), expected);
        }
    }

    #[test]
    fn test_response_status_matches() {
        let response = ApiError(SimrsError::NotFound("patient".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
