// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! JSON error responses

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::RadioError;

/// A [`RadioError`] on its way out as `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError(pub RadioError);

impl<E> From<E> for ApiError
where
    E: Into<RadioError>,
{
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// What the caller gets to see. Server-side failures are logged, not echoed.
    fn public_message(&self) -> String {
        match &self.0 {
            RadioError::Detector(_) => "Detection service unavailable".to_string(),
            _ if self.status().is_server_error() => "Internal server error".to_string(),
            err => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self.0);
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

/// Unwrap a JSON body, turning axum's plain-text rejection into our shape
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|_| ApiError(RadioError::Validation("Invalid request body".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_pass_through() {
        let err = ApiError::from(RadioError::Conflict("User with this email already exists".into()));
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.public_message(), "User with this email already exists");
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = ApiError::from(io);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error");

        let err = ApiError::from(RadioError::Detector("connection refused".into()));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.public_message(), "Detection service unavailable");
    }
}
