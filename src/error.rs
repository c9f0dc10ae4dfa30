// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for RadioFracture

use thiserror::Error;

/// Result type alias for RadioFracture operations
pub type Result<T> = std::result::Result<T, RadioError>;

/// RadioFracture error types
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid token: {0}")]
    Token(String),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("Detection service error: {0}")]
    Detector(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl RadioError {
    /// HTTP status that best describes this error
    pub fn status_code(&self) -> u16 {
        match self {
            RadioError::Validation(_) => 400,
            RadioError::Unauthorized(_) | RadioError::Token(_) => 401,
            RadioError::Forbidden(_) => 403,
            RadioError::NotFound(_) => 404,
            RadioError::Conflict(_) => 409,
            RadioError::Detector(_) => 502,
            RadioError::Api { status, .. } => *status,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RadioError::Validation("x".into()).status_code(), 400);
        assert_eq!(RadioError::Token("bad".into()).status_code(), 401);
        assert_eq!(RadioError::Conflict("dup".into()).status_code(), 409);
        assert_eq!(RadioError::Config("cfg".into()).status_code(), 500);
        let api = RadioError::Api { status: 418, message: "teapot".into() };
        assert_eq!(api.status_code(), 418);
    }

    #[test]
    fn test_user_facing_messages_are_bare() {
        let err = RadioError::Unauthorized("Invalid email or password".into());
        assert_eq!(err.to_string(), "Invalid email or password");
    }
}
