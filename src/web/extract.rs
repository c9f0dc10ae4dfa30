// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Request extractors

use axum::async_trait;
use axum::extract::{FromRequestParts, Multipart};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::ApiError;
use super::AppState;
use crate::auth::{extract_bearer_token, verify_token, Claims};
use crate::models::Role;
use crate::RadioError;

/// Caller identity taken from a verified bearer token
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.0.user_id
    }

    pub fn role(&self) -> Role {
        self.0.role
    }

    /// 403 with `message` unless the caller holds one of `roles`
    pub fn require(&self, roles: &[Role], message: &str) -> Result<(), ApiError> {
        if roles.contains(&self.0.role) {
            Ok(())
        } else {
            Err(RadioError::Forbidden(message.to_string()).into())
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(extract_bearer_token)
            .ok_or_else(|| RadioError::Unauthorized("Missing or malformed token".to_string()))?;

        let claims = verify_token(token, &state.config.auth.jwt_secret)?;
        Ok(AuthUser(claims))
    }
}

/// A multipart body with at most one file of interest
#[derive(Debug, Default)]
pub struct UploadForm {
    pub file: Option<(String, Vec<u8>)>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    /// Drain `multipart`, keeping the file sent under `file_field`
    pub async fn read(mut multipart: Multipart, file_field: &str, too_large: &str) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();
        let invalid = |e: axum::extract::multipart::MultipartError| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ApiError(RadioError::Validation(too_large.to_string()))
            } else {
                ApiError(RadioError::Validation("Invalid form data".to_string()))
            }
        };

        while let Some(field) = multipart.next_field().await.map_err(invalid)? {
            let name = field.name().unwrap_or_default().to_string();
            if name == file_field {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(invalid)?;
                form.file = Some((filename, bytes.to_vec()));
            } else {
                let text = field.text().await.map_err(invalid)?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    /// Trimmed, non-empty text field
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
    }
}
