// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! HS256 bearer tokens
//!
//! Signed with HMAC-SHA256 over `header.payload`, both base64url without
//! padding. The client side only ever needs [`decode_unverified`] to read the
//! claims and expiry; signature checks happen on the server.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;

use crate::models::{Role, User};
use crate::{RadioError, Result};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Token claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub role: Role,
    pub email: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expiry (Unix seconds)
    pub exp: i64,
}

impl Claims {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }
}

fn mac(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| RadioError::Token(format!("HMAC error: {}", e)))
}

fn encode<T: Serialize>(claims: &T, secret: &str) -> Result<String> {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&Header::default())?);
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{}.{}", header_b64, payload_b64);

    let mut mac = mac(secret)?;
    mac.update(signing_input.as_bytes());
    let signature_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", signing_input, signature_b64))
}

fn split(token: &str) -> Result<(&str, &str, &str)> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s), None) => Ok((h, p, s)),
        _ => Err(RadioError::Token("malformed token".to_string())),
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str, what: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| RadioError::Token(format!("invalid {} encoding", what)))?;
    serde_json::from_slice(&bytes).map_err(|_| RadioError::Token(format!("invalid {} format", what)))
}

/// Issue a token for a user valid for `ttl_hours`
pub fn issue_token(user: &User, secret: &str, ttl_hours: i64) -> Result<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        user_id: user.id.clone(),
        role: user.role,
        email: user.email.clone(),
        iat: now,
        exp: now + ttl_hours * 3600,
    };
    encode(&claims, secret)
}

/// Verify signature, algorithm and expiry
pub fn verify_token(token: &str, secret: &str) -> Result<Claims> {
    let (header_b64, payload_b64, signature_b64) = split(token)?;

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| RadioError::Token("invalid signature encoding".to_string()))?;
    let mut mac = mac(secret)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| RadioError::Token("invalid signature".to_string()))?;

    let header: Header = decode_segment(header_b64, "header")?;
    if header.alg != "HS256" {
        return Err(RadioError::Token(format!("unsupported algorithm {}", header.alg)));
    }

    let claims: Claims = decode_segment(payload_b64, "payload")?;
    if claims.is_expired() {
        return Err(RadioError::Token("token expired".to_string()));
    }
    Ok(claims)
}

/// Read claims without checking the signature
pub fn decode_unverified(token: &str) -> Result<Claims> {
    let (_, payload_b64, _) = split(token)?;
    decode_segment(payload_b64, "payload")
}

/// Pull the token out of an `Authorization: Bearer <token>` header value
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-at-least-16";

    fn user() -> User {
        User {
            id: "user-1".into(),
            full_name: "Dr. Sarah Chen".into(),
            email: "doctor@example.com".into(),
            role: Role::Doctor,
            created_by: None,
            created_at: Utc::now(),
            age: None,
            phone_number: None,
            notes: None,
            specialty: Some("Orthopedics".into()),
            hospital: None,
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let token = issue_token(&user(), SECRET, 24).unwrap();
        let claims = verify_token(&token, SECRET).unwrap();
        assert_eq!(claims.user_id, "user-1");
        assert_eq!(claims.role, Role::Doctor);
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn test_wire_claim_names() {
        let token = issue_token(&user(), SECRET, 1).unwrap();
        let (_, payload, _) = split(&token).unwrap();
        let value: serde_json::Value = decode_segment(payload, "payload").unwrap();
        assert_eq!(value["userId"], "user-1");
        assert_eq!(value["role"], "doctor");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issue_token(&user(), SECRET, 24).unwrap();
        let err = verify_token(&token, "another-secret-value").unwrap_err();
        assert!(matches!(err, RadioError::Token(_)));
    }

    #[test]
    fn test_expired_rejected() {
        let token = issue_token(&user(), SECRET, -1).unwrap();
        assert!(verify_token(&token, SECRET).is_err());
        // Structure is still readable without verification
        let claims = decode_unverified(&token).unwrap();
        assert!(claims.is_expired());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let token = issue_token(&user(), SECRET, 24).unwrap();
        let (h, _, s) = split(&token).unwrap();
        let mut forged = decode_unverified(&token).unwrap();
        forged.role = Role::Admin;
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let forged_token = format!("{}.{}.{}", h, payload, s);
        assert!(verify_token(&forged_token, SECRET).is_err());
    }

    #[test]
    fn test_malformed() {
        assert!(decode_unverified("not-a-token").is_err());
        assert!(decode_unverified("a.b.c.d").is_err());
        assert!(decode_unverified("a.%%%.c").is_err());
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Basic abc"), None);
    }
}
