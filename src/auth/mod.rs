// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Credentials and bearer tokens

pub mod password;
pub mod token;

pub use password::{hash_password, verify_password};
pub use token::{decode_unverified, extract_bearer_token, issue_token, verify_token, Claims};

/// Minimum accepted password length
pub const MIN_PASSWORD_LEN: usize = 8;

/// Shared form checks for registration and account creation
pub fn validate_new_account(full_name: &str, email: &str, password: &str) -> crate::Result<()> {
    if full_name.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
        return Err(crate::RadioError::Validation(
            "Full name, email and password are required".to_string(),
        ));
    }
    if !email.contains('@') {
        return Err(crate::RadioError::Validation("Invalid email address".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(crate::RadioError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_new_account() {
        assert!(validate_new_account("Dr. Sarah Chen", "doctor@example.com", "password123").is_ok());
        assert!(validate_new_account("", "doctor@example.com", "password123").is_err());
        assert!(validate_new_account("Sarah", "not-an-email", "password123").is_err());

        let err = validate_new_account("Sarah", "doctor@example.com", "short").unwrap_err();
        assert_eq!(err.to_string(), "Password must be at least 8 characters");
    }
}
