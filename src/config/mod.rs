// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for RadioFracture

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// API server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Token signing and account bootstrap
    #[serde(default)]
    pub auth: AuthConfig,

    /// Fracture detection service
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Upload limits
    #[serde(default)]
    pub upload: UploadConfig,

    /// Patient notification delivery
    #[serde(default)]
    pub mail: MailConfig,

    /// CLI client settings
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_hours: i64,
    /// Admin account created on startup when missing
    #[serde(default)]
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BootstrapAdmin {
    pub full_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_service_url")]
    pub service_url: String,
    /// Use the built-in mock detector instead of the HTTP service
    #[serde(default)]
    pub mock: bool,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retries: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MailConfig {
    /// "outbox" or "resend"
    #[serde(default = "default_mail_provider")]
    pub provider: String,
    #[serde(default = "default_outbox_path")]
    pub outbox_path: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_mail_api_url")]
    pub api_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClientConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Where the CLI keeps the token and cached profile
    #[serde(default = "default_session_path")]
    pub session_path: String,
    /// Talk to the in-memory demo backend instead of the API
    #[serde(default)]
    pub mock: bool,
    #[serde(default = "default_mock_delay")]
    pub mock_delay_ms: u64,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

// Default value functions
/// Upper bound on `analysis.retries`
pub const MAX_DETECTOR_RETRIES: u32 = 10;

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 3000 }
fn default_db_path() -> String { "radiofracture.db".to_string() }
fn default_jwt_secret() -> String { "change-me-radiofracture-secret".to_string() }
fn default_token_ttl() -> i64 { 24 }
fn default_service_url() -> String { "http://localhost:8000/analyze".to_string() }
fn default_timeout() -> u64 { 120 }
fn default_max_bytes() -> usize { 10 * 1024 * 1024 }
fn default_mail_provider() -> String { "outbox".to_string() }
fn default_outbox_path() -> String { "radiofracture_outbox.jsonl".to_string() }
fn default_mail_api_url() -> String { "https://api.resend.com/emails".to_string() }
fn default_api_url() -> String { "http://localhost:3000/api".to_string() }
fn default_session_path() -> String { ".radiofracture_session.json".to_string() }
fn default_mock_delay() -> u64 { 800 }
fn default_refresh_interval() -> u64 { 5 * 60 }

fn default_extensions() -> Vec<String> {
    vec!["jpeg", "jpg", "png", "tiff", "tif", "dicom", "dcm"]
        .into_iter().map(String::from).collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_hours: default_token_ttl(),
            bootstrap_admin: None,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            service_url: default_service_url(),
            mock: false,
            timeout_secs: default_timeout(),
            retries: 0,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            extensions: default_extensions(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            provider: default_mail_provider(),
            outbox_path: default_outbox_path(),
            from_address: String::new(),
            api_key: String::new(),
            api_url: default_mail_api_url(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            session_path: default_session_path(),
            mock: false,
            mock_delay_ms: default_mock_delay(),
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file, then apply environment overrides
    pub fn load(path: &Path) -> crate::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)
                .map_err(|e| crate::RadioError::Config(format!("Failed to parse config: {}", e)))?
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults with a freshly generated signing secret
    pub fn generate() -> Self {
        let mut config = Self::default();
        config.auth.jwt_secret = format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple());
        config
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from the environment (`PORT`, `JWT_SECRET`,
    /// `PYTHON_SERVICE_URL`, `RADIOFRACTURE_DB`, `RESEND_API_KEY`)
    pub fn apply_env<F>(&mut self, lookup: F) -> crate::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").filter(|p| !p.is_empty()) {
            self.server.port = port
                .parse()
                .map_err(|_| crate::RadioError::Config(format!("Invalid PORT: {}", port)))?;
        }
        if let Some(secret) = lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
            self.auth.jwt_secret = secret;
        }
        if let Some(url) = lookup("PYTHON_SERVICE_URL").filter(|u| !u.is_empty()) {
            self.analysis.service_url = url;
        }
        if let Some(db) = lookup("RADIOFRACTURE_DB").filter(|d| !d.is_empty()) {
            self.database.path = db;
        }
        if let Some(key) = lookup("RESEND_API_KEY").filter(|k| !k.is_empty()) {
            self.mail.api_key = key;
        }
        Ok(())
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.auth.jwt_secret == default_jwt_secret() {
            return Err(crate::RadioError::Config(
                "auth.jwt_secret is still the built-in placeholder; set JWT_SECRET or run `config generate`"
                    .to_string(),
            ));
        }
        if self.auth.jwt_secret.len() < 16 {
            return Err(crate::RadioError::Config(
                "auth.jwt_secret must be at least 16 characters".to_string(),
            ));
        }
        if self.auth.token_ttl_hours <= 0 {
            return Err(crate::RadioError::Config(
                "auth.token_ttl_hours must be positive".to_string(),
            ));
        }
        if self.analysis.retries > MAX_DETECTOR_RETRIES {
            return Err(crate::RadioError::Config(format!(
                "analysis.retries must be at most {}",
                MAX_DETECTOR_RETRIES
            )));
        }
        if self.upload.max_bytes == 0 {
            return Err(crate::RadioError::Config("upload.max_bytes must be positive".to_string()));
        }
        match self.mail.provider.as_str() {
            "outbox" | "resend" => Ok(()),
            other => Err(crate::RadioError::Config(format!("Unknown mail provider: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"server": {"port": 8080}}"#).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.upload.max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.client.refresh_interval_secs, 300);
        assert!(config.upload.extensions.contains(&"dicom".to_string()));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "4100"),
            ("JWT_SECRET", "an-override-secret-value"),
            ("PYTHON_SERVICE_URL", "http://detector:9000/analyze"),
        ].into_iter().collect();

        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.server.port, 4100);
        assert_eq!(config.auth.jwt_secret, "an-override-secret-value");
        assert_eq!(config.analysis.service_url, "http://detector:9000/analyze");
        assert_eq!(config.database.path, "radiofracture.db");
    }

    #[test]
    fn test_bad_port_is_config_error() {
        let mut config = AppConfig::default();
        let result = config.apply_env(|k| (k == "PORT").then(|| "eighty".to_string()));
        assert!(matches!(result, Err(crate::RadioError::Config(_))));
    }

    #[test]
    fn test_validate() {
        let mut config = AppConfig::generate();
        assert!(config.validate().is_ok());

        config.auth.jwt_secret = "short".to_string();
        assert!(config.validate().is_err());

        config.auth.jwt_secret = "a-long-enough-test-secret".to_string();
        config.mail.provider = "pigeon".to_string();
        assert!(config.validate().is_err());

        config.mail.provider = "outbox".to_string();
        config.analysis.retries = MAX_DETECTOR_RETRIES + 1;
        assert!(config.validate().is_err());
        config.analysis.retries = MAX_DETECTOR_RETRIES;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_placeholder_secret_is_rejected() {
        let err = AppConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("placeholder"));

        let generated = AppConfig::generate();
        assert_ne!(generated.auth.jwt_secret, default_jwt_secret());
        assert_eq!(generated.auth.jwt_secret.len(), 64);
        assert_ne!(generated.auth.jwt_secret, AppConfig::generate().auth.jwt_secret);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.analysis.mock = true;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert!(loaded.analysis.mock);
    }
}
