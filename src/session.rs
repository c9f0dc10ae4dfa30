// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Client-side auth session
//!
//! State changes only through [`reduce`]. [`AuthSession`] drives it from
//! backend calls, keeps the token and cached profile in a [`SessionStorage`],
//! and while authenticated runs a silent refresh on a fixed interval.

use chrono::{TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{decode_unverified, Claims, MIN_PASSWORD_LEN};
use crate::client::AuthBackend;
use crate::models::{AuthPayload, LoginCredentials, RegisterCredentials, Role, User};
use crate::{RadioError, Result};

pub const TOKEN_KEY: &str = "radiofracture_auth_token";
pub const USER_KEY: &str = "radiofracture_user";

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthState {
    pub user: Option<User>,
    pub token: Option<String>,
    pub is_authenticated: bool,
    pub loading: bool,
    pub error: Option<String>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            user: None,
            token: None,
            is_authenticated: false,
            loading: true,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Loading,
    Authenticated,
    Unauthenticated,
    Error,
}

impl AuthState {
    pub fn status(&self) -> SessionStatus {
        if self.is_authenticated {
            SessionStatus::Authenticated
        } else if self.loading {
            SessionStatus::Loading
        } else if self.error.as_deref().is_some_and(|e| !e.is_empty()) {
            SessionStatus::Error
        } else {
            SessionStatus::Unauthenticated
        }
    }
}

#[derive(Debug, Clone)]
pub enum AuthAction {
    LoginRequest,
    LoginSuccess(AuthPayload),
    LoginFailure(String),
    RegisterRequest,
    RegisterSuccess(AuthPayload),
    RegisterFailure(String),
    Logout,
    RestoreAuth { user: Option<User>, token: Option<String> },
}

/// The only way auth state changes
pub fn reduce(state: &AuthState, action: AuthAction) -> AuthState {
    match action {
        AuthAction::LoginRequest | AuthAction::RegisterRequest => AuthState {
            loading: true,
            error: None,
            ..state.clone()
        },
        AuthAction::LoginSuccess(payload) | AuthAction::RegisterSuccess(payload) => AuthState {
            user: Some(payload.user),
            token: Some(payload.token),
            is_authenticated: true,
            loading: false,
            error: None,
        },
        AuthAction::LoginFailure(error) | AuthAction::RegisterFailure(error) => AuthState {
            loading: false,
            error: Some(error),
            ..state.clone()
        },
        AuthAction::Logout => AuthState {
            loading: false,
            ..AuthState::default()
        },
        AuthAction::RestoreAuth { user, token } => AuthState {
            is_authenticated: user.is_some() && token.is_some(),
            user,
            token,
            loading: false,
            error: state.error.clone(),
        },
    }
}

/// Key/value store for the session, like a browser's local storage
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// JSON object on disk
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(map)?)?;
        Ok(())
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.read()?;
        map.insert(key.to_string(), value.to_string());
        self.write(&map)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut map = self.read()?;
        if map.remove(key).is_some() {
            self.write(&map)?;
        }
        Ok(())
    }
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| RadioError::Config("Session storage lock poisoned".to_string()))
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Checks run before a login request is sent
pub fn validate_login(credentials: &LoginCredentials) -> std::result::Result<(), String> {
    if credentials.email.trim().is_empty() || credentials.password.is_empty() {
        return Err("Email and password are required".to_string());
    }
    Ok(())
}

/// Checks run before a registration request is sent
pub fn validate_registration(credentials: &RegisterCredentials) -> std::result::Result<(), String> {
    if credentials.full_name.trim().is_empty()
        || credentials.email.trim().is_empty()
        || credentials.password.is_empty()
    {
        return Err("Name, email and password are required".to_string());
    }
    if credentials.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!("Password must be at least {} characters", MIN_PASSWORD_LEN));
    }
    if !credentials.role.is_clinician() {
        return Err("Please choose doctor or radiologist".to_string());
    }
    Ok(())
}

/// Profile rebuilt from token claims when no cached profile exists
fn user_from_claims(claims: &Claims) -> User {
    User {
        id: claims.user_id.clone(),
        full_name: claims.email.clone(),
        email: claims.email.clone(),
        role: claims.role,
        created_by: None,
        created_at: Utc.timestamp_opt(claims.iat, 0).single().unwrap_or_default(),
        age: None,
        phone_number: None,
        notes: None,
        specialty: None,
        hospital: None,
    }
}

struct Inner {
    backend: Arc<dyn AuthBackend>,
    storage: Arc<dyn SessionStorage>,
    state: watch::Sender<AuthState>,
}

impl Inner {
    fn dispatch(&self, action: AuthAction) {
        self.state.send_modify(|state| *state = reduce(state, action));
    }

    fn persist(&self, payload: &AuthPayload) -> Result<()> {
        self.storage.set(TOKEN_KEY, &payload.token)?;
        self.storage.set(USER_KEY, &serde_json::to_string(&payload.user)?)?;
        Ok(())
    }

    fn clear(&self) {
        for key in [TOKEN_KEY, USER_KEY] {
            if let Err(e) = self.storage.remove(key) {
                warn!("Could not remove {} from session storage: {}", key, e);
            }
        }
        self.dispatch(AuthAction::Logout);
    }

    /// One silent refresh. Logs out and returns `false` on failure.
    async fn refresh(&self) -> bool {
        let (token, user) = {
            let state = self.state.borrow();
            (state.token.clone(), state.user.clone())
        };
        let (Some(token), Some(user)) = (token, user) else {
            return false;
        };

        let response = self.backend.refresh(&token).await;

        // Logout or a new login while the request was in flight wins
        if self.state.borrow().token.as_deref() != Some(token.as_str()) {
            debug!("Discarding refresh for a superseded session");
            return self.state.borrow().is_authenticated;
        }

        match response.data {
            Some(fresh) if response.error.is_none() => {
                let payload = AuthPayload { user, token: fresh.token };
                if let Err(e) = self.storage.set(TOKEN_KEY, &payload.token) {
                    warn!("Could not store refreshed token: {}", e);
                }
                self.dispatch(AuthAction::LoginSuccess(payload));
                debug!("Session token refreshed");
                true
            }
            _ => {
                warn!(
                    "Token refresh failed ({}): {}",
                    response.status,
                    response.error.as_deref().unwrap_or("no token returned")
                );
                self.clear();
                false
            }
        }
    }
}

/// A user's session against an [`AuthBackend`]
pub struct AuthSession {
    inner: Arc<Inner>,
    refresh_interval: Option<Duration>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl AuthSession {
    pub fn new(backend: Arc<dyn AuthBackend>, storage: Arc<dyn SessionStorage>) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        Self {
            inner: Arc::new(Inner { backend, storage, state }),
            refresh_interval: Some(DEFAULT_REFRESH_INTERVAL),
            refresh_task: Mutex::new(None),
        }
    }

    /// `None` turns the background refresh off (one-shot CLI commands)
    pub fn with_refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.state.borrow().token.clone()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.state.borrow().user.clone()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_task
            .lock()
            .map(|task| task.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Load whatever the store holds. An expired or unreadable token logs out.
    ///
    /// Must run inside a tokio runtime when refresh is enabled.
    pub fn restore(&self) -> Result<SessionStatus> {
        let token = self.inner.storage.get(TOKEN_KEY)?;
        let cached_user = self.inner.storage.get(USER_KEY)?;

        if let Some(token) = &token {
            match decode_unverified(token) {
                Ok(claims) if !claims.is_expired() => {
                    let user = match cached_user.as_deref().map(serde_json::from_str::<User>) {
                        Some(Ok(user)) => user,
                        Some(Err(e)) => {
                            warn!("Cached profile unreadable, rebuilding from token: {}", e);
                            user_from_claims(&claims)
                        }
                        None => user_from_claims(&claims),
                    };
                    self.inner.dispatch(AuthAction::RestoreAuth {
                        user: Some(user),
                        token: Some(token.clone()),
                    });
                    self.start_refresh();
                    return Ok(self.state().status());
                }
                Ok(_) => info!("Stored session expired, logging out"),
                Err(e) => warn!("Stored token unreadable, logging out: {}", e),
            }
            self.logout();
            return Ok(self.state().status());
        }

        self.inner.dispatch(AuthAction::RestoreAuth { user: None, token: None });
        Ok(self.state().status())
    }

    /// Log in. On failure the error is kept in state and returned.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<User> {
        self.inner.dispatch(AuthAction::LoginRequest);
        if let Err(message) = validate_login(credentials) {
            self.inner.dispatch(AuthAction::LoginFailure(message.clone()));
            return Err(RadioError::Validation(message));
        }

        let response = self.inner.backend.login(credentials).await;
        let status = response.status;
        match response.data {
            Some(payload) if response.error.is_none() => {
                self.inner.persist(&payload)?;
                let user = payload.user.clone();
                self.inner.dispatch(AuthAction::LoginSuccess(payload));
                self.start_refresh();
                info!("Logged in as {}", user.email);
                Ok(user)
            }
            _ => {
                let message = response.error.unwrap_or_else(|| "Unknown error".to_string());
                self.inner.dispatch(AuthAction::LoginFailure(message.clone()));
                Err(RadioError::Api { status, message })
            }
        }
    }

    /// Register as a doctor or radiologist
    pub async fn register(&self, credentials: &RegisterCredentials) -> Result<User> {
        self.inner.dispatch(AuthAction::RegisterRequest);
        if let Err(message) = validate_registration(credentials) {
            self.inner.dispatch(AuthAction::RegisterFailure(message.clone()));
            return Err(RadioError::Validation(message));
        }

        let response = self.inner.backend.register(credentials).await;
        let status = response.status;
        match response.data {
            Some(payload) if response.error.is_none() => {
                self.inner.persist(&payload)?;
                let user = payload.user.clone();
                self.inner.dispatch(AuthAction::RegisterSuccess(payload));
                self.start_refresh();
                info!("Registered {} as {}", user.email, user.role);
                Ok(user)
            }
            _ => {
                let message = response.error.unwrap_or_else(|| "Unknown error".to_string());
                self.inner.dispatch(AuthAction::RegisterFailure(message.clone()));
                Err(RadioError::Api { status, message })
            }
        }
    }

    /// Stop the refresh timer, drop stored credentials, reset state
    pub fn logout(&self) {
        self.stop_refresh();
        self.inner.clear();
    }

    /// Refresh immediately. Returns whether the session survived.
    pub async fn refresh_now(&self) -> bool {
        let ok = self.inner.refresh().await;
        if !ok {
            self.stop_refresh();
        }
        ok
    }

    /// Role of the signed-in user, if any
    pub fn role(&self) -> Option<Role> {
        self.inner.state.borrow().user.as_ref().map(|u| u.role)
    }

    fn start_refresh(&self) {
        let Some(period) = self.refresh_interval else {
            return;
        };
        self.stop_refresh();

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if !inner.refresh().await {
                    break;
                }
            }
        });
        if let Ok(mut task) = self.refresh_task.lock() {
            *task = Some(handle);
        }
    }

    fn stop_refresh(&self) {
        if let Ok(mut task) = self.refresh_task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for AuthSession {
    fn drop(&mut self) {
        self.stop_refresh();
    }
}
