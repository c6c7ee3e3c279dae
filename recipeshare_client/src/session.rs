use std::sync::{Arc, Mutex};

use log::{info, warn};
use serde_json::{json, Value};
use thiserror::Error;

use crate::api::{paths, ApiRequest, Transport, TransportError};
use crate::models::{AccountResponse, User};
use crate::storage::{TokenStorage, TOKEN_KEY};

/// The session's three states. Holding the token inside the authenticated
/// variants makes "logged in implies a token" true by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Anonymous,
    /// A persisted token exists but its owner has not been re-fetched yet.
    Refreshing { token: String },
    Authenticated { user: User, token: String },
}

impl SessionState {
    pub fn logged_in(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    pub fn refreshing(&self) -> bool {
        matches!(self, Self::Refreshing { .. })
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Refreshing { token } | Self::Authenticated { token, .. } => Some(token),
        }
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Authenticated { user, .. } => Some(user),
            _ => None,
        }
    }
}

pub enum SessionAction {
    Login { user: User, token: String },
    Refresh { user: User },
    Rename { user: User },
    Logout,
}

fn reduce(state: SessionState, action: SessionAction) -> SessionState {
    match action {
        SessionAction::Login { user, token } => SessionState::Authenticated { user, token },
        SessionAction::Refresh { user } => match state {
            SessionState::Refreshing { token } => SessionState::Authenticated { user, token },
            other => other,
        },
        SessionAction::Rename { user } => match state {
            SessionState::Authenticated { token, .. } => {
                SessionState::Authenticated { user, token }
            }
            other => other,
        },
        SessionAction::Logout => SessionState::Anonymous,
    }
}

#[derive(Debug, PartialEq, Error)]
pub enum LoginError {
    #[error("invalid password")]
    InvalidPassword,
    #[error("Paprika login failed: {0}")]
    PaprikaLogin(String),
    #[error("login failed: {0}")]
    Rejected(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

struct SessionInner {
    state: SessionState,
    refresh_started: bool,
}

/// Authentication session. The persisted token is the only durable state;
/// it is read synchronously at construction so the very first consumer can
/// tell an anonymous session from one whose owner is being re-fetched.
pub struct SessionStore {
    transport: Arc<dyn Transport>,
    storage: Arc<dyn TokenStorage>,
    inner: Mutex<SessionInner>,
}

impl SessionStore {
    pub fn new(transport: Arc<dyn Transport>, storage: Arc<dyn TokenStorage>) -> Self {
        let state = match storage.get(TOKEN_KEY) {
            Some(token) => SessionState::Refreshing { token },
            None => SessionState::Anonymous,
        };
        Self {
            transport,
            storage,
            inner: Mutex::new(SessionInner {
                state,
                refresh_started: false,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state.clone()
    }

    pub fn logged_in(&self) -> bool {
        self.inner.lock().unwrap().state.logged_in()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.lock().unwrap().state.user().cloned()
    }

    fn dispatch(&self, action: SessionAction) {
        let mut inner = self.inner.lock().unwrap();
        match &action {
            SessionAction::Login { token, .. } => self.storage.set(TOKEN_KEY, token),
            // deliberate policy: logging out wipes every persisted key
            SessionAction::Logout => self.storage.clear_all(),
            SessionAction::Refresh { .. } | SessionAction::Rename { .. } => {}
        }
        let state = std::mem::replace(&mut inner.state, SessionState::Anonymous);
        inner.state = reduce(state, action);
    }

    /// Exchanges credentials for a token and a user record. On success the
    /// token is persisted and the session becomes authenticated.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), LoginError> {
        let request = ApiRequest::post(paths::LOGIN, json!({"email": email, "password": password}));
        let response = self.transport.request(request).await?;
        if response.ok() && response.error_token().is_none() {
            let account: AccountResponse = serde_json::from_value(response.body)
                .map_err(|err| LoginError::Rejected(format!("unexpected response payload: {err}")))?;
            info!("logged in as {}", account.user.email);
            self.dispatch(SessionAction::Login {
                user: account.user,
                token: account.token,
            });
            Ok(())
        } else {
            match response.error_token() {
                Some("invalid_password") => Err(LoginError::InvalidPassword),
                Some("invalid_paprika_login") => {
                    let detail = response
                        .body
                        .get("detail")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error");
                    Err(LoginError::PaprikaLogin(detail.to_string()))
                }
                Some(other) => Err(LoginError::Rejected(other.to_string())),
                None => Err(LoginError::Rejected(format!("status {}", response.status))),
            }
        }
    }

    /// Re-fetches the owner of the persisted token. Issues at most one
    /// who-am-I request per process lifetime no matter how many consumers
    /// call it; outside the refreshing state it does nothing. Failure is
    /// silent and forces a logout.
    pub async fn refresh(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.state.refreshing() || inner.refresh_started {
                return;
            }
            inner.refresh_started = true;
        }
        match self.transport.request(ApiRequest::get(paths::ME)).await {
            Ok(response) if response.ok() => {
                match serde_json::from_value::<AccountResponse>(response.body) {
                    Ok(account) => {
                        info!("refresh successful for {}", account.user.email);
                        self.dispatch(SessionAction::Refresh { user: account.user });
                    }
                    Err(err) => {
                        warn!("refresh returned a malformed payload: {err}; logging out");
                        self.dispatch(SessionAction::Logout);
                    }
                }
            }
            Ok(response) => {
                info!("refresh failed with status {}; logging out", response.status);
                self.dispatch(SessionAction::Logout);
            }
            Err(err) => {
                warn!("refresh failed: {err}; logging out");
                self.dispatch(SessionAction::Logout);
            }
        }
    }

    /// Replaces the user's display name. The token is untouched; failures
    /// keep the current user record.
    pub async fn rename(&self, name: &str) {
        if !self.logged_in() {
            return;
        }
        let request = ApiRequest::patch(paths::ME, json!({ "name": name }));
        match self.transport.request(request).await {
            Ok(response) if response.ok() => {
                match serde_json::from_value::<AccountResponse>(response.body) {
                    Ok(account) => self.dispatch(SessionAction::Rename { user: account.user }),
                    Err(err) => warn!("profile update returned a malformed payload: {err}"),
                }
            }
            Ok(response) => warn!("profile update rejected with status {}", response.status),
            Err(err) => warn!("profile update failed: {err}"),
        }
    }

    pub fn logout(&self) {
        info!("logging out");
        self.dispatch(SessionAction::Logout);
    }
}
