//! Bearer token ownership for unattended, long running exchanges.
//!
//! The [TokenManager] holds exactly one current [AuthToken]. It is replaced wholesale, either
//! by the re-authentication timer once the token's lifetime elapses, or on demand when a
//! downstream API answers 401. Re-authentication runs the full [Authenticator] flow again; no
//! refresh token is exchanged. A refresh-token flow can be substituted by implementing
//! [Authenticator] without touching callers.

use std::{
    fmt::Debug,
    sync::{Arc, Weak},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use http::{header::CONTENT_TYPE, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    config::Config,
    core::util::{base_request, body_text, AsyncHttpClient},
    error::ExchangeError,
};

/// Used when the token endpoint does not announce a lifetime.
const DEFAULT_LIFETIME_SECS: u64 = 300;

/// Delay before the timer tries again after a failed scheduled re-authentication.
const RETRY_AFTER_FAILURE: Duration = Duration::from_secs(10);

/// An issued bearer token. Immutable once issued.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    value: String,
    expires_in_seconds: u64,
}

impl AuthToken {
    pub fn new(value: impl Into<String>, expires_in_seconds: u64) -> Self {
        Self {
            value: value.into(),
            expires_in_seconds,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_in_seconds(&self) -> u64 {
        self.expires_in_seconds
    }

    /// Value of the `Authorization` header carrying this token.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }

    fn lifetime(&self) -> Duration {
        let secs = match self.expires_in_seconds {
            0 => DEFAULT_LIFETIME_SECS,
            secs => secs,
        };
        Duration::from_secs(secs)
    }
}

impl Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"<redacted>")
            .field("expires_in_seconds", &self.expires_in_seconds)
            .finish()
    }
}

/// Source of fresh bearer tokens.
#[async_trait]
pub trait Authenticator: Debug {
    async fn authenticate(&self) -> Result<AuthToken, ExchangeError>;
}

/// OAuth2 resource owner password grant against a fixed token endpoint.
pub struct PasswordGrant {
    http_client: Arc<dyn AsyncHttpClient + Send + Sync>,
    token_url: Url,
    form: PasswordGrantForm,
}

#[derive(Serialize)]
struct PasswordGrantForm {
    username: String,
    password: String,
    grant_type: &'static str,
    client_id: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_expires_in: Option<u64>,
    expires_in: Option<u64>,
}

impl PasswordGrant {
    pub fn new(
        http_client: Arc<dyn AsyncHttpClient + Send + Sync>,
        token_url: Url,
        username: impl Into<String>,
        password: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            token_url,
            form: PasswordGrantForm {
                username: username.into(),
                password: password.into(),
                grant_type: "password",
                client_id: client_id.into(),
            },
        }
    }

    pub fn from_config(
        http_client: Arc<dyn AsyncHttpClient + Send + Sync>,
        config: &Config,
    ) -> Self {
        Self::new(
            http_client,
            config.token_url.clone(),
            &config.username,
            &config.password,
            &config.client_id,
        )
    }
}

impl Debug for PasswordGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordGrant")
            .field("token_url", &self.token_url.as_str())
            .field("username", &self.form.username)
            .field("client_id", &self.form.client_id)
            .finish()
    }
}

#[async_trait]
impl Authenticator for PasswordGrant {
    async fn authenticate(&self) -> Result<AuthToken, ExchangeError> {
        let body = serde_urlencoded::to_string(&self.form)
            .context("unable to encode password grant")?
            .into_bytes();
        let request = base_request()
            .method(Method::POST)
            .uri(self.token_url.as_str())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .context("failed to construct token request")?;

        let response = self
            .http_client
            .execute(request)
            .await
            .context("token request failed")?;

        let status = response.status();
        let body = body_text(response)?;
        if status != StatusCode::OK {
            error!(%status, token_url = %self.token_url, "token endpoint rejected the credentials");
            return Err(ExchangeError::auth_failed(format!(
                "token endpoint answered {status}: {body}"
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ExchangeError::auth_failed(format!("malformed token response: {e}")))?;
        let Some(access_token) = parsed.access_token.filter(|t| !t.is_empty()) else {
            return Err(ExchangeError::auth_failed(
                "token response carries no access_token",
            ));
        };

        let expires_in = parsed
            .refresh_expires_in
            .or(parsed.expires_in)
            .unwrap_or(DEFAULT_LIFETIME_SECS);
        Ok(AuthToken::new(access_token, expires_in))
    }
}

#[derive(Debug)]
struct Current {
    token: Arc<AuthToken>,
    generation: u64,
}

/// Owner of the current bearer token.
#[derive(Debug)]
pub struct TokenManager {
    authenticator: Arc<dyn Authenticator + Send + Sync>,
    current: RwLock<Option<Current>>,
    // Held for the duration of a token request, so concurrent refreshes collapse into one.
    refresh: Mutex<()>,
}

impl TokenManager {
    /// Create a manager without acquiring a token.
    ///
    /// [TokenManager::current_token] fails with [ExchangeError::AuthUnavailable] until the first
    /// acquisition completes.
    pub fn new(authenticator: Arc<dyn Authenticator + Send + Sync>) -> Self {
        Self {
            authenticator,
            current: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Acquire the first token and schedule re-authentication each time the token's lifetime
    /// elapses.
    ///
    /// The timer stops once the returned manager is dropped.
    pub async fn start(
        authenticator: Arc<dyn Authenticator + Send + Sync>,
    ) -> Result<Arc<Self>, ExchangeError> {
        let manager = Arc::new(Self::new(authenticator));
        let token = manager.force_refresh().await?;
        tokio::spawn(reauthenticate(Arc::downgrade(&manager), token.lifetime()));
        Ok(manager)
    }

    /// The latest successfully obtained token.
    pub async fn current_token(&self) -> Result<Arc<AuthToken>, ExchangeError> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|current| current.token.clone())
            .ok_or(ExchangeError::AuthUnavailable)
    }

    /// Re-authenticate and replace the current token.
    ///
    /// Callers arriving while a refresh is in flight wait for it and share its token instead
    /// of issuing another token request.
    pub async fn force_refresh(&self) -> Result<Arc<AuthToken>, ExchangeError> {
        let observed = self.generation().await;

        let _guard = self.refresh.lock().await;
        {
            let current = self.current.read().await;
            if let Some(current) = current.as_ref().filter(|c| c.generation != observed) {
                debug!("token was refreshed while waiting, reusing it");
                return Ok(current.token.clone());
            }
        }

        self.acquire(observed).await
    }

    /// Replace a token that a downstream API rejected.
    ///
    /// If `rejected` is no longer the current token, the current one is returned without a
    /// token request.
    pub async fn replace_rejected(
        &self,
        rejected: &Arc<AuthToken>,
    ) -> Result<Arc<AuthToken>, ExchangeError> {
        let _guard = self.refresh.lock().await;
        let generation = {
            let current = self.current.read().await;
            match current.as_ref() {
                Some(current) if !Arc::ptr_eq(&current.token, rejected) => {
                    debug!("rejected token was already replaced, reusing the current one");
                    return Ok(current.token.clone());
                }
                Some(current) => current.generation,
                None => 0,
            }
        };

        self.acquire(generation).await
    }

    // Callers hold the refresh lock.
    async fn acquire(&self, observed: u64) -> Result<Arc<AuthToken>, ExchangeError> {
        let token = Arc::new(self.authenticator.authenticate().await?);
        let mut current = self.current.write().await;
        let generation = observed + 1;
        *current = Some(Current {
            token: token.clone(),
            generation,
        });
        info!(
            generation,
            expires_in = token.expires_in_seconds(),
            "acquired bearer token"
        );
        Ok(token)
    }

    async fn generation(&self) -> u64 {
        self.current
            .read()
            .await
            .as_ref()
            .map_or(0, |current| current.generation)
    }
}

async fn reauthenticate(manager: Weak<TokenManager>, mut delay: Duration) {
    loop {
        tokio::time::sleep(delay).await;
        let Some(manager) = manager.upgrade() else {
            debug!("token manager dropped, stopping re-authentication");
            return;
        };
        delay = match manager.force_refresh().await {
            Ok(token) => token.lifetime(),
            Err(e) => {
                warn!("scheduled re-authentication failed: {e}");
                RETRY_AFTER_FAILURE
            }
        };
    }
}
