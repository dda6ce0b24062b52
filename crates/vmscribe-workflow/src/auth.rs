//! Access tokens for the message-store API.
//!
//! [`TokenProvider`] hands out bearer tokens. With [`Credentials::Jwt`] it
//! runs the JWT-bearer grant against the OAuth token endpoint and caches the
//! result until shortly before it expires. An expired access token is renewed
//! with the refresh token while that is still valid; otherwise, or when the
//! refresh is refused, the provider authorizes with the JWT again.
//!
//! A rejected token can be replaced through [`TokenProvider::reauthorize`].
//! Concurrent callers share one grant: the cache lock is held across the
//! token request.

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use vmscribe_core::Clock;

use crate::{
    client::{api_error, transport_error},
    error::{GatewayError, Result},
};

/// Path of the OAuth token endpoint, relative to the API base URL.
pub const TOKEN_PATH: &str = "/restapi/oauth/token";

/// Grant type of the JWT-bearer authorization.
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Grant type of a refresh.
pub const REFRESH_TOKEN_GRANT: &str = "refresh_token";

/// Tokens are renewed this long before the server would reject them.
const EXPIRY_MARGIN_SECONDS: i64 = 60;

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECONDS: i64 = 3600;

/// How the client authenticates against the message store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credentials {
    /// Pre-issued bearer token, sent unchanged and never renewed.
    Static(String),
    /// JWT-bearer grant with application credentials.
    Jwt(JwtCredentials),
}

impl Default for Credentials {
    fn default() -> Self {
        Self::Static(String::new())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Static(..)"),
            Self::Jwt(credentials) => f.debug_tuple("Jwt").field(credentials).finish(),
        }
    }
}

/// Application credentials for the JWT-bearer grant.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtCredentials {
    /// OAuth client id, sent as the basic-auth user.
    pub client_id: String,
    /// OAuth client secret, sent as the basic-auth password.
    pub client_secret: String,
    /// Signed JWT issued for the service account.
    pub assertion: String,
}

impl fmt::Debug for JwtCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    refresh_token_expires_in: Option<i64>,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
    refresh_token: Option<String>,
    refresh_expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn issued(response: TokenResponse, now: DateTime<Utc>) -> Self {
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECONDS);
        Self {
            access_token: response.access_token,
            expires_at: now + TimeDelta::seconds(expires_in),
            refresh_expires_at: response
                .refresh_token_expires_in
                .map(|seconds| now + TimeDelta::seconds(seconds)),
            refresh_token: response.refresh_token,
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + TimeDelta::seconds(EXPIRY_MARGIN_SECONDS) < self.expires_at
    }

    /// Refresh token, if one was issued and has not expired.
    fn usable_refresh_token(&self, now: DateTime<Utc>) -> Option<String> {
        let refresh_token = self.refresh_token.as_ref()?;
        match self.refresh_expires_at {
            Some(expires_at) if expires_at <= now + TimeDelta::seconds(EXPIRY_MARGIN_SECONDS) => {
                None
            },
            _ => Some(refresh_token.clone()),
        }
    }
}

/// Source of bearer tokens for the message-store client.
pub struct TokenProvider {
    http: reqwest::Client,
    token_url: String,
    credentials: Credentials,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Creates a provider issuing tokens from `base_url`.
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        credentials: Credentials,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            token_url: format!("{}{TOKEN_PATH}", base_url.trim_end_matches('/')),
            credentials,
            clock,
            timeout,
            cached: Mutex::new(None),
        }
    }

    /// Returns true if a rejected token can be replaced.
    pub fn can_reauthorize(&self) -> bool {
        matches!(self.credentials, Credentials::Jwt(_))
    }

    /// Returns a token valid for at least the expiry margin.
    ///
    /// # Errors
    ///
    /// Returns `Api` when the token endpoint refuses the grant and `Network`,
    /// `Timeout` or `Decode` when it cannot be reached or understood.
    pub async fn access_token(&self) -> Result<String> {
        let credentials = match &self.credentials {
            Credentials::Static(token) => return Ok(token.clone()),
            Credentials::Jwt(credentials) => credentials,
        };

        let mut cached = self.cached.lock().await;
        let now = self.clock.now_utc();

        let refresh_token = match cached.as_ref() {
            Some(token) if token.is_fresh(now) => return Ok(token.access_token.clone()),
            Some(token) => token.usable_refresh_token(now),
            None => None,
        };

        if let Some(refresh_token) = refresh_token {
            debug!("access token expired, refreshing");
            match self.refresh(credentials, &refresh_token).await {
                Ok(token) => return Ok(store(&mut cached, token)),
                Err(err) => warn!(error = %err, "token refresh failed, authorizing with JWT"),
            }
        }

        let token = self.authorize(credentials).await?;
        Ok(store(&mut cached, token))
    }

    /// Replaces a token the API rejected.
    ///
    /// Returns `None` when the credentials cannot produce another token. If
    /// another caller already replaced `rejected`, its token is returned
    /// without a new grant.
    ///
    /// # Errors
    ///
    /// Same as [`Self::access_token`].
    pub async fn reauthorize(&self, rejected: &str) -> Result<Option<String>> {
        let Credentials::Jwt(credentials) = &self.credentials else {
            return Ok(None);
        };

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.access_token != rejected && token.is_fresh(self.clock.now_utc()) {
                return Ok(Some(token.access_token.clone()));
            }
        }

        warn!("access token rejected, authorizing with JWT");
        *cached = None;
        let token = self.authorize(credentials).await?;
        Ok(Some(store(&mut cached, token)))
    }

    async fn authorize(&self, credentials: &JwtCredentials) -> Result<CachedToken> {
        let token = self
            .request_token(
                credentials,
                &[("grant_type", JWT_BEARER_GRANT), ("assertion", credentials.assertion.as_str())],
            )
            .await?;
        info!(expires_at = %token.expires_at, "authorized with JWT");
        Ok(token)
    }

    async fn refresh(&self, credentials: &JwtCredentials, refresh_token: &str) -> Result<CachedToken> {
        let token = self
            .request_token(
                credentials,
                &[("grant_type", REFRESH_TOKEN_GRANT), ("refresh_token", refresh_token)],
            )
            .await?;
        info!(expires_at = %token.expires_at, "access token refreshed");
        Ok(token)
    }

    async fn request_token(
        &self,
        credentials: &JwtCredentials,
        form: &[(&str, &str)],
    ) -> Result<CachedToken> {
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(form)
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let body = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| GatewayError::decode(format!("token response: {e}")))?;

        Ok(CachedToken::issued(body, self.clock.now_utc()))
    }
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenProvider")
            .field("token_url", &self.token_url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

fn store(cached: &mut Option<CachedToken>, token: CachedToken) -> String {
    let access_token = token.access_token.clone();
    *cached = Some(token);
    access_token
}
