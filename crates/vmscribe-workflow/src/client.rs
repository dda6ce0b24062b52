//! HTTP client for the voicemail message store.
//!
//! Fetches messages and attachment content with a bearer token from the
//! [`TokenProvider`]. A `401` is answered once by re-authorizing and replaying
//! the request. Non-success responses become [`GatewayError::Api`] carrying
//! the rate-limit headers the API retry policy needs.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use reqwest::{header::HeaderMap, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};
use vmscribe_core::{
    models::{AccountScope, ContentDisposition, Message},
    Clock, RealClock,
};

use crate::{
    auth::{Credentials, TokenProvider},
    error::{GatewayError, Result},
    gateway::{MessageGateway, TranscriptionGateway},
};

const RATE_LIMIT_REMAINING: &str = "x-rate-limit-remaining";
const RATE_LIMIT_WINDOW: &str = "x-rate-limit-window";

/// Upper bound on error bodies kept in error messages.
const MAX_ERROR_BODY: usize = 1024;

/// Configuration for the message-store client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the API, without the `/restapi` path.
    pub base_url: String,
    /// How requests are authenticated.
    pub credentials: Credentials,
    /// Request timeout.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://platform.ringcentral.com".to_string(),
            credentials: Credentials::default(),
            timeout: Duration::from_secs(30),
            user_agent: "vmscribe/0.1".to_string(),
        }
    }
}

/// Message-store API client.
#[derive(Debug, Clone)]
pub struct MessageStoreClient {
    client: reqwest::Client,
    config: ClientConfig,
    tokens: Arc<TokenProvider>,
}

impl MessageStoreClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Network` if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(RealClock::new()))
    }

    /// Creates a client whose token expiry is judged by `clock`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::new`].
    pub fn with_clock(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| GatewayError::network(format!("failed to build HTTP client: {e}")))?;

        let tokens = Arc::new(TokenProvider::new(
            client.clone(),
            &config.base_url,
            config.credentials.clone(),
            clock,
            config.timeout,
        ));

        Ok(Self { client, config, tokens })
    }

    fn message_url(&self, scope: AccountScope, message_id: i64) -> String {
        format!(
            "{}/restapi/v1.0/account/{}/extension/{}/message-store/{}",
            self.config.base_url.trim_end_matches('/'),
            scope.account_id,
            scope.extension_id,
            message_id
        )
    }

    /// Fetches a message by id.
    ///
    /// # Errors
    ///
    /// Returns `Api` for non-success responses, `Timeout` or `Network` for
    /// transport failures and `Decode` for an unexpected body.
    pub async fn get_message(&self, scope: AccountScope, message_id: i64) -> Result<Message> {
        let span = info_span!(
            "fetch_message",
            account_id = scope.account_id,
            extension_id = scope.extension_id,
            message_id
        );

        async move {
            let response = self.send(&self.message_url(scope, message_id), None).await?;
            let message = response
                .json::<Message>()
                .await
                .map_err(|e| GatewayError::decode(format!("message body: {e}")))?;

            tracing::debug!(
                attachments = message.attachments.len(),
                transcription_status = %message.vm_transcription_status,
                "fetched message"
            );
            Ok(message)
        }
        .instrument(span)
        .await
    }

    /// Fetches the content of an attachment as text.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_message`].
    pub async fn get_attachment_content(
        &self,
        scope: AccountScope,
        message_id: i64,
        attachment_id: i64,
        disposition: ContentDisposition,
    ) -> Result<String> {
        let span = info_span!("fetch_attachment", message_id, attachment_id);

        async move {
            let url = format!("{}/content/{attachment_id}", self.message_url(scope, message_id));
            let response = self.send(&url, Some(disposition)).await?;
            let text = response
                .text()
                .await
                .map_err(|e| GatewayError::decode(format!("attachment body: {e}")))?;

            tracing::debug!(length = text.len(), "fetched attachment content");
            Ok(text)
        }
        .instrument(span)
        .await
    }

    async fn send(&self, url: &str, disposition: Option<ContentDisposition>) -> Result<Response> {
        let token = self.tokens.access_token().await?;
        let mut response = self.send_with_token(url, disposition, &token).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(fresh) = self.tokens.reauthorize(&token).await? {
                tracing::debug!("replaying request with a fresh access token");
                response = self.send_with_token(url, disposition, &fresh).await?;
            }
        }

        if response.status().is_success() {
            return Ok(response);
        }

        Err(api_error(response).await)
    }

    async fn send_with_token(
        &self,
        url: &str,
        disposition: Option<ContentDisposition>,
        token: &str,
    ) -> Result<Response> {
        let mut request = self.client.get(url).bearer_auth(token);
        if let Some(disposition) = disposition {
            request = request.query(&[("contentDisposition", disposition.as_str())]);
        }

        request.send().await.map_err(|e| {
            tracing::warn!(error = %e, "request failed");
            transport_error(&e, self.config.timeout)
        })
    }
}

impl MessageGateway for MessageStoreClient {
    fn fetch_message(
        &self,
        scope: AccountScope,
        message_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Message>> + Send + '_>> {
        Box::pin(self.get_message(scope, message_id))
    }
}

impl TranscriptionGateway for MessageStoreClient {
    fn fetch_transcription_content(
        &self,
        scope: AccountScope,
        message_id: i64,
        attachment_id: i64,
        disposition: ContentDisposition,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(self.get_attachment_content(scope, message_id, attachment_id, disposition))
    }
}

/// Maps a transport failure to `Timeout` or `Network`.
pub(crate) fn transport_error(error: &reqwest::Error, timeout: Duration) -> GatewayError {
    if error.is_timeout() {
        return GatewayError::timeout(timeout.as_secs());
    }
    GatewayError::network(error.to_string())
}

/// Turns a non-success response into `GatewayError::Api`.
pub(crate) async fn api_error(response: Response) -> GatewayError {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();

    tracing::warn!(status = status.as_u16(), "message store returned error status");

    GatewayError::Api {
        status_code: status.as_u16(),
        retry_after: extract_retry_after_seconds(&headers),
        rate_limit_remaining: header_u64(&headers, RATE_LIMIT_REMAINING),
        rate_limit_window: header_u64(&headers, RATE_LIMIT_WINDOW),
        message: truncate(&body, status),
    }
}

fn truncate(body: &str, status: StatusCode) -> String {
    if body.is_empty() {
        return status.canonical_reason().unwrap_or("unknown status").to_string();
    }
    body.chars().take(MAX_ERROR_BODY).collect()
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Extracts the `Retry-After` delay in seconds.
///
/// Supports both the seconds format and the HTTP-date format. A date in the
/// past yields zero.
pub fn extract_retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }

    let date_time = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let remaining = date_time.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(remaining.to_std().map(|d| d.as_secs()).unwrap_or(0))
}
