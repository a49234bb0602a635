//! Discord channel — reads channel history through the user web API.
//!
//! Requests carry the raw user token in `Authorization` and a browser
//! user agent. Idempotent GETs are retried on gateway errors and dropped
//! connections before anything is reported to the poll loop.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::channels::{ChannelFetcher, CurrentUser, Page};
use crate::error::{AuthError, FetchError};

/// Public API root.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v9";

/// Per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/94.0.4606.81 Safari/537.36";

/// Statuses worth retrying on an idempotent request.
const RETRY_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Bounded exponential retry for idempotent requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each one after.
    pub backoff_factor: Duration,
    /// Upper bound for a single delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.backoff_factor
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_factor: Duration::from_millis(500),
            max_backoff: Duration::from_secs(120),
        }
    }
}

/// Result of a password login.
#[derive(Debug)]
pub enum LoginOutcome {
    Token(SecretString),
    /// Account has two-factor auth; submit a TOTP code with this ticket.
    MfaRequired { ticket: String },
}

#[derive(Debug, Default, Deserialize)]
struct AuthResponse {
    token: Option<String>,
    ticket: Option<String>,
    #[serde(default)]
    mfa: bool,
    message: Option<String>,
}

impl AuthResponse {
    fn wants_mfa(&self) -> bool {
        self.mfa
            || self
                .message
                .as_deref()
                .is_some_and(|m| m.to_lowercase().contains("mfa"))
    }
}

/// HTTP client bound to one channel.
#[derive(Debug, Clone)]
pub struct DiscordClient {
    client: reqwest::Client,
    base_url: String,
    channel_id: String,
    retry: RetryPolicy,
    timeout: Duration,
}

impl DiscordClient {
    pub fn new(channel_id: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: DEFAULT_API_BASE.to_string(),
            channel_id: channel_id.into(),
            retry: RetryPolicy::default(),
            timeout,
        })
    }

    /// Point the client at another API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn transport_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Http(e.to_string())
        }
    }

    /// GET with the retry policy applied.
    ///
    /// Returns the last response once retries run out, so the caller
    /// still sees the real status.
    async fn get_with_retry(
        &self,
        url: &str,
        token: &SecretString,
        query: &[(&str, String)],
    ) -> Result<Response, FetchError> {
        let mut retry = 0;
        loop {
            let result = self
                .client
                .get(url)
                .header(AUTHORIZATION, token.expose_secret())
                .query(query)
                .send()
                .await;

            let reason = match result {
                Ok(resp)
                    if RETRY_STATUSES.contains(&resp.status().as_u16())
                        && retry < self.retry.max_retries =>
                {
                    format!("status {}", resp.status())
                }
                Ok(resp) => return Ok(resp),
                Err(e) if (e.is_connect() || e.is_timeout()) && retry < self.retry.max_retries => {
                    e.to_string()
                }
                Err(e) => return Err(self.transport_error(e)),
            };

            let delay = self.retry.delay(retry);
            warn!(url, attempt = retry + 1, ?delay, "Retrying request: {reason}");
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        resp: Response,
        endpoint: &str,
    ) -> Result<T, FetchError> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(FetchError::Unauthorized {
                endpoint: endpoint.to_string(),
            });
        }
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<T>().await.map_err(|e| {
            if e.is_decode() {
                FetchError::InvalidResponse(e.to_string())
            } else {
                self.transport_error(e)
            }
        })
    }

    /// Log in with email/phone and password.
    pub async fn login(
        &self,
        login: &str,
        password: &SecretString,
    ) -> Result<LoginOutcome, AuthError> {
        let body = serde_json::json!({
            "login": login,
            "password": password.expose_secret(),
            "undelete": false,
            "captcha_key": null,
            "login_source": null,
            "gift_code_sku_id": null
        });

        let resp = self
            .client
            .post(self.api_url("/auth/login"))
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;
        let parsed: AuthResponse = serde_json::from_str(&text).unwrap_or_default();

        if status == StatusCode::OK
            && let Some(token) = parsed.token.as_deref().filter(|t| !t.is_empty())
        {
            return Ok(LoginOutcome::Token(SecretString::from(token)));
        }

        if matches!(status, StatusCode::OK | StatusCode::BAD_REQUEST) && parsed.wants_mfa() {
            if let Some(ticket) = parsed.ticket {
                debug!("Login requires two-factor code");
                return Ok(LoginOutcome::MfaRequired { ticket });
            }
        }

        Err(AuthError::LoginRejected {
            status: status.as_u16(),
            reason: text,
        })
    }

    /// Finish a two-factor login.
    pub async fn submit_mfa(&self, ticket: &str, code: &str) -> Result<SecretString, AuthError> {
        let body = serde_json::json!({
            "code": code,
            "ticket": ticket,
            "login_source": null,
            "gift_code_sku_id": null
        });

        let resp = self
            .client
            .post(self.api_url("/auth/mfa/totp"))
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(AuthError::MfaRejected {
                status: status.as_u16(),
            });
        }

        let parsed: AuthResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;
        parsed
            .token
            .filter(|t| !t.is_empty())
            .map(SecretString::from)
            .ok_or(AuthError::MfaRejected {
                status: status.as_u16(),
            })
    }
}

#[async_trait]
impl ChannelFetcher for DiscordClient {
    async fn fetch(
        &self,
        token: &SecretString,
        limit: u8,
        before: Option<&str>,
    ) -> Result<Page, FetchError> {
        let url = self.api_url(&format!("/channels/{}/messages", self.channel_id));
        let mut query = vec![("limit", limit.to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }

        let resp = self.get_with_retry(&url, token, &query).await?;
        let page: Page = self.read_json(resp, "channel messages").await?;
        debug!(count = page.len(), "Fetched channel page");
        Ok(page)
    }

    async fn current_user(&self, token: &SecretString) -> Result<CurrentUser, FetchError> {
        let url = self.api_url("/users/@me");
        let resp = self.get_with_retry(&url, token, &[]).await?;
        self.read_json(resp, "current user").await
    }
}
