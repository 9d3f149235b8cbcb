//! Client for the meeting platform's OAuth and user APIs.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::error::{AppError, Result};
use crate::models::credential::{Credential, UpstreamUser};

/// Seconds shaved off every grant so a token is refreshed before the
/// platform would reject it.
const EXPIRY_MARGIN_SECS: i64 = 700;
const MAX_RETRIES: u32 = 3;

/// A token grant as returned by the OAuth endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub scope: String,
    pub expires_in: i64,
}

impl TokenGrant {
    pub fn validate(&self) -> Result<()> {
        if self.access_token.trim().is_empty()
            || self.refresh_token.trim().is_empty()
            || self.token_type.trim().is_empty()
            || self.expires_in < 1
        {
            return Err(AppError::Upstream("Token grant is incomplete".into()));
        }
        Ok(())
    }

    /// The credential this grant yields for `user_id` at `now_ms`.
    pub fn into_credential(self, user_id: &str, now_ms: i64) -> Credential {
        let lifetime = (self.expires_in - EXPIRY_MARGIN_SECS).max(self.expires_in / 2);
        Credential {
            user_id: user_id.to_string(),
            access_token: self.access_token.trim().to_string(),
            refresh_token: self.refresh_token.trim().to_string(),
            token_type: self.token_type.trim().to_string(),
            scope: self.scope.trim().to_string(),
            expires_at: now_ms + lifetime * 1000,
        }
    }
}

#[async_trait]
pub trait UpstreamIdentity: Send + Sync {
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant>;

    async fn get_user(&self, access_token: &str) -> Result<UpstreamUser>;
}

pub struct ZoomClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: Zeroizing<String>,
}

impl ZoomClient {
    pub fn new(
        base_url: &str,
        client_id: &str,
        client_secret: Zeroizing<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Could not build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret,
        })
    }

    /// Sends a request, retrying with backoff while the platform rate-limits.
    async fn send(
        &self,
        action: &str,
        build: impl Fn() -> reqwest::RequestBuilder + Send + Sync,
    ) -> Result<reqwest::Response> {
        let mut backoff = Duration::from_millis(120);
        let mut attempt = 0;

        loop {
            let response = build().send().await.map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(format!("{}: {}", action, e))
                } else {
                    AppError::Upstream(format!("{}: {}", action, e))
                }
            })?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RETRIES {
                attempt += 1;
                tracing::warn!("{} rate limited, retry {} in {:?}", action, attempt, backoff);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_millis(900));
                continue;
            }

            if !status.is_success() {
                return Err(AppError::Upstream(format!(
                    "{} returned unexpected status {}",
                    action, status
                )));
            }
            return Ok(response);
        }
    }
}

#[async_trait]
impl UpstreamIdentity for ZoomClient {
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        let url = format!("{}/oauth/token", self.base_url);
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .send("refresh access token", || self.http.post(&url).form(&form))
            .await?;
        let grant: TokenGrant = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Malformed token grant: {}", e)))?;
        grant.validate()?;
        Ok(grant)
    }

    async fn get_user(&self, access_token: &str) -> Result<UpstreamUser> {
        let url = format!("{}/v2/users/me", self.base_url);
        let response = self
            .send("get current user", || self.http.get(&url).bearer_auth(access_token))
            .await?;
        let user: UpstreamUser = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Malformed user: {}", e)))?;

        if user.id.trim().is_empty() {
            return Err(AppError::Upstream("User has no id".into()));
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(expires_in: i64) -> TokenGrant {
        TokenGrant {
            access_token: " access ".into(),
            refresh_token: "refresh".into(),
            token_type: "bearer".into(),
            scope: "user:read".into(),
            expires_in,
        }
    }

    #[test]
    fn credential_expiry_keeps_a_margin() {
        let credential = grant(3600).into_credential("u1", 1_000_000);
        assert_eq!(credential.expires_at, 1_000_000 + (3600 - 700) * 1000);
        assert_eq!(credential.access_token, "access");
    }

    #[test]
    fn short_grants_still_expire_in_the_future() {
        let credential = grant(600).into_credential("u1", 0);
        assert_eq!(credential.expires_at, 300_000);
    }

    #[test]
    fn incomplete_grants_are_rejected() {
        let mut g = grant(3600);
        g.refresh_token = " ".into();
        assert!(matches!(g.validate(), Err(AppError::Upstream(_))));
        assert!(grant(0).validate().is_err());
        assert!(grant(10).validate().is_ok());
    }
}
