use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::warn;

/// Scope a caller must hold to read rate buckets.
pub const REQUIRED_SCOPE: &str = "doppler.firehose";

/// Validates inbound bearer tokens against a scope.
#[async_trait]
pub trait TokenChecker: Send + Sync {
    async fn check_token(&self, token: &str, scope: &str) -> bool;
}

/// UAA client-credentials client.
///
/// Obtains fresh bearer tokens for outbound calls and validates inbound
/// tokens against a required scope. Tokens are short-lived and refreshed on
/// demand before each outbound call; there is no background refresh.
pub struct Authenticator {
    client_id: String,
    client_secret: String,
    uaa_addr: String,
    client: reqwest::Client,
}

impl Authenticator {
    pub fn new(
        client_id: &str,
        client_secret: &str,
        uaa_addr: &str,
        skip_cert_verify: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .danger_accept_invalid_certs(skip_cert_verify)
            .build()
            .context("failed to build UAA client")?;

        Ok(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            uaa_addr: uaa_addr.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Request a fresh bearer token from the token endpoint.
    pub async fn refresh_token(&self) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/oauth/token", self.uaa_addr))
            .form(&[
                ("response_type", "token"),
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .context("token request failed")?;

        if response.status() != reqwest::StatusCode::OK {
            bail!(
                "expected 200 from /oauth/token, got {}",
                response.status()
            );
        }

        let body: serde_json::Value =
            response.json().await.context("invalid token response")?;

        match body.get("access_token").and_then(|t| t.as_str()) {
            Some(token) => Ok(token.to_string()),
            None => bail!("no access_token in token response"),
        }
    }
}

#[async_trait]
impl TokenChecker for Authenticator {
    /// `false` on empty inputs, transport failure, or any non-200. Rejections
    /// are logged, never surfaced: the caller only needs a verdict.
    async fn check_token(&self, token: &str, scope: &str) -> bool {
        if token.is_empty() || scope.is_empty() {
            return false;
        }

        let result = self
            .client
            .post(format!("{}/check_token", self.uaa_addr))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("token", token), ("scopes", scope)])
            .send()
            .await;

        match result {
            Ok(response) if response.status() == reqwest::StatusCode::OK => true,
            Ok(response) => {
                warn!(status = %response.status(), "token check rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "token check failed");
                false
            }
        }
    }
}
