// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! GitHub OAuth app: authorize URL, code exchange, org membership.

use serde::Deserialize;

use crate::error::BrokerError;
use crate::identity::{http_client, IdentityProvider, ProviderIdentity, ResolveFuture};

const USER_AGENT: &str = "loginrelay";

/// Endpoints and app credentials for the GitHub provider.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub org: String,
    pub authorize_url: String,
    pub token_url: String,
    pub api_url: String,
}

/// Response of the `login/oauth/access_token` endpoint.
#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: u64,
    login: String,
}

pub struct GitHubProvider {
    config: GitHubConfig,
    http: reqwest::Client,
}

impl GitHubProvider {
    pub fn new(config: GitHubConfig) -> Self {
        Self { config, http: http_client(true) }
    }

    fn client_id(&self) -> Result<&str, BrokerError> {
        self.config
            .client_id
            .as_deref()
            .ok_or_else(|| BrokerError::Provider("GitHub login is not configured".to_owned()))
    }

    async fn do_exchange(&self, code: &str) -> Result<ProviderIdentity, BrokerError> {
        let client_id = self.client_id()?;
        let client_secret = self.config.client_secret.as_deref().unwrap_or_default();

        let resp = self
            .http
            .post(&self.config.token_url)
            .query(&[("client_id", client_id), ("client_secret", client_secret), ("code", code)])
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| BrokerError::Provider(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BrokerError::Provider(resp.text().await.unwrap_or_default()));
        }
        let token: AccessTokenResponse =
            resp.json().await.map_err(|e| BrokerError::Provider(e.to_string()))?;
        let access_token = match (token.access_token, token.error_description) {
            (Some(t), _) if !t.is_empty() => t,
            (_, Some(desc)) => return Err(BrokerError::Provider(desc)),
            _ => return Err(BrokerError::Provider("unknown error".to_owned())),
        };

        let resp = self
            .http
            .get(format!("{}/user", self.config.api_url.trim_end_matches('/')))
            .bearer_auth(&access_token)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| BrokerError::Provider(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BrokerError::Provider(resp.text().await.unwrap_or_default()));
        }
        let user: UserResponse =
            resp.json().await.map_err(|e| BrokerError::Provider(e.to_string()))?;

        Ok(ProviderIdentity { user_id: user.id, login: user.login, access_token })
    }

    async fn do_is_member(&self, identity: &ProviderIdentity) -> Result<bool, BrokerError> {
        let url = format!(
            "{}/orgs/{}/members/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.org,
            identity.login,
        );
        let resp = self
            .http
            .get(url)
            .bearer_auth(&identity.access_token)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| BrokerError::Provider(e.to_string()))?;
        // 204 means member; 302/404 mean not a (visible) member.
        Ok(resp.status() == reqwest::StatusCode::NO_CONTENT)
    }
}

impl IdentityProvider for GitHubProvider {
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String, BrokerError> {
        let client_id = self.client_id()?;
        let url = url::Url::parse_with_params(
            &self.config.authorize_url,
            &[("client_id", client_id), ("redirect_uri", redirect_uri), ("state", state)],
        )
        .map_err(|e| BrokerError::Provider(format!("invalid authorize url: {e}")))?;
        Ok(url.into())
    }

    fn exchange<'a>(&'a self, code: &'a str) -> ResolveFuture<'a, ProviderIdentity, BrokerError> {
        Box::pin(self.do_exchange(code))
    }

    fn is_member<'a>(
        &'a self,
        identity: &'a ProviderIdentity,
    ) -> ResolveFuture<'a, bool, BrokerError> {
        Box::pin(self.do_is_member(identity))
    }

    fn org(&self) -> &str {
        &self.config.org
    }
}

#[cfg(test)]
#[path = "github_tests.rs"]
mod tests;
