// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Login sessions: the persisted record, its method tag, and handle minting.

pub mod store;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Which login path created a session.
///
/// Controls post-login routing and whether organization membership is
/// enforced on provider logins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Method {
    /// Main site login through the provider redirect.
    ProviderRedirect,
    /// Command-line client login; same provider flow without membership check.
    CommandLine,
    /// Campus portal login page.
    CampusCredential,
    /// A registered third-party service, by name.
    Service(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ProviderRedirect => "provider-redirect",
            Self::CommandLine => "command-line",
            Self::CampusCredential => "campus-credential",
            Self::Service(name) => name,
        }
    }

    /// Whether a provider login on this session must pass the org membership check.
    pub fn requires_membership(&self) -> bool {
        matches!(self, Self::ProviderRedirect)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provider-redirect" => Ok(Self::ProviderRedirect),
            "command-line" => Ok(Self::CommandLine),
            "campus-credential" => Ok(Self::CampusCredential),
            "" => anyhow::bail!("empty method tag"),
            other if is_valid_name(other) => Ok(Self::Service(other.to_owned())),
            other => anyhow::bail!("invalid method tag: {other}"),
        }
    }
}

impl TryFrom<String> for Method {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Method> for String {
    fn from(m: Method) -> Self {
        m.as_str().to_owned()
    }
}

/// Names usable as service tags and broker domains: `[A-Za-z0-9_-]+`.
pub fn is_valid_name(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// The persisted state of one login session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub handle: String,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Epoch milliseconds.
    pub created_at: u64,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl SessionRecord {
    pub fn new(handle: String, method: Method, context: Option<String>) -> Self {
        Self { handle, method, context, created_at: epoch_ms(), resolved: false, token: None }
    }

    /// Age relative to `now_ms`; zero for records stamped in the future.
    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.created_at))
    }

    /// Record the issued token. The token is set at most once.
    pub fn complete(&mut self, token: String) -> anyhow::Result<()> {
        if self.resolved {
            anyhow::bail!("session {} already resolved", self.handle);
        }
        self.resolved = true;
        self.token = Some(token);
        Ok(())
    }
}

/// Mint a fresh session handle: 128 random bits, URL-safe base64 (22 chars).
pub fn generate_handle() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
