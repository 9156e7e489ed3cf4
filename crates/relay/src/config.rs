// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::broker::BrokerSettings;
use crate::identity::campus::CampusConfig;
use crate::identity::github::GitHubConfig;
use crate::session::store::StoreBackend;
use crate::session::{is_valid_name, Method};

/// Upper bound for every duration flag (ten years).
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Login relay: brokers third-party sign-in for browser and CLI clients.
#[derive(Debug, Clone, Parser)]
#[command(name = "loginrelay", version, about)]
pub struct RelayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "LOGINRELAY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9810, env = "LOGINRELAY_PORT")]
    pub port: u16,

    /// Public origin used in login, poll and callback URLs.
    /// Defaults to `http://{host}:{port}`.
    #[arg(long, env = "LOGINRELAY_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// HMAC secret for signing access tokens.
    #[arg(long, env = "LOGINRELAY_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Token lifetime in seconds. Tokens never expire when unset.
    #[arg(long, env = "LOGINRELAY_TOKEN_TTL_SECS")]
    pub token_ttl_secs: Option<u64>,

    /// GitHub OAuth app client id.
    #[arg(long, env = "LOGINRELAY_GITHUB_CLIENT_ID")]
    pub github_client_id: Option<String>,

    /// GitHub OAuth app client secret.
    #[arg(long, env = "LOGINRELAY_GITHUB_CLIENT_SECRET", hide_env_values = true)]
    pub github_client_secret: Option<String>,

    /// Organization whose membership the site login requires.
    #[arg(long, default_value = "byrdocs", env = "LOGINRELAY_GITHUB_ORG")]
    pub github_org: String,

    #[arg(
        long,
        default_value = "https://github.com/login/oauth/authorize",
        env = "LOGINRELAY_GITHUB_AUTHORIZE_URL"
    )]
    pub github_authorize_url: String,

    #[arg(
        long,
        default_value = "https://github.com/login/oauth/access_token",
        env = "LOGINRELAY_GITHUB_TOKEN_URL"
    )]
    pub github_token_url: String,

    #[arg(long, default_value = "https://api.github.com", env = "LOGINRELAY_GITHUB_API_URL")]
    pub github_api_url: String,

    /// Campus CAS login form.
    #[arg(
        long,
        default_value = "https://auth.bupt.edu.cn/authserver/login",
        env = "LOGINRELAY_CAMPUS_LOGIN_URL"
    )]
    pub campus_login_url: String,

    /// `service` parameter sent to the campus portal.
    #[arg(long, default_value = "http://ucloud.bupt.edu.cn", env = "LOGINRELAY_CAMPUS_SERVICE_URL")]
    pub campus_service_url: String,

    /// Path to the third-party service registry JSON file.
    #[arg(long, env = "LOGINRELAY_SERVICES")]
    pub services: Option<PathBuf>,

    /// Directory for durable session stores.
    #[arg(long, env = "LOGINRELAY_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Keep sessions in memory only.
    #[arg(long, env = "LOGINRELAY_EPHEMERAL")]
    pub ephemeral: bool,

    /// Sessions older than this are swept.
    #[arg(long, default_value_t = 3600, env = "LOGINRELAY_SESSION_TTL_SECS")]
    pub session_ttl_secs: u64,

    /// Expiry sweep period.
    #[arg(long, default_value_t = 3600, env = "LOGINRELAY_SWEEP_INTERVAL_SECS")]
    pub sweep_interval_secs: u64,

    /// Upper bound on a token long-poll.
    #[arg(long, default_value_t = 600, env = "LOGINRELAY_AWAIT_TIMEOUT_SECS")]
    pub await_timeout_secs: u64,

    /// Broker request channel capacity.
    #[arg(long, default_value_t = 256, env = "LOGINRELAY_MAILBOX")]
    pub mailbox: usize,

    /// Log format (json or text).
    #[arg(long, env = "LOGINRELAY_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error) or an `EnvFilter` directive.
    #[arg(long, env = "LOGINRELAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl RelayConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jwt_secret.is_empty() {
            anyhow::bail!("--jwt-secret must not be empty");
        }
        if self.github_client_id.is_some() != self.github_client_secret.is_some() {
            anyhow::bail!("--github-client-id and --github-client-secret must be set together");
        }
        for (flag, value) in [
            ("--session-ttl-secs", self.session_ttl_secs),
            ("--sweep-interval-secs", self.sweep_interval_secs),
            ("--await-timeout-secs", self.await_timeout_secs),
            ("--mailbox", self.mailbox as u64),
        ] {
            if value == 0 {
                anyhow::bail!("{flag} must be greater than zero");
            }
        }
        if self.token_ttl_secs == Some(0) {
            anyhow::bail!("--token-ttl-secs must be greater than zero");
        }
        for (flag, value) in [
            ("--session-ttl-secs", Some(self.session_ttl_secs)),
            ("--sweep-interval-secs", Some(self.sweep_interval_secs)),
            ("--await-timeout-secs", Some(self.await_timeout_secs)),
            ("--token-ttl-secs", self.token_ttl_secs),
        ] {
            if value.is_some_and(|v| v > MAX_DURATION_SECS) {
                anyhow::bail!("{flag} must be at most {MAX_DURATION_SECS}");
            }
        }
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("invalid log format: {} (expected json or text)", self.log_format);
        }
        if let Some(ref public) = self.public_url {
            let url = url::Url::parse(public)
                .with_context(|| format!("invalid --public-url: {public}"))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("--public-url must be http or https: {public}");
            }
        }
        Ok(())
    }

    /// Public origin without a trailing slash.
    pub fn public_url(&self) -> String {
        match self.public_url {
            Some(ref url) => url.trim_end_matches('/').to_owned(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }

    pub fn token_ttl(&self) -> Option<Duration> {
        self.token_ttl_secs.map(Duration::from_secs)
    }

    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            await_timeout: Duration::from_secs(self.await_timeout_secs),
            mailbox: self.mailbox,
        }
    }

    pub fn github(&self) -> GitHubConfig {
        GitHubConfig {
            client_id: self.github_client_id.clone(),
            client_secret: self.github_client_secret.clone(),
            org: self.github_org.clone(),
            authorize_url: self.github_authorize_url.clone(),
            token_url: self.github_token_url.clone(),
            api_url: self.github_api_url.clone(),
        }
    }

    pub fn campus(&self) -> CampusConfig {
        CampusConfig {
            login_url: self.campus_login_url.clone(),
            service_url: self.campus_service_url.clone(),
        }
    }

    /// Resolve the state directory for session stores.
    ///
    /// Checks `--state-dir`, then `$XDG_STATE_HOME/loginrelay`,
    /// then `$HOME/.local/state/loginrelay`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("loginrelay");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/loginrelay");
        }
        PathBuf::from(".loginrelay")
    }

    pub fn store_backend(&self) -> StoreBackend {
        if self.ephemeral {
            StoreBackend::Memory
        } else {
            StoreBackend::Dir(self.state_dir())
        }
    }

    /// Load the service registry, or an empty one when `--services` is unset.
    pub fn load_services(&self) -> anyhow::Result<ServiceConfig> {
        match self.services {
            Some(ref path) => ServiceConfig::load(path),
            None => Ok(ServiceConfig::default()),
        }
    }

    /// Build a minimal `RelayConfig` for tests (port 0, in-memory stores).
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            public_url: Some("https://relay.test".into()),
            jwt_secret: "test-secret".into(),
            token_ttl_secs: None,
            github_client_id: Some("cid".into()),
            github_client_secret: Some("csecret".into()),
            github_org: "byrdocs".into(),
            github_authorize_url: "https://github.com/login/oauth/authorize".into(),
            github_token_url: "https://github.com/login/oauth/access_token".into(),
            github_api_url: "https://api.github.com".into(),
            campus_login_url: "https://auth.bupt.edu.cn/authserver/login".into(),
            campus_service_url: "http://ucloud.bupt.edu.cn".into(),
            services: None,
            state_dir: None,
            ephemeral: true,
            session_ttl_secs: 3600,
            sweep_interval_secs: 3600,
            await_timeout_secs: 1,
            mailbox: 16,
            log_format: "text".into(),
            log_level: "debug".into(),
        }
    }
}

/// Third-party services allowed to use the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
}

/// A registered service: after login the browser is sent to `redirect_uri`
/// with `token` and `data` query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub redirect_uri: String,
}

impl ServiceConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading service registry {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("parsing service registry {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.services {
            if !is_valid_name(&entry.name) {
                anyhow::bail!("invalid service name: {:?}", entry.name);
            }
            if !matches!(entry.name.parse(), Ok(Method::Service(_))) {
                anyhow::bail!("service name {:?} is reserved", entry.name);
            }
            url::Url::parse(&entry.redirect_uri).with_context(|| {
                format!("invalid redirect_uri for service {}: {}", entry.name, entry.redirect_uri)
            })?;
            if !seen.insert(entry.name.as_str()) {
                anyhow::bail!("duplicate service name: {}", entry.name);
            }
        }
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&ServiceEntry> {
        self.services.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
