// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `loginrelay` binary as a subprocess, points it at an
//! in-process fake GitHub, and exercises it over HTTP.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use axum::extract::{Path as UrlPath, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

pub use loginrelay::identity::ensure_crypto;
pub use loginrelay::test_support::serve;

/// Secret every spawned relay signs with.
pub const SECRET: &str = "spec-secret";

/// Resolve the path to the compiled `loginrelay` binary.
pub fn relay_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("loginrelay")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// HTTP client that leaves redirects for the test to inspect.
pub fn client() -> anyhow::Result<reqwest::Client> {
    ensure_crypto();
    Ok(reqwest::Client::builder().redirect(reqwest::redirect::Policy::none()).build()?)
}

/// Fake GitHub: code "good" belongs to octocat (583231), a member of `byrdocs`.
pub fn fake_github() -> Router {
    Router::new()
        .route(
            "/login/oauth/access_token",
            post(|Query(q): Query<HashMap<String, String>>| async move {
                match q.get("code").map(String::as_str) {
                    Some("good") => {
                        Json(serde_json::json!({ "access_token": "gho_good" })).into_response()
                    }
                    _ => Json(serde_json::json!({
                        "error": "bad_verification_code",
                        "error_description": "The code passed is incorrect or expired."
                    }))
                    .into_response(),
                }
            }),
        )
        .route(
            "/user",
            get(|headers: HeaderMap| async move {
                let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
                if auth == Some("Bearer gho_good") {
                    Json(serde_json::json!({ "id": 583231, "login": "octocat" })).into_response()
                } else {
                    (StatusCode::UNAUTHORIZED, "Bad credentials").into_response()
                }
            }),
        )
        .route(
            "/orgs/{org}/members/{login}",
            get(|UrlPath((org, login)): UrlPath<(String, String)>| async move {
                if org == "byrdocs" && login == "octocat" {
                    StatusCode::NO_CONTENT
                } else {
                    StatusCode::NOT_FOUND
                }
            }),
        )
}

/// A running `loginrelay` process that is killed on drop.
pub struct RelayProcess {
    child: Child,
    port: u16,
}

/// Builder for the flags a [`RelayProcess`] starts with.
///
/// By default the relay is ephemeral with GitHub left unconfigured.
#[derive(Default)]
pub struct RelayBuilder {
    github: Option<String>,
    state_dir: Option<PathBuf>,
    await_timeout_secs: Option<u64>,
    jwt_secret: Option<String>,
}

impl RelayBuilder {
    /// Point the GitHub endpoints at `base` with client id `cid`.
    pub fn github(mut self, base: &str) -> Self {
        self.github = Some(base.to_owned());
        self
    }

    /// Persist sessions under `dir` instead of running ephemeral.
    pub fn state_dir(mut self, dir: &Path) -> Self {
        self.state_dir = Some(dir.to_owned());
        self
    }

    pub fn await_timeout(mut self, secs: u64) -> Self {
        self.await_timeout_secs = Some(secs);
        self
    }

    pub fn jwt_secret(mut self, secret: &str) -> Self {
        self.jwt_secret = Some(secret.to_owned());
        self
    }

    pub fn spawn(self) -> anyhow::Result<RelayProcess> {
        ensure_crypto();
        let binary = relay_binary();
        anyhow::ensure!(binary.exists(), "loginrelay binary not found at {}", binary.display());

        let port = free_port()?;
        let mut args: Vec<String> = vec![
            "--host".into(),
            "127.0.0.1".into(),
            "--port".into(),
            port.to_string(),
            "--jwt-secret".into(),
            self.jwt_secret.unwrap_or_else(|| SECRET.to_owned()),
            "--log-format".into(),
            "text".into(),
            "--log-level".into(),
            "warn".into(),
        ];
        if let Some(base) = self.github {
            args.extend([
                "--github-client-id".into(),
                "cid".into(),
                "--github-client-secret".into(),
                "csecret".into(),
                "--github-authorize-url".into(),
                format!("{base}/login/oauth/authorize"),
                "--github-token-url".into(),
                format!("{base}/login/oauth/access_token"),
                "--github-api-url".into(),
                base,
            ]);
        }
        match self.state_dir {
            Some(dir) => args.extend(["--state-dir".into(), dir.to_string_lossy().into_owned()]),
            None => args.push("--ephemeral".into()),
        }
        if let Some(secs) = self.await_timeout_secs {
            args.extend(["--await-timeout-secs".into(), secs.to_string()]);
        }

        let child = Command::new(&binary)
            .args(&args)
            .env_remove("LOGINRELAY_SERVICES")
            .env_remove("LOGINRELAY_PUBLIC_URL")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(RelayProcess { child, port })
    }
}

impl RelayProcess {
    pub fn build() -> RelayBuilder {
        RelayBuilder::default()
    }

    /// Spawn an ephemeral relay backed by the GitHub at `github_base`.
    pub fn start(github_base: &str) -> anyhow::Result<Self> {
        Self::build().github(github_base).spawn()
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Poll health until responsive.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/api/v1/health", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("loginrelay did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("loginrelay did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for RelayProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
