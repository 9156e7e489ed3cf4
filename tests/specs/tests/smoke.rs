// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `loginrelay` binary and drive
//! the command-line, site and restart paths against a fake GitHub.

use std::time::Duration;

use loginrelay::token::TokenIssuer;
use loginrelay_specs::{client, fake_github, serve, RelayProcess, SECRET};

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn http_health() -> anyhow::Result<()> {
    let github = serve(fake_github()).await?;
    let relay = RelayProcess::start(&github)?;
    relay.wait_healthy(TIMEOUT).await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/v1/health", relay.base_url())).await?.json().await?;

    assert_eq!(resp["status"], "running");
    assert_eq!(resp["domains"], serde_json::json!(["oauth"]));
    assert_eq!(resp["sessions"], 0);
    Ok(())
}

#[tokio::test]
async fn cli_login_long_poll_receives_token() -> anyhow::Result<()> {
    let github = serve(fake_github()).await?;
    let relay = RelayProcess::start(&github)?;
    relay.wait_healthy(TIMEOUT).await?;
    let client = client()?;

    let begun: serde_json::Value =
        client.post(format!("{}/api/auth/login", relay.base_url())).send().await?.json().await?;
    let handle = begun["handle"].as_str().unwrap_or_default().to_owned();
    let token_url = begun["token_url"].as_str().unwrap_or_default().to_owned();
    assert_eq!(token_url, format!("{}/api/auth/token/{handle}", relay.base_url()));

    // Park a poller before the login completes.
    let poller = tokio::spawn({
        let client = client.clone();
        async move { client.get(&token_url).send().await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let resp = client
        .post(format!("{}/api/auth/callback", relay.base_url()))
        .json(&serde_json::json!({ "code": "good", "state": handle }))
        .send()
        .await?;
    assert_eq!(resp.status(), 200);
    let login: serde_json::Value = resp.json().await?;
    let token = login["token"].as_str().unwrap_or_default().to_owned();

    let polled = tokio::time::timeout(TIMEOUT, poller).await???;
    assert_eq!(polled.status(), 200);
    let polled: serde_json::Value = polled.json().await?;
    assert_eq!(polled["token"], token.as_str());

    let claims = TokenIssuer::new(SECRET, None).verify(&token)?;
    assert_eq!(claims.id, "GitHub-583231");

    let me: serde_json::Value = client
        .get(format!("{}/api/auth/me", relay.base_url()))
        .bearer_auth(&token)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(me["id"], "GitHub-583231");
    Ok(())
}

#[tokio::test]
async fn token_poll_times_out_as_pending() -> anyhow::Result<()> {
    let github = serve(fake_github()).await?;
    let relay = RelayProcess::build().github(&github).await_timeout(1).spawn()?;
    relay.wait_healthy(TIMEOUT).await?;
    let client = client()?;

    let begun: serde_json::Value =
        client.post(format!("{}/api/auth/login", relay.base_url())).send().await?.json().await?;
    let token_url = begun["token_url"].as_str().unwrap_or_default();

    let resp = client.get(token_url).send().await?;
    assert_eq!(resp.status(), 202);

    let resp = client.get(format!("{}/api/auth/token/unknown", relay.base_url())).send().await?;
    assert_eq!(resp.status(), 410);
    Ok(())
}

#[tokio::test]
async fn site_login_redirects_through_github() -> anyhow::Result<()> {
    let github = serve(fake_github()).await?;
    let relay = RelayProcess::start(&github)?;
    relay.wait_healthy(TIMEOUT).await?;
    let client = client()?;

    let resp = client.get(format!("{}/api/auth/login?to=/files", relay.base_url())).send().await?;
    assert_eq!(resp.status(), 302);
    let page = resp.headers()["location"].to_str()?.to_owned();
    let prefix = format!("{}/auth/", relay.base_url());
    let handle = page
        .strip_prefix(&prefix)
        .and_then(|rest| rest.strip_suffix("/provider-redirect"))
        .ok_or_else(|| anyhow::anyhow!("unexpected login page: {page}"))?
        .to_owned();

    let resp = client.get(format!("{}/api/auth/github/{handle}", relay.base_url())).send().await?;
    assert_eq!(resp.status(), 302);
    let authorize = url::Url::parse(resp.headers()["location"].to_str()?)?;
    assert!(authorize.as_str().starts_with(&format!("{github}/login/oauth/authorize")));
    let params: Vec<(String, String)> = authorize.query_pairs().into_owned().collect();
    assert!(params.contains(&("client_id".into(), "cid".into())));
    assert!(params.contains(&("state".into(), handle.clone())));

    let login: serde_json::Value = client
        .post(format!("{}/api/auth/callback", relay.base_url()))
        .json(&serde_json::json!({ "code": "good", "state": handle }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(login["data"], "/files");
    assert!(login["token"].is_string());
    Ok(())
}

#[tokio::test]
async fn sessions_survive_restart() -> anyhow::Result<()> {
    let github = serve(fake_github()).await?;
    let dir = tempfile::tempdir()?;
    let client = client()?;

    let handle = {
        let relay = RelayProcess::build().github(&github).state_dir(dir.path()).spawn()?;
        relay.wait_healthy(TIMEOUT).await?;
        let begun: serde_json::Value = client
            .post(format!("{}/api/auth/login", relay.base_url()))
            .send()
            .await?
            .json()
            .await?;
        begun["handle"].as_str().unwrap_or_default().to_owned()
    };
    assert!(dir.path().join("oauth.json").exists());

    let relay = RelayProcess::build().github(&github).state_dir(dir.path()).spawn()?;
    relay.wait_healthy(TIMEOUT).await?;
    let resp = client
        .post(format!("{}/api/auth/callback", relay.base_url()))
        .json(&serde_json::json!({ "code": "good", "state": handle }))
        .send()
        .await?;
    assert_eq!(resp.status(), 200);
    Ok(())
}

#[tokio::test]
async fn empty_secret_is_rejected_at_startup() -> anyhow::Result<()> {
    let mut relay = RelayProcess::build().jwt_secret("").spawn()?;
    let status = relay.wait_exit(TIMEOUT).await?;
    assert_eq!(status.code(), Some(2));
    Ok(())
}
