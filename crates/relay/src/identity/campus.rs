// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Campus (CAS) portal credential check.
//!
//! The portal has no API; a login is a GET of the form page (session cookie
//! plus hidden `execution` value) followed by a form POST. A 302 means the
//! credentials were accepted, a 401 means they were not.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::CredentialError;
use crate::identity::{http_client, CampusPortal, ResolveFuture};

const BROWSER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct CampusConfig {
    pub login_url: String,
    pub service_url: String,
}

pub struct CasPortal {
    config: CampusConfig,
    http: reqwest::Client,
}

impl CasPortal {
    pub fn new(config: CampusConfig) -> Self {
        Self { config, http: http_client(false) }
    }

    fn form_url(&self) -> Result<url::Url, CredentialError> {
        url::Url::parse_with_params(&self.config.login_url, &[("service", &self.config.service_url)])
            .map_err(|e| CredentialError::Unavailable(format!("invalid portal url: {e}")))
    }

    async fn do_verify(&self, username: &str, password: &str) -> Result<(), CredentialError> {
        let form_url = self.form_url()?;
        let page = self.http.get(form_url.clone()).send().await.map_err(unavailable)?;
        let cookie = session_cookie(page.headers()).ok_or_else(|| {
            CredentialError::Unavailable("failed to obtain the portal session cookie".to_owned())
        })?;
        let html = page.text().await.map_err(unavailable)?;
        let execution = extract_execution(&html).ok_or_else(|| {
            CredentialError::Unavailable("failed to obtain the execution value".to_owned())
        })?;

        let resp = self
            .http
            .post(&self.config.login_url)
            .header("Cookie", cookie)
            .header("Referer", form_url.as_str())
            .header("User-Agent", BROWSER_AGENT)
            .form(&[
                ("username", username),
                ("password", password),
                ("submit", "登录"),
                ("type", "username_password"),
                ("execution", execution.as_str()),
                ("_eventId", "submit"),
            ])
            .send()
            .await
            .map_err(unavailable)?;

        match resp.status().as_u16() {
            302 => Ok(()),
            401 => Err(CredentialError::BadCredentials),
            _ => Err(CredentialError::Unavailable(format!(
                "unexpected portal response: {}",
                resp.status()
            ))),
        }
    }
}

impl CampusPortal for CasPortal {
    fn verify<'a>(
        &'a self,
        username: &'a str,
        password: &'a str,
    ) -> ResolveFuture<'a, (), CredentialError> {
        Box::pin(self.do_verify(username, password))
    }
}

fn unavailable(e: reqwest::Error) -> CredentialError {
    CredentialError::Unavailable(e.to_string())
}

/// Join the `name=value` part of every `Set-Cookie` header into one `Cookie` value.
pub(crate) fn session_cookie(headers: &reqwest::header::HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

/// Pull the hidden `execution` input out of the login form.
pub(crate) fn extract_execution(html: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#"<input name="execution" value="(.*?)""#).ok());
    re.as_ref()?.captures(html).and_then(|c| c.get(1)).map(|m| m.as_str().to_owned())
}

#[cfg(test)]
#[path = "campus_tests.rs"]
mod tests;
