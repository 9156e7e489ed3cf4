// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the login flows.
//!
//! Browser flows begin a session and redirect to the front end's
//! `/auth/{handle}/{method}` page; the front end then completes the session
//! through `callback` (provider code) or `bupt_login` (campus credentials),
//! while CLI clients long-poll `token/{handle}`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::broker::{AwaitOutcome, Proof, Resolution};
use crate::error::{ApiError, ErrorCode};
use crate::session::Method;
use crate::state::RelayState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct BeginResponse {
    pub handle: String,
    /// Long-poll URL for the token.
    pub token_url: String,
    /// Page the user opens to log in.
    pub login_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    #[serde(default)]
    pub to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceQuery {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub code: String,
    /// The session handle, round-tripped through the provider as `state`.
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct CampusLoginRequest {
    pub username: String,
    pub password: String,
    #[serde(alias = "uuid")]
    pub handle: String,
}

/// Reply for site, CLI and campus logins.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Reply for service logins: where the front end should send the browser.
#[derive(Debug, Serialize)]
pub struct RedirectResponse {
    pub redirect: String,
}

// -- Handlers -----------------------------------------------------------------

/// `POST /api/auth/login`: begin a command-line login.
pub async fn login_cli(State(s): State<Arc<RelayState>>) -> Result<Json<BeginResponse>, ApiError> {
    let handle = s.broker().await?.begin(Method::CommandLine, None).await?;
    Ok(Json(BeginResponse {
        token_url: format!("{}/api/auth/token/{handle}", s.public_url),
        login_url: login_page(&s, &handle, &Method::CommandLine),
        handle,
    }))
}

/// `GET /api/auth/login?to=`: begin a site login and send the browser to the login page.
pub async fn login_site(
    State(s): State<Arc<RelayState>>,
    Query(q): Query<LoginQuery>,
) -> Result<Response, ApiError> {
    let method = Method::ProviderRedirect;
    let handle = s.broker().await?.begin(method.clone(), q.to).await?;
    Ok(found(&login_page(&s, &handle, &method)))
}

/// `GET /api/auth/campus?to=`: begin a campus credential login.
pub async fn login_campus_page(
    State(s): State<Arc<RelayState>>,
    Query(q): Query<LoginQuery>,
) -> Result<Response, ApiError> {
    let method = Method::CampusCredential;
    let handle = s.broker().await?.begin(method.clone(), q.to).await?;
    Ok(found(&login_page(&s, &handle, &method)))
}

/// `GET /api/auth/oauth?service=&data=`: begin a login on behalf of a registered service.
pub async fn login_service(
    State(s): State<Arc<RelayState>>,
    Query(q): Query<ServiceQuery>,
) -> Result<Response, ApiError> {
    let name = q.service.unwrap_or_default();
    let entry = s.services.find(&name).ok_or_else(|| ApiError::bad_request("service not found"))?;
    let method = Method::Service(entry.name.clone());
    let handle = s.broker().await?.begin(method.clone(), q.data).await?;
    Ok(found(&login_page(&s, &handle, &method)))
}

/// `GET /api/auth/github/{handle}`: send the browser to the provider's authorize page.
pub async fn github_redirect(
    State(s): State<Arc<RelayState>>,
    Path(handle): Path<String>,
) -> Result<Response, ApiError> {
    let view = s.broker().await?.inspect(&handle).await?;
    let redirect_uri = format!("{}/callback/{}", s.public_url, view.method);
    let url = s.resolvers().provider.authorize_url(&redirect_uri, &handle)?;
    Ok(found(&url))
}

/// `GET /api/auth/token/{handle}`: long-poll for the session's token.
///
/// 200 with the token, 202 when the wait timed out, 410 when the session is gone.
pub async fn await_token(
    State(s): State<Arc<RelayState>>,
    Path(handle): Path<String>,
) -> Result<Response, ApiError> {
    match s.broker().await?.await_token(&handle).await? {
        AwaitOutcome::Token(token) => Ok(Json(TokenResponse { token }).into_response()),
        AwaitOutcome::Pending => {
            Ok((StatusCode::ACCEPTED, Json(PendingResponse { status: "pending" })).into_response())
        }
    }
}

/// `POST /api/auth/callback`: complete a session with the provider's code.
pub async fn callback(
    State(s): State<Arc<RelayState>>,
    Json(req): Json<CallbackRequest>,
) -> Result<Response, ApiError> {
    let resolution = s.broker().await?.resolve(&req.state, Proof::ProviderCode(req.code)).await?;
    after_login(&s, resolution)
}

/// `POST /api/auth/bupt_login`: complete a session with campus credentials.
pub async fn bupt_login(
    State(s): State<Arc<RelayState>>,
    Json(req): Json<CampusLoginRequest>,
) -> Result<Response, ApiError> {
    let proof = Proof::CampusPassword { username: req.username, password: req.password };
    let resolution = s.broker().await?.resolve(&req.handle, proof).await?;
    after_login(&s, resolution)
}

// -- Helpers ------------------------------------------------------------------

/// Route a completed login by its method tag.
fn after_login(s: &RelayState, resolution: Resolution) -> Result<Response, ApiError> {
    let Resolution { token, method, context } = resolution;
    let name = match method {
        Method::Service(name) => name,
        _ => return Ok(Json(LoginResponse { token, data: context }).into_response()),
    };

    let entry = s.services.find(&name).ok_or_else(|| ApiError::bad_request("service not found"))?;
    let mut url = url::Url::parse(&entry.redirect_uri).map_err(|e| {
        ApiError::new(ErrorCode::Internal, format!("invalid redirect_uri for {name}: {e}"))
    })?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("token", &token);
        if let Some(ref data) = context {
            pairs.append_pair("data", data);
        }
    }
    Ok(Json(RedirectResponse { redirect: url.into() }).into_response())
}

fn login_page(s: &RelayState, handle: &str, method: &Method) -> String {
    format!("{}/auth/{handle}/{method}", s.public_url)
}

/// A 302 to `location`.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_owned())]).into_response()
}
