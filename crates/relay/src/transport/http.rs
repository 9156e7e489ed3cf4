// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service-level HTTP handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::RelayState;
use crate::token::Claims;
use crate::transport::auth::authenticate;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub domains: Vec<String>,
    pub sessions: usize,
    pub waiters: usize,
}

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<RelayState>>) -> impl IntoResponse {
    let stats = s.brokers.stats().await;
    Json(HealthResponse {
        status: "running".to_owned(),
        domains: s.brokers.domains().await,
        sessions: stats.sessions,
        waiters: stats.waiters,
    })
}

/// `GET /api/auth/me`: claims of the caller's access token.
pub async fn me(
    State(s): State<Arc<RelayState>>,
    headers: HeaderMap,
) -> Result<Json<Claims>, ApiError> {
    Ok(Json(authenticate(&headers, s.issuer())?))
}
