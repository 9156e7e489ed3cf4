// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the login relay.

pub mod auth;
pub mod http;
pub mod http_auth;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::RelayState;

/// Build the axum `Router` with all relay routes.
pub fn build_router(state: Arc<RelayState>) -> Router {
    Router::new()
        // Health
        .route("/api/v1/health", get(http::health))
        // Login initiation
        .route("/api/auth/login", post(http_auth::login_cli).get(http_auth::login_site))
        .route("/api/auth/campus", get(http_auth::login_campus_page))
        .route("/api/auth/oauth", get(http_auth::login_service))
        .route("/api/auth/github/{handle}", get(http_auth::github_redirect))
        // Completion
        .route("/api/auth/token/{handle}", get(http_auth::await_token))
        .route("/api/auth/callback", post(http_auth::callback))
        .route("/api/auth/bupt_login", post(http_auth::bupt_login))
        // Token introspection
        .route("/api/auth/me", get(http::me))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
