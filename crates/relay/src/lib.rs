// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loginrelay: session exchange broker for third-party login.

pub mod broker;
pub mod config;
pub mod error;
pub mod identity;
pub mod session;
pub mod state;
pub mod test_support;
pub mod token;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::identity::campus::CasPortal;
use crate::identity::github::GitHubProvider;
use crate::identity::Resolvers;
use crate::state::RelayState;
use crate::transport::build_router;

/// Run the relay server until shutdown.
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let services = config.load_services()?;
    let resolvers = Resolvers {
        provider: Arc::new(GitHubProvider::new(config.github())),
        campus: Arc::new(CasPortal::new(config.campus())),
    };
    if config.github_client_id.is_none() {
        tracing::warn!("GitHub login is not configured; provider logins will fail");
    }

    let state = Arc::new(RelayState::new(config, resolvers, services, shutdown.clone()));
    // Open the default domain's store up front so a bad state dir fails startup.
    state.broker().await?;

    spawn_signal_handler(shutdown.clone());

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        public_url = %state.public_url,
        services = state.services.services.len(),
        ephemeral = state.config.ephemeral,
        "loginrelay listening"
    );
    let router = build_router(Arc::clone(&state));
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}

/// Cancel `shutdown` on SIGINT/SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                tracing::info!("received SIGTERM");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                tracing::info!("received SIGINT");
            }
        }
        shutdown.cancel();
    });
}
