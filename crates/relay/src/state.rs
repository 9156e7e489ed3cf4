// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::broker::registry::{Brokers, DEFAULT_DOMAIN};
use crate::broker::BrokerHandle;
use crate::config::{RelayConfig, ServiceConfig};
use crate::error::BrokerError;
use crate::identity::Resolvers;
use crate::token::TokenIssuer;

/// Shared relay state.
pub struct RelayState {
    pub config: RelayConfig,
    pub brokers: Brokers,
    pub services: ServiceConfig,
    /// Origin used when building login, poll and callback URLs.
    pub public_url: String,
    pub shutdown: CancellationToken,
}

impl RelayState {
    pub fn new(
        config: RelayConfig,
        resolvers: Resolvers,
        services: ServiceConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let issuer = Arc::new(TokenIssuer::new(&config.jwt_secret, config.token_ttl()));
        let brokers = Brokers::new(
            config.store_backend(),
            resolvers,
            issuer,
            config.broker_settings(),
            shutdown.clone(),
        );
        Self { public_url: config.public_url(), config, brokers, services, shutdown }
    }

    /// The broker behind the relay's login routes.
    pub async fn broker(&self) -> Result<BrokerHandle, BrokerError> {
        self.brokers.get(DEFAULT_DOMAIN).await
    }

    pub fn issuer(&self) -> &TokenIssuer {
        self.brokers.issuer()
    }

    pub fn resolvers(&self) -> &Resolvers {
        self.brokers.resolvers()
    }
}
