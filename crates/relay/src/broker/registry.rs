// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lazily spawned broker actors, one per domain.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, BrokerHandle, BrokerSettings, BrokerStats};
use crate::error::BrokerError;
use crate::identity::Resolvers;
use crate::session::store::StoreBackend;
use crate::token::TokenIssuer;

/// Domain used by the relay's own login routes.
pub const DEFAULT_DOMAIN: &str = "oauth";

pub struct Brokers {
    backend: StoreBackend,
    resolvers: Resolvers,
    issuer: Arc<TokenIssuer>,
    settings: BrokerSettings,
    shutdown: CancellationToken,
    brokers: Mutex<HashMap<String, BrokerHandle>>,
}

impl Brokers {
    pub fn new(
        backend: StoreBackend,
        resolvers: Resolvers,
        issuer: Arc<TokenIssuer>,
        settings: BrokerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self { backend, resolvers, issuer, settings, shutdown, brokers: Mutex::new(HashMap::new()) }
    }

    /// Handle to the broker for `domain`, spawning it on first use.
    pub async fn get(&self, domain: &str) -> Result<BrokerHandle, BrokerError> {
        let mut brokers = self.brokers.lock().await;
        if let Some(handle) = brokers.get(domain) {
            return Ok(handle.clone());
        }

        let store = self
            .backend
            .open(domain)
            .map_err(|e| BrokerError::Storage(format!("{e:#}")))?;
        tracing::info!(domain, sessions = store.len(), "broker started");
        let handle = Broker::spawn(
            domain,
            store,
            self.resolvers.clone(),
            Arc::clone(&self.issuer),
            self.settings.clone(),
            self.shutdown.child_token(),
        );
        brokers.insert(domain.to_owned(), handle.clone());
        Ok(handle)
    }

    /// Names of the domains with a running broker.
    pub async fn domains(&self) -> Vec<String> {
        let mut names: Vec<String> = self.brokers.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Sessions and waiters summed over every running broker.
    pub async fn stats(&self) -> BrokerStats {
        let handles: Vec<BrokerHandle> = self.brokers.lock().await.values().cloned().collect();
        let mut total = BrokerStats::default();
        for handle in handles {
            match handle.stats().await {
                Ok(s) => {
                    total.sessions += s.sessions;
                    total.waiters += s.waiters;
                }
                Err(e) => tracing::debug!(domain = handle.domain(), err = %e, "stats unavailable"),
            }
        }
        total
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    pub fn resolvers(&self) -> &Resolvers {
        &self.resolvers
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
