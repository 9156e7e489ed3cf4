// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: stub resolvers, in-process HTTP fakes, and
//! assertion helpers.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::broker::registry::Brokers;
use crate::broker::{Broker, BrokerHandle, BrokerSettings};
use crate::error::{BrokerError, CredentialError};
use crate::identity::{CampusPortal, IdentityProvider, ProviderIdentity, ResolveFuture, Resolvers};
use crate::session::store::{MemoryStore, StoreBackend};
use crate::token::TokenIssuer;

pub const TEST_SECRET: &str = "test-secret";

/// Serve `router` on an ephemeral localhost port and return its base URL.
pub async fn serve(router: axum::Router) -> anyhow::Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{addr}"))
}

/// Identity provider stub.
///
/// Code `"good"` resolves to user 42 (`octo`); any other code is rejected
/// with a provider error. Membership is controlled by [`StubProvider::set_member`].
pub struct StubProvider {
    member: AtomicBool,
    delay: Duration,
    pub exchanges: AtomicU32,
    pub membership_checks: AtomicU32,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Stub whose code exchange takes `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            member: AtomicBool::new(true),
            delay,
            exchanges: AtomicU32::new(0),
            membership_checks: AtomicU32::new(0),
        }
    }

    pub fn set_member(&self, member: bool) {
        self.member.store(member, Ordering::Relaxed);
    }

    pub fn exchange_count(&self) -> u32 {
        self.exchanges.load(Ordering::Relaxed)
    }
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for StubProvider {
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String, BrokerError> {
        Ok(format!("https://provider.test/authorize?redirect_uri={redirect_uri}&state={state}"))
    }

    fn exchange<'a>(&'a self, code: &'a str) -> ResolveFuture<'a, ProviderIdentity, BrokerError> {
        Box::pin(async move {
            self.exchanges.fetch_add(1, Ordering::Relaxed);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match code {
                "good" => Ok(ProviderIdentity {
                    user_id: 42,
                    login: "octo".into(),
                    access_token: "gho_stub".into(),
                }),
                _ => Err(BrokerError::Provider("The code passed is incorrect or expired.".into())),
            }
        })
    }

    fn is_member<'a>(
        &'a self,
        _identity: &'a ProviderIdentity,
    ) -> ResolveFuture<'a, bool, BrokerError> {
        Box::pin(async move {
            self.membership_checks.fetch_add(1, Ordering::Relaxed);
            Ok(self.member.load(Ordering::Relaxed))
        })
    }

    fn org(&self) -> &str {
        "byrdocs"
    }
}

/// Campus portal stub accepting `2021000001` / `hunter2`.
///
/// Username `"outage"` simulates an unreachable portal.
#[derive(Default)]
pub struct StubCampus {
    pub checks: AtomicU32,
}

impl StubCampus {
    pub fn check_count(&self) -> u32 {
        self.checks.load(Ordering::Relaxed)
    }
}

impl CampusPortal for StubCampus {
    fn verify<'a>(
        &'a self,
        username: &'a str,
        password: &'a str,
    ) -> ResolveFuture<'a, (), CredentialError> {
        Box::pin(async move {
            self.checks.fetch_add(1, Ordering::Relaxed);
            match (username, password) {
                ("2021000001", "hunter2") => Ok(()),
                ("outage", _) => Err(CredentialError::Unavailable("connection refused".into())),
                _ => Err(CredentialError::BadCredentials),
            }
        })
    }
}

/// Stubs plus the resolver set built from them.
pub struct Stubs {
    pub provider: Arc<StubProvider>,
    pub campus: Arc<StubCampus>,
}

impl Stubs {
    pub fn new() -> Self {
        Self::with_provider(StubProvider::new())
    }

    pub fn with_provider(provider: StubProvider) -> Self {
        Self { provider: Arc::new(provider), campus: Arc::new(StubCampus::default()) }
    }

    pub fn resolvers(&self) -> Resolvers {
        Resolvers {
            provider: Arc::clone(&self.provider) as Arc<dyn IdentityProvider>,
            campus: Arc::clone(&self.campus) as Arc<dyn CampusPortal>,
        }
    }
}

impl Default for Stubs {
    fn default() -> Self {
        Self::new()
    }
}

pub fn test_issuer() -> Arc<TokenIssuer> {
    Arc::new(TokenIssuer::new(TEST_SECRET, None))
}

/// Spawn an in-memory broker backed by `stubs`.
pub fn spawn_broker(stubs: &Stubs, settings: BrokerSettings) -> BrokerHandle {
    Broker::spawn(
        "test",
        Box::new(MemoryStore::new()),
        stubs.resolvers(),
        test_issuer(),
        settings,
        CancellationToken::new(),
    )
}

/// In-memory broker registry backed by `stubs`.
pub fn memory_brokers(stubs: &Stubs, settings: BrokerSettings) -> Brokers {
    Brokers::new(StoreBackend::Memory, stubs.resolvers(), test_issuer(), settings, CancellationToken::new())
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
