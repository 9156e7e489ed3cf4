// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity resolvers: the upstream calls that turn a provider code or a
//! campus credential pair into a verified identity.

pub mod campus;
pub mod github;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Once};
use std::time::Duration;

use crate::error::{BrokerError, CredentialError};

/// Boxed future returned by the resolver traits.
pub type ResolveFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Caller identity as reported by the OAuth provider.
#[derive(Clone)]
pub struct ProviderIdentity {
    pub user_id: u64,
    pub login: String,
    /// Provider access token, needed for follow-up calls such as the membership check.
    pub access_token: String,
}

impl std::fmt::Debug for ProviderIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderIdentity")
            .field("user_id", &self.user_id)
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

/// OAuth identity provider (code exchange + organization membership).
pub trait IdentityProvider: Send + Sync + 'static {
    /// Build the authorize URL the browser is sent to; `state` carries the session handle.
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String, BrokerError>;

    /// Exchange an authorization code for the caller's identity.
    ///
    /// Fails with [`BrokerError::Provider`] on any non-success status or a
    /// missing access token.
    fn exchange<'a>(&'a self, code: &'a str) -> ResolveFuture<'a, ProviderIdentity, BrokerError>;

    /// Whether the identity belongs to the required organization.
    fn is_member<'a>(
        &'a self,
        identity: &'a ProviderIdentity,
    ) -> ResolveFuture<'a, bool, BrokerError>;

    /// Organization checked by [`IdentityProvider::is_member`].
    fn org(&self) -> &str;

    /// Tag prefixed to provider user ids in token subjects.
    fn tag(&self) -> &str {
        "GitHub"
    }
}

/// Campus credential portal.
pub trait CampusPortal: Send + Sync + 'static {
    fn verify<'a>(
        &'a self,
        username: &'a str,
        password: &'a str,
    ) -> ResolveFuture<'a, (), CredentialError>;

    /// Tag prefixed to student ids in token subjects.
    fn tag(&self) -> &str {
        "BUPT"
    }
}

/// The resolver set a broker dispatches to.
#[derive(Clone)]
pub struct Resolvers {
    pub provider: Arc<dyn IdentityProvider>,
    pub campus: Arc<dyn CampusPortal>,
}

/// A verified identity, ready to be turned into a token subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub tag: String,
    pub user_id: String,
}

impl Identity {
    /// Stable subject string: `<ProviderTag>-<providerUserId>`.
    pub fn subject(&self) -> String {
        format!("{}-{}", self.tag, self.user_id)
    }
}

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Shared builder for upstream HTTP clients.
pub(crate) fn http_client(redirects: bool) -> reqwest::Client {
    ensure_crypto();
    let policy =
        if redirects { reqwest::redirect::Policy::default() } else { reqwest::redirect::Policy::none() };
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .redirect(policy)
        .build()
        .unwrap_or_default()
}
