// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access token issuance: HS256 JWTs signed with the relay's shared secret.

use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claim names the issuer owns; extra claims using them are dropped.
const RESERVED_CLAIMS: [&str; 3] = ["id", "iat", "exp"];

/// Claims carried by every access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Stable identity string, `<ProviderTag>-<providerUserId>`.
    pub id: String,
    /// Issued-at, epoch seconds.
    pub iat: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Turns a verified identity into a signed, time-stamped access token.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Option<Duration>,
}

impl TokenIssuer {
    /// Tokens carry no `exp` unless `ttl` is set.
    pub fn new(secret: &str, ttl: Option<Duration>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(
        &self,
        identity: &str,
        extra: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> jsonwebtoken::errors::Result<String> {
        let iat = epoch_secs();
        let extra = extra
            .map(|m| {
                m.iter()
                    .filter(|(k, _)| !RESERVED_CLAIMS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let claims = Claims {
            id: identity.to_owned(),
            iat,
            exp: self.ttl.map(|ttl| iat.saturating_add(ttl.as_secs())),
            extra,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    /// Check the signature (and `exp` when present) and return the claims.
    pub fn verify(&self, token: &str) -> jsonwebtoken::errors::Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims = HashSet::new();
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
