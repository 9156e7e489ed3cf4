// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::HeaderMap;

use crate::error::{ApiError, ErrorCode};
use crate::token::{Claims, TokenIssuer};

/// Extract the Bearer token from HTTP headers.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "missing bearer token"))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "missing bearer token"))
}

/// Verify the request's Bearer token and return its claims.
pub fn authenticate(headers: &HeaderMap, issuer: &TokenIssuer) -> Result<Claims, ApiError> {
    let token = bearer_token(headers)?;
    issuer.verify(token).map_err(|e| {
        tracing::debug!(err = %e, "rejected bearer token");
        ApiError::new(ErrorCode::Unauthorized, "invalid token")
    })
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
