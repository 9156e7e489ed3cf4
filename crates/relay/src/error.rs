// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for the relay HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Unauthorized,
    BadRequest,
    BadCredentials,
    MembershipDenied,
    SessionExpired,
    ResolutionInProgress,
    ProviderError,
    UpstreamUnavailable,
    Unavailable,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::BadRequest => 400,
            Self::BadCredentials => 401,
            Self::MembershipDenied => 403,
            Self::SessionExpired => 410,
            Self::ResolutionInProgress => 409,
            Self::ProviderError => 502,
            Self::UpstreamUnavailable => 502,
            Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadRequest => "BAD_REQUEST",
            Self::BadCredentials => "BAD_CREDENTIALS",
            Self::MembershipDenied => "MEMBERSHIP_DENIED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::ResolutionInProgress => "RESOLUTION_IN_PROGRESS",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Failure of a campus portal credential check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// The portal rejected the username/password pair.
    #[error("incorrect username or password")]
    BadCredentials,
    /// The portal could not be reached or answered unexpectedly.
    #[error("campus portal unavailable: {0}")]
    Unavailable(String),
}

/// Failures surfaced by the session exchange broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Handle unknown or already swept; the user must restart login.
    #[error("session expired, please log in again")]
    SessionExpired,
    /// Upstream identity provider failure, message passed through verbatim.
    #[error("{0}")]
    Provider(String),
    /// Authenticated with the provider but not a member of the required organization.
    #[error("not a member of the {org} organization")]
    MembershipDenied { org: String },
    #[error(transparent)]
    Credential(#[from] CredentialError),
    /// Another resolution currently holds this handle.
    #[error("session is already being resolved")]
    ResolutionInProgress,
    #[error("token signing failed: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("session store: {0}")]
    Storage(String),
    /// The broker actor is gone (shutdown).
    #[error("session broker unavailable")]
    Unavailable,
}

impl BrokerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SessionExpired => ErrorCode::SessionExpired,
            Self::Provider(_) => ErrorCode::ProviderError,
            Self::MembershipDenied { .. } => ErrorCode::MembershipDenied,
            Self::Credential(CredentialError::BadCredentials) => ErrorCode::BadCredentials,
            Self::Credential(CredentialError::Unavailable(_)) => ErrorCode::UpstreamUnavailable,
            Self::ResolutionInProgress => ErrorCode::ResolutionInProgress,
            Self::Token(_) | Self::Storage(_) => ErrorCode::Internal,
            Self::Unavailable => ErrorCode::Unavailable,
        }
    }

    pub fn to_http_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        self.code().to_http_response(self.to_string())
    }
}

/// An error on its way out of an HTTP handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        if e.code() == ErrorCode::Internal {
            tracing::error!(err = %e, "request failed");
        }
        Self::new(e.code(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.code.to_http_response(self.message).into_response()
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
