//! Authentication error taxonomy.
//!
//! Every failure in the enforcement pipeline is resolved, at the point it is
//! detected, into a single [`AuthError`]. Each variant carries a numeric error
//! code (the gateway's historical `9009xx` family) and maps onto an HTTP
//! status class via [`AuthError::status`]. Callers translate the error into a
//! response; nothing here is retried.
//!
//! Caller-visible messages never contain internals. [`AuthError::InternalError`]
//! keeps its detail in a separate field that is only emitted by
//! [`AuthError::log`].

use http::StatusCode;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Numeric error codes shared with the proxy and analytics consumers.
pub mod codes {
    /// Unclassified failure (generation errors, remote infrastructure failures).
    pub const GENERAL_ERROR: u32 = 900900;
    /// Malformed, expired, revoked or badly signed credential.
    pub const INVALID_CREDENTIALS: u32 = 900901;
    /// No credential could be extracted for a secured resource.
    pub const MISSING_CREDENTIALS: u32 = 900902;
    /// Subscription is blocked for this application.
    pub const SUBSCRIPTION_BLOCKED: u32 = 900907;
    /// Subscription not found or resource not permitted.
    pub const RESOURCE_FORBIDDEN: u32 = 900908;
    /// Subscription exists but is on hold or rejected.
    pub const SUBSCRIPTION_INACTIVE: u32 = 900909;
    /// Required scopes are not granted by the token.
    pub const INVALID_SCOPE: u32 = 900910;
    /// The API itself is in the blocked lifecycle state.
    pub const API_BLOCKED: u32 = 900800;
}

const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid Credentials";
const MISSING_CREDENTIALS_MESSAGE: &str =
    "Invalid Credentials. Make sure your API invocation call has a header: 'Authorization : Bearer ACCESS_TOKEN' or 'Authorization : Basic ACCESS_TOKEN' or 'apikey: API_KEY'";
const FORBIDDEN_MESSAGE: &str =
    "User is NOT authorized to access the Resource. API Subscription validation failed.";
const API_BLOCKED_MESSAGE: &str = "This API has been blocked temporarily. Please try again later or contact the system administrators.";
const SUBSCRIPTION_BLOCKED_MESSAGE: &str = "The requested API is temporarily blocked.";
const SUBSCRIPTION_INACTIVE_MESSAGE: &str = "The subscription to the API is inactive.";
const INVALID_ENVIRONMENT_MESSAGE: &str = "Invalid environment";

/// Typed authentication failure.
///
/// The `Display` output of every variant is safe to return to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No extractable credential for a mandatory-secured resource.
    #[error("{message}")]
    MissingCredentials { message: String },

    /// Malformed token, failed signature, revoked token, or a stale rotated key.
    #[error("{message}")]
    InvalidCredentials { message: String },

    /// Subscription missing or a scope requirement not met.
    #[error("{message}")]
    Forbidden { code: u32, message: String },

    /// API or subscription is blocked (provider-side state).
    #[error("{message}")]
    Blocked { code: u32, message: String },

    /// Environment or deployment-type mismatch.
    #[error("{message}")]
    InvalidEnvironment { message: String },

    /// Generation failure, remote infrastructure failure, unexpected parse failure.
    #[error("Unclassified Authentication Failure")]
    InternalError { detail: String },
}

impl AuthError {
    pub fn missing_credentials() -> Self {
        AuthError::MissingCredentials {
            message: MISSING_CREDENTIALS_MESSAGE.to_string(),
        }
    }

    pub fn invalid_credentials() -> Self {
        AuthError::InvalidCredentials {
            message: INVALID_CREDENTIALS_MESSAGE.to_string(),
        }
    }

    /// Invalid credentials with a more specific caller-visible reason.
    pub fn invalid_credentials_with(reason: impl Into<String>) -> Self {
        AuthError::InvalidCredentials {
            message: reason.into(),
        }
    }

    /// Subscription validation failed.
    pub fn forbidden() -> Self {
        AuthError::Forbidden {
            code: codes::RESOURCE_FORBIDDEN,
            message: FORBIDDEN_MESSAGE.to_string(),
        }
    }

    /// Request is not permitted for the given resource (API key restrictions and similar).
    pub fn resource_forbidden(path: &str) -> Self {
        AuthError::Forbidden {
            code: codes::RESOURCE_FORBIDDEN,
            message: format!("User is NOT authorized to access the Resource: {path}."),
        }
    }

    pub fn invalid_scope(path: &str) -> Self {
        AuthError::Forbidden {
            code: codes::INVALID_SCOPE,
            message: format!(
                "User is NOT authorized to access the Resource: {path}. Scope validation failed."
            ),
        }
    }

    pub fn subscription_inactive() -> Self {
        AuthError::Forbidden {
            code: codes::SUBSCRIPTION_INACTIVE,
            message: SUBSCRIPTION_INACTIVE_MESSAGE.to_string(),
        }
    }

    pub fn api_blocked() -> Self {
        AuthError::Blocked {
            code: codes::API_BLOCKED,
            message: API_BLOCKED_MESSAGE.to_string(),
        }
    }

    pub fn subscription_blocked() -> Self {
        AuthError::Blocked {
            code: codes::SUBSCRIPTION_BLOCKED,
            message: SUBSCRIPTION_BLOCKED_MESSAGE.to_string(),
        }
    }

    pub fn invalid_environment() -> Self {
        AuthError::InvalidEnvironment {
            message: INVALID_ENVIRONMENT_MESSAGE.to_string(),
        }
    }

    /// Internal failure. `detail` is logged but never shown to callers.
    pub fn internal(detail: impl Into<String>) -> Self {
        AuthError::InternalError {
            detail: detail.into(),
        }
    }

    /// Numeric error code for this failure.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            AuthError::MissingCredentials { .. } => codes::MISSING_CREDENTIALS,
            AuthError::InvalidCredentials { .. } => codes::INVALID_CREDENTIALS,
            AuthError::Forbidden { code, .. } => *code,
            AuthError::Blocked { code, .. } => *code,
            AuthError::InvalidEnvironment { .. } => codes::INVALID_CREDENTIALS,
            AuthError::InternalError { .. } => codes::GENERAL_ERROR,
        }
    }

    /// HTTP status class the proxy should answer with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingCredentials { .. }
            | AuthError::InvalidCredentials { .. }
            | AuthError::InvalidEnvironment { .. } => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AuthError::Blocked { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-friendly name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials { .. } => "missing_credentials",
            AuthError::InvalidCredentials { .. } => "invalid_credentials",
            AuthError::Forbidden { .. } => "forbidden",
            AuthError::Blocked { .. } => "blocked",
            AuthError::InvalidEnvironment { .. } => "invalid_environment",
            AuthError::InternalError { .. } => "internal_error",
        }
    }

    /// Log the failure with structured fields. Internal errors log their full detail.
    pub fn log(&self) {
        match self {
            AuthError::MissingCredentials { .. } => {
                debug!(code = self.code(), "authentication failed: missing credentials");
            }
            AuthError::InternalError { detail } => {
                error!(code = self.code(), detail = %detail, "authentication failed: internal error");
            }
            other => {
                warn!(
                    code = other.code(),
                    kind = other.kind(),
                    status = other.status().as_u16(),
                    "authentication failed: {}",
                    other
                );
            }
        }
    }
}
