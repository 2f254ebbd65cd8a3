//! Error types for autohealer

use axum::http::StatusCode;

use crate::heal::models::ReportError;

/// Main error type for healing operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum HealError {
    /// Metrics store, probe or control plane unreachable after retries
    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("No samples for '{target_id}' in the requested window")]
    EmptyWindow { target_id: String },

    #[error("Malformed oracle response: {0}")]
    MalformedResponse(String),

    /// Oracle refused the request (auth, quota)
    #[error("Oracle refused request: {0}")]
    OracleRefused(String),

    #[error("Remediation rejected for '{target_id}': {reason}")]
    RemediationRejected { target_id: String, reason: String },

    #[error("A healing invocation is already in flight for '{0}'")]
    AlreadyHealing(String),

    #[error("Deadline exceeded during {0}")]
    Timeout(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HealError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::EmptyWindow { .. } => StatusCode::NOT_FOUND,
            Self::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
            Self::OracleRefused(_) => StatusCode::BAD_GATEWAY,
            Self::RemediationRejected { .. } => StatusCode::BAD_GATEWAY,
            Self::AlreadyHealing(_) => StatusCode::CONFLICT,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable name used in report bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::EmptyWindow { .. } => "empty_window",
            Self::MalformedResponse(_) => "malformed_response",
            Self::OracleRefused(_) => "oracle_refused",
            Self::RemediationRejected { .. } => "remediation_rejected",
            Self::AlreadyHealing(_) => "already_healing",
            Self::Timeout(_) => "timeout",
            Self::BadRequest(_) => "bad_request",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<&HealError> for ReportError {
    fn from(err: &HealError) -> Self {
        ReportError {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for healing operations
pub type Result<T> = std::result::Result<T, HealError>;
