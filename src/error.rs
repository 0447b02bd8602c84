//!
//! Error handling for the Highlight AI to OpenAI gateway.
//!
//! Defines all error types used throughout the application using thiserror
//! for ergonomic error handling. Every failure carries a stable OpenAI-style
//! `type`/`code` pair so callers can branch on suspension versus transient
//! failures.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use thiserror::Error;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Application error taxonomy.
///
/// Covers all failure conditions of the gateway. `UpstreamAuth` is recovered
/// locally (forced refresh + one retry); `AccountSuspended` is terminal and
/// never retried; `Request` and `UpstreamProtocol` are transient-class and
/// eligible for the bounded retry in the session gate.
#[derive(Error, Debug)]
pub enum HighlightError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    CallerInput(String),

    #[error("Invalid credential: {0}")]
    Credential(String),

    #[error("Upstream rejected token: {0}")]
    UpstreamAuth(String),

    #[error("HighlightAI account suspended")]
    AccountSuspended,

    #[error("Upstream error ({status}): {message}")]
    UpstreamProtocol {
        /** HTTP status (or 200 for in-stream error events) */
        status: u16,
        /** normalized upstream message */
        message: String,
    },

    #[error("HighlightAI empty response")]
    EmptyUpstreamResponse,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    Http(String),
}

/* --- start of code -------------------------------------------------------------------------- */

impl HighlightError {
    ///
    /// Stable error `type` string for the OpenAI error envelope.
    ///
    /// # Returns
    ///  * Static identifier callers can branch on
    pub fn error_type(&self) -> &'static str {
        match self {
            HighlightError::Config(_) => "configuration_error",
            HighlightError::CallerInput(_) => "invalid_request_error",
            HighlightError::Credential(_) => "authentication_error",
            HighlightError::UpstreamAuth(_) => "upstream_auth_error",
            HighlightError::AccountSuspended => "account_suspended",
            HighlightError::UpstreamProtocol { .. } => "highlight_error",
            HighlightError::EmptyUpstreamResponse => "highlight_error",
            HighlightError::Serialization(_) => "internal_error",
            HighlightError::Request(_) => "http_error",
            HighlightError::Http(_) => "internal_error",
        }
    }

    ///
    /// HTTP status the error maps to in responses.
    ///
    /// Suspension → 403, caller input → 400, bad credential → 401,
    /// everything else → 500.
    ///
    /// # Returns
    ///  * HTTP status code as u16
    pub fn http_status(&self) -> u16 {
        match self {
            HighlightError::CallerInput(_) => 400,
            HighlightError::Credential(_) => 401,
            HighlightError::AccountSuspended => 403,
            _ => 500,
        }
    }

    ///
    /// Whether the session gate may retry the request after this failure.
    ///
    /// Network failures, hard upstream failures and empty responses are
    /// retried up to the configured bound. Suspension and caller errors are
    /// never retried; unauthorized responses have their own single-refresh
    /// path and are excluded here.
    ///
    /// # Returns
    ///  * `true` if eligible for the bounded retry loop
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HighlightError::Request(_)
                | HighlightError::UpstreamProtocol { .. }
                | HighlightError::EmptyUpstreamResponse
        )
    }
}

/// Result type alias for cleaner error handling throughout the application
pub type Result<T> = std::result::Result<T, HighlightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspension_maps_to_403_and_stable_type() {
        let e = HighlightError::AccountSuspended;
        assert_eq!(e.http_status(), 403);
        assert_eq!(e.error_type(), "account_suspended");
        assert!(!e.is_retryable());
    }

    #[test]
    fn caller_input_maps_to_400() {
        let e = HighlightError::CallerInput("Model 'x' not found".into());
        assert_eq!(e.http_status(), 400);
        assert_eq!(e.error_type(), "invalid_request_error");
        assert!(!e.is_retryable());
    }

    #[test]
    fn upstream_failures_are_retryable() {
        let e = HighlightError::UpstreamProtocol { status: 502, message: "bad gateway".into() };
        assert!(e.is_retryable());
        assert_eq!(e.http_status(), 500);

        assert!(HighlightError::EmptyUpstreamResponse.is_retryable());
    }

    #[test]
    fn unauthorized_is_not_in_the_transient_class() {
        let e = HighlightError::UpstreamAuth("401".into());
        assert!(!e.is_retryable());
    }
}
