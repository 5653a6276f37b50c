//! Error types for the Renfe scraper
//!
//! This module defines all error types used throughout the library.
//! `Display` output never contains raw response bodies, token values or
//! low-level transport messages, so errors can be shown to callers as-is.
//! RenfeError implements Serialize for tool-layer compatibility.

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Cause class of a network-layer failure.
///
/// Only the class is kept; the underlying message is logged at debug level
/// and then dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NetworkErrorKind {
    /// Connect, read or overall deadline exceeded
    Timeout,
    /// Connection refused, reset or DNS failure
    Connect,
    /// TLS handshake or certificate validation failure
    Tls,
    /// Redirect limit exceeded
    Redirect,
    /// Server answered with a non-success HTTP status
    Status(u16),
    /// Response body exceeded the configured size cap
    BodyTooLarge,
    /// Any other request or body failure
    Other,
}

impl std::fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkErrorKind::Timeout => write!(f, "timeout"),
            NetworkErrorKind::Connect => write!(f, "connection failure"),
            NetworkErrorKind::Tls => write!(f, "TLS failure"),
            NetworkErrorKind::Redirect => write!(f, "too many redirects"),
            NetworkErrorKind::Status(code) => write!(f, "HTTP status {}", code),
            NetworkErrorKind::BodyTooLarge => write!(f, "response too large"),
            NetworkErrorKind::Other => write!(f, "request failure"),
        }
    }
}

impl NetworkErrorKind {
    /// Classify a reqwest error without keeping its message.
    pub fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return NetworkErrorKind::Timeout;
        }
        if err.is_redirect() {
            return NetworkErrorKind::Redirect;
        }
        if let Some(status) = err.status() {
            return NetworkErrorKind::Status(status.as_u16());
        }
        if err.is_connect() {
            // reqwest reports certificate failures as connect errors; the
            // source chain is the only place the TLS cause shows up.
            if source_chain_mentions_tls(err) {
                return NetworkErrorKind::Tls;
            }
            return NetworkErrorKind::Connect;
        }
        NetworkErrorKind::Other
    }
}

fn source_chain_mentions_tls(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("certificate") || text.contains("tls") || text.contains("ssl") {
            return true;
        }
        source = cause.source();
    }
    false
}

/// Error type for Renfe scraper operations
#[derive(Error, Debug)]
pub enum RenfeError {
    /// Network-layer failure (retryable per protocol step)
    #[error("Network error: {0}")]
    Network(NetworkErrorKind),

    /// Response framing or grammar did not match the remote-call protocol
    #[error("Protocol error: {reason} (fragment length {fragment_len})")]
    Protocol {
        /// Short description of what did not match
        reason: String,
        /// Length of the offending fragment, never its content
        fragment_len: usize,
    },

    /// The upstream server rejected the session token mid-scrape
    #[error("Session expired")]
    SessionExpired,

    /// The search request failed validation before any I/O
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// URL rejected by the transport's URL policy
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Bad configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RenfeError {
    /// Build a protocol error for a fragment of the given length.
    pub fn protocol(reason: impl Into<String>, fragment_len: usize) -> Self {
        RenfeError::Protocol {
            reason: reason.into(),
            fragment_len,
        }
    }

    /// Whether a protocol step may be retried after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RenfeError::Network(_))
    }

    /// Fixed, user-safe message for this error kind.
    pub fn user_message(&self) -> &'static str {
        match self {
            RenfeError::Network(_) => {
                "Could not reach the Renfe website. Please try again later."
            }
            RenfeError::Protocol { .. } => {
                "The Renfe website returned an unexpected response. Fares are unavailable right now."
            }
            RenfeError::SessionExpired => {
                "The Renfe session expired during the search. Please retry the search."
            }
            RenfeError::InvalidRequest(_) => "The search request is not valid.",
            RenfeError::InvalidUrl(_) => "The request target is not allowed.",
            RenfeError::Config(_) => "The scraper is misconfigured.",
        }
    }
}

impl From<reqwest::Error> for RenfeError {
    fn from(err: reqwest::Error) -> Self {
        let kind = NetworkErrorKind::classify(&err);
        tracing::debug!(kind = %kind, error = %err, "network failure");
        RenfeError::Network(kind)
    }
}

/// Serialize RenfeError as a string for tool-layer compatibility
impl Serialize for RenfeError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Result type alias for Renfe scraper operations
pub type Result<T> = std::result::Result<T, RenfeError>;
