//! Error types for code-relay.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("Failed to serialize filters: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by a channel fetch.
///
/// Everything except [`FetchError::Unauthorized`] is transient: the poll
/// loop backs off and tries again.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Token rejected by {endpoint}")]
    Unauthorized { endpoint: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl FetchError {
    /// Whether this failure means the credential itself is bad.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Authentication errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Login rejected ({status}): {reason}")]
    LoginRejected { status: u16, reason: String },

    #[error("Two-factor code rejected ({status})")]
    MfaRejected { status: u16 },

    #[error("Login request failed: {0}")]
    Request(String),

    #[error("Operator declined to re-enter credentials")]
    Declined,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Code delivery errors. Never fatal: the sink falls back to manual entry.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Failed to launch {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Strategy {strategy} failed: {reason}")]
    StrategyFailed { strategy: String, reason: String },

    #[error("Strategy {strategy} is not permitted to send keystrokes: {reason}")]
    PermissionDenied { strategy: String, reason: String },

    #[error("Operator prompt failed: {0}")]
    Prompt(#[from] std::io::Error),
}

/// Result type alias for code-relay.
pub type Result<T> = std::result::Result<T, Error>;
