//! Error handling types

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for operations that can fail
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the AI router
#[derive(Error, Debug)]
pub enum Error {
    /// Request refused because the target circuit breaker is open.
    ///
    /// Carries the earliest time a retry against this provider can succeed.
    #[error("circuit breaker for provider '{provider}' is open, retry at {retry_at}")]
    CircuitOpen {
        provider: String,
        retry_at: DateTime<Utc>,
    },

    /// Error returned by a provider adapter. The upstream message and HTTP
    /// status are preserved verbatim so callers keep full diagnostic detail.
    #[error("provider '{provider}' error: {message}")]
    Provider {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// No provider was initialized for the requested operation.
    #[error("no provider available for operation '{operation}'")]
    NoProviderAvailable { operation: String },

    /// A provider name was referenced that is not registered with the router.
    #[error("unknown provider: {name}")]
    UnknownProvider { name: String },

    /// A swap was requested but the router has no fallback configured.
    #[error("no fallback provider configured")]
    NoFallbackConfigured,

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("JSON parsing error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a provider error without an HTTP status
    pub fn provider<P: Into<String>, M: Into<String>>(provider: P, message: M) -> Self {
        Self::Provider {
            provider: provider.into(),
            status: None,
            message: message.into(),
        }
    }

    /// Create a provider error carrying the upstream HTTP status
    pub fn provider_status<P: Into<String>, M: Into<String>>(
        provider: P,
        status: u16,
        message: M,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            status: Some(status),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an unknown provider error
    pub fn unknown_provider<S: Into<String>>(name: S) -> Self {
        Self::UnknownProvider { name: name.into() }
    }

    /// Create a router exhaustion error for the named operation
    pub fn no_provider<S: Into<String>>(operation: S) -> Self {
        Self::NoProviderAvailable {
            operation: operation.into(),
        }
    }
}
