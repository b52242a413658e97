// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Sleuth
//!
//! `SleuthError` is the top-level error for the orchestration engine;
//! `ProviderError` is the raw, pre-classification shape a provider client
//! reports. Classification of provider errors into the retry taxonomy lives
//! in `llm::classify`.

use thiserror::Error;

/// Main error type for Sleuth operations
#[derive(Error, Debug)]
pub enum SleuthError {
    /// Provider-related errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The circuit breaker for a provider is open; no call was attempted
    #[error("Circuit breaker open for provider '{provider}'")]
    CircuitOpen { provider: String },

    /// Loop protection aborted the run
    #[error("Loop protection triggered: {0}")]
    LoopExceeded(String),

    /// Token budget violation; caller must shrink context before retrying
    #[error("Token budget exceeded: {used} tokens over limit of {limit}")]
    BudgetExceeded { used: u64, limit: u64 },

    /// The run was cancelled by the caller
    #[error("Run cancelled")]
    Cancelled,

    /// Tool execution errors
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Session/conversation store errors
    #[error("Session error: {0}")]
    Session(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Raw provider failure as reported by a provider client.
///
/// Carries enough status/category information for the classifier to place
/// the failure in the retry taxonomy without knowing vendor wire formats.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    /// Rate limited by the API, optionally with a server-supplied delay
    #[error("Rate limited")]
    RateLimited {
        /// Value of the Retry-After directive, if the server sent one
        retry_after_secs: Option<u64>,
    },

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,

    /// Upstream returned an error status
    #[error("Upstream error ({status}): {message}")]
    Upstream {
        status: u16,
        message: String,
        /// Vendor-specific error code, when the provider exposes one
        code: Option<String>,
    },

    /// The request was rejected as malformed or unsupported
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Response could not be parsed
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// Streaming error mid-response
    #[error("Streaming error: {0}")]
    Stream(String),
}

/// Result type alias for Sleuth operations
pub type Result<T> = std::result::Result<T, SleuthError>;

impl From<toml::de::Error> for SleuthError {
    fn from(err: toml::de::Error) -> Self {
        SleuthError::Toml(err.to_string())
    }
}
