// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider error classification
//!
//! The single seam that normalizes heterogeneous provider failures into a
//! closed taxonomy the retry policy can reason about. Provider integrations
//! contribute only the small vendor-specific rule sets below; raw errors
//! never leak past this module.

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Closed failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rate limited, often with a server-supplied delay
    RateLimited,
    /// Network/5xx-class failure expected to clear on its own
    Transient,
    /// Auth/validation failure that retrying cannot fix
    Fatal,
    /// Could not be placed in the taxonomy
    Unknown,
}

/// Normalized, provider-agnostic description of a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    /// Which bucket the failure falls into
    pub kind: ErrorKind,

    /// Whether the retry policy may attempt the call again
    pub retryable: bool,

    /// Server-supplied retry directive, when present
    pub retry_after_secs: Option<u64>,
}

impl ClassifiedError {
    fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            retryable: matches!(kind, ErrorKind::RateLimited | ErrorKind::Transient),
            retry_after_secs: None,
        }
    }

    fn with_retry_after(mut self, secs: Option<u64>) -> Self {
        self.retry_after_secs = secs;
        self
    }
}

/// Classify a raw provider failure. Pure, no side effects.
pub fn classify(provider: &str, error: &ProviderError) -> ClassifiedError {
    match error {
        ProviderError::RateLimited { retry_after_secs } => {
            ClassifiedError::new(ErrorKind::RateLimited).with_retry_after(*retry_after_secs)
        }
        ProviderError::Network(_) | ProviderError::Timeout | ProviderError::Stream(_) => {
            ClassifiedError::new(ErrorKind::Transient)
        }
        ProviderError::Upstream {
            status,
            code,
            ..
        } => classify_upstream(provider, *status, code.as_deref()),
        ProviderError::AuthenticationFailed
        | ProviderError::InvalidRequest(_)
        | ProviderError::InvalidResponse(_) => ClassifiedError::new(ErrorKind::Fatal),
    }
}

/// Pure predicate used by the retry policy
pub fn is_retryable(classified: &ClassifiedError) -> bool {
    classified.retryable
}

fn classify_upstream(provider: &str, status: u16, code: Option<&str>) -> ClassifiedError {
    // Vendor codes take precedence over the bare status
    if let Some(code) = code {
        if let Some(classified) = classify_vendor_code(provider, code) {
            return classified;
        }
    }

    match status {
        429 => ClassifiedError::new(ErrorKind::RateLimited),
        500..=599 => ClassifiedError::new(ErrorKind::Transient),
        400..=499 => ClassifiedError::new(ErrorKind::Fatal),
        _ => ClassifiedError::new(ErrorKind::Unknown),
    }
}

fn classify_vendor_code(provider: &str, code: &str) -> Option<ClassifiedError> {
    match provider {
        "anthropic" => match code {
            "overloaded_error" | "api_error" => Some(ClassifiedError::new(ErrorKind::Transient)),
            "rate_limit_error" => Some(ClassifiedError::new(ErrorKind::RateLimited)),
            "authentication_error" | "permission_error" | "invalid_request_error" => {
                Some(ClassifiedError::new(ErrorKind::Fatal))
            }
            _ => None,
        },
        "openai" => match code {
            "rate_limit_exceeded" | "insufficient_quota" => {
                Some(ClassifiedError::new(ErrorKind::RateLimited))
            }
            "server_error" => Some(ClassifiedError::new(ErrorKind::Transient)),
            "invalid_api_key" | "invalid_request_error" => {
                Some(ClassifiedError::new(ErrorKind::Fatal))
            }
            _ => None,
        },
        "gemini" => match code {
            "RESOURCE_EXHAUSTED" => Some(ClassifiedError::new(ErrorKind::RateLimited)),
            "UNAVAILABLE" | "DEADLINE_EXCEEDED" | "INTERNAL" => {
                Some(ClassifiedError::new(ErrorKind::Transient))
            }
            "PERMISSION_DENIED" | "INVALID_ARGUMENT" | "UNAUTHENTICATED" => {
                Some(ClassifiedError::new(ErrorKind::Fatal))
            }
            _ => None,
        },
        _ => None,
    }
}
