// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Typed event stream surface
//!
//! One agent run produces a finite, ordered sequence of these events. A
//! collaborator transports them (SSE in production); this crate only defines
//! the shapes. Debug events mirror the production data for diagnostic
//! consumers and never omit fields present in the production events.

use serde::{Deserialize, Serialize};

use crate::error::SleuthError;
use crate::llm::classify::{classify, ErrorKind};
use crate::tokens::{TokenBreakdown, TokenBudget};
use crate::tools::Evidence;

/// Events emitted during one agent run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental response text
    Chunk { text: String },

    /// A tool invocation started
    ToolCall {
        id: String,
        tool: String,
        arguments: serde_json::Value,
    },

    /// Progress narration
    Processing { message: String },

    /// Model reasoning narration. Part of the wire surface for providers
    /// that expose reasoning passthrough; the engine itself never emits it.
    Thinking { message: String },

    /// Log excerpt cited as evidence
    EvidenceLog { source: String, excerpt: String },

    /// File excerpt cited as evidence
    EvidenceFile { path: String, excerpt: String },

    /// Deployment state cited as evidence
    EvidenceDeployment { name: String, status: String },

    /// Terminal failure
    Error {
        message: String,
        category: ErrorCategory,
        suggested_action: Option<SuggestedAction>,
    },

    /// Terminal success
    Complete { elapsed_ms: u64 },

    /// Terminal success with a structured payload
    CompleteJson {
        payload: serde_json::Value,
        elapsed_ms: u64,
    },

    /// Diagnostic mirror: run context at start
    DebugContext {
        provider: String,
        model: String,
        token_budget: TokenBudget,
        token_breakdown: TokenBreakdown,
    },

    /// Diagnostic mirror of a tool call
    DebugToolCall {
        id: String,
        tool: String,
        arguments: serde_json::Value,
        iteration: u32,
        repeats: u32,
    },

    /// Diagnostic mirror of a tool result
    DebugToolResult {
        id: String,
        tool: String,
        success: bool,
        agent_content: String,
        error: Option<String>,
        cancelled: bool,
    },

    /// Diagnostic mirror: run totals at the end
    DebugMetrics {
        iterations: u32,
        tool_calls: u32,
        retries_consumed: u32,
        elapsed_ms: u64,
    },
}

impl AgentEvent {
    /// Whether this event terminates the run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::Error { .. } | AgentEvent::Complete { .. } | AgentEvent::CompleteJson { .. }
        )
    }
}

impl From<Evidence> for AgentEvent {
    fn from(evidence: Evidence) -> Self {
        match evidence {
            Evidence::Log { source, excerpt } => AgentEvent::EvidenceLog { source, excerpt },
            Evidence::File { path, excerpt } => AgentEvent::EvidenceFile { path, excerpt },
            Evidence::Deployment { name, status } => {
                AgentEvent::EvidenceDeployment { name, status }
            }
        }
    }
}

/// Actionable category attached to terminal failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// The provider throttled us
    RateLimited,
    /// Expected to clear on its own
    Transient,
    /// Will fail the same way again until something changes
    Deterministic,
    /// Could not be placed in a bucket
    Ambiguous,
}

/// What the caller should do about a terminal failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuggestedAction {
    /// Try the same request again
    Retry,
    /// Try a different model/provider
    SwitchModel,
    /// Inspect credentials or configuration
    CheckConfig,
}

/// Build the terminal `error` event for a run failure.
///
/// Protective stops (loop/budget) are reported as such, never as provider
/// failures.
pub fn error_event(provider: &str, error: &SleuthError) -> AgentEvent {
    match error {
        SleuthError::Provider(raw) => {
            let classified = classify(provider, raw);
            let (category, suggested_action) = match classified.kind {
                ErrorKind::RateLimited => (ErrorCategory::RateLimited, Some(SuggestedAction::Retry)),
                ErrorKind::Transient => (ErrorCategory::Transient, Some(SuggestedAction::Retry)),
                ErrorKind::Fatal => (
                    ErrorCategory::Deterministic,
                    Some(SuggestedAction::CheckConfig),
                ),
                ErrorKind::Unknown => (ErrorCategory::Ambiguous, None),
            };
            AgentEvent::Error {
                message: raw.to_string(),
                category,
                suggested_action,
            }
        }
        SleuthError::CircuitOpen { provider } => AgentEvent::Error {
            message: format!(
                "Provider '{}' is failing repeatedly; calls are paused while it recovers.",
                provider
            ),
            category: ErrorCategory::Transient,
            suggested_action: Some(SuggestedAction::SwitchModel),
        },
        SleuthError::LoopExceeded(detail) => AgentEvent::Error {
            message: format!(
                "Protective stop: the agent was halted before completing. {}",
                detail
            ),
            category: ErrorCategory::Deterministic,
            suggested_action: None,
        },
        SleuthError::BudgetExceeded { used, limit } => AgentEvent::Error {
            message: format!(
                "Protective stop: the assembled prompt ({} tokens) exceeds the provider's \
                 context limit ({} tokens). Shrink the context before retrying.",
                used, limit
            ),
            category: ErrorCategory::Deterministic,
            suggested_action: None,
        },
        other => AgentEvent::Error {
            message: other.to_string(),
            category: ErrorCategory::Ambiguous,
            suggested_action: None,
        },
    }
}
