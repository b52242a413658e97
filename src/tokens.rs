// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Token budget accounting
//!
//! Provider-agnostic token estimation for prompt sections and the assembled
//! system prompt, compared against each provider's fixed context limit. The
//! estimate is a deterministic heuristic, not a vendor tokenizer; the point
//! is catching over-budget prompts before the provider rejects them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Estimated characters per token
const CHARS_PER_TOKEN: usize = 4;

/// Context window limits by provider name
const CONTEXT_LIMITS: &[(&str, u64)] = &[
    ("anthropic", 180_000),
    ("openai", 110_000),
    ("gemini", 900_000),
];

/// Conservative limit for providers not in the table
const DEFAULT_CONTEXT_LIMIT: u64 = 100_000;

/// Deterministic token estimate for a text. Empty input yields 0.
pub fn count_tokens(text: &str) -> u64 {
    text.len().div_ceil(CHARS_PER_TOKEN) as u64
}

/// Context limit for a provider
pub fn context_limit(provider: &str) -> u64 {
    CONTEXT_LIMITS
        .iter()
        .find(|(name, _)| *name == provider)
        .map(|(_, limit)| *limit)
        .unwrap_or(DEFAULT_CONTEXT_LIMIT)
}

/// Per-section token accounting for one assembled system prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBreakdown {
    /// Tokens per named prompt section
    pub sections: BTreeMap<String, u64>,

    /// Share of the unexplained gap attributed to provider augmentation
    pub provider_augmentation: u64,

    /// Share of the unexplained gap attributed to environment context
    pub environment_context: u64,

    /// Always `sum(sections) + provider_augmentation + environment_context`
    pub total: u64,
}

/// Snapshot comparing prompt size against a provider's context limit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Provider the limit belongs to
    pub provider: String,

    /// The provider's context limit
    pub limit: u64,

    /// Estimated tokens used
    pub used: u64,

    /// `limit - used`; negative when over budget
    pub remaining: i64,

    /// `used > limit`
    pub over_budget: bool,
}

/// Tracks registered prompt sections and produces budget snapshots
#[derive(Debug, Clone, Default)]
pub struct TokenBudgetTracker {
    sections: BTreeMap<String, String>,
}

impl TokenBudgetTracker {
    /// Create a tracker with no registered sections
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named prompt section
    pub fn with_section(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.sections.insert(name.into(), text.into());
        self
    }

    /// Registered section names
    pub fn section_names(&self) -> Vec<&str> {
        self.sections.keys().map(|k| k.as_str()).collect()
    }

    /// Break down the full prompt's token count by section.
    ///
    /// A supplied `precomputed` map is trusted as-is; otherwise each
    /// registered section is tokenized independently. The gap between the
    /// full prompt's count and the section sum is split evenly between
    /// provider augmentation and environment context, remainder to the
    /// latter. The split is a fixed heuristic.
    pub fn token_breakdown(
        &self,
        system_prompt: &str,
        precomputed: Option<BTreeMap<String, u64>>,
    ) -> TokenBreakdown {
        let sections: BTreeMap<String, u64> = match precomputed {
            Some(counts) => counts,
            None => self
                .sections
                .iter()
                .map(|(name, text)| (name.clone(), count_tokens(text)))
                .collect(),
        };

        let section_sum: u64 = sections.values().sum();
        let full = count_tokens(system_prompt);
        let gap = full.saturating_sub(section_sum);
        let provider_augmentation = gap / 2;
        let environment_context = gap - provider_augmentation;

        TokenBreakdown {
            total: section_sum + provider_augmentation + environment_context,
            sections,
            provider_augmentation,
            environment_context,
        }
    }

    /// Compare the prompt against a provider's context limit.
    ///
    /// A supplied `precomputed_count` (e.g. from provider usage metadata)
    /// is used instead of the local estimate.
    pub fn check_budget(
        &self,
        system_prompt: &str,
        provider: &str,
        precomputed_count: Option<u64>,
    ) -> TokenBudget {
        let used = precomputed_count.unwrap_or_else(|| count_tokens(system_prompt));
        let limit = context_limit(provider);

        TokenBudget {
            provider: provider.to_string(),
            limit,
            used,
            remaining: limit as i64 - used as i64,
            over_budget: used > limit,
        }
    }
}
