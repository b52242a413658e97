// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings for the orchestration engine
//!
//! All sections have serde defaults so a missing or partial TOML file yields
//! a fully working configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Retry/circuit-breaker behavior for provider calls
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Runaway-loop ceilings for agent runs
    #[serde(default)]
    pub loop_protection: LoopProtectionConfig,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }
}

/// Retry and resilience configuration for provider calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Maximum retry attempts per call-site
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (cap for backoff)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Total retries allowed across one agent run, all call-sites combined
    #[serde(default = "default_session_retry_budget")]
    pub session_retry_budget: u32,

    /// Circuit breaker: max consecutive failures before opening circuit
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,

    /// Circuit breaker: cooldown in seconds before half-open state
    #[serde(default = "default_circuit_cooldown_secs")]
    pub circuit_cooldown_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            session_retry_budget: default_session_retry_budget(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_cooldown_secs: default_circuit_cooldown_secs(),
        }
    }
}

/// Ceilings that stop a runaway agent run
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoopProtectionConfig {
    /// Maximum provider-call iterations per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Maximum cumulative tool calls per run
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,

    /// Maximum identical (tool, args) calls inside the recency window
    #[serde(default = "default_max_repeated_calls")]
    pub max_repeated_calls: u32,
}

impl Default for LoopProtectionConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tool_calls: default_max_tool_calls(),
            max_repeated_calls: default_max_repeated_calls(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_session_retry_budget() -> u32 {
    10
}

fn default_circuit_failure_threshold() -> u32 {
    5
}

fn default_circuit_cooldown_secs() -> u64 {
    30
}

fn default_max_iterations() -> u32 {
    20
}

fn default_max_tool_calls() -> u32 {
    50
}

fn default_max_repeated_calls() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_resilience_defaults() {
        let config = ResilienceConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 500);
        assert_eq!(config.max_delay_ms, 10_000);
        assert_eq!(config.session_retry_budget, 10);
        assert_eq!(config.circuit_failure_threshold, 5);
        assert_eq!(config.circuit_cooldown_secs, 30);
    }

    #[test]
    fn test_loop_protection_defaults() {
        let config = LoopProtectionConfig::default();
        assert_eq!(config.max_iterations, 20);
        assert_eq!(config.max_tool_calls, 50);
        assert_eq!(config.max_repeated_calls, 1);
    }

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.resilience.max_retries, 3);
        assert_eq!(settings.loop_protection.max_iterations, 20);
    }

    #[test]
    fn test_settings_load_partial_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[resilience]
max_retries = 5

[loop_protection]
max_iterations = 8
"#
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.resilience.max_retries, 5);
        // Unspecified fields keep defaults
        assert_eq!(settings.resilience.base_delay_ms, 500);
        assert_eq!(settings.loop_protection.max_iterations, 8);
        assert_eq!(settings.loop_protection.max_tool_calls, 50);
    }

    #[test]
    fn test_settings_load_empty_toml() {
        let file = NamedTempFile::new().unwrap();
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.resilience.circuit_failure_threshold, 5);
    }

    #[test]
    fn test_settings_load_missing_file() {
        let result = Settings::load("/nonexistent/sleuth.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_settings_roundtrip() {
        let settings = Settings::default();
        let toml_str = toml::to_string(&settings).unwrap();
        let parsed: Settings = toml::from_str(&toml_str).unwrap();
        assert_eq!(
            parsed.resilience.session_retry_budget,
            settings.resilience.session_retry_budget
        );
    }
}
