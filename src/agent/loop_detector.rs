// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Runaway-loop detection for agent runs
//!
//! Tracks every tool call of one run and flags repetition: the same tool
//! invoked with identical arguments inside a trailing window of iterations.
//! History is append-only and run-local; `reset` starts a fresh run without
//! discarding configuration.

use chrono::{DateTime, Utc};

use crate::config::LoopProtectionConfig;

/// Trailing window, in iterations, inside which repeats are counted
pub const REPEAT_WINDOW_ITERATIONS: u32 = 5;

/// One recorded tool call
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    /// Tool name
    pub tool_name: String,

    /// Canonical serialization of the call arguments
    pub args_fingerprint: String,

    /// Iteration the call was made in
    pub iteration: u32,

    /// When the call was recorded
    pub timestamp: DateTime<Utc>,
}

/// Deterministic fingerprint of call arguments.
///
/// `serde_json::Value` maps are key-ordered, so serialization is canonical
/// and string equality means argument equality.
pub fn args_fingerprint(args: &serde_json::Value) -> String {
    args.to_string()
}

/// Per-run tool call history with repetition queries
#[derive(Debug)]
pub struct LoopDetector {
    config: LoopProtectionConfig,
    records: Vec<ToolCallRecord>,
}

impl LoopDetector {
    /// Create a detector for one run
    pub fn new(config: LoopProtectionConfig) -> Self {
        Self {
            config,
            records: Vec::new(),
        }
    }

    /// Loop protection ceilings
    pub fn config(&self) -> &LoopProtectionConfig {
        &self.config
    }

    /// Record a tool call
    pub fn record_call(&mut self, tool_name: &str, args: &serde_json::Value, iteration: u32) {
        self.records.push(ToolCallRecord {
            tool_name: tool_name.to_string(),
            args_fingerprint: args_fingerprint(args),
            iteration,
            timestamp: Utc::now(),
        });
    }

    /// Count recorded calls matching tool and arguments within the trailing
    /// window, inclusive of calls made in the current iteration. Records
    /// older than the window are ignored, never removed.
    pub fn count_repeated_calls(
        &self,
        tool_name: &str,
        args: &serde_json::Value,
        current_iteration: u32,
    ) -> u32 {
        let fingerprint = args_fingerprint(args);
        self.records
            .iter()
            .filter(|r| {
                r.tool_name == tool_name
                    && r.args_fingerprint == fingerprint
                    && current_iteration.saturating_sub(r.iteration) < REPEAT_WINDOW_ITERATIONS
            })
            .count() as u32
    }

    /// Total calls recorded this run
    pub fn total_calls(&self) -> u32 {
        self.records.len() as u32
    }

    /// Remediation hint for a detected repetition, tailored to known
    /// repetitive patterns with a generic fallback.
    pub fn loop_hint(&self, tool_name: &str, args: &serde_json::Value) -> String {
        let has_name_filter = args
            .get("name")
            .or_else(|| args.get("pod"))
            .and_then(|v| v.as_str())
            .map(|s| !s.is_empty())
            .unwrap_or(false);

        if tool_name.contains("log") {
            return format!(
                "The '{}' tool keeps returning the same result. Try a different container, \
                 the previous container's logs, or a wider line range.",
                tool_name
            );
        }

        if tool_name.contains("pod") || tool_name.contains("deployment") {
            if !has_name_filter {
                return format!(
                    "The '{}' tool was called repeatedly without a specific name filter. \
                     Broaden or change the label selector, or pick one resource and fetch \
                     its logs instead.",
                    tool_name
                );
            }
            return format!(
                "The '{}' tool keeps being called for the same resource. Its state is \
                 unlikely to have changed; fetch its logs or describe its events instead.",
                tool_name
            );
        }

        format!(
            "The '{}' tool was called repeatedly with identical arguments. Change the \
             arguments or try a different tool.",
            tool_name
        )
    }

    /// Clear history for a fresh run, keeping configuration
    pub fn reset(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> LoopDetector {
        LoopDetector::new(LoopProtectionConfig::default())
    }

    #[test]
    fn test_config_defaults() {
        let d = detector();
        assert_eq!(d.config().max_iterations, 20);
        assert_eq!(d.config().max_tool_calls, 50);
        assert_eq!(d.config().max_repeated_calls, 1);
    }

    #[test]
    fn test_fingerprint_is_order_insensitive() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"pod": "api-0", "namespace": "p-1"}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"namespace": "p-1", "pod": "api-0"}"#).unwrap();
        assert_eq!(args_fingerprint(&a), args_fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_distinguishes_values() {
        let a = serde_json::json!({"pod": "api-0"});
        let b = serde_json::json!({"pod": "api-1"});
        assert_ne!(args_fingerprint(&a), args_fingerprint(&b));
    }

    #[test]
    fn test_count_includes_current_iteration() {
        let mut d = detector();
        let args = serde_json::json!({"pod": "api-0"});
        d.record_call("get_pod_logs", &args, 3);
        assert_eq!(d.count_repeated_calls("get_pod_logs", &args, 3), 1);
    }

    #[test]
    fn test_count_across_iterations() {
        let mut d = detector();
        let args = serde_json::json!({"namespace": "p-1"});
        d.record_call("get_pods", &args, 1);
        d.record_call("get_pods", &args, 2);
        d.record_call("get_pods", &args, 3);
        assert_eq!(d.count_repeated_calls("get_pods", &args, 3), 3);
    }

    #[test]
    fn test_window_boundary() {
        let mut d = detector();
        let args = serde_json::json!({});
        // Exactly 5 iterations back: outside the window
        d.record_call("get_pods", &args, 5);
        assert_eq!(d.count_repeated_calls("get_pods", &args, 10), 0);
        // 4 iterations back: inside
        d.record_call("get_pods", &args, 6);
        assert_eq!(d.count_repeated_calls("get_pods", &args, 10), 1);
    }

    #[test]
    fn test_old_records_ignored_not_removed() {
        let mut d = detector();
        let args = serde_json::json!({});
        d.record_call("get_pods", &args, 1);
        d.record_call("get_pods", &args, 20);
        assert_eq!(d.count_repeated_calls("get_pods", &args, 20), 1);
        assert_eq!(d.total_calls(), 2);
    }

    #[test]
    fn test_different_args_do_not_count() {
        let mut d = detector();
        d.record_call("get_pods", &serde_json::json!({"namespace": "a"}), 1);
        d.record_call("get_pods", &serde_json::json!({"namespace": "b"}), 2);
        assert_eq!(
            d.count_repeated_calls("get_pods", &serde_json::json!({"namespace": "a"}), 2),
            1
        );
    }

    #[test]
    fn test_different_tool_does_not_count() {
        let mut d = detector();
        let args = serde_json::json!({});
        d.record_call("get_pods", &args, 1);
        assert_eq!(d.count_repeated_calls("get_deployments", &args, 1), 0);
    }

    #[test]
    fn test_reset_clears_history_keeps_config() {
        let mut d = LoopDetector::new(LoopProtectionConfig {
            max_iterations: 7,
            ..Default::default()
        });
        d.record_call("get_pods", &serde_json::json!({}), 1);
        d.reset();
        assert_eq!(d.total_calls(), 0);
        assert_eq!(d.config().max_iterations, 7);
    }

    #[test]
    fn test_hint_for_log_tool() {
        let d = detector();
        let hint = d.loop_hint("get_pod_logs", &serde_json::json!({"pod": "api-0"}));
        assert!(hint.contains("get_pod_logs"));
        assert!(hint.contains("container") || hint.contains("range"));
    }

    #[test]
    fn test_hint_for_unfiltered_pod_lookup() {
        let d = detector();
        let hint = d.loop_hint("get_pods", &serde_json::json!({"namespace": "p-1"}));
        assert!(hint.contains("name filter"));
    }

    #[test]
    fn test_hint_for_filtered_pod_lookup() {
        let d = detector();
        let hint = d.loop_hint("get_pods", &serde_json::json!({"name": "api-0"}));
        assert!(hint.contains("logs"));
    }

    #[test]
    fn test_generic_hint_fallback() {
        let d = detector();
        let hint = d.loop_hint("query_build", &serde_json::json!({"id": 7}));
        assert!(hint.contains("identical arguments"));
    }
}
