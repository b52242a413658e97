// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! The orchestration loop
//!
//! Drives one conversation turn: check the token budget, call the provider
//! through the retry policy, consult the loop detector before executing the
//! returned tool calls, feed results back, and repeat until the model is
//! done or a protective stop fires. The run is exposed as a lazy, finite
//! stream of typed events.
//!
//! Within one run provider calls are strictly sequential; tool executions
//! for a single response run concurrently but all complete before the next
//! provider call. Only the breaker registry is shared across runs.

use async_stream::stream;
use futures::future::join_all;
use futures::Stream;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::events::{error_event, AgentEvent};
use crate::agent::loop_detector::LoopDetector;
use crate::agent::session::ConversationStore;
use crate::config::{LoopProtectionConfig, ResilienceConfig};
use crate::error::SleuthError;
use crate::llm::circuit_breaker::BreakerRegistry;
use crate::llm::message::{ContentBlock, Message};
use crate::llm::provider::{ProviderClient, ProviderRequest};
use crate::llm::retry::{RetryBudget, RetryConfig, RetryPolicy};
use crate::tokens::TokenBudgetTracker;
use crate::tools::{ToolOutcome, ToolRegistry};

/// Configuration for one runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Model to request
    pub model: String,

    /// Maximum tokens for the model's response
    pub max_response_tokens: u32,

    /// How many transcript messages to send as context
    pub history_tail: usize,

    /// Emit debug_* mirror events
    pub debug: bool,

    /// Terminate with `complete_json` instead of `complete`
    pub structured_output: bool,

    /// Runaway-loop ceilings
    pub loop_protection: LoopProtectionConfig,

    /// Cross-call retry cap per run
    pub session_retry_budget: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_response_tokens: 4096,
            history_tail: 50,
            debug: false,
            structured_output: false,
            loop_protection: LoopProtectionConfig::default(),
            session_retry_budget: ResilienceConfig::default().session_retry_budget,
        }
    }
}

/// One conversation turn to drive
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Preview build the conversation is about
    pub build_uuid: Uuid,

    /// Assembled system prompt
    pub system_prompt: String,

    /// The user's message for this turn
    pub user_message: String,
}

impl RunRequest {
    /// Create a run request
    pub fn new(
        build_uuid: Uuid,
        system_prompt: impl Into<String>,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            build_uuid,
            system_prompt: system_prompt.into(),
            user_message: user_message.into(),
        }
    }
}

/// Orchestrates agent runs against one provider
pub struct AgentRunner {
    provider: Arc<dyn ProviderClient>,
    tools: ToolRegistry,
    store: Arc<dyn ConversationStore>,
    retry: RetryPolicy,
    tracker: TokenBudgetTracker,
    config: RunnerConfig,
}

impl AgentRunner {
    /// Create a runner with default configuration.
    ///
    /// The breaker registry is passed in rather than created here so that
    /// all runners in the process share per-provider breaker state.
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        tools: ToolRegistry,
        store: Arc<dyn ConversationStore>,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        Self::with_config(
            provider,
            tools,
            store,
            breakers,
            RunnerConfig::default(),
            &ResilienceConfig::default(),
        )
    }

    /// Create a runner with custom configuration
    pub fn with_config(
        provider: Arc<dyn ProviderClient>,
        tools: ToolRegistry,
        store: Arc<dyn ConversationStore>,
        breakers: Arc<BreakerRegistry>,
        config: RunnerConfig,
        resilience: &ResilienceConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            store,
            retry: RetryPolicy::new(RetryConfig::from(resilience), breakers),
            tracker: TokenBudgetTracker::new(),
            config,
        }
    }

    /// Replace the token tracker (to register prompt sections)
    pub fn with_tracker(mut self, tracker: TokenBudgetTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// The shared breaker registry
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        self.retry.breakers()
    }

    /// Drive one conversation turn, producing the run's event stream.
    ///
    /// The stream is lazy and non-restartable; it ends after a terminal
    /// event or after cancellation is observed.
    pub fn run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> impl Stream<Item = AgentEvent> + Send + '_ {
        stream! {
            let started = Instant::now();
            let provider_name = self.provider.name().to_string();
            let mut budget = RetryBudget::new(self.config.session_retry_budget);
            let mut detector = LoopDetector::new(self.config.loop_protection);
            let mut iterations = 0u32;
            let mut tool_call_total = 0u32;

            let token_budget =
                self.tracker
                    .check_budget(&request.system_prompt, &provider_name, None);
            if self.config.debug {
                yield AgentEvent::DebugContext {
                    provider: provider_name.clone(),
                    model: self.config.model.clone(),
                    token_budget: token_budget.clone(),
                    token_breakdown: self.tracker.token_breakdown(&request.system_prompt, None),
                };
            }
            if token_budget.over_budget {
                tracing::warn!(
                    provider = %provider_name,
                    used = token_budget.used,
                    limit = token_budget.limit,
                    "prompt over token budget, refusing run"
                );
                let err = SleuthError::BudgetExceeded {
                    used: token_budget.used,
                    limit: token_budget.limit,
                };
                yield error_event(&provider_name, &err);
                return;
            }

            if let Err(e) = self
                .store
                .append_message(request.build_uuid, Message::user(&request.user_message))
                .await
            {
                yield error_event(&provider_name, &e);
                return;
            }
            let mut messages = match self
                .store
                .read_tail(request.build_uuid, self.config.history_tail)
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    yield error_event(&provider_name, &e);
                    return;
                }
            };

            let definitions = self.tools.definitions();

            loop {
                if cancel.is_cancelled() {
                    yield AgentEvent::Processing {
                        message: "Run cancelled".to_string(),
                    };
                    break;
                }

                iterations += 1;
                if iterations > self.config.loop_protection.max_iterations {
                    let err = SleuthError::LoopExceeded(format!(
                        "The iteration limit of {} was reached without a conclusion.",
                        self.config.loop_protection.max_iterations
                    ));
                    if self.config.debug {
                        yield self.metrics(iterations - 1, tool_call_total, &budget, started);
                    }
                    yield error_event(&provider_name, &err);
                    break;
                }

                let provider_request = ProviderRequest::new(
                    self.config.model.clone(),
                    messages.clone(),
                )
                .with_system(request.system_prompt.clone())
                .with_tools(definitions.clone())
                .with_max_tokens(self.config.max_response_tokens);

                // One outstanding provider call per run. A cancelled run
                // consumes no further retry budget.
                let result = tokio::select! {
                    _ = cancel.cancelled() => None,
                    result = self.retry.wrap_call(&provider_name, &mut budget, || {
                        self.provider.send(provider_request.clone())
                    }) => Some(result),
                };
                let response = match result {
                    None => {
                        yield AgentEvent::Processing {
                            message: "Run cancelled".to_string(),
                        };
                        break;
                    }
                    Some(Err(e)) => {
                        if self.config.debug {
                            yield self.metrics(iterations, tool_call_total, &budget, started);
                        }
                        yield error_event(&provider_name, &e);
                        break;
                    }
                    Some(Ok(response)) => response,
                };

                if !response.text.is_empty() {
                    yield AgentEvent::Chunk {
                        text: response.text.clone(),
                    };
                }

                let mut blocks = vec![];
                if !response.text.is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: response.text.clone(),
                    });
                }
                for call in &response.tool_calls {
                    blocks.push(ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    });
                }
                let assistant = Message::assistant_blocks(blocks);
                if let Err(e) = self
                    .store
                    .append_message(request.build_uuid, assistant.clone())
                    .await
                {
                    yield error_event(&provider_name, &e);
                    break;
                }
                messages.push(assistant);

                if response.is_final() {
                    if self.config.debug {
                        yield self.metrics(iterations, tool_call_total, &budget, started);
                    }
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    if self.config.structured_output {
                        let payload = serde_json::from_str(&response.text)
                            .unwrap_or_else(|_| serde_json::json!({ "text": response.text }));
                        yield AgentEvent::CompleteJson { payload, elapsed_ms };
                    } else {
                        yield AgentEvent::Complete { elapsed_ms };
                    }
                    break;
                }

                // Loop protection, consulted before any execution
                let mut violation = None;
                for call in &response.tool_calls {
                    detector.record_call(&call.name, &call.arguments, iterations);
                    tool_call_total += 1;
                    if tool_call_total > self.config.loop_protection.max_tool_calls {
                        violation = Some(SleuthError::LoopExceeded(format!(
                            "The tool-call limit of {} was reached.",
                            self.config.loop_protection.max_tool_calls
                        )));
                        break;
                    }
                    let repeats =
                        detector.count_repeated_calls(&call.name, &call.arguments, iterations);
                    if repeats > self.config.loop_protection.max_repeated_calls {
                        violation = Some(SleuthError::LoopExceeded(
                            detector.loop_hint(&call.name, &call.arguments),
                        ));
                        break;
                    }
                }
                if let Some(err) = violation {
                    tracing::warn!(provider = %provider_name, iteration = iterations, "loop protection abort");
                    if self.config.debug {
                        yield self.metrics(iterations, tool_call_total, &budget, started);
                    }
                    yield error_event(&provider_name, &err);
                    break;
                }

                yield AgentEvent::Processing {
                    message: format!("Executing {} tool call(s)", response.tool_calls.len()),
                };
                for call in &response.tool_calls {
                    yield AgentEvent::ToolCall {
                        id: call.id.clone(),
                        tool: call.name.clone(),
                        arguments: call.arguments.clone(),
                    };
                    if self.config.debug {
                        yield AgentEvent::DebugToolCall {
                            id: call.id.clone(),
                            tool: call.name.clone(),
                            arguments: call.arguments.clone(),
                            iteration: iterations,
                            repeats: detector.count_repeated_calls(
                                &call.name,
                                &call.arguments,
                                iterations,
                            ),
                        };
                    }
                }

                // Tool executions for one response run concurrently and all
                // complete before the next provider call.
                let outcomes: Vec<ToolOutcome> =
                    join_all(response.tool_calls.iter().map(|call| {
                        let cancel = cancel.clone();
                        async move {
                            match self.tools.get(&call.name) {
                                Some(tool) => tool.execute(call.arguments.clone(), &cancel).await,
                                None => {
                                    ToolOutcome::error(format!("Unknown tool: {}", call.name))
                                }
                            }
                        }
                    }))
                    .await;

                if cancel.is_cancelled() || outcomes.iter().any(|o| o.cancelled) {
                    yield AgentEvent::Processing {
                        message: "Run cancelled".to_string(),
                    };
                    break;
                }

                let mut result_blocks = vec![];
                for (call, outcome) in response.tool_calls.iter().zip(outcomes) {
                    for evidence in outcome.evidence.clone() {
                        yield AgentEvent::from(evidence);
                    }
                    if self.config.debug {
                        yield AgentEvent::DebugToolResult {
                            id: call.id.clone(),
                            tool: call.name.clone(),
                            success: outcome.success,
                            agent_content: outcome.agent_content.clone(),
                            error: outcome.error.clone(),
                            cancelled: outcome.cancelled,
                        };
                    }
                    result_blocks.push(ContentBlock::ToolResult {
                        tool_use_id: call.id.clone(),
                        content: outcome.agent_content,
                        is_error: if outcome.success { None } else { Some(true) },
                    });
                }
                let results = Message::tool_results(result_blocks);
                if let Err(e) = self
                    .store
                    .append_message(request.build_uuid, results.clone())
                    .await
                {
                    yield error_event(&provider_name, &e);
                    break;
                }
                messages.push(results);
            }
        }
    }

    fn metrics(
        &self,
        iterations: u32,
        tool_calls: u32,
        budget: &RetryBudget,
        started: Instant,
    ) -> AgentEvent {
        AgentEvent::DebugMetrics {
            iterations,
            tool_calls,
            retries_consumed: budget.consumed(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}
