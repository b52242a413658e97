// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock provider for testing
//!
//! A scripted implementation of `ProviderClient` that returns queued
//! responses and failures in order without making real API calls.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::ProviderError;
use crate::llm::provider::{
    ProviderClient, ProviderRequest, ProviderResponse, ToolInvocation, Usage,
};

/// One scripted step for the mock provider
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    /// Return a successful response
    Respond(MockResponse),
    /// Fail with a provider error
    Fail(ProviderError),
}

/// A pre-configured successful response
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    /// Text content to return
    pub text: String,
    /// Tool calls to return
    pub tool_calls: Vec<ToolInvocation>,
    /// Token usage to report
    pub usage: Usage,
}

impl MockResponse {
    /// A final text-only response
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// A response requesting a single tool call
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            tool_calls: vec![ToolInvocation {
                id: id.into(),
                name: name.into(),
                arguments,
            }],
            ..Default::default()
        }
    }

    /// Add another tool call to the response
    pub fn and_tool_call(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        self.tool_calls.push(ToolInvocation {
            id: id.into(),
            name: name.into(),
            arguments,
        });
        self
    }
}

/// A scripted mock provider
#[derive(Clone)]
pub struct MockProvider {
    name: String,
    script: Arc<Mutex<Vec<ScriptedStep>>>,
    call_count: Arc<AtomicUsize>,
    recorded_requests: Arc<Mutex<Vec<ProviderRequest>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a mock provider named "mock" with an empty script
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            script: Arc::new(Mutex::new(vec![])),
            call_count: Arc::new(AtomicUsize::new(0)),
            recorded_requests: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Create a mock provider with a custom name
    pub fn with_name(name: impl Into<String>) -> Self {
        let mut provider = Self::new();
        provider.name = name.into();
        provider
    }

    /// Queue a successful response
    pub fn respond(self, response: MockResponse) -> Self {
        self.push(ScriptedStep::Respond(response));
        self
    }

    /// Queue a final text response
    pub fn respond_text(self, text: impl Into<String>) -> Self {
        self.respond(MockResponse::text(text))
    }

    /// Queue a failure
    pub fn fail(self, error: ProviderError) -> Self {
        self.push(ScriptedStep::Fail(error));
        self
    }

    /// Queue the same failure n times
    pub fn fail_times(mut self, error: ProviderError, n: usize) -> Self {
        for _ in 0..n {
            self = self.fail(error.clone());
        }
        self
    }

    fn push(&self, step: ScriptedStep) {
        let mut script = match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("mock provider script lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        script.push(step);
    }

    /// Number of calls made so far
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests recorded in call order
    pub fn recorded_requests(&self) -> Vec<ProviderRequest> {
        match self.recorded_requests.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        {
            let mut recorded = match self.recorded_requests.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            recorded.push(request);
        }

        let step = {
            let mut script = match self.script.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if script.is_empty() {
                None
            } else {
                Some(script.remove(0))
            }
        };

        match step {
            Some(ScriptedStep::Respond(mock)) => Ok(ProviderResponse {
                text: mock.text,
                tool_calls: mock.tool_calls,
                usage: mock.usage,
            }),
            Some(ScriptedStep::Fail(error)) => Err(error),
            // Script exhausted: behave like a quiet final turn
            None => Ok(ProviderResponse {
                text: String::new(),
                tool_calls: vec![],
                usage: Usage::default(),
            }),
        }
    }
}
