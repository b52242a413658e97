// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider client abstraction
//!
//! The engine never speaks a vendor wire format. A `ProviderClient` takes a
//! request and either returns a response or a `ProviderError` carrying
//! enough status information for classification.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::llm::message::Message;

/// Client for one LLM provider
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Provider name (e.g., "anthropic", "openai", "gemini")
    fn name(&self) -> &str;

    /// Send a completion request
    async fn send(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;
}

/// Request for one provider call
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Model to use
    pub model: String,

    /// System prompt
    pub system: Option<String>,

    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// Tools available for the model to use
    pub tools: Vec<ToolDefinition>,

    /// Maximum tokens in response
    pub max_tokens: u32,
}

impl ProviderRequest {
    /// Create a new request
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages,
            tools: vec![],
            max_tokens: 4096,
        }
    }

    /// Set the system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set tools
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Response from a provider call
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Text content of the response
    pub text: String,

    /// Tool calls the model wants executed; empty means the turn is done
    pub tool_calls: Vec<ToolInvocation>,

    /// Token usage reported by the provider
    pub usage: Usage,
}

impl ProviderResponse {
    /// Whether the model is done (no further tool calls requested)
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Provider-assigned call id
    pub id: String,

    /// Tool name
    pub name: String,

    /// Call arguments (JSON object)
    pub arguments: serde_json::Value,
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens
    pub input_tokens: u32,
    /// Output tokens
    pub output_tokens: u32,
}

impl Usage {
    /// Get total tokens used
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Tool definition as presented to the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,

    /// Tool description
    pub description: String,

    /// Input schema (JSON Schema)
    pub input_schema: ToolInputSchema,
}

/// Input schema for a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInputSchema {
    /// Schema type (always "object")
    #[serde(rename = "type")]
    pub schema_type: String,

    /// Property definitions
    pub properties: serde_json::Value,

    /// Required properties
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}
