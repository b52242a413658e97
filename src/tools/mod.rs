// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool capability model
//!
//! A tool is data (name, description, parameter schema, safety level,
//! category) plus an execution handler. The concrete tool catalog (GitHub
//! edits, Kubernetes queries, build logs) lives outside this crate; here we
//! define the contract the orchestration loop executes against.

pub mod schema;

pub use schema::SchemaBuilder;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::llm::provider::{ToolDefinition, ToolInputSchema};

/// How much damage a tool can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    /// Reads state, changes nothing
    ReadOnly,
    /// Mutates the preview environment or repository
    Mutating,
    /// Can destroy state; requires explicit operator opt-in
    Destructive,
}

/// Broad grouping used for filtering and display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Repository and pull-request inspection/edits
    Repository,
    /// Kubernetes resources in the preview namespace
    Kubernetes,
    /// CI/build pipeline queries
    Build,
    /// General diagnostics
    Diagnostics,
}

/// A structured citation gathered by a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    /// An excerpt from logs
    Log { source: String, excerpt: String },
    /// An excerpt from a file
    File { path: String, excerpt: String },
    /// Observed state of a deployment
    Deployment { name: String, status: String },
}

/// Result of one tool execution
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Whether the tool completed its work
    pub success: bool,

    /// Content handed back to the model
    pub agent_content: String,

    /// Error detail when `success` is false
    pub error: Option<String>,

    /// The execution was cut short by cancellation
    pub cancelled: bool,

    /// Citations gathered during execution
    pub evidence: Vec<Evidence>,
}

impl ToolOutcome {
    /// Successful outcome
    pub fn ok(agent_content: impl Into<String>) -> Self {
        Self {
            success: true,
            agent_content: agent_content.into(),
            error: None,
            cancelled: false,
            evidence: vec![],
        }
    }

    /// Failed outcome
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            agent_content: format!("Error: {}", message),
            error: Some(message),
            cancelled: false,
            evidence: vec![],
        }
    }

    /// Outcome for a cancelled execution
    pub fn cancelled() -> Self {
        Self {
            success: false,
            agent_content: "Cancelled".to_string(),
            error: None,
            cancelled: true,
            evidence: vec![],
        }
    }

    /// Attach evidence
    pub fn with_evidence(mut self, evidence: Vec<Evidence>) -> Self {
        self.evidence = evidence;
        self
    }
}

/// Execution half of a tool.
///
/// Implementations must observe the cancellation token at their own await
/// points and return `ToolOutcome::cancelled()` promptly instead of
/// finishing normal work. Executions must be safe to invoke repeatedly;
/// loop-detection accounting assumes re-invocation has no hidden cost.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, args: serde_json::Value, cancel: &CancellationToken) -> ToolOutcome;
}

/// A tool: capability metadata plus its handler
#[derive(Clone)]
pub struct Tool {
    /// Name the model calls the tool by
    pub name: String,

    /// Description shown to the model
    pub description: String,

    /// JSON Schema of the call arguments
    pub parameters: ToolInputSchema,

    /// Damage class
    pub safety_level: SafetyLevel,

    /// Grouping
    pub category: ToolCategory,

    handler: Arc<dyn ToolHandler>,
}

impl Tool {
    /// Create a tool
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolInputSchema,
        safety_level: SafetyLevel,
        category: ToolCategory,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            safety_level,
            category,
            handler,
        }
    }

    /// Definition as presented to the provider
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.parameters.clone(),
        }
    }

    /// Execute the tool, honoring cancellation
    pub async fn execute(&self, args: serde_json::Value, cancel: &CancellationToken) -> ToolOutcome {
        if cancel.is_cancelled() {
            return ToolOutcome::cancelled();
        }
        self.handler.execute(args, cancel).await
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("safety_level", &self.safety_level)
            .field("category", &self.category)
            .finish()
    }
}

/// Registry of tools available to one agent run
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous tool of the same name
    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// Definitions for the provider, sorted by name for stable prompts
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<_> = self.tools.values().map(Tool::definition).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
