//! Tool trait: the abstraction over agent capabilities.
//!
//! The set of tools is closed: every tool is a [`ToolKind`] variant, and a
//! [`ToolRegistry`] maps each kind to its handler. The registry is checked
//! once at startup so a missing handler is a configuration error instead of
//! a runtime surprise.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::ToolError;
use crate::provider::{ExecutionMode, ToolDefinition};

/// Every tool the research assistant can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolKind {
    #[serde(rename = "webSearch")]
    WebSearch,
    #[serde(rename = "getUserTimezone")]
    GetUserTimezone,
}

impl ToolKind {
    pub const ALL: [ToolKind; 2] = [ToolKind::WebSearch, ToolKind::GetUserTimezone];

    /// The wire name the model uses.
    pub fn name(self) -> &'static str {
        match self {
            Self::WebSearch => "webSearch",
            Self::GetUserTimezone => "getUserTimezone",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a server-side tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Structured output
    pub output: serde_json::Value,
}

/// The core Tool trait.
///
/// Implementations hold no session state: execution is a function of the
/// input plus whatever external service the tool calls.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Which variant of the closed tool set this handler serves.
    fn kind(&self) -> ToolKind;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Server-executed by default.
    fn execution(&self) -> ExecutionMode {
        ExecutionMode::Server
    }

    /// Check that `input` conforms to the tool's input schema.
    fn validate(&self, input: &serde_json::Value) -> Result<(), ToolError>;

    /// Run the tool body on already-validated input.
    async fn execute(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// A registry of available tools.
///
/// The orchestrator uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Validate and execute tools when the LLM requests them
pub struct ToolRegistry {
    tools: HashMap<ToolKind, Box<dyn Tool>>,
    requires_approval: HashSet<ToolKind>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            requires_approval: HashSet::new(),
        }
    }

    /// Register a tool. Replaces any existing handler for the same kind.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.kind(), tool);
    }

    /// Gate a tool behind an approval round trip.
    pub fn require_approval(&mut self, kind: ToolKind) {
        self.requires_approval.insert(kind);
    }

    pub fn needs_approval(&self, kind: ToolKind) -> bool {
        self.requires_approval.contains(&kind)
    }

    /// Ensure every [`ToolKind`] has a handler.
    pub fn validate(&self) -> Result<(), crate::Error> {
        let missing: Vec<&str> = ToolKind::ALL
            .iter()
            .filter(|k| !self.tools.contains_key(k))
            .map(|k| k.name())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::Config {
                message: format!("no handler registered for tools: {}", missing.join(", ")),
            })
        }
    }

    /// Get a tool by kind.
    pub fn get(&self, kind: ToolKind) -> Option<&dyn Tool> {
        self.tools.get(&kind).map(|t| t.as_ref())
    }

    /// Resolve a model-supplied tool name.
    pub fn resolve(&self, name: &str) -> Result<ToolKind, ToolError> {
        ToolKind::from_name(name)
            .filter(|k| self.tools.contains_key(k))
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Get all tool definitions (for sending to the LLM), in stable order.
    pub fn describe(&self) -> Vec<ToolDefinition> {
        ToolKind::ALL
            .iter()
            .filter_map(|k| self.tools.get(k))
            .map(|t| ToolDefinition {
                name: t.kind().name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
                execution: t.execution(),
                requires_approval: self.needs_approval(t.kind()),
            })
            .collect()
    }

    /// Validate the call's input against the tool's schema, then execute.
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let kind = self.resolve(&call.name)?;
        let tool = self
            .tools
            .get(&kind)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        tool.validate(&call.arguments)?;
        if tool.execution() == ExecutionMode::Client {
            return Err(ToolError::ClientFulfilled(call.name.clone()));
        }

        let output = tool.execute(call.arguments.clone()).await?;
        Ok(ToolResult {
            call_id: call.id.clone(),
            output,
        })
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&'static str> {
        ToolKind::ALL
            .iter()
            .filter(|k| self.tools.contains_key(k))
            .map(|k| k.name())
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
