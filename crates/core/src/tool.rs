//! Tool handlers: the business capabilities the model may invoke.
//!
//! Handlers are registered by name. The engine looks them up when the
//! model emits a tool-use block and never exposes tools that the
//! relevance filter excludes for the current request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ToolError;
use crate::identity::CallerIdentity;
use crate::message::SessionId;
use crate::provider::ToolDefinition;

/// Caller-scoped context handed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub caller: CallerIdentity,
    pub session_id: SessionId,
    /// Domain correlation id supplied with the request (e.g. a project id)
    pub correlation_id: Option<String>,
}

/// The uniform handler interface: structured input in, structured result out.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// The unique name of this tool (e.g., "create_quotation").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A keyword-triggered set of tools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolGroup {
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub tools: Vec<String>,

    /// Expose this group whenever the request carries a correlation id
    #[serde(default)]
    pub when_correlated: bool,
}

/// Fixed relevance filter over tool names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolFilter {
    /// Tools exposed on every request
    #[serde(default)]
    pub always: Vec<String>,

    #[serde(default)]
    pub groups: Vec<ToolGroup>,
}

impl ToolFilter {
    pub fn is_empty(&self) -> bool {
        self.always.is_empty() && self.groups.is_empty()
    }

    /// Tool names relevant to a request with the given text.
    pub fn select(&self, text: &str, correlated: bool) -> Vec<&str> {
        let lowered = text.to_lowercase();
        let mut names: Vec<&str> = self.always.iter().map(String::as_str).collect();
        for group in &self.groups {
            let hit = (correlated && group.when_correlated)
                || group.keywords.iter().any(|k| lowered.contains(&k.to_lowercase()));
            if hit {
                names.extend(group.tools.iter().map(String::as_str));
            }
        }
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// A registry of tool handlers keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ToolHandler>>,
    filter: ToolFilter,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: ToolFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Register a handler. Replaces any existing handler with the same name.
    pub fn register(&mut self, tool: Arc<dyn ToolHandler>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// All tool definitions, ordered by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Definitions of the tools relevant to one request.
    ///
    /// An empty filter exposes everything. Names the filter mentions but
    /// nobody registered are ignored.
    pub fn relevant_definitions(&self, text: &str, correlated: bool) -> Vec<ToolDefinition> {
        if self.filter.is_empty() {
            return self.definitions();
        }
        self.filter
            .select(text, correlated)
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.to_definition())
            .collect()
    }

    /// Execute a tool by name. An unknown name is a typed lookup failure.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(input, ctx).await
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
