//! HTTP-forwarding tool handler.
//!
//! The backend receives `POST {tool, input, context}` and answers with a
//! JSON body that becomes the tool result. Non-2xx answers are tool
//! errors the model gets to see.

use async_trait::async_trait;
use concierge_config::HttpToolConfig;
use concierge_core::error::ToolError;
use concierge_core::tool::{ToolContext, ToolHandler};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest backend error body echoed back into the tool error.
const MAX_ERROR_BODY: usize = 500;

pub struct BackendTool {
    name: String,
    description: String,
    parameters: serde_json::Value,
    endpoint: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl BackendTool {
    pub fn from_config(config: &HttpToolConfig) -> Result<Self, ToolError> {
        if !config.endpoint.starts_with("http://") && !config.endpoint.starts_with("https://") {
            return Err(ToolError::InvalidArguments(format!(
                "Tool '{}' endpoint must start with http:// or https://",
                config.name
            )));
        }

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: config.name.clone(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            name: config.name.clone(),
            description: config.description.clone(),
            parameters: config.parameters.clone(),
            endpoint: config.endpoint.clone(),
            timeout,
            client,
        })
    }

    fn failed(&self, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ToolHandler for BackendTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.parameters.clone()
    }

    async fn execute(&self, input: serde_json::Value, ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        if !input.is_object() {
            return Err(ToolError::InvalidArguments(format!(
                "Tool '{}' expects a JSON object input",
                self.name
            )));
        }

        let payload = serde_json::json!({
            "tool": self.name,
            "input": input,
            "context": {
                "user_id": ctx.caller.user_id,
                "session_id": ctx.session_id.as_str(),
                "correlation_id": ctx.correlation_id,
            }
        });

        debug!(tool = %self.name, endpoint = %self.endpoint, "Forwarding tool call");

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Concierge-User", &ctx.caller.user_id)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout {
                        tool_name: self.name.clone(),
                        timeout_secs: self.timeout.as_secs(),
                    }
                } else {
                    self.failed(format!("backend unreachable: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.failed(format!("failed to read backend response: {e}")))?;

        if !status.is_success() {
            warn!(tool = %self.name, status = status.as_u16(), "Backend rejected tool call");
            let excerpt: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(self.failed(format!("backend returned {}: {excerpt}", status.as_u16())));
        }

        Ok(serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body)))
    }
}
