//! Provider trait and wire format.
//!
//! A Provider knows how to send one round of a conversation to a
//! generative model and return the ordered content blocks it produced.
//! The wire types here are what ContextBuilder produces and what the
//! tool loop appends to between rounds. Text can also be forwarded as it
//! is generated through a [`TextSink`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Role;

/// One part of a multi-part wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// Base64 document (PDF and friends)
    Document {
        media_type: String,
        data: String,
    },
    /// Base64 image
    Image {
        media_type: String,
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// Content of a wire message: plain text, or ordered parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A message in provider wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: WireContent,
}

impl WireMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: WireContent::Text(text.into()),
        }
    }

    pub fn parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: WireContent::Parts(parts),
        }
    }
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,

    pub description: String,

    /// JSON Schema describing the tool's input
    pub parameters: serde_json::Value,
}

/// One provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "claude-sonnet-4-20250514")
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    pub messages: Vec<WireMessage>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Tools the model may call this round
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

fn default_temperature() -> f32 {
    0.3
}

/// A content block in a provider response, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

impl From<ContentBlock> for ContentPart {
    fn from(block: ContentBlock) -> Self {
        match block {
            ContentBlock::Text { text } => ContentPart::Text { text },
            ContentBlock::ToolUse { id, name, input } => ContentPart::ToolUse { id, name, input },
        }
    }
}

/// Token usage for one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: Vec<ContentBlock>,

    #[serde(default)]
    pub usage: Usage,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Receives text fragments while a response is still being generated.
pub type TextSink = tokio::sync::mpsc::Sender<String>;

/// The core Provider trait.
///
/// The tool loop calls `stream()` once per round without knowing which
/// backend is behind it. Preprocessing uses `complete()`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get the complete, ordered response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request, forwarding text to `sink` as it is produced.
    ///
    /// The returned response still carries every block in order. The
    /// default waits for `complete()` and forwards each text block whole.
    async fn stream(
        &self,
        request: ProviderRequest,
        sink: TextSink,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let response = self.complete(request).await?;
        for block in &response.content {
            if let ContentBlock::Text { text } = block
                && !text.is_empty()
                && sink.send(text.clone()).await.is_err()
            {
                break;
            }
        }
        Ok(response)
    }

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
