//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Base64 `document` and `image` content blocks
//! - 429 and 529 mapped to the rate-limit class
//! - SSE streaming (`content_block_delta` / `text_delta`) folded back into
//!   a complete response

use async_trait::async_trait;
use concierge_config::AppConfig;
use concierge_core::error::ProviderError;
use concierge_core::message::Role;
use concierge_core::provider::*;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with the given request timeout.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> std::result::Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Build from application config. Fails when no API key is configured.
    pub fn from_config(config: &AppConfig) -> std::result::Result<Self, ProviderError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ProviderError::NotConfigured("No API key: set CONCIERGE_API_KEY or ANTHROPIC_API_KEY".into())
        })?;
        Ok(Self::new(api_key, Duration::from_secs(config.provider.timeout_secs))?
            .with_base_url(&config.provider.base_url))
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert wire messages to Anthropic content blocks.
    fn to_api_messages(messages: &[WireMessage]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .map(|msg| AnthropicMessage {
                role: match msg.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                },
                content: match &msg.content {
                    WireContent::Text(text) => AnthropicContent::Text(text.clone()),
                    WireContent::Parts(parts) => {
                        AnthropicContent::Blocks(parts.iter().map(Self::to_api_block).collect())
                    }
                },
            })
            .collect()
    }

    fn to_api_block(part: &ContentPart) -> ApiBlock {
        match part {
            ContentPart::Text { text } => ApiBlock::Text { text: text.clone() },
            ContentPart::Document { media_type, data } => ApiBlock::Document {
                source: Base64Source::new(media_type, data),
            },
            ContentPart::Image { media_type, data } => ApiBlock::Image {
                source: Base64Source::new(media_type, data),
            },
            ContentPart::ToolUse { id, name, input } => ApiBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            },
            ContentPart::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => ApiBlock::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: content.clone(),
                is_error: *is_error,
            },
        }
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        if let Some(ref sys) = request.system {
            body["system"] = serde_json::json!(sys);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    /// Map a non-success HTTP status to a provider error.
    fn status_error(status: u16, retry_after: Option<u64>, body: String) -> ProviderError {
        match status {
            429 => ProviderError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            },
            529 => ProviderError::Overloaded(body),
            401 | 403 => ProviderError::AuthenticationFailed("Invalid Anthropic API key".into()),
            404 => ProviderError::ModelNotFound(body),
            _ => ProviderError::ApiError {
                status_code: status,
                message: body,
            },
        }
    }

    /// POST a Messages API body. Non-200 answers become provider errors.
    async fn send(&self, body: &Value) -> std::result::Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let streaming = body["stream"].as_bool().unwrap_or(false);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", if streaming { "text/event-stream" } else { "application/json" })
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(Self::status_error(status, retry_after, error_body));
        }

        Ok(response)
    }

    /// Convert Anthropic API response to our ProviderResponse.
    fn response_to_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let content = resp
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(ContentBlock::Text { text }),
                ResponseContentBlock::ToolUse { id, name, input } => Some(ContentBlock::ToolUse { id, name, input }),
                ResponseContentBlock::Other => None,
            })
            .collect();

        ProviderResponse {
            content,
            usage: Usage {
                input_tokens: resp.usage.input_tokens,
                output_tokens: resp.usage.output_tokens,
            },
            model: resp.model,
            stop_reason: resp.stop_reason,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::build_body(&request);

        debug!(
            provider = "anthropic",
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let response = self.send(&body).await?;
        let api_resp: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse Anthropic response: {e}")))?;

        Ok(Self::response_to_provider_response(api_resp))
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        sink: TextSink,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let mut body = Self::build_body(&request);
        body["stream"] = serde_json::json!(true);

        debug!(
            provider = "anthropic",
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let response = self.send(&body).await?;
        let mut bytes = response.bytes_stream();
        let mut lines = SseLines::default();
        let mut acc = StreamAccumulator::default();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(format!("Stream interrupted: {e}"))
                }
            })?;

            for data in lines.push(&chunk) {
                let event: Value = match serde_json::from_str(&data) {
                    Ok(v) => v,
                    Err(e) => {
                        trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                        continue;
                    }
                };
                if let Some(text) = acc.apply(&event)?
                    && sink.send(text).await.is_err()
                {
                    return Err(ProviderError::Cancelled);
                }
            }

            if acc.stopped {
                break;
            }
        }

        acc.finish()
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = serde_json::json!({
            "model": "claude-3-5-haiku-latest",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        // 200 = works, 401 = bad key, anything else = reachable but error
        Ok(response.status().is_success() || response.status().as_u16() != 401)
    }
}

// --- Streaming ---

/// Splits a byte stream into SSE `data:` payloads, holding back partial lines.
#[derive(Debug, Default)]
struct SseLines {
    buffer: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(data) = line.trim_end().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }
}

#[derive(Debug)]
enum PartialBlock {
    Text(String),
    ToolUse { id: String, name: String, json: String },
    /// Thinking and other blocks we do not consume
    Skipped,
}

/// Folds Messages API stream events back into a complete response.
#[derive(Debug, Default)]
struct StreamAccumulator {
    model: String,
    blocks: Vec<PartialBlock>,
    usage: Usage,
    stop_reason: Option<String>,
    forwarded: bool,
    stopped: bool,
}

impl StreamAccumulator {
    /// Apply one event. Returns text that should be forwarded now.
    fn apply(&mut self, event: &Value) -> std::result::Result<Option<String>, ProviderError> {
        let text = match event["type"].as_str().unwrap_or_default() {
            "message_start" => {
                let message = &event["message"];
                if let Some(model) = message["model"].as_str() {
                    self.model = model.to_string();
                }
                self.usage.input_tokens = message["usage"]["input_tokens"].as_u64().unwrap_or(0);
                self.usage.output_tokens = message["usage"]["output_tokens"].as_u64().unwrap_or(0);
                None
            }
            "content_block_start" => {
                let block = &event["content_block"];
                match block["type"].as_str() {
                    Some("text") => {
                        let text = block["text"].as_str().unwrap_or_default().to_string();
                        self.blocks.push(PartialBlock::Text(text.clone()));
                        Some(text)
                    }
                    Some("tool_use") => {
                        self.blocks.push(PartialBlock::ToolUse {
                            id: block["id"].as_str().unwrap_or_default().to_string(),
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                            json: String::new(),
                        });
                        None
                    }
                    _ => {
                        self.blocks.push(PartialBlock::Skipped);
                        None
                    }
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match (self.blocks.last_mut(), delta["type"].as_str()) {
                    (Some(PartialBlock::Text(text)), Some("text_delta")) => {
                        let chunk = delta["text"].as_str().unwrap_or_default();
                        text.push_str(chunk);
                        Some(chunk.to_string())
                    }
                    (Some(PartialBlock::ToolUse { json, .. }), Some("input_json_delta")) => {
                        json.push_str(delta["partial_json"].as_str().unwrap_or_default());
                        None
                    }
                    _ => None,
                }
            }
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                if let Some(output) = event["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = output;
                }
                None
            }
            "message_stop" => {
                self.stopped = true;
                None
            }
            "error" => {
                let kind = event["error"]["type"].as_str().unwrap_or("error");
                let message = event["error"]["message"].as_str().unwrap_or_default().to_string();
                // Retrying is only safe while nothing has reached the caller.
                if kind == "overloaded_error" && !self.forwarded {
                    return Err(ProviderError::Overloaded(message));
                }
                return Err(ProviderError::InvalidResponse(format!("Stream failed ({kind}): {message}")));
            }
            _ => None,
        };

        let text = text.filter(|t| !t.is_empty());
        if text.is_some() {
            self.forwarded = true;
        }
        Ok(text)
    }

    fn finish(self) -> std::result::Result<ProviderResponse, ProviderError> {
        if !self.stopped {
            return Err(ProviderError::Network("Stream ended before message_stop".into()));
        }

        let mut content = Vec::with_capacity(self.blocks.len());
        for block in self.blocks {
            match block {
                PartialBlock::Text(text) => content.push(ContentBlock::Text { text }),
                PartialBlock::ToolUse { id, name, json } => {
                    let input = if json.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&json).map_err(|e| {
                            ProviderError::InvalidResponse(format!("Malformed input for tool '{name}': {e}"))
                        })?
                    };
                    content.push(ContentBlock::ToolUse { id, name, input });
                }
                PartialBlock::Skipped => {}
            }
        }

        Ok(ProviderResponse {
            content,
            usage: self.usage,
            model: self.model,
            stop_reason: self.stop_reason,
        })
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ApiBlock>),
}

#[derive(Debug, Serialize)]
struct Base64Source {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: String,
    data: String,
}

impl Base64Source {
    fn new(media_type: &str, data: &str) -> Self {
        Self {
            kind: "base64",
            media_type: media_type.to_string(),
            data: data.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBlock {
    Text {
        text: String,
    },
    Document {
        source: Base64Source,
    },
    Image {
        source: Base64Source,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Thinking and any block types we do not consume.
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new("sk-ant-test", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn constructor() {
        let provider = provider();
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn constructor_with_base_url() {
        let provider = provider().with_base_url("https://custom.proxy.com/");
        assert_eq!(provider.base_url, "https://custom.proxy.com");
    }

    #[test]
    fn from_config_requires_key() {
        let config = AppConfig::default();
        assert!(matches!(
            AnthropicProvider::from_config(&config),
            Err(ProviderError::NotConfigured(_))
        ));

        let config = AppConfig {
            api_key: Some("sk-ant-test".into()),
            ..AppConfig::default()
        };
        assert!(AnthropicProvider::from_config(&config).is_ok());
    }

    #[test]
    fn plain_text_message_stays_a_string() {
        let api_msgs = AnthropicProvider::to_api_messages(&[
            WireMessage::text(Role::User, "Hello"),
            WireMessage::text(Role::Assistant, "Hi!"),
        ]);
        let json = serde_json::to_value(&api_msgs).unwrap();
        assert_eq!(json[0]["role"], "user");
        assert_eq!(json[0]["content"], "Hello");
        assert_eq!(json[1]["role"], "assistant");
    }

    #[test]
    fn document_part_uses_base64_source() {
        let api_msgs = AnthropicProvider::to_api_messages(&[WireMessage::parts(
            Role::User,
            vec![
                ContentPart::Document {
                    media_type: "application/pdf".into(),
                    data: "JVBERi0xLjQ=".into(),
                },
                ContentPart::Text {
                    text: "Summarize this".into(),
                },
            ],
        )]);
        let json = serde_json::to_value(&api_msgs).unwrap();
        let blocks = &json[0]["content"];
        assert_eq!(blocks[0]["type"], "document");
        assert_eq!(blocks[0]["source"]["type"], "base64");
        assert_eq!(blocks[0]["source"]["media_type"], "application/pdf");
        assert_eq!(blocks[0]["source"]["data"], "JVBERi0xLjQ=");
        assert_eq!(blocks[1]["type"], "text");
    }

    #[test]
    fn tool_result_error_flag_only_when_set() {
        let api_msgs = AnthropicProvider::to_api_messages(&[WireMessage::parts(
            Role::User,
            vec![
                ContentPart::ToolResult {
                    tool_use_id: "toolu_1".into(),
                    content: "{\"ok\":true}".into(),
                    is_error: false,
                },
                ContentPart::ToolResult {
                    tool_use_id: "toolu_2".into(),
                    content: "{\"error\":\"not found\"}".into(),
                    is_error: true,
                },
            ],
        )]);
        let json = serde_json::to_value(&api_msgs).unwrap();
        let blocks = &json[0]["content"];
        assert_eq!(blocks[0]["type"], "tool_result");
        assert!(blocks[0].get("is_error").is_none());
        assert_eq!(blocks[1]["is_error"], true);
    }

    #[test]
    fn body_includes_system_and_tools() {
        let request = ProviderRequest {
            model: "claude-3-5-haiku-latest".into(),
            system: Some("Be brief".into()),
            messages: vec![WireMessage::text(Role::User, "hi")],
            max_tokens: 512,
            temperature: 0.3,
            tools: vec![ToolDefinition {
                name: "list_projects".into(),
                description: "List projects".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }],
        };
        let body = AnthropicProvider::build_body(&request);
        assert_eq!(body["system"], "Be brief");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["tools"][0]["name"], "list_projects");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            AnthropicProvider::status_error(429, Some(12), String::new()),
            ProviderError::RateLimited { retry_after_secs: 12 }
        ));
        assert!(AnthropicProvider::status_error(529, None, "overloaded".into()).is_rate_limit());
        assert!(matches!(
            AnthropicProvider::status_error(401, None, String::new()),
            ProviderError::AuthenticationFailed(_)
        ));
        let other = AnthropicProvider::status_error(500, None, "boom".into());
        assert!(!other.is_rate_limit());
        assert!(matches!(other, ProviderError::ApiError { status_code: 500, .. }));
    }

    #[test]
    fn parse_tool_use_response_keeps_order() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "id": "msg_02",
                "model": "claude-sonnet-4-20250514",
                "content": [
                    {"type": "text", "text": "Let me look that up"},
                    {"type": "tool_use", "id": "toolu_abc", "name": "search_clients", "input": {"query": "ACME"}}
                ],
                "usage": {"input_tokens": 20, "output_tokens": 10},
                "stop_reason": "tool_use"
            }"#,
        )
        .unwrap();

        let pr = AnthropicProvider::response_to_provider_response(resp);
        assert_eq!(pr.content.len(), 2);
        assert!(matches!(&pr.content[0], ContentBlock::Text { text } if text == "Let me look that up"));
        match &pr.content[1] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "toolu_abc");
                assert_eq!(name, "search_clients");
                assert_eq!(input["query"], "ACME");
            }
            other => panic!("Expected tool_use block, got {other:?}"),
        }
        assert_eq!(pr.usage.input_tokens + pr.usage.output_tokens, 30);
        assert_eq!(pr.stop_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn parse_thinking_response_skips_thinking() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "id": "msg_03",
                "model": "claude-sonnet-4-20250514",
                "content": [
                    {"type": "thinking", "thinking": "I need to consider...", "signature": "abc"},
                    {"type": "text", "text": "Here's my answer."}
                ],
                "usage": {"input_tokens": 15, "output_tokens": 25}
            }"#,
        )
        .unwrap();

        let pr = AnthropicProvider::response_to_provider_response(resp);
        assert_eq!(pr.content.len(), 1);
        assert!(matches!(&pr.content[0], ContentBlock::Text { text } if text == "Here's my answer."));
    }

    fn fold(events: &[Value]) -> (Vec<String>, std::result::Result<ProviderResponse, ProviderError>) {
        let mut acc = StreamAccumulator::default();
        let mut forwarded = Vec::new();
        for event in events {
            match acc.apply(event) {
                Ok(Some(text)) => forwarded.push(text),
                Ok(None) => {}
                Err(e) => return (forwarded, Err(e)),
            }
        }
        (forwarded, acc.finish())
    }

    #[test]
    fn stream_events_fold_into_response() {
        let events = vec![
            serde_json::json!({"type": "message_start", "message": {"model": "claude-sonnet-4-20250514", "usage": {"input_tokens": 42, "output_tokens": 1}}}),
            serde_json::json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            serde_json::json!({"type": "ping"}),
            serde_json::json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Let me "}}),
            serde_json::json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "check."}}),
            serde_json::json!({"type": "content_block_stop", "index": 0}),
            serde_json::json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "list_projects", "input": {}}}),
            serde_json::json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"status\": "}}),
            serde_json::json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "\"open\"}"}}),
            serde_json::json!({"type": "content_block_stop", "index": 1}),
            serde_json::json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 17}}),
            serde_json::json!({"type": "message_stop"}),
        ];

        let (forwarded, response) = fold(&events);
        let response = response.unwrap();
        assert_eq!(forwarded, vec!["Let me ", "check."]);
        assert_eq!(response.model, "claude-sonnet-4-20250514");
        assert_eq!(response.usage.input_tokens, 42);
        assert_eq!(response.usage.output_tokens, 17);
        assert_eq!(response.stop_reason.as_deref(), Some("tool_use"));
        assert!(matches!(&response.content[0], ContentBlock::Text { text } if text == "Let me check."));
        match &response.content[1] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "toolu_1");
                assert_eq!(name, "list_projects");
                assert_eq!(input["status"], "open");
            }
            other => panic!("Expected tool_use block, got {other:?}"),
        }
    }

    #[test]
    fn tool_use_without_input_gets_empty_object() {
        let (_, response) = fold(&[
            serde_json::json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": "t", "name": "ping", "input": {}}}),
            serde_json::json!({"type": "message_stop"}),
        ]);
        match &response.unwrap().content[0] {
            ContentBlock::ToolUse { input, .. } => assert_eq!(input, &serde_json::json!({})),
            other => panic!("Expected tool_use block, got {other:?}"),
        }
    }

    #[test]
    fn overload_before_text_is_retryable() {
        let (_, response) = fold(&[serde_json::json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})]);
        assert!(response.unwrap_err().is_rate_limit());
    }

    #[test]
    fn overload_after_text_is_not_retried() {
        let (forwarded, response) = fold(&[
            serde_json::json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            serde_json::json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Half"}}),
            serde_json::json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        ]);
        assert_eq!(forwarded, vec!["Half"]);
        let err = response.unwrap_err();
        assert!(!err.is_rate_limit());
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let (_, response) = fold(&[serde_json::json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}})]);
        assert!(matches!(response, Err(ProviderError::Network(_))));
    }

    #[test]
    fn sse_lines_hold_partial_input() {
        let mut lines = SseLines::default();
        assert!(lines.push(b"event: ping\ndata: {\"type\":").is_empty());
        let payloads = lines.push(b"\"ping\"}\r\n\n: comment\ndata: {}\n");
        assert_eq!(payloads, vec![r#"{"type":"ping"}"#, "{}"]);
    }

    #[test]
    fn sse_lines_keep_multibyte_chars_split_across_chunks() {
        let mut lines = SseLines::default();
        let bytes = "data: {\"text\":\"café\"}\n".as_bytes();
        let split = bytes.len() - 4;
        assert!(lines.push(&bytes[..split]).is_empty());
        assert_eq!(lines.push(&bytes[split..]), vec![r#"{"text":"café"}"#]);
    }
}
