//! Shared fakes for engine tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use concierge_core::error::{ProviderError, ToolError, UsageError};
use concierge_core::provider::{ContentBlock, Provider, ProviderRequest, ProviderResponse, TextSink, Usage};
use concierge_core::tool::{ToolContext, ToolHandler};
use concierge_core::usage::{MonthlyUsage, UsageRecord, UsageRecorder};

use crate::stream_event::StreamEvent;

/// A provider that replays a script of results and records every request.
///
/// Panics if called more often than the script allows.
pub struct ScriptedProvider {
    script: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replies(responses: Vec<ProviderResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            panic!("ScriptedProvider: no scripted result for call #{call}");
        }
        script.remove(0)
    }
}

/// A provider that takes `delay` to answer with a fixed text.
pub struct SlowProvider {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl SlowProvider {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Provider for SlowProvider {
    fn name(&self) -> &str {
        "slow"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(text_response("late answer"))
    }
}

/// A provider that streams its answer in the given fragments.
pub struct ChunkedProvider(pub Vec<&'static str>);

#[async_trait]
impl Provider for ChunkedProvider {
    fn name(&self) -> &str {
        "chunked"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Ok(text_response(&self.0.concat()))
    }

    async fn stream(&self, request: ProviderRequest, sink: TextSink) -> Result<ProviderResponse, ProviderError> {
        for chunk in &self.0 {
            let _ = sink.send((*chunk).to_string()).await;
        }
        self.complete(request).await
    }
}

pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        content: vec![ContentBlock::Text { text: text.into() }],
        usage: Usage {
            input_tokens: 100,
            output_tokens: 20,
        },
        model: "mock-model".into(),
        stop_reason: Some("end_turn".into()),
    }
}

pub fn tool_response(preamble: Option<&str>, calls: &[(&str, &str, serde_json::Value)]) -> ProviderResponse {
    let mut content = Vec::new();
    if let Some(text) = preamble {
        content.push(ContentBlock::Text { text: text.into() });
    }
    for (id, name, input) in calls {
        content.push(ContentBlock::ToolUse {
            id: (*id).into(),
            name: (*name).into(),
            input: input.clone(),
        });
    }
    ProviderResponse {
        content,
        usage: Usage {
            input_tokens: 120,
            output_tokens: 30,
        },
        model: "mock-model".into(),
        stop_reason: Some("tool_use".into()),
    }
}

/// Usage recorder that keeps records in memory and reports a fixed month.
pub struct RecordingUsage {
    records: Mutex<Vec<UsageRecord>>,
    monthly: MonthlyUsage,
}

impl RecordingUsage {
    pub fn new() -> Self {
        Self::with_monthly(MonthlyUsage::new(0.0, 50.0))
    }

    pub fn with_monthly(monthly: MonthlyUsage) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            monthly,
        }
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsageRecorder for RecordingUsage {
    async fn record(&self, record: UsageRecord) -> Result<(), UsageError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    async fn current_monthly_usage(&self) -> Result<MonthlyUsage, UsageError> {
        Ok(self.monthly)
    }
}

/// Tool returning a fixed value.
pub struct StaticTool {
    pub name: &'static str,
    pub output: serde_json::Value,
}

#[async_trait]
impl ToolHandler for StaticTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "returns a canned result"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _input: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        Ok(self.output.clone())
    }
}

/// Tool that always fails.
pub struct BrokenTool(pub &'static str);

#[async_trait]
impl ToolHandler for BrokenTool {
    fn name(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "always fails"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _input: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: self.0.into(),
            reason: "backend unreachable".into(),
        })
    }
}

/// Tool that takes `delay` before answering.
pub struct SlowTool {
    pub name: &'static str,
    pub delay: Duration,
}

#[async_trait]
impl ToolHandler for SlowTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "answers slowly"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _input: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(serde_json::json!({"done": true}))
    }
}

/// Drain a finished receiver into a list of events.
pub async fn collect(mut rx: tokio::sync::mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn event_names(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::event_type).collect()
}
