//! The multi-round generation loop.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use concierge_config::AppConfig;
use concierge_core::error::ProviderError;
use concierge_core::identity::CallerIdentity;
use concierge_core::message::{InvocationStatus, Message, Role, SessionId, ToolInvocation};
use concierge_core::provider::{
    ContentBlock, ContentPart, Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage,
    WireMessage,
};
use concierge_core::tool::{ToolContext, ToolRegistry};
use concierge_core::usage::{UsageCategory, UsageRecord, UsageRecorder};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::complexity::{ComplexityRouter, ModelSelection};
use crate::compressor::ResultCompressor;
use crate::context::ContextBuilder;
use crate::emitter::StreamEmitter;
use crate::preprocess::DocumentPreprocessor;
use crate::retry::RetryGovernor;
use crate::stream_event::{StatusPhase, StreamEvent};

/// Text fragments buffered between the provider and the emitter.
const TEXT_BUFFER: usize = 32;

/// Why a turn failed.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The client went away; nothing further was emitted.
    #[error("request cancelled")]
    Cancelled,
}

/// One turn of a conversation: the history plus the new user message last.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub messages: Vec<Message>,
    pub session_id: SessionId,
    pub caller: CallerIdentity,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A round produced no tool calls.
    Completed,
    /// The round cap was reached while the model still wanted tools.
    RoundLimit,
}

/// What a finished turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub text: String,
    pub invocations: Vec<ToolInvocation>,
    pub rounds: usize,
    pub selection: ModelSelection,
    pub stop: StopReason,
    pub usage: Usage,
    /// The user message as sent to the model, document summaries included.
    pub user_message: Message,
}

impl TurnOutcome {
    /// The assistant message to persist for this turn.
    pub fn assistant_message(&self) -> Message {
        Message::assistant(self.text.clone()).with_tool_invocations(self.invocations.clone())
    }
}

enum LoopState {
    Generating,
    ExecutingTools(Vec<ContentBlock>),
    Done(StopReason),
}

/// Drives generation to completion for one request.
///
/// Every event except `conversation_info` and `done` is emitted here;
/// those two belong to whoever owns the stream.
pub struct ToolLoopEngine {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    usage: Arc<dyn UsageRecorder>,
    router: ComplexityRouter,
    context: ContextBuilder,
    preprocessor: DocumentPreprocessor,
    governor: RetryGovernor,
    compressor: ResultCompressor,
    system_prompt: Option<String>,
    temperature: f32,
    max_rounds: usize,
    warn_at_percent: f64,
}

impl ToolLoopEngine {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        usage: Arc<dyn UsageRecorder>,
        config: &AppConfig,
    ) -> Self {
        let governor = RetryGovernor::from_config(&config.retry);
        let preprocessor = DocumentPreprocessor::new(
            provider.clone(),
            usage.clone(),
            governor.clone(),
            config.models.extraction.clone(),
        );
        let system_prompt = Some(config.engine.system_prompt.clone()).filter(|p| !p.trim().is_empty());
        Self {
            provider,
            tools,
            usage,
            router: ComplexityRouter::from_config(config),
            context: ContextBuilder::new(config.engine.history_window),
            preprocessor,
            governor,
            compressor: ResultCompressor::from_config(&config.compressor),
            system_prompt,
            temperature: config.engine.temperature,
            max_rounds: config.engine.max_tool_rounds.max(1),
            warn_at_percent: config.budget.warn_at_percent,
        }
    }

    pub fn with_max_rounds(mut self, max: usize) -> Self {
        self.max_rounds = max.max(1);
        self
    }

    pub fn with_retry(mut self, governor: RetryGovernor) -> Self {
        self.governor = governor;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Run the turn to completion, streaming progress through `emitter`.
    ///
    /// A provider failure emits one `error` event before returning.
    pub async fn run(&self, request: TurnRequest, emitter: &StreamEmitter) -> Result<TurnOutcome, EngineError> {
        let TurnRequest {
            messages,
            session_id,
            caller,
            correlation_id,
        } = request;

        let selection = self.router.select(&messages);
        info!(
            session_id = %session_id,
            tier = ?selection.tier,
            model = %selection.model,
            max_tokens = selection.max_tokens,
            "Starting turn"
        );

        let notified = AtomicBool::new(false);
        let messages = self
            .preprocessor
            .process(messages, &session_id, emitter, &notified)
            .await;
        if emitter.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let current = messages.last().cloned().unwrap_or_else(|| Message::user(""));
        let tools = self
            .tools
            .relevant_definitions(&current.content, correlation_id.is_some());
        debug!(tools = tools.len(), "Exposing tools for this turn");

        let ctx = ToolContext {
            caller,
            session_id: session_id.clone(),
            correlation_id,
        };

        let mut wire = self.context.build(&messages);
        let mut text = String::new();
        let mut invocations = Vec::new();
        let mut usage = Usage::default();
        let mut round = 0usize;
        let mut state = LoopState::Generating;

        let stop = loop {
            state = match state {
                LoopState::Generating => {
                    round += 1;
                    let (response, streamed) = self
                        .generate(&selection, &wire, &tools, emitter, &notified, !text.is_empty())
                        .await?;
                    usage.input_tokens += response.usage.input_tokens;
                    usage.output_tokens += response.usage.output_tokens;
                    self.record_usage(&response, &session_id, round, &selection).await;
                    text.push_str(&streamed);
                    if emitter.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }

                    let called_tools = response
                        .content
                        .iter()
                        .any(|b| matches!(b, ContentBlock::ToolUse { .. }));
                    if called_tools {
                        LoopState::ExecutingTools(response.content)
                    } else {
                        LoopState::Done(StopReason::Completed)
                    }
                }

                LoopState::ExecutingTools(content) => {
                    emitter.status(StatusPhase::ExecutingTools).await;
                    let mut results = Vec::new();
                    for block in &content {
                        let ContentBlock::ToolUse { id, name, input } = block else {
                            continue;
                        };
                        let (invocation, part) = self.invoke(id, name, input, &ctx, emitter).await?;
                        invocations.push(invocation);
                        results.push(part);
                    }

                    wire.push(WireMessage::parts(
                        Role::Assistant,
                        content.into_iter().map(ContentPart::from).collect(),
                    ));
                    wire.push(WireMessage::parts(Role::User, results));

                    if round >= self.max_rounds {
                        warn!(
                            rounds = round,
                            session_id = %session_id,
                            "Tool round limit reached, stopping with partial answer"
                        );
                        LoopState::Done(StopReason::RoundLimit)
                    } else {
                        LoopState::Generating
                    }
                }

                LoopState::Done(stop) => break stop,
            };
        };

        let detail = self.budget_notice().await;
        let idle = match detail {
            Some(d) => StreamEvent::status_with(StatusPhase::Idle, d),
            None => StreamEvent::status(StatusPhase::Idle),
        };
        emitter.emit(idle).await;
        if emitter.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        info!(
            session_id = %session_id,
            rounds = round,
            tool_calls = invocations.len(),
            tokens_in = usage.input_tokens,
            tokens_out = usage.output_tokens,
            "Turn complete"
        );

        Ok(TurnOutcome {
            text,
            invocations,
            rounds: round,
            selection,
            stop,
            usage,
            user_message: current,
        })
    }

    /// One provider round. Text is emitted as it arrives and also returned,
    /// prefixed with a blank line when `separate` is set.
    async fn generate(
        &self,
        selection: &ModelSelection,
        wire: &[WireMessage],
        tools: &[ToolDefinition],
        emitter: &StreamEmitter,
        notified: &AtomicBool,
        separate: bool,
    ) -> Result<(ProviderResponse, String), EngineError> {
        if emitter.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        emitter.status(StatusPhase::Generating).await;

        let request = ProviderRequest {
            model: selection.model.clone(),
            system: self.system_prompt.clone(),
            messages: wire.to_vec(),
            max_tokens: selection.max_tokens,
            temperature: self.temperature,
            tools: tools.to_vec(),
        };

        let (sink, mut chunks) = mpsc::channel::<String>(TEXT_BUFFER);
        let call = self
            .governor
            .call(emitter, notified, StatusPhase::Generating, move || {
                self.provider.stream(request.clone(), sink.clone())
            });
        let forward = async {
            let mut streamed = String::new();
            while let Some(mut delta) = chunks.recv().await {
                if streamed.is_empty() && separate {
                    delta.insert_str(0, "\n\n");
                }
                streamed.push_str(&delta);
                emitter.emit(StreamEvent::TextDelta { text: delta }).await;
            }
            streamed
        };
        let (result, streamed) = tokio::join!(call, forward);

        match result {
            Ok(response) => Ok((response, streamed)),
            Err(ProviderError::Cancelled) => Err(EngineError::Cancelled),
            Err(e) => {
                error!(provider = self.provider.name(), error = %e, "Provider call failed");
                emitter
                    .emit(StreamEvent::Error {
                        message: user_facing(&e).to_string(),
                    })
                    .await;
                Err(EngineError::Provider(e))
            }
        }
    }

    async fn invoke(
        &self,
        id: &str,
        name: &str,
        input: &Value,
        ctx: &ToolContext,
        emitter: &StreamEmitter,
    ) -> Result<(ToolInvocation, ContentPart), EngineError> {
        if emitter.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        emitter
            .emit(StreamEvent::ToolCallStart {
                id: id.to_string(),
                name: name.to_string(),
                input: input.clone(),
            })
            .await;

        let outcome = tokio::select! {
            biased;
            _ = emitter.cancelled() => return Err(EngineError::Cancelled),
            outcome = self.tools.execute(name, input.clone(), ctx) => outcome,
        };

        let (raw, status) = match outcome {
            Ok(value) => (value, InvocationStatus::Completed),
            Err(e) => {
                warn!(tool = name, error = %e, "Tool call failed");
                (json!({ "error": e.to_string() }), InvocationStatus::Error)
            }
        };

        let content = self.compressor.compress(&raw);
        let result = serde_json::from_str(&content).unwrap_or_else(|_| Value::String(content.clone()));

        emitter
            .emit(StreamEvent::ToolCallEnd {
                id: id.to_string(),
                name: name.to_string(),
                result: result.clone(),
                status,
            })
            .await;

        let invocation = ToolInvocation {
            id: id.to_string(),
            name: name.to_string(),
            input: input.clone(),
            result,
            status,
        };
        let part = ContentPart::ToolResult {
            tool_use_id: id.to_string(),
            content,
            is_error: status == InvocationStatus::Error,
        };
        Ok((invocation, part))
    }

    async fn record_usage(
        &self,
        response: &ProviderResponse,
        session_id: &SessionId,
        round: usize,
        selection: &ModelSelection,
    ) {
        let record = UsageRecord::new(
            UsageCategory::Chat,
            response.model.clone(),
            response.usage.input_tokens,
            response.usage.output_tokens,
        )
        .with_session(session_id)
        .with_meta("round", round as u64)
        .with_meta("tier", format!("{:?}", selection.tier).to_lowercase());
        if let Err(e) = self.usage.record(record).await {
            warn!(error = %e, "Failed to record usage");
        }
    }

    async fn budget_notice(&self) -> Option<String> {
        match self.usage.current_monthly_usage().await {
            Ok(month) if month.limit > 0.0 && month.percent_used >= self.warn_at_percent => Some(format!(
                "monthly budget at {:.0}% (cost ${:.2} of ${:.2})",
                month.percent_used, month.cost, month.limit
            )),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "Could not read monthly usage");
                None
            }
        }
    }
}

fn user_facing(error: &ProviderError) -> &'static str {
    match error {
        e if e.is_rate_limit() => "The assistant is busy right now. Please try again in a minute.",
        ProviderError::AuthenticationFailed(_) | ProviderError::NotConfigured(_) => {
            "The assistant is not configured correctly. Please contact support."
        }
        ProviderError::Timeout(_) => "The assistant took too long to respond. Please try again.",
        _ => "The assistant could not complete this request. Please try again.",
    }
}
