//! Events written onto a request's output stream.
//!
//! Each event becomes one SSE frame: `event: <name>` followed by a
//! `data: <json>` line holding the payload without its discriminator.

use concierge_core::InvocationStatus;
use serde::{Deserialize, Serialize};

/// Coarse progress phase reported through `status` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPhase {
    AnalyzingPdf,
    Generating,
    ExecutingTools,
    Idle,
}

/// Events emitted during one request, in order, never revised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Always first: which session this stream belongs to.
    ConversationInfo { session_id: String, title: String },

    Status {
        phase: StatusPhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    /// Incremental answer text; all deltas concatenate to the full answer.
    TextDelta { text: String },

    ToolCallStart {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    ToolCallEnd {
        id: String,
        name: String,
        result: serde_json::Value,
        status: InvocationStatus,
    },

    Error { message: String },

    Done,
}

impl StreamEvent {
    pub fn status(phase: StatusPhase) -> Self {
        Self::Status { phase, detail: None }
    }

    pub fn status_with(phase: StatusPhase, detail: impl Into<String>) -> Self {
        Self::Status {
            phase,
            detail: Some(detail.into()),
        }
    }

    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConversationInfo { .. } => "conversation_info",
            Self::Status { .. } => "status",
            Self::TextDelta { .. } => "text_delta",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallEnd { .. } => "tool_call_end",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }

    /// The `data:` payload: the event's fields without the `type` tag.
    pub fn payload(&self) -> serde_json::Value {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.remove("type");
                serde_json::Value::Object(map)
            }
            _ => serde_json::json!({}),
        }
    }

    /// Render as one text frame.
    pub fn to_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event_type(), self.payload())
    }
}
