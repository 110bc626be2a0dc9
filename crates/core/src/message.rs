//! Message and session domain types.
//!
//! These are the value objects that flow through the whole engine:
//! caller sends messages → gate validates → engine runs rounds → store persists the pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title used when the first message carries no text at all.
pub const DEFAULT_TITLE: &str = "New conversation";

/// Maximum number of characters in a generated session title.
pub const TITLE_MAX_CHARS: usize = 60;

/// Unique identifier for a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
}

/// What kind of binary an attachment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Document,
    Image,
}

impl MediaKind {
    /// Images are anything under `image/`; every other mime type is treated as a document.
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.trim().to_ascii_lowercase().starts_with("image/") {
            Self::Image
        } else {
            Self::Document
        }
    }
}

/// A file attached to a message.
///
/// `data` holds the base64-encoded inline payload. Attachments reloaded
/// from storage have no payload and are inert for model consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,

    pub mime_type: String,

    pub kind: MediaKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Option<String>) -> Self {
        let mime_type = mime_type.into();
        Self {
            name: name.into(),
            kind: MediaKind::from_mime(&mime_type),
            mime_type,
            data,
        }
    }

    /// True when a non-empty inline payload is present.
    pub fn has_payload(&self) -> bool {
        self.data.as_deref().is_some_and(|d| !d.is_empty())
    }

    pub fn is_document(&self) -> bool {
        self.kind == MediaKind::Document
    }

    /// A copy of this attachment with its binary stripped.
    pub fn without_payload(&self) -> Self {
        Self {
            data: None,
            ..self.clone()
        }
    }
}

/// Outcome of a single tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    Completed,
    Error,
}

/// One tool call the assistant made while producing a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Matches the provider's tool-use block id
    pub id: String,

    pub name: String,

    pub input: serde_json::Value,

    pub result: serde_json::Value,

    pub status: InvocationStatus,
}

impl ToolInvocation {
    pub fn is_error(&self) -> bool {
        self.status == InvocationStatus::Error
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    #[serde(default)]
    pub content: String,

    /// Files attached by the user
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    /// Tools the assistant invoked (assistant only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,

    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            attachments: Vec::new(),
            tool_invocations: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_tool_invocations(mut self, invocations: Vec<ToolInvocation>) -> Self {
        self.tool_invocations = invocations;
        self
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }

    /// Attachments that still carry a binary the model can consume.
    pub fn inline_attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.iter().filter(|a| a.has_payload())
    }

    /// A message is empty when it has no text and nothing the model could read.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.inline_attachments().next().is_none()
    }

    /// A copy suitable for storage: inline payloads are dropped.
    pub fn for_storage(&self) -> Self {
        Self {
            attachments: self.attachments.iter().map(Attachment::without_payload).collect(),
            ..self.clone()
        }
    }
}

/// A persisted conversation between one caller and the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: SessionId,

    /// Identity of the caller who owns this session
    pub owner: String,

    pub title: String,

    pub messages: Vec<Message>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(owner: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            owner: owner.into(),
            title: title.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a completed user/assistant exchange and touch the timestamp.
    pub fn append_pair(&mut self, user: Message, assistant: Message) {
        self.messages.push(user);
        self.messages.push(assistant);
        self.updated_at = Utc::now();
    }
}

/// Derive a session title from the first message text.
pub fn title_from(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}…", cut.trim_end())
}
