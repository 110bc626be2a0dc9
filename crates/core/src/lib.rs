//! # Concierge Core
//!
//! Domain types, collaborator traits, and error definitions for the
//! Concierge orchestration engine. Everything the engine talks to
//! (model providers, tool handlers, the usage ledger, the conversation
//! store, identity) is a trait defined here and implemented elsewhere.

pub mod error;
pub mod identity;
pub mod message;
pub mod persistence;
pub mod provider;
pub mod tool;
pub mod usage;

// Re-export key types at crate root for ergonomics
pub use error::{Error, PersistenceError, ProviderError, Result, ToolError, UsageError};
pub use identity::{CallerIdentity, IdentityResolver};
pub use message::{Attachment, ConversationSession, InvocationStatus, MediaKind, Message, Role, SessionId, ToolInvocation};
pub use persistence::PersistenceGateway;
pub use provider::{
    ContentBlock, ContentPart, Provider, ProviderRequest, ProviderResponse, TextSink, ToolDefinition, Usage, WireContent,
    WireMessage,
};
pub use tool::{ToolContext, ToolFilter, ToolGroup, ToolHandler, ToolRegistry};
pub use usage::{MonthlyUsage, UsageCategory, UsageRecord, UsageRecorder};
