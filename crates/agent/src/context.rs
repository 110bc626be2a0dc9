//! Conversation history to provider wire format.

use concierge_core::message::{MediaKind, Message};
use concierge_core::provider::{ContentPart, WireContent, WireMessage};

/// Builds the round-1 message list from the conversation history.
#[derive(Debug, Clone, Copy)]
pub struct ContextBuilder {
    window: usize,
}

impl ContextBuilder {
    /// A window of 0 still keeps the current message.
    pub fn new(window: usize) -> Self {
        Self { window: window.max(1) }
    }

    /// The last `window` messages, converted and with empty ones dropped.
    pub fn build(&self, messages: &[Message]) -> Vec<WireMessage> {
        let start = messages.len().saturating_sub(self.window);
        messages[start..]
            .iter()
            .filter(|m| !m.is_empty())
            .map(to_wire)
            .collect()
    }
}

/// Plain text, or media parts followed by a trailing text part when the
/// message still carries inline payloads.
pub fn to_wire(message: &Message) -> WireMessage {
    let mut parts: Vec<ContentPart> = message
        .inline_attachments()
        .filter_map(|a| {
            let data = a.data.clone()?;
            Some(match a.kind {
                MediaKind::Document => ContentPart::Document {
                    media_type: a.mime_type.clone(),
                    data,
                },
                MediaKind::Image => ContentPart::Image {
                    media_type: a.mime_type.clone(),
                    data,
                },
            })
        })
        .collect();

    if parts.is_empty() {
        return WireMessage {
            role: message.role,
            content: WireContent::Text(message.content.clone()),
        };
    }

    if !message.content.trim().is_empty() {
        parts.push(ContentPart::Text {
            text: message.content.clone(),
        });
    }
    WireMessage::parts(message.role, parts)
}
