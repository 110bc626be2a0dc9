//! Model tier and token ceiling selection.

use concierge_config::{AppConfig, ComplexityConfig};
use concierge_core::message::{Message, Role};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Cheap,
    Capable,
}

/// Resolved once per request and shared by every round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub tier: ModelTier,
    pub model: String,
    pub max_tokens: u32,
    pub extended: bool,
}

/// Deterministic heuristic router. Keywords are matched case-insensitively.
#[derive(Debug, Clone)]
pub struct ComplexityRouter {
    rules: ComplexityConfig,
    cheap_model: String,
    capable_model: String,
    standard_max_tokens: u32,
    extended_max_tokens: u32,
}

impl ComplexityRouter {
    pub fn from_config(config: &AppConfig) -> Self {
        let mut rules = config.complexity.clone();
        lowercase_all(&mut rules.capable_keywords);
        lowercase_all(&mut rules.extended_keywords);
        Self {
            rules,
            cheap_model: config.models.cheap.clone(),
            capable_model: config.models.capable.clone(),
            standard_max_tokens: config.engine.standard_max_tokens,
            extended_max_tokens: config.engine.extended_max_tokens,
        }
    }

    pub fn select(&self, messages: &[Message]) -> ModelSelection {
        let tier = self.tier(messages);
        let extended = self.needs_extended(messages);
        ModelSelection {
            tier,
            model: match tier {
                ModelTier::Cheap => self.cheap_model.clone(),
                ModelTier::Capable => self.capable_model.clone(),
            },
            max_tokens: if extended {
                self.extended_max_tokens
            } else {
                self.standard_max_tokens
            },
            extended,
        }
    }

    /// First matching rule wins.
    pub fn tier(&self, messages: &[Message]) -> ModelTier {
        let Some(current) = messages.last() else {
            return ModelTier::Cheap;
        };
        let text = current.content.to_lowercase();

        if !current.attachments.is_empty() {
            return ModelTier::Capable;
        }
        if current.word_count() > self.rules.word_threshold {
            return ModelTier::Capable;
        }
        if contains_any(&text, &self.rules.capable_keywords) {
            return ModelTier::Capable;
        }
        let previous_tools = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.tool_invocations.len())
            .unwrap_or(0);
        if previous_tools > self.rules.tool_count_threshold {
            return ModelTier::Capable;
        }
        ModelTier::Cheap
    }

    fn needs_extended(&self, messages: &[Message]) -> bool {
        messages.last().is_some_and(|current| {
            current.attachments.iter().any(|a| a.is_document())
                || contains_any(&current.content.to_lowercase(), &self.rules.extended_keywords)
        })
    }
}

fn contains_any(text: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| !k.is_empty() && text.contains(k.as_str()))
}

fn lowercase_all(keywords: &mut [String]) {
    for k in keywords.iter_mut() {
        *k = k.to_lowercase();
    }
}
