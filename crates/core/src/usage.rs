//! Usage accounting contract.
//!
//! Every provider call (main generation and auxiliary extraction alike)
//! is reported through `UsageRecorder`. The same collaborator answers the
//! monthly budget question for the gate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::UsageError;
use crate::message::SessionId;

/// What a provider call was spent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageCategory {
    Chat,
    DocumentExtraction,
}

impl UsageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::DocumentExtraction => "document_extraction",
        }
    }
}

impl std::fmt::Display for UsageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One provider call's worth of usage. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub category: UsageCategory,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(category: UsageCategory, model: impl Into<String>, tokens_in: u64, tokens_out: u64) -> Self {
        Self {
            category,
            model: model.into(),
            tokens_in,
            tokens_out,
            session_id: None,
            metadata: serde_json::Map::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_session(mut self, session_id: &SessionId) -> Self {
        self.session_id = Some(session_id.clone());
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Spend for the current calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonthlyUsage {
    /// USD spent so far this month
    pub cost: f64,
    /// USD ceiling; zero or less disables the ceiling
    pub limit: f64,
    pub percent_used: f64,
}

impl MonthlyUsage {
    pub fn new(cost: f64, limit: f64) -> Self {
        let percent_used = if limit > 0.0 { cost / limit * 100.0 } else { 0.0 };
        Self {
            cost,
            limit,
            percent_used,
        }
    }

    /// True once spend has reached the ceiling.
    pub fn is_exhausted(&self) -> bool {
        self.limit > 0.0 && self.cost >= self.limit
    }
}

#[async_trait]
pub trait UsageRecorder: Send + Sync {
    async fn record(&self, record: UsageRecord) -> std::result::Result<(), UsageError>;

    async fn current_monthly_usage(&self) -> std::result::Result<MonthlyUsage, UsageError>;
}
