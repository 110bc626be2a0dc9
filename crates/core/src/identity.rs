//! Caller identity resolution.
//!
//! The gate never decides who a caller is on its own: it hands the
//! bearer credential to an `IdentityResolver` and rejects the request
//! when nothing comes back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub user_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl CallerIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
        }
    }
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve a caller from the bearer credential, if any was presented.
    async fn resolve(&self, bearer_token: Option<&str>) -> Option<CallerIdentity>;
}
