//! Bearer token authentication.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use concierge_config::ApiTokenConfig;
use concierge_core::identity::{CallerIdentity, IdentityResolver};

/// Resolves callers from a fixed table of configured API tokens.
#[derive(Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, CallerIdentity>,
}

impl StaticTokenResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(tokens: &[ApiTokenConfig]) -> Self {
        let mut resolver = Self::new();
        for t in tokens {
            let mut caller = CallerIdentity::new(t.user_id.clone());
            caller.display_name = t.display_name.clone();
            resolver.insert(t.token.clone(), caller);
        }
        resolver
    }

    pub fn insert(&mut self, token: impl Into<String>, caller: CallerIdentity) {
        self.tokens.insert(token.into(), caller);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityResolver for StaticTokenResolver {
    async fn resolve(&self, bearer_token: Option<&str>) -> Option<CallerIdentity> {
        let token = bearer_token?.trim();
        if token.is_empty() {
            return None;
        }
        self.tokens.get(token).cloned()
    }
}

/// The token from an `Authorization: Bearer <token>` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
