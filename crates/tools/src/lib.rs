//! Tool handlers for Concierge.
//!
//! Business capabilities (creating a quotation, listing projects, ...)
//! live in backend services. Each `[[tools]]` entry in the config becomes
//! a `BackendTool` that forwards the model's structured input to that
//! backend over HTTP.

pub mod backend;

use concierge_config::AppConfig;
use concierge_core::ToolError;
use concierge_core::tool::ToolRegistry;
use std::sync::Arc;
use tracing::{debug, info};

pub use backend::BackendTool;

/// Build the registry from config: every enabled `[[tools]]` entry plus
/// the `[tool_filter]` relevance filter.
pub fn registry_from_config(config: &AppConfig) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new().with_filter(config.tool_filter.clone());
    for tool in config.tools.iter().filter(|t| t.enabled) {
        registry.register(Arc::new(BackendTool::from_config(tool)?));
        debug!(tool = %tool.name, endpoint = %tool.endpoint, "Registered backend tool");
    }
    info!(count = registry.len(), "Tool registry ready");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_config::HttpToolConfig;

    fn tool(name: &str, enabled: bool) -> HttpToolConfig {
        HttpToolConfig {
            name: name.into(),
            description: format!("{name} tool"),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
            endpoint: format!("http://127.0.0.1:9/{name}"),
            timeout_secs: 5,
            enabled,
        }
    }

    #[test]
    fn registry_skips_disabled_tools() {
        let config = AppConfig {
            tools: vec![tool("list_projects", true), tool("delete_everything", false)],
            ..AppConfig::default()
        };
        let registry = registry_from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["list_projects"]);
    }

    #[test]
    fn registry_rejects_bad_endpoint() {
        let mut bad = tool("list_projects", true);
        bad.endpoint = "ftp://backend/list".into();
        let config = AppConfig {
            tools: vec![bad],
            ..AppConfig::default()
        };
        assert!(matches!(
            registry_from_config(&config),
            Err(ToolError::InvalidArguments(_))
        ));
    }
}
