//! `concierge doctor`: diagnose configuration and provider connectivity.

use std::path::Path;

use concierge_config::{AppConfig, StoreBackend};
use concierge_core::provider::Provider;
use concierge_providers::AnthropicProvider;

use super::load_config;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Concierge doctor");
    println!("================\n");

    let mut issues = 0;

    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    if !path.exists() {
        println!("  [warn] No config file at {}, using defaults", path.display());
    }

    let config = match load_config(config_path) {
        Ok(c) => {
            println!("  [ok]   Config valid");
            c
        }
        Err(e) => {
            println!("  [fail] Config invalid: {e}");
            return Err(e.into());
        }
    };

    if config.gateway.tokens.is_empty() {
        println!("  [warn] No [[gateway.tokens]] configured, the gateway will reject every request");
        issues += 1;
    } else {
        println!("  [ok]   {} API token(s) configured", config.gateway.tokens.len());
    }

    let tools = config.tools.iter().filter(|t| t.enabled).count();
    println!("  [ok]   {tools} backend tool(s) enabled");

    match config.store.backend {
        StoreBackend::Memory => println!("  [warn] In-memory store, sessions are lost on restart"),
        StoreBackend::Sqlite => println!("  [ok]   SQLite store at {}", config.store.resolved_path().display()),
    }

    match AnthropicProvider::from_config(&config) {
        Ok(provider) => match provider.health_check().await {
            Ok(true) => println!("  [ok]   Provider reachable at {}", config.provider.base_url),
            Ok(false) => {
                println!("  [fail] Provider at {} did not accept the request", config.provider.base_url);
                issues += 1;
            }
            Err(e) => {
                println!("  [fail] Provider check failed: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  [fail] {e}. Set CONCIERGE_API_KEY or api_key in config.toml");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }
    Ok(())
}
