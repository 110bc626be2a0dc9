//! `concierge serve`: start the HTTP gateway.

use std::path::Path;

use super::load_config;

pub async fn run(config_path: Option<&Path>, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if !config.has_api_key() {
        return Err("No API key configured. Set CONCIERGE_API_KEY or api_key in config.toml".into());
    }

    println!("Concierge gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Models:    {} / {}", config.models.cheap, config.models.capable);
    println!("   Tools:     {}", config.tools.iter().filter(|t| t.enabled).count());

    concierge_gateway::start(config).await?;
    Ok(())
}
