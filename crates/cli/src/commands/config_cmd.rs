//! `concierge config`: print configuration as TOML.

use std::path::Path;

use concierge_config::AppConfig;

use super::load_config;

const REDACTED: &str = "<redacted>";

pub fn run(config_path: Option<&Path>, default: bool) -> Result<(), Box<dyn std::error::Error>> {
    if default {
        println!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", toml::to_string_pretty(&redacted(config))?);
    Ok(())
}

/// Secrets replaced so the output can be pasted into bug reports.
fn redacted(mut config: AppConfig) -> AppConfig {
    if config.api_key.is_some() {
        config.api_key = Some(REDACTED.into());
    }
    for token in &mut config.gateway.tokens {
        token.token = REDACTED.into();
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_config::ApiTokenConfig;

    #[test]
    fn secrets_are_hidden() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-ant-secret".into());
        config.gateway.tokens.push(ApiTokenConfig {
            token: "tok-123".into(),
            user_id: "alice".into(),
            display_name: None,
        });

        let out = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(!out.contains("sk-ant-secret"));
        assert!(!out.contains("tok-123"));
        assert!(out.contains("alice"));
    }
}
