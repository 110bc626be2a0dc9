//! Built-in pricing table for the models the engine routes to.
//!
//! Prices are in USD per 1 million tokens. Custom pricing comes from the
//! `[pricing]` section of the config and overrides the defaults.

use concierge_config::PricingOverrideConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Compute cost for the given token counts.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_m + output_tokens as f64 * self.output_per_m) / 1_000_000.0
    }
}

/// Pricing table with built-in defaults and custom overrides.
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<String, ModelPricing>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();
        prices.insert("claude-opus-4".into(), ModelPricing::new(15.0, 75.0));
        prices.insert("claude-sonnet-4".into(), ModelPricing::new(3.0, 15.0));
        prices.insert("claude-3-7-sonnet".into(), ModelPricing::new(3.0, 15.0));
        prices.insert("claude-3-5-sonnet".into(), ModelPricing::new(3.0, 15.0));
        prices.insert("claude-3-5-haiku".into(), ModelPricing::new(0.8, 4.0));
        prices.insert("claude-3-haiku".into(), ModelPricing::new(0.25, 1.25));
        Self { prices }
    }

    pub fn empty() -> Self {
        Self { prices: HashMap::new() }
    }

    /// Defaults plus the overrides from config.
    pub fn with_overrides(overrides: &HashMap<String, PricingOverrideConfig>) -> Self {
        let mut table = Self::with_defaults();
        for (model, p) in overrides {
            table.set(model.clone(), ModelPricing::new(p.input_per_m, p.output_per_m));
        }
        table
    }

    /// Add or update pricing for a model.
    pub fn set(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices.insert(model.into(), pricing);
    }

    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        self.prices.get(model)
    }

    /// Compute cost for a model call, returning 0.0 if the model is unknown.
    ///
    /// Tries an exact match first, then the longest known name that prefixes
    /// the model id (`claude-sonnet-4-20250514` matches `claude-sonnet-4`).
    pub fn compute_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        if let Some(p) = self.prices.get(model) {
            return p.cost(input_tokens, output_tokens);
        }

        let model_lower = model.to_lowercase();
        let bare_model = model_lower.rsplit('/').next().unwrap_or(&model_lower);

        self.prices
            .iter()
            .filter(|(key, _)| bare_model.starts_with(&key.to_lowercase()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, p)| p.cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }

    /// All known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.prices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_cost() {
        let table = PricingTable::with_defaults();
        // (1000 * 3.0 + 500 * 15.0) / 1M = 0.0105
        let cost = table.compute_cost("claude-sonnet-4", 1000, 500);
        assert!((cost - 0.0105).abs() < 1e-10);
    }

    #[test]
    fn dated_model_id_matches_prefix() {
        let table = PricingTable::with_defaults();
        let cost = table.compute_cost("claude-3-5-haiku-20241022", 1_000_000, 0);
        assert!((cost - 0.8).abs() < 1e-10);

        let latest = table.compute_cost("anthropic/claude-3-5-haiku-latest", 0, 1_000_000);
        assert!((latest - 4.0).abs() < 1e-10);
    }

    #[test]
    fn unknown_model_returns_zero() {
        let table = PricingTable::with_defaults();
        assert_eq!(table.compute_cost("unknown/model-xyz", 1000, 500), 0.0);
    }

    #[test]
    fn overrides_replace_defaults() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "claude-sonnet-4".to_string(),
            PricingOverrideConfig {
                input_per_m: 5.0,
                output_per_m: 20.0,
            },
        );
        overrides.insert(
            "in-house-model".to_string(),
            PricingOverrideConfig {
                input_per_m: 1.0,
                output_per_m: 2.0,
            },
        );
        let table = PricingTable::with_overrides(&overrides);
        assert!((table.compute_cost("claude-sonnet-4", 1_000_000, 0) - 5.0).abs() < 1e-10);
        assert!((table.compute_cost("in-house-model", 1_000_000, 1_000_000) - 3.0).abs() < 1e-10);
    }

    #[test]
    fn list_models_sorted() {
        let models = PricingTable::with_defaults().models();
        assert!(models.contains(&"claude-sonnet-4".to_string()));
        assert!(models.windows(2).all(|w| w[0] <= w[1]));
    }
}
