//! Per-model pricing tables
//!
//! Pricing is versioned data rather than code: tables deserialize from
//! configuration, so adding a model or provider requires no code change. The
//! built-in table covers the providers the router ships with and a
//! conservative default entry for unknown models.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// USD price per million tokens for one model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_mtok_usd: f64,
    pub output_per_mtok_usd: f64,
}

impl ModelPrice {
    pub const fn new(input_per_mtok_usd: f64, output_per_mtok_usd: f64) -> Self {
        Self {
            input_per_mtok_usd,
            output_per_mtok_usd,
        }
    }

    /// Cost in USD for the given token counts
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_per_mtok_usd
            + (output_tokens as f64 / 1_000_000.0) * self.output_per_mtok_usd
    }
}

/// Pricing for all models of a single provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPricing {
    /// Model identifier to price
    pub models: HashMap<String, ModelPrice>,
    /// Applied when a model has no explicit entry
    pub default: ModelPrice,
}

impl ProviderPricing {
    /// Price for the given model, falling back to the default entry
    pub fn price_for(&self, model: &str) -> ModelPrice {
        self.models.get(model).copied().unwrap_or(self.default)
    }
}

/// Pricing table across providers, with a reference provider used by the
/// cost-savings report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingTable {
    providers: HashMap<String, ProviderPricing>,
    /// The more expensive provider the savings report prices all traffic at
    reference_provider: String,
    /// Conservative fallback for providers with no entry at all
    fallback: ModelPrice,
}

impl PricingTable {
    /// Build a table from explicit provider entries
    pub fn new(providers: HashMap<String, ProviderPricing>, reference_provider: String) -> Self {
        Self {
            providers,
            reference_provider,
            fallback: ModelPrice::new(3.0, 15.0),
        }
    }

    /// Table shipped with the crate, covering the "kie" and "anthropic"
    /// providers. "anthropic" is the savings reference.
    pub fn builtin() -> Self {
        let mut providers = HashMap::new();

        let mut anthropic_models = HashMap::new();
        anthropic_models.insert("claude-sonnet-4".to_string(), ModelPrice::new(3.0, 15.0));
        anthropic_models.insert("claude-3-5-sonnet".to_string(), ModelPrice::new(3.0, 15.0));
        anthropic_models.insert("claude-3-5-haiku".to_string(), ModelPrice::new(0.8, 4.0));
        anthropic_models.insert("claude-opus-4".to_string(), ModelPrice::new(15.0, 75.0));
        providers.insert(
            "anthropic".to_string(),
            ProviderPricing {
                models: anthropic_models,
                default: ModelPrice::new(3.0, 15.0),
            },
        );

        let mut kie_models = HashMap::new();
        kie_models.insert("gpt-4o".to_string(), ModelPrice::new(1.75, 7.0));
        kie_models.insert("gpt-4o-mini".to_string(), ModelPrice::new(0.1, 0.4));
        kie_models.insert("gpt-4.1".to_string(), ModelPrice::new(1.4, 5.6));
        providers.insert(
            "kie".to_string(),
            ProviderPricing {
                models: kie_models,
                default: ModelPrice::new(1.75, 7.0),
            },
        );

        Self::new(providers, "anthropic".to_string())
    }

    /// Cost in USD for a request served by `provider` with `model`
    pub fn cost(&self, provider: &str, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.providers
            .get(provider)
            .map(|p| p.price_for(model))
            .unwrap_or(self.fallback)
            .cost(input_tokens, output_tokens)
    }

    /// Default list price of the reference provider
    pub fn reference_price(&self) -> ModelPrice {
        self.providers
            .get(&self.reference_provider)
            .map(|p| p.default)
            .unwrap_or(self.fallback)
    }

    /// Name of the reference provider
    pub fn reference_provider(&self) -> &str {
        &self.reference_provider
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}
