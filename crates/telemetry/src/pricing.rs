//! Built-in input-token pricing for common LLM models.
//!
//! An assembled context is sent to the model as input, so only the input
//! price matters here. Prices are USD per 1 million tokens. Custom prices
//! can be added at runtime (e.g. from TOML config).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Provider prefixes tried when a bare model id misses.
const PROVIDER_PREFIXES: [&str; 6] = [
    "openai", "anthropic", "google", "mistral", "deepseek", "meta-llama",
];

/// Per-million-token input pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64) -> Self {
        Self { input_per_m }
    }

    /// Cost of sending `tokens` input tokens.
    pub fn cost(&self, tokens: usize) -> f64 {
        tokens as f64 * self.input_per_m / 1_000_000.0
    }
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let builtin: [(&str, f64); 18] = [
            // ── Anthropic ──────────────────────────────────────────────
            ("anthropic/claude-sonnet-4", 3.0),
            ("anthropic/claude-opus-4", 15.0),
            ("anthropic/claude-3.5-sonnet", 3.0),
            ("anthropic/claude-3.5-haiku", 0.8),
            ("anthropic/claude-3-haiku", 0.25),
            // ── OpenAI ─────────────────────────────────────────────────
            ("openai/gpt-4o", 2.5),
            ("openai/gpt-4o-mini", 0.15),
            ("openai/gpt-4-turbo", 10.0),
            ("openai/o1", 15.0),
            ("openai/o3-mini", 1.1),
            // ── Google ─────────────────────────────────────────────────
            ("google/gemini-2.0-flash", 0.1),
            ("google/gemini-1.5-pro", 1.25),
            // ── Meta / Mistral / DeepSeek ──────────────────────────────
            ("meta-llama/llama-3.1-70b", 0.52),
            ("meta-llama/llama-3.1-8b", 0.055),
            ("mistral/mistral-large", 2.0),
            ("mistral/mistral-small", 0.2),
            ("deepseek/deepseek-v3", 0.27),
            ("deepseek/deepseek-r1", 0.55),
        ];

        let prices = builtin
            .into_iter()
            .map(|(model, price)| (model.to_string(), ModelPricing::new(price)))
            .collect();

        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Look up pricing for a model by exact id.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
        prices.get(model).copied()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        let mut prices = self.prices.write().unwrap_or_else(|e| e.into_inner());
        prices.insert(model.into(), pricing);
    }

    /// Resolve the pricing for a model id.
    ///
    /// Tries an exact match, then common provider prefixes
    /// (`gpt-4o` → `openai/gpt-4o`), then the longest key whose bare name
    /// prefixes the model (`gpt-4o-mini-2024-07-18` → `gpt-4o-mini`).
    pub fn resolve(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());

        if let Some(p) = prices.get(model) {
            return Some(*p);
        }

        for prefix in PROVIDER_PREFIXES {
            if let Some(p) = prices.get(&format!("{prefix}/{model}")) {
                return Some(*p);
            }
        }

        let model_lower = model.to_lowercase();
        let bare_model = model_lower.rsplit('/').next().unwrap_or(&model_lower);

        prices
            .iter()
            .filter_map(|(key, pricing)| {
                let bare_key = key.rsplit('/').next().unwrap_or(key).to_lowercase();
                bare_model
                    .starts_with(&bare_key)
                    .then_some((bare_key.len(), *pricing))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, pricing)| pricing)
    }

    /// Cost of sending `tokens` context tokens to `model`; 0.0 if unknown.
    pub fn context_cost(&self, model: &str, tokens: usize) -> f64 {
        self.resolve(model).map(|p| p.cost(tokens)).unwrap_or(0.0)
    }

    /// List all known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
