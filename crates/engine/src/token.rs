//! Token estimation.
//!
//! Uses a per-model-family character ratio: `chars` characters count as
//! `tokens` tokens, rounded up. The estimate is deterministic and monotonic
//! in the character count, which the packer relies on when truncating.

use contextforge_config::TokenSchemeConfig;
use std::collections::BTreeMap;

/// A `chars : tokens` counting ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenScheme {
    pub chars: u32,
    pub tokens: u32,
}

impl TokenScheme {
    /// The fallback for unknown models: ~4 characters per token.
    pub const DEFAULT: Self = Self::new(4, 1);

    pub const fn new(chars: u32, tokens: u32) -> Self {
        Self { chars, tokens }
    }

    /// Tokens for `char_count` characters. Rounds up; zero chars is zero tokens.
    pub fn tokens_for(&self, char_count: usize) -> usize {
        if char_count == 0 || self.chars == 0 {
            return 0;
        }
        let chars = self.chars as u128;
        let scaled = char_count as u128 * self.tokens as u128;
        scaled.div_ceil(chars) as usize
    }
}

impl From<TokenSchemeConfig> for TokenScheme {
    fn from(c: TokenSchemeConfig) -> Self {
        Self::new(c.chars, c.tokens)
    }
}

/// Model-aware token estimator.
///
/// Schemes are keyed by model id or id prefix. Lookup tries the exact id,
/// then the id with its `provider/` prefix stripped, then the longest key
/// that prefixes the bare id. Anything else uses [`TokenScheme::DEFAULT`].
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    schemes: BTreeMap<String, TokenScheme>,
}

impl TokenEstimator {
    /// An estimator with the built-in model families.
    pub fn with_defaults() -> Self {
        let builtin: [(&str, TokenScheme); 9] = [
            ("gpt-4", TokenScheme::new(4, 1)),
            ("gpt-3.5", TokenScheme::new(4, 1)),
            ("o1", TokenScheme::new(4, 1)),
            ("o3", TokenScheme::new(4, 1)),
            ("gemini", TokenScheme::new(4, 1)),
            ("claude", TokenScheme::new(7, 2)),
            ("llama", TokenScheme::new(15, 4)),
            ("mistral", TokenScheme::new(15, 4)),
            ("mixtral", TokenScheme::new(15, 4)),
        ];
        Self {
            schemes: builtin
                .into_iter()
                .map(|(k, s)| (k.to_string(), s))
                .collect(),
        }
    }

    /// Built-ins plus custom schemes from config; config entries win.
    pub fn from_config(custom: &BTreeMap<String, TokenSchemeConfig>) -> Self {
        let mut estimator = Self::with_defaults();
        for (model, scheme) in custom {
            estimator.register(model.clone(), (*scheme).into());
        }
        estimator
    }

    /// Add or replace the scheme for a model id or prefix.
    pub fn register(&mut self, model: impl Into<String>, scheme: TokenScheme) {
        self.schemes.insert(model.into().to_lowercase(), scheme);
    }

    /// The scheme used for `model_id`.
    pub fn scheme_for(&self, model_id: &str) -> TokenScheme {
        let model = model_id.to_lowercase();
        if let Some(s) = self.schemes.get(&model) {
            return *s;
        }

        let bare = model.rsplit('/').next().unwrap_or(&model);
        if let Some(s) = self.schemes.get(bare) {
            return *s;
        }

        self.schemes
            .iter()
            .filter(|(key, _)| bare.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, s)| *s)
            .unwrap_or(TokenScheme::DEFAULT)
    }

    /// Estimated tokens of `content` for `model_id`.
    pub fn estimate(&self, content: &str, model_id: &str) -> usize {
        self.scheme_for(model_id).tokens_for(content.chars().count())
    }

    /// Largest `n <= char_count` such that `n` chars estimate to at most
    /// `budget` tokens.
    pub fn largest_fitting_prefix_len(&self, char_count: usize, budget: usize, model_id: &str) -> usize {
        let scheme = self.scheme_for(model_id);
        if scheme.tokens_for(char_count) <= budget {
            return char_count;
        }
        // Invariant: tokens_for(lo) <= budget < tokens_for(hi)
        let (mut lo, mut hi) = (0usize, char_count);
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if scheme.tokens_for(mid) <= budget {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::with_defaults()
    }
}
