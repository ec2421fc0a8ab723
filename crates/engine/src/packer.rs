//! Budget packing: choose, in priority order, what fits.
//!
//! Candidates are stably sorted by ascending priority and walked once. Each
//! is included whole if it fits, shrunk per its truncation policy if it can
//! be, failed on if required, or dropped. Dropped items consume nothing.
//! Every included item after the first is charged for the separator that
//! precedes it in the rendered payload.

use crate::token::TokenEstimator;
use contextforge_core::{AssemblyError, Candidate, DEFAULT_SEPARATOR, TruncatePolicy};
use std::sync::Arc;
use tracing::debug;

/// Result of packing one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Packed {
    /// Priority order (stable).
    pub included: Vec<Candidate>,
    /// Priority order (stable), original token counts.
    pub dropped: Vec<Candidate>,
    /// Sum of included token counts.
    pub total_tokens: usize,
    /// Separator cost between included items.
    pub separator_tokens: usize,
}

impl Packed {
    pub fn truncated_count(&self) -> usize {
        self.included.iter().filter(|c| c.truncated).count()
    }

    /// Tokens of the rendered payload; never above the budget.
    pub fn payload_tokens(&self) -> usize {
        self.total_tokens + self.separator_tokens
    }
}

pub struct BudgetPacker {
    estimator: Arc<TokenEstimator>,
    separator: String,
}

impl BudgetPacker {
    pub fn new(estimator: Arc<TokenEstimator>) -> Self {
        Self {
            estimator,
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn pack(
        &self,
        mut candidates: Vec<Candidate>,
        budget_tokens: usize,
        model_id: &str,
    ) -> Result<Packed, AssemblyError> {
        candidates.sort_by_key(|c| c.priority());
        let separator_cost = self.estimator.estimate(&self.separator, model_id);

        let mut packed = Packed::default();
        for candidate in candidates {
            let joint = if packed.included.is_empty() { 0 } else { separator_cost };
            let remaining = budget_tokens.saturating_sub(packed.payload_tokens() + joint);

            if candidate.token_count <= remaining {
                packed.total_tokens += candidate.token_count;
                packed.separator_tokens += joint;
                packed.included.push(candidate);
                continue;
            }

            if let Some(shrunk) = self.shrink(&candidate, remaining, model_id) {
                debug!(
                    source = %shrunk.source_name(),
                    from = shrunk.original_tokens,
                    to = shrunk.token_count,
                    "Truncated candidate"
                );
                packed.total_tokens += shrunk.token_count;
                packed.separator_tokens += joint;
                packed.included.push(shrunk);
                continue;
            }

            if candidate.item.required {
                return Err(AssemblyError::Budget {
                    source_name: candidate.source_name().to_string(),
                    required_tokens: candidate.token_count,
                    available_tokens: remaining,
                });
            }

            debug!(
                source = %candidate.source_name(),
                tokens = candidate.token_count,
                remaining,
                "Dropped candidate"
            );
            packed.dropped.push(candidate);
        }

        Ok(packed)
    }

    /// The candidate cut down to fit `remaining`, if its policy and kind
    /// allow it and something non-empty is left.
    fn shrink(&self, candidate: &Candidate, remaining: usize, model_id: &str) -> Option<Candidate> {
        let policy = candidate.item.truncate_policy;
        if policy == TruncatePolicy::None
            || !candidate.item.source_kind.supports_truncation()
            || remaining == 0
        {
            return None;
        }

        let char_count = candidate.content().chars().count();
        let keep = self
            .estimator
            .largest_fitting_prefix_len(char_count, remaining, model_id);
        if keep == 0 {
            return None;
        }

        let content = truncate_chars(candidate.content(), keep, policy);
        let tokens = self.estimator.estimate(&content, model_id);
        debug_assert!(tokens <= remaining);

        let mut item = candidate.item.clone();
        item.content = content;
        Some(Candidate {
            item,
            token_count: tokens,
            truncated: true,
            original_tokens: candidate.token_count,
        })
    }
}

/// Keep `keep` chars of `text` according to `policy`, on char boundaries.
///
/// `Middle` keeps `ceil(keep/2)` leading and `floor(keep/2)` trailing chars.
pub fn truncate_chars(text: &str, keep: usize, policy: TruncatePolicy) -> String {
    let total = text.chars().count();
    if keep >= total {
        return text.to_string();
    }
    match policy {
        TruncatePolicy::None => text.to_string(),
        TruncatePolicy::End => text.chars().take(keep).collect(),
        TruncatePolicy::Start => text.chars().skip(total - keep).collect(),
        TruncatePolicy::Middle => {
            let head = keep.div_ceil(2);
            let tail = keep / 2;
            text.chars()
                .take(head)
                .chain(text.chars().skip(total - tail))
                .collect()
        }
    }
}
