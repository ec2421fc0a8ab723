//! Assembly request and outcome types.

use crate::item::{Candidate, ContentItem};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Joins included items in the rendered payload.
pub const DEFAULT_SEPARATOR: &str = "\n\n";

fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}

/// Everything the packer and classifier need for one assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyRequest {
    /// Maximum total tokens of the assembled context. Must be > 0.
    pub budget_tokens: usize,
    /// Target model, used for token estimation and cost.
    pub model_id: String,
    /// Maximum tolerable age of any included timestamped item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness_sla: Option<Duration>,
    /// Candidate items in declaration order.
    pub candidates: Vec<ContentItem>,
    /// Placed between included items when rendering; its cost is budgeted.
    #[serde(default = "default_separator")]
    pub separator: String,
}

impl AssemblyRequest {
    pub fn new(budget_tokens: usize, model_id: impl Into<String>) -> Self {
        Self {
            budget_tokens,
            model_id: model_id.into(),
            freshness_sla: None,
            candidates: Vec::new(),
            separator: default_separator(),
        }
    }

    pub fn with_sla(mut self, sla: Duration) -> Self {
        self.freshness_sla = Some(sla);
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<ContentItem>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }
}

/// Overall freshness of an assembled context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessStatus {
    /// Every timestamped item is within the SLA.
    Guaranteed,
    /// At least one item exceeds the SLA.
    Degraded,
    /// No SLA was given.
    #[default]
    Unknown,
}

impl FreshnessStatus {
    /// Rank for comparisons: lower is better.
    pub fn rank(self) -> u8 {
        match self {
            Self::Guaranteed => 0,
            Self::Degraded => 1,
            Self::Unknown => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Guaranteed => "guaranteed",
            Self::Degraded => "degraded",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FreshnessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FreshnessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guaranteed" => Ok(Self::Guaranteed),
            "degraded" => Ok(Self::Degraded),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown freshness status: {other}")),
        }
    }
}

/// An included item older than the freshness SLA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessViolation {
    pub source_name: String,
    pub age_ms: u64,
    pub sla_ms: u64,
}

/// A non-strict source that failed during gathering. Recorded, not fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source_name: String,
    pub reason: String,
}

/// The result of packing and classifying one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyOutcome {
    /// Included candidates in stable priority order.
    pub included: Vec<Candidate>,
    /// Candidates that did not fit, in stable priority order.
    pub dropped: Vec<Candidate>,
    /// Sum of included token counts.
    pub total_tokens: usize,
    /// Estimated cost of the separators between included items.
    /// `total_tokens + separator_tokens` never exceeds `budget_tokens`.
    #[serde(default)]
    pub separator_tokens: usize,
    #[serde(default = "default_separator")]
    pub separator: String,
    pub budget_tokens: usize,
    pub freshness_status: FreshnessStatus,
    #[serde(default)]
    pub violations: Vec<FreshnessViolation>,
    /// Age of the oldest included timestamped item.
    #[serde(default)]
    pub stalest_age_ms: u64,
    /// Non-strict sources that failed while gathering.
    #[serde(default)]
    pub source_failures: Vec<SourceFailure>,
}

impl AssemblyOutcome {
    /// Budget utilization percentage (0.0–100.0).
    pub fn utilization_pct(&self) -> f32 {
        if self.budget_tokens == 0 {
            return 0.0;
        }
        (self.payload_tokens() as f32 / self.budget_tokens as f32) * 100.0
    }

    /// Tokens charged for the rendered payload, separators included.
    pub fn payload_tokens(&self) -> usize {
        self.total_tokens + self.separator_tokens
    }

    /// Render the included items as one payload.
    pub fn render(&self) -> String {
        self.included
            .iter()
            .map(|c| c.content())
            .collect::<Vec<_>>()
            .join(&self.separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::SourceKind;

    #[test]
    fn freshness_rank_orders_statuses() {
        assert!(FreshnessStatus::Guaranteed.rank() < FreshnessStatus::Degraded.rank());
        assert!(FreshnessStatus::Degraded.rank() < FreshnessStatus::Unknown.rank());
    }

    #[test]
    fn freshness_status_parses() {
        assert_eq!(
            "degraded".parse::<FreshnessStatus>().unwrap(),
            FreshnessStatus::Degraded
        );
        assert!("stale".parse::<FreshnessStatus>().is_err());
    }

    #[test]
    fn render_joins_included_content() {
        let outcome = AssemblyOutcome {
            included: vec![
                Candidate::new(ContentItem::new(SourceKind::Static, "a", "first"), 2),
                Candidate::new(ContentItem::new(SourceKind::Static, "b", "second"), 2),
            ],
            dropped: vec![],
            total_tokens: 4,
            separator_tokens: 0,
            separator: DEFAULT_SEPARATOR.into(),
            budget_tokens: 8,
            freshness_status: FreshnessStatus::Unknown,
            violations: vec![],
            stalest_age_ms: 0,
            source_failures: vec![],
        };
        assert_eq!(outcome.render(), "first\n\nsecond");
        assert!((outcome.utilization_pct() - 50.0).abs() < f32::EPSILON);
    }

    #[test]
    fn outcome_without_separator_fields_deserializes() {
        let json = r#"{"included":[],"dropped":[],"total_tokens":0,"budget_tokens":10,"freshness_status":"unknown"}"#;
        let outcome: AssemblyOutcome = serde_json::from_str(json).unwrap();
        assert_eq!(outcome.separator, DEFAULT_SEPARATOR);
        assert_eq!(outcome.payload_tokens(), 0);
    }
}
