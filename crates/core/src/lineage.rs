//! Lineage records — the replayable provenance of one assembly.

use crate::assembly::AssemblyOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How long a source took and whether the cache served it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTiming {
    pub latency_ms: u64,
    pub cache_hit: bool,
}

/// A feature value that took part in an assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureLineage {
    pub feature_name: String,
    pub entity_id: String,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Age of the value at assembly time.
    pub freshness_ms: u64,
}

/// One retriever call made during an assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieverLineage {
    pub retriever_name: String,
    pub query: String,
    pub results_count: usize,
    pub latency_ms: u64,
    /// Identities of the returned items, in result order.
    #[serde(default)]
    pub item_ids: Vec<String>,
}

/// Immutable record of a finalized assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageRecord {
    /// Time-ordered unique identifier (UUIDv7).
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// SHA-256 (hex) over the canonical request.
    pub request_digest: String,

    /// Name of the context definition, for replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_name: Option<String>,
    /// Arguments the definition was run with, for replay.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context_args: BTreeMap<String, String>,

    pub model_id: String,
    pub outcome: AssemblyOutcome,
    /// The rendered payload handed to the caller.
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub per_source_timing: BTreeMap<String, SourceTiming>,
    #[serde(default)]
    pub features_used: Vec<FeatureLineage>,
    #[serde(default)]
    pub retrievers_used: Vec<RetrieverLineage>,

    /// Estimated USD cost of sending the context as model input.
    pub cost_estimate_usd: f64,
    /// Wall time of the whole assembly.
    #[serde(default)]
    pub assembly_latency_ms: u64,
}

impl LineageRecord {
    pub fn total_tokens(&self) -> usize {
        self.outcome.total_tokens
    }

    /// Whether any source was served from cache.
    pub fn any_cache_hit(&self) -> bool {
        self.per_source_timing.values().any(|t| t.cache_hit)
    }
}
