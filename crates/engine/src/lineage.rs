//! Builds the immutable [`LineageRecord`] for a finished assembly.

use crate::gateway::SourceCall;
use crate::sources::meta;
use chrono::{DateTime, Utc};
use contextforge_core::{
    AssemblyOutcome, Candidate, Clock, ContentItem, FeatureLineage, IdGenerator, LineageRecord,
    RetrieverLineage, SourceKind, SourceTiming,
};
use contextforge_telemetry::PricingTable;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything known about an assembly at the moment it is recorded.
pub struct RecordInput<'a> {
    pub context_name: Option<&'a str>,
    pub context_args: &'a BTreeMap<String, String>,
    pub model_id: &'a str,
    pub budget_tokens: usize,
    pub freshness_sla: Option<Duration>,
    /// All gathered items, before packing.
    pub candidates: &'a [ContentItem],
    pub outcome: AssemblyOutcome,
    /// Successful calls, binding order.
    pub calls: &'a [SourceCall],
    /// Every consulted source, failed and timed-out ones included.
    pub timings: &'a BTreeMap<String, SourceTiming>,
    pub assembly_latency_ms: u64,
}

pub struct LineageRecorder {
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    pricing: Arc<PricingTable>,
}

impl LineageRecorder {
    pub fn new(ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>, pricing: Arc<PricingTable>) -> Self {
        Self { ids, clock, pricing }
    }

    pub fn record(&self, input: RecordInput<'_>) -> LineageRecord {
        let created_at = self.clock.now();
        let request_digest = request_digest(
            input.budget_tokens,
            input.model_id,
            input.freshness_sla,
            input.candidates,
        );

        let cost_estimate_usd = self
            .pricing
            .context_cost(input.model_id, input.outcome.payload_tokens());

        LineageRecord {
            id: self.ids.next_id(),
            created_at,
            request_digest,
            context_name: input.context_name.map(str::to_string),
            context_args: input.context_args.clone(),
            model_id: input.model_id.to_string(),
            content: input.outcome.render(),
            per_source_timing: input.timings.clone(),
            features_used: features_used(&input.outcome.included, created_at),
            retrievers_used: retrievers_used(input.calls, input.candidates),
            cost_estimate_usd,
            assembly_latency_ms: input.assembly_latency_ms,
            outcome: input.outcome,
        }
    }
}

/// SHA-256 (hex) over the canonical JSON of the request.
///
/// `serde_json::Value` objects keep keys sorted, so equal requests always
/// hash equal.
pub fn request_digest(
    budget_tokens: usize,
    model_id: &str,
    freshness_sla: Option<Duration>,
    candidates: &[ContentItem],
) -> String {
    let canonical = serde_json::json!({
        "budget_tokens": budget_tokens,
        "model_id": model_id,
        "freshness_sla_ms": freshness_sla.map(|d| d.as_millis() as u64),
        "candidates": candidates,
    });
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Features that made it into the payload.
fn features_used(included: &[Candidate], now: DateTime<Utc>) -> Vec<FeatureLineage> {
    included
        .iter()
        .map(|c| &c.item)
        .filter(|c| c.source_kind == SourceKind::Feature)
        .filter_map(|c| {
            let feature_name = c.metadata.get(meta::FEATURE_NAME)?.clone();
            let entity_id = c.metadata.get(meta::ENTITY_ID).cloned().unwrap_or_default();
            let value = c
                .metadata
                .get(meta::VALUE)
                .map(|raw| {
                    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.clone()))
                })
                .unwrap_or(serde_json::Value::Null);
            let freshness_ms = c
                .source_timestamp
                .map(|ts| (now - ts).num_milliseconds().max(0) as u64)
                .unwrap_or(0);
            Some(FeatureLineage {
                feature_name,
                entity_id,
                value,
                timestamp: c.source_timestamp,
                freshness_ms,
            })
        })
        .collect()
}

fn retrievers_used(calls: &[SourceCall], candidates: &[ContentItem]) -> Vec<RetrieverLineage> {
    calls
        .iter()
        .filter(|call| call.kind == SourceKind::Retriever)
        .map(|call| RetrieverLineage {
            retriever_name: call.source_name.clone(),
            query: call.query.clone().unwrap_or_default(),
            results_count: call.item_count,
            latency_ms: call.timing.latency_ms,
            item_ids: candidates
                .iter()
                .filter(|c| c.source_name == call.source_name)
                .map(ContentItem::identity)
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use contextforge_core::item::ITEM_ID_KEY;
    use contextforge_core::{DEFAULT_SEPARATOR, FreshnessStatus, ManualClock};

    struct FixedIds;

    impl IdGenerator for FixedIds {
        fn next_id(&self) -> String {
            "rec-1".into()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn recorder() -> LineageRecorder {
        LineageRecorder::new(
            Arc::new(FixedIds),
            Arc::new(ManualClock::new(now())),
            Arc::new(PricingTable::with_defaults()),
        )
    }

    fn outcome(included: Vec<Candidate>, total: usize) -> AssemblyOutcome {
        AssemblyOutcome {
            included,
            dropped: vec![],
            total_tokens: total,
            separator_tokens: 0,
            separator: DEFAULT_SEPARATOR.into(),
            budget_tokens: 1000,
            freshness_status: FreshnessStatus::Unknown,
            violations: vec![],
            stalest_age_ms: 0,
            source_failures: vec![],
        }
    }

    #[test]
    fn digest_is_stable_and_sensitive() {
        let items = vec![ContentItem::new(SourceKind::Static, "s", "hello")];
        let a = request_digest(100, "gpt-4o", None, &items);
        let b = request_digest(100, "gpt-4o", None, &items);
        let c = request_digest(101, "gpt-4o", None, &items);
        let d = request_digest(100, "gpt-4o", Some(Duration::from_secs(1)), &items);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn record_derives_features_retrievers_and_cost() {
        let feature = ContentItem::new(SourceKind::Feature, "user", "tier: gold")
            .with_timestamp(now() - chrono::Duration::seconds(5))
            .with_metadata(meta::FEATURE_NAME, "tier")
            .with_metadata(meta::ENTITY_ID, "u1")
            .with_metadata(meta::VALUE, "\"gold\"");
        let doc = ContentItem::new(SourceKind::Retriever, "docs", "refund policy")
            .with_metadata(ITEM_ID_KEY, "doc-7");
        let candidates = vec![feature.clone(), doc.clone()];
        let calls = vec![
            SourceCall {
                source_name: "user".into(),
                kind: SourceKind::Feature,
                query: None,
                item_count: 1,
                timing: SourceTiming { latency_ms: 3, cache_hit: false },
            },
            SourceCall {
                source_name: "docs".into(),
                kind: SourceKind::Retriever,
                query: Some("refunds".into()),
                item_count: 1,
                timing: SourceTiming { latency_ms: 12, cache_hit: true },
            },
        ];
        let args = BTreeMap::from([("user_id".to_string(), "u1".to_string())]);
        let mut timings: BTreeMap<String, SourceTiming> =
            calls.iter().map(|c| (c.source_name.clone(), c.timing)).collect();
        timings.insert("crm".into(), SourceTiming { latency_ms: 50, cache_hit: false });

        let record = recorder().record(RecordInput {
            context_name: Some("support"),
            context_args: &args,
            model_id: "openai/gpt-4o",
            budget_tokens: 1000,
            freshness_sla: None,
            candidates: &candidates,
            outcome: outcome(
                vec![Candidate::new(feature, 3), Candidate::new(doc, 4)],
                1_000,
            ),
            calls: &calls,
            timings: &timings,
            assembly_latency_ms: 20,
        });

        assert_eq!(record.id, "rec-1");
        assert_eq!(record.created_at, now());
        assert_eq!(record.context_name.as_deref(), Some("support"));
        assert_eq!(record.content, "tier: gold\n\nrefund policy");
        assert_eq!(record.features_used.len(), 1);
        assert_eq!(record.features_used[0].value, serde_json::json!("gold"));
        assert_eq!(record.features_used[0].freshness_ms, 5_000);
        assert_eq!(record.retrievers_used.len(), 1);
        assert_eq!(record.retrievers_used[0].query, "refunds");
        assert_eq!(record.retrievers_used[0].item_ids, ["doc-7"]);
        assert!(record.per_source_timing["docs"].cache_hit);
        assert_eq!(record.per_source_timing["crm"].latency_ms, 50);
        assert!(record.any_cache_hit());
        // 1000 tokens of gpt-4o input at $2.50/M
        assert!((record.cost_estimate_usd - 0.0025).abs() < 1e-12);
    }

    #[test]
    fn unknown_model_costs_zero() {
        let record = recorder().record(RecordInput {
            context_name: None,
            context_args: &BTreeMap::new(),
            model_id: "local/custom",
            budget_tokens: 10,
            freshness_sla: None,
            candidates: &[],
            outcome: outcome(vec![], 0),
            calls: &[],
            timings: &BTreeMap::new(),
            assembly_latency_ms: 0,
        });
        assert_eq!(record.cost_estimate_usd, 0.0);
        assert!(record.features_used.is_empty());
        assert!(record.retrievers_used.is_empty());
    }

    #[test]
    fn dropped_features_are_not_lineage() {
        let feature = |name: &str, value: &str| {
            ContentItem::new(SourceKind::Feature, "user", format!("{name}: {value}"))
                .with_metadata(meta::FEATURE_NAME, name)
                .with_metadata(meta::ENTITY_ID, "u1")
                .with_metadata(meta::VALUE, format!("\"{value}\""))
        };
        let tier = feature("tier", "gold");
        let history = feature("history", "long purchase history");
        let candidates = vec![tier.clone(), history.clone()];
        let mut outcome = outcome(vec![Candidate::new(tier, 3)], 3);
        outcome.dropped = vec![Candidate::new(history, 900)];

        let record = recorder().record(RecordInput {
            context_name: None,
            context_args: &BTreeMap::new(),
            model_id: "gpt-4o",
            budget_tokens: 10,
            freshness_sla: None,
            candidates: &candidates,
            outcome,
            calls: &[],
            timings: &BTreeMap::new(),
            assembly_latency_ms: 0,
        });

        let names: Vec<&str> =
            record.features_used.iter().map(|f| f.feature_name.as_str()).collect();
        assert_eq!(names, ["tier"]);
        assert_eq!(record.outcome.dropped.len(), 1);
    }
}
