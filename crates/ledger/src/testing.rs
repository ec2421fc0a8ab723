//! Record fixtures shared by the backend tests.

use chrono::{TimeZone, Utc};
use contextforge_core::{
    AssemblyOutcome, Candidate, ContentItem, DEFAULT_SEPARATOR, FreshnessStatus, LineageRecord,
    SourceKind, SourceTiming,
};
use std::collections::BTreeMap;

/// A small record. `n` orders ids and creation times.
pub fn record(n: u32, context: &str, freshness: FreshnessStatus) -> LineageRecord {
    let item = ContentItem::new(SourceKind::Static, "system", format!("payload {n}"));
    LineageRecord {
        id: format!("0190-{n:04}"),
        created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(n.into()),
        request_digest: format!("digest-{n}"),
        context_name: Some(context.to_string()),
        context_args: BTreeMap::from([("user_id".to_string(), format!("u{n}"))]),
        model_id: "gpt-4o".into(),
        content: format!("payload {n}"),
        outcome: AssemblyOutcome {
            included: vec![Candidate::new(item, 3)],
            dropped: vec![],
            total_tokens: 3,
            separator_tokens: 0,
            separator: DEFAULT_SEPARATOR.into(),
            budget_tokens: 100,
            freshness_status: freshness,
            violations: vec![],
            stalest_age_ms: 0,
            source_failures: vec![],
        },
        per_source_timing: BTreeMap::from([(
            "system".to_string(),
            SourceTiming {
                latency_ms: 1,
                cache_hit: false,
            },
        )]),
        features_used: vec![],
        retrievers_used: vec![],
        cost_estimate_usd: 0.25,
        assembly_latency_ms: 2,
    }
}
