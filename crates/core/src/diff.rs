//! Structural comparison of two lineage records.
//!
//! Items are matched by [`ContentItem::identity`](crate::item::ContentItem::identity),
//! features by `(feature_name, entity_id)`, retrievers by name. Output order
//! is deterministic: base order first, then additions in comparison order.
//! The rendered payloads are also diffed line by line.

use crate::assembly::FreshnessStatus;
use crate::lineage::{FeatureLineage, LineageRecord, RetrieverLineage};
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
    Unchanged,
}

impl ChangeType {
    fn label(self) -> &'static str {
        match self {
            Self::Added => "ADDED",
            Self::Removed => "REMOVED",
            Self::Modified => "MODIFIED",
            Self::Unchanged => "UNCHANGED",
        }
    }
}

/// Change of one included item between two assemblies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDiff {
    pub identity: String,
    pub source_name: String,
    pub change_type: ChangeType,
    pub old_tokens: Option<usize>,
    pub new_tokens: Option<usize>,
}

/// Change of one feature value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDiff {
    pub feature_name: String,
    pub entity_id: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub change_type: ChangeType,
    pub old_freshness_ms: Option<u64>,
    pub new_freshness_ms: Option<u64>,
}

/// Change of one retriever's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieverDiff {
    pub retriever_name: String,
    pub query_changed: bool,
    pub old_query: Option<String>,
    pub new_query: Option<String>,
    pub old_results_count: usize,
    pub new_results_count: usize,
    pub items_added: Vec<String>,
    pub items_removed: Vec<String>,
    pub change_type: ChangeType,
}

/// Line-level change of the rendered payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDiff {
    pub lines_added: usize,
    pub lines_removed: usize,
    /// Paired additions and removals, `min(added, removed)` of the raw diff.
    pub lines_changed: usize,
    /// Character similarity in `0.0..=1.0`; 1.0 means identical.
    pub similarity_score: f32,
    pub diff_summary: String,
}

impl ContentDiff {
    pub fn is_unchanged(&self) -> bool {
        self.lines_added + self.lines_removed + self.lines_changed == 0
    }
}

/// Diff two rendered payloads.
pub fn compare_content(base: &str, comparison: &str) -> ContentDiff {
    let (mut added, mut removed) = (0, 0);
    for change in TextDiff::from_lines(base, comparison).iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
            ChangeTag::Equal => {}
        }
    }
    let changed = usize::min(added, removed);
    let (added, removed) = (added - changed, removed - changed);

    let mut parts = Vec::new();
    if added > 0 {
        parts.push(format!("+{added} lines"));
    }
    if removed > 0 {
        parts.push(format!("-{removed} lines"));
    }
    if changed > 0 {
        parts.push(format!("~{changed} lines modified"));
    }
    let diff_summary = if parts.is_empty() {
        "No changes".to_string()
    } else {
        parts.join(", ")
    };

    ContentDiff {
        lines_added: added,
        lines_removed: removed,
        lines_changed: changed,
        similarity_score: TextDiff::from_chars(base, comparison).ratio(),
        diff_summary,
    }
}

/// Comparison of a base (older) record with a comparison (newer) record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDiff {
    pub base_id: String,
    pub comparison_id: String,
    /// `comparison.created_at - base.created_at`.
    pub time_delta_ms: i64,

    pub item_diffs: Vec<ItemDiff>,
    pub items_added: usize,
    pub items_removed: usize,
    pub items_modified: usize,

    pub feature_diffs: Vec<FeatureDiff>,
    pub features_added: usize,
    pub features_removed: usize,
    pub features_modified: usize,

    pub retriever_diffs: Vec<RetrieverDiff>,
    pub retrievers_added: usize,
    pub retrievers_removed: usize,
    pub retrievers_modified: usize,

    pub content_diff: ContentDiff,

    pub token_delta: i64,
    pub cost_delta_usd: f64,

    pub base_freshness: FreshnessStatus,
    pub comparison_freshness: FreshnessStatus,
    pub freshness_improved: bool,

    pub has_changes: bool,
    pub change_summary: String,
}

/// Compare two records.
pub fn compare_records(base: &LineageRecord, comparison: &LineageRecord) -> ContextDiff {
    let (item_diffs, items_added, items_removed, items_modified) = compare_items(base, comparison);
    let (feature_diffs, features_added, features_removed, features_modified) =
        compare_features(&base.features_used, &comparison.features_used);
    let (retriever_diffs, retrievers_added, retrievers_removed, retrievers_modified) =
        compare_retrievers(&base.retrievers_used, &comparison.retrievers_used);
    let content_diff = compare_content(&base.content, &comparison.content);

    let token_delta =
        comparison.outcome.payload_tokens() as i64 - base.outcome.payload_tokens() as i64;
    let cost_delta_usd = comparison.cost_estimate_usd - base.cost_estimate_usd;
    let time_delta_ms = comparison
        .created_at
        .signed_duration_since(base.created_at)
        .num_milliseconds();

    let base_freshness = base.outcome.freshness_status;
    let comparison_freshness = comparison.outcome.freshness_status;

    let has_changes = items_added + items_removed + items_modified > 0
        || features_added + features_removed + features_modified > 0
        || retrievers_added + retrievers_removed + retrievers_modified > 0
        || !content_diff.is_unchanged();

    let mut parts = Vec::new();
    let counts = [
        (items_added, "items added"),
        (items_removed, "items removed"),
        (items_modified, "items modified"),
        (features_added, "features added"),
        (features_removed, "features removed"),
        (features_modified, "features modified"),
        (retrievers_added, "retrievers added"),
        (retrievers_removed, "retrievers removed"),
        (retrievers_modified, "retrievers modified"),
    ];
    for (count, label) in counts {
        if count > 0 {
            parts.push(format!("{count} {label}"));
        }
    }
    if !content_diff.is_unchanged() {
        parts.push(format!("content: {}", content_diff.diff_summary));
    }
    if token_delta != 0 {
        parts.push(format!("tokens: {token_delta:+}"));
    }
    let change_summary = if parts.is_empty() {
        "No changes detected".to_string()
    } else {
        parts.join("; ")
    };

    ContextDiff {
        base_id: base.id.clone(),
        comparison_id: comparison.id.clone(),
        time_delta_ms,
        item_diffs,
        items_added,
        items_removed,
        items_modified,
        feature_diffs,
        features_added,
        features_removed,
        features_modified,
        retriever_diffs,
        retrievers_added,
        retrievers_removed,
        retrievers_modified,
        content_diff,
        token_delta,
        cost_delta_usd,
        base_freshness,
        comparison_freshness,
        freshness_improved: comparison_freshness.rank() < base_freshness.rank(),
        has_changes,
        change_summary,
    }
}

fn compare_items(
    base: &LineageRecord,
    comparison: &LineageRecord,
) -> (Vec<ItemDiff>, usize, usize, usize) {
    let new_map: BTreeMap<String, _> = comparison
        .outcome
        .included
        .iter()
        .map(|c| (c.item.identity(), c))
        .collect();
    let old_keys: BTreeSet<String> = base.outcome.included.iter().map(|c| c.item.identity()).collect();

    let (mut added, mut removed, mut modified) = (0, 0, 0);
    let mut diffs = Vec::new();

    for old in &base.outcome.included {
        let identity = old.item.identity();
        let change_type = match new_map.get(&identity) {
            None => {
                removed += 1;
                ChangeType::Removed
            }
            Some(new) => {
                if new.item.content != old.item.content
                    || new.token_count != old.token_count
                    || new.truncated != old.truncated
                {
                    modified += 1;
                    ChangeType::Modified
                } else {
                    ChangeType::Unchanged
                }
            }
        };
        diffs.push(ItemDiff {
            source_name: old.item.source_name.clone(),
            old_tokens: Some(old.token_count),
            new_tokens: new_map.get(&identity).map(|n| n.token_count),
            identity,
            change_type,
        });
    }

    for new in &comparison.outcome.included {
        let identity = new.item.identity();
        if old_keys.contains(&identity) {
            continue;
        }
        added += 1;
        diffs.push(ItemDiff {
            identity,
            source_name: new.item.source_name.clone(),
            change_type: ChangeType::Added,
            old_tokens: None,
            new_tokens: Some(new.token_count),
        });
    }

    (diffs, added, removed, modified)
}

fn compare_features(
    base: &[FeatureLineage],
    comparison: &[FeatureLineage],
) -> (Vec<FeatureDiff>, usize, usize, usize) {
    let key = |f: &FeatureLineage| (f.feature_name.clone(), f.entity_id.clone());
    let old_map: BTreeMap<_, _> = base.iter().map(|f| (key(f), f)).collect();
    let new_map: BTreeMap<_, _> = comparison.iter().map(|f| (key(f), f)).collect();
    let all_keys: BTreeSet<_> = old_map.keys().chain(new_map.keys()).cloned().collect();

    let (mut added, mut removed, mut modified) = (0, 0, 0);
    let mut diffs = Vec::with_capacity(all_keys.len());

    for k in all_keys {
        let old = old_map.get(&k);
        let new = new_map.get(&k);
        let change_type = match (old, new) {
            (None, Some(_)) => {
                added += 1;
                ChangeType::Added
            }
            (Some(_), None) => {
                removed += 1;
                ChangeType::Removed
            }
            (Some(o), Some(n)) if o.value != n.value => {
                modified += 1;
                ChangeType::Modified
            }
            _ => ChangeType::Unchanged,
        };
        let (feature_name, entity_id) = k;
        diffs.push(FeatureDiff {
            feature_name,
            entity_id,
            old_value: old.map(|f| f.value.clone()),
            new_value: new.map(|f| f.value.clone()),
            change_type,
            old_freshness_ms: old.map(|f| f.freshness_ms),
            new_freshness_ms: new.map(|f| f.freshness_ms),
        });
    }

    (diffs, added, removed, modified)
}

fn compare_retrievers(
    base: &[RetrieverLineage],
    comparison: &[RetrieverLineage],
) -> (Vec<RetrieverDiff>, usize, usize, usize) {
    let old_map: BTreeMap<&str, _> = base.iter().map(|r| (r.retriever_name.as_str(), r)).collect();
    let new_map: BTreeMap<&str, _> = comparison
        .iter()
        .map(|r| (r.retriever_name.as_str(), r))
        .collect();
    let all_names: BTreeSet<&str> = old_map.keys().chain(new_map.keys()).copied().collect();

    let (mut added, mut removed, mut modified) = (0, 0, 0);
    let mut diffs = Vec::with_capacity(all_names.len());

    for name in all_names {
        let old = old_map.get(name);
        let new = new_map.get(name);
        let old_ids: BTreeSet<&String> = old.map(|r| r.item_ids.iter().collect()).unwrap_or_default();
        let new_ids: BTreeSet<&String> = new.map(|r| r.item_ids.iter().collect()).unwrap_or_default();
        let items_added: Vec<String> = new_ids.difference(&old_ids).map(|s| (*s).clone()).collect();
        let items_removed: Vec<String> = old_ids.difference(&new_ids).map(|s| (*s).clone()).collect();
        let query_changed = old.map(|r| &r.query) != new.map(|r| &r.query);

        let change_type = match (old, new) {
            (None, _) => {
                added += 1;
                ChangeType::Added
            }
            (_, None) => {
                removed += 1;
                ChangeType::Removed
            }
            _ if query_changed || !items_added.is_empty() || !items_removed.is_empty() => {
                modified += 1;
                ChangeType::Modified
            }
            _ => ChangeType::Unchanged,
        };

        diffs.push(RetrieverDiff {
            retriever_name: name.to_string(),
            query_changed,
            old_query: old.map(|r| r.query.clone()),
            new_query: new.map(|r| r.query.clone()),
            old_results_count: old.map(|r| r.results_count).unwrap_or(0),
            new_results_count: new.map(|r| r.results_count).unwrap_or(0),
            items_added,
            items_removed,
            change_type,
        });
    }

    (diffs, added, removed, modified)
}

/// Human-readable report. `{:#}` includes per-item detail.
impl std::fmt::Display for ContextDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verbose = f.alternate();
        let rule = "=".repeat(60);

        writeln!(f, "{rule}")?;
        writeln!(f, "Context Diff Report")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Base context:       {}", self.base_id)?;
        writeln!(f, "Comparison context: {}", self.comparison_id)?;
        writeln!(f, "Time delta:         {}ms", self.time_delta_ms)?;
        writeln!(f)?;
        writeln!(f, "Summary:")?;
        writeln!(f, "  {}", self.change_summary)?;
        writeln!(f)?;

        writeln!(f, "Items:")?;
        writeln!(f, "  Added:    {}", self.items_added)?;
        writeln!(f, "  Removed:  {}", self.items_removed)?;
        writeln!(f, "  Modified: {}", self.items_modified)?;
        if verbose {
            for d in self.item_diffs.iter().filter(|d| d.change_type != ChangeType::Unchanged) {
                writeln!(
                    f,
                    "    [{}] {} ({})",
                    d.change_type.label(),
                    d.identity,
                    d.source_name
                )?;
            }
        }
        writeln!(f)?;

        writeln!(f, "Features:")?;
        writeln!(f, "  Added:    {}", self.features_added)?;
        writeln!(f, "  Removed:  {}", self.features_removed)?;
        writeln!(f, "  Modified: {}", self.features_modified)?;
        if verbose {
            for d in self.feature_diffs.iter().filter(|d| d.change_type != ChangeType::Unchanged) {
                writeln!(
                    f,
                    "    [{}] {} ({})",
                    d.change_type.label(),
                    d.feature_name,
                    d.entity_id
                )?;
                if let Some(old) = &d.old_value {
                    writeln!(f, "      Old: {old}")?;
                }
                if let Some(new) = &d.new_value {
                    writeln!(f, "      New: {new}")?;
                }
            }
        }
        writeln!(f)?;

        writeln!(f, "Retrievers:")?;
        writeln!(f, "  Added:    {}", self.retrievers_added)?;
        writeln!(f, "  Removed:  {}", self.retrievers_removed)?;
        writeln!(f, "  Modified: {}", self.retrievers_modified)?;
        if verbose {
            for d in self.retriever_diffs.iter().filter(|d| d.change_type != ChangeType::Unchanged) {
                writeln!(f, "    [{}] {}", d.change_type.label(), d.retriever_name)?;
                if d.query_changed {
                    writeln!(
                        f,
                        "      Query changed: '{}' -> '{}'",
                        d.old_query.as_deref().unwrap_or(""),
                        d.new_query.as_deref().unwrap_or("")
                    )?;
                }
                if !d.items_added.is_empty() {
                    writeln!(f, "      Items added: {}", d.items_added.len())?;
                }
                if !d.items_removed.is_empty() {
                    writeln!(f, "      Items removed: {}", d.items_removed.len())?;
                }
            }
        }
        writeln!(f)?;

        writeln!(f, "Content:")?;
        writeln!(
            f,
            "  Similarity: {:.2}%",
            self.content_diff.similarity_score * 100.0
        )?;
        writeln!(f, "  {}", self.content_diff.diff_summary)?;
        writeln!(f)?;

        writeln!(f, "Token/Cost Changes:")?;
        writeln!(f, "  Tokens: {:+}", self.token_delta)?;
        writeln!(f, "  Cost:   {:+.6} USD", self.cost_delta_usd)?;
        writeln!(f)?;
        writeln!(f, "Freshness:")?;
        writeln!(f, "  Base:       {}", self.base_freshness)?;
        writeln!(f, "  Comparison: {}", self.comparison_freshness)?;
        writeln!(f, "  Improved:   {}", self.freshness_improved)?;
        write!(f, "{rule}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{AssemblyOutcome, DEFAULT_SEPARATOR};
    use crate::item::{Candidate, ContentItem, ITEM_ID_KEY, SourceKind};
    use chrono::{Duration, Utc};

    fn record(id: &str, items: Vec<(&str, &str)>, status: FreshnessStatus) -> LineageRecord {
        let included: Vec<Candidate> = items
            .into_iter()
            .map(|(key, content)| {
                let item = ContentItem::new(SourceKind::Retriever, "docs", content)
                    .with_metadata(ITEM_ID_KEY, key);
                let tokens = content.len().div_ceil(4);
                Candidate::new(item, tokens)
            })
            .collect();
        let total_tokens = included.iter().map(|c| c.token_count).sum();
        LineageRecord {
            id: id.into(),
            created_at: Utc::now(),
            request_digest: "digest".into(),
            context_name: None,
            context_args: Default::default(),
            model_id: "gpt-4o".into(),
            outcome: AssemblyOutcome {
                included,
                dropped: vec![],
                total_tokens,
                separator_tokens: 0,
                separator: DEFAULT_SEPARATOR.into(),
                budget_tokens: 1000,
                freshness_status: status,
                violations: vec![],
                stalest_age_ms: 0,
                source_failures: vec![],
            },
            content: String::new(),
            per_source_timing: Default::default(),
            features_used: vec![],
            retrievers_used: vec![],
            cost_estimate_usd: 0.0,
            assembly_latency_ms: 0,
        }
    }

    fn feature(name: &str, value: serde_json::Value) -> FeatureLineage {
        FeatureLineage {
            feature_name: name.into(),
            entity_id: "u1".into(),
            value,
            timestamp: None,
            freshness_ms: 10,
        }
    }

    #[test]
    fn identical_records_have_no_changes() {
        let a = record("a", vec![("d1", "alpha"), ("d2", "beta")], FreshnessStatus::Guaranteed);
        let mut b = a.clone();
        b.id = "b".into();
        let diff = compare_records(&a, &b);
        assert!(!diff.has_changes);
        assert_eq!(diff.change_summary, "No changes detected");
        assert_eq!(diff.token_delta, 0);
        assert!(diff.item_diffs.iter().all(|d| d.change_type == ChangeType::Unchanged));
    }

    #[test]
    fn item_changes_are_classified() {
        let a = record("a", vec![("d1", "alpha"), ("d2", "beta")], FreshnessStatus::Degraded);
        let mut b = record(
            "b",
            vec![("d1", "alpha prime"), ("d3", "gamma")],
            FreshnessStatus::Guaranteed,
        );
        b.created_at = a.created_at + Duration::milliseconds(1500);

        let diff = compare_records(&a, &b);
        assert_eq!(diff.items_added, 1);
        assert_eq!(diff.items_removed, 1);
        assert_eq!(diff.items_modified, 1);
        assert_eq!(diff.time_delta_ms, 1500);
        assert!(diff.freshness_improved);
        assert!(diff.has_changes);

        let kinds: Vec<_> = diff.item_diffs.iter().map(|d| (d.identity.as_str(), d.change_type)).collect();
        assert_eq!(
            kinds,
            vec![
                ("d1", ChangeType::Modified),
                ("d2", ChangeType::Removed),
                ("d3", ChangeType::Added)
            ]
        );
    }

    #[test]
    fn feature_value_changes_detected() {
        let mut a = record("a", vec![], FreshnessStatus::Unknown);
        let mut b = record("b", vec![], FreshnessStatus::Unknown);
        a.features_used = vec![
            feature("tier", serde_json::json!("gold")),
            feature("score", serde_json::json!(1)),
        ];
        b.features_used = vec![
            feature("tier", serde_json::json!("silver")),
            feature("region", serde_json::json!("eu")),
        ];

        let diff = compare_records(&a, &b);
        assert_eq!(diff.features_added, 1);
        assert_eq!(diff.features_removed, 1);
        assert_eq!(diff.features_modified, 1);
        let tier = diff.feature_diffs.iter().find(|d| d.feature_name == "tier").unwrap();
        assert_eq!(tier.old_value, Some(serde_json::json!("gold")));
        assert_eq!(tier.new_value, Some(serde_json::json!("silver")));
        assert!(diff.change_summary.contains("1 features modified"));
    }

    #[test]
    fn retriever_query_change_is_modification() {
        let mut a = record("a", vec![], FreshnessStatus::Unknown);
        let mut b = record("b", vec![], FreshnessStatus::Unknown);
        a.retrievers_used = vec![RetrieverLineage {
            retriever_name: "docs".into(),
            query: "refund policy".into(),
            results_count: 2,
            latency_ms: 5,
            item_ids: vec!["d1".into(), "d2".into()],
        }];
        b.retrievers_used = vec![RetrieverLineage {
            retriever_name: "docs".into(),
            query: "refund window".into(),
            results_count: 2,
            latency_ms: 7,
            item_ids: vec!["d2".into(), "d3".into()],
        }];

        let diff = compare_records(&a, &b);
        assert_eq!(diff.retrievers_modified, 1);
        let rd = &diff.retriever_diffs[0];
        assert!(rd.query_changed);
        assert_eq!(rd.items_added, vec!["d3".to_string()]);
        assert_eq!(rd.items_removed, vec!["d1".to_string()]);
    }

    #[test]
    fn report_renders_sections() {
        let a = record("a", vec![("d1", "alpha")], FreshnessStatus::Guaranteed);
        let b = record("b", vec![("d2", "beta")], FreshnessStatus::Degraded);
        let diff = compare_records(&a, &b);

        let short = diff.to_string();
        assert!(short.contains("Context Diff Report"));
        assert!(short.contains("Freshness:"));
        assert!(!short.contains("[ADDED]"));

        let long = format!("{diff:#}");
        assert!(long.contains("[ADDED] d2"));
        assert!(long.contains("[REMOVED] d1"));
        assert!(long.contains("Similarity:"));
    }

    #[test]
    fn content_lines_are_counted() {
        let diff = compare_content(
            "system\nalpha\nbeta\n",
            "system\nalpha v2\nbeta\ngamma\ndelta\n",
        );
        assert_eq!(diff.lines_changed, 1);
        assert_eq!(diff.lines_added, 2);
        assert_eq!(diff.lines_removed, 0);
        assert_eq!(diff.diff_summary, "+2 lines, ~1 lines modified");
        assert!(diff.similarity_score > 0.5 && diff.similarity_score < 1.0);
    }

    #[test]
    fn identical_content_is_fully_similar() {
        let diff = compare_content("same\npayload", "same\npayload");
        assert!(diff.is_unchanged());
        assert_eq!(diff.diff_summary, "No changes");
        assert!((diff.similarity_score - 1.0).abs() < f32::EPSILON);

        let empty = compare_content("", "");
        assert!(empty.is_unchanged());
        assert!((empty.similarity_score - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn payload_change_alone_is_a_change() {
        let mut a = record("a", vec![], FreshnessStatus::Unknown);
        let mut b = record("b", vec![], FreshnessStatus::Unknown);
        a.content = "You are helpful.\n\nRefund window is 30 days.\n\nEscalate to a human.".into();
        b.content = "You are helpful.\n\nEscalate to a human.".into();

        let diff = compare_records(&a, &b);
        assert!(diff.has_changes);
        assert_eq!(diff.content_diff.lines_removed, 2);
        assert_eq!(diff.change_summary, "content: -2 lines");
        assert!(diff.to_string().contains("-2 lines"));
    }
}
