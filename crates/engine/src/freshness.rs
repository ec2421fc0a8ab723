//! Freshness classification of an assembled context.

use chrono::{DateTime, Utc};
use contextforge_core::{Candidate, FreshnessStatus, FreshnessViolation};
use std::time::Duration;

/// Freshness verdict for a set of included candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Freshness {
    pub status: FreshnessStatus,
    pub violations: Vec<FreshnessViolation>,
    /// Age of the oldest timestamped item, 0 if none.
    pub stalest_age_ms: u64,
}

pub struct FreshnessClassifier;

impl FreshnessClassifier {
    /// Classify `included` against `sla` at time `now`.
    ///
    /// Without an SLA the status is `Unknown`. Items without a timestamp
    /// never violate. Timestamps in the future count as age zero.
    pub fn classify(
        included: &[Candidate],
        sla: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Freshness {
        let ages: Vec<(&str, u64)> = included
            .iter()
            .filter_map(|c| {
                c.item
                    .source_timestamp
                    .map(|ts| (c.source_name(), age_ms(ts, now)))
            })
            .collect();
        let stalest_age_ms = ages.iter().map(|(_, age)| *age).max().unwrap_or(0);

        let Some(sla) = sla else {
            return Freshness {
                status: FreshnessStatus::Unknown,
                violations: Vec::new(),
                stalest_age_ms,
            };
        };

        let sla_ms = sla.as_millis() as u64;
        let violations: Vec<FreshnessViolation> = ages
            .into_iter()
            .filter(|(_, age)| *age > sla_ms)
            .map(|(name, age)| FreshnessViolation {
                source_name: name.to_string(),
                age_ms: age,
                sla_ms,
            })
            .collect();

        let status = if violations.is_empty() {
            FreshnessStatus::Guaranteed
        } else {
            FreshnessStatus::Degraded
        };

        Freshness {
            status,
            violations,
            stalest_age_ms,
        }
    }
}

fn age_ms(ts: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - ts).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use contextforge_core::{ContentItem, SourceKind};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn aged(name: &str, age_secs: i64) -> Candidate {
        let item = ContentItem::new(SourceKind::Feature, name, "v")
            .with_timestamp(now() - chrono::Duration::seconds(age_secs));
        Candidate::new(item, 1)
    }

    fn untimed(name: &str) -> Candidate {
        Candidate::new(ContentItem::new(SourceKind::Static, name, "v"), 1)
    }

    #[test]
    fn no_sla_is_unknown() {
        let f = FreshnessClassifier::classify(&[aged("a", 9_999)], None, now());
        assert_eq!(f.status, FreshnessStatus::Unknown);
        assert!(f.violations.is_empty());
        assert_eq!(f.stalest_age_ms, 9_999_000);
    }

    #[test]
    fn all_within_sla_is_guaranteed() {
        let included = [aged("a", 10), aged("b", 59), untimed("c")];
        let f = FreshnessClassifier::classify(&included, Some(Duration::from_secs(60)), now());
        assert_eq!(f.status, FreshnessStatus::Guaranteed);
        assert_eq!(f.stalest_age_ms, 59_000);
    }

    #[test]
    fn stale_item_degrades() {
        let included = [aged("fresh", 10), aged("stale", 120)];
        let f = FreshnessClassifier::classify(&included, Some(Duration::from_secs(60)), now());
        assert_eq!(f.status, FreshnessStatus::Degraded);
        assert_eq!(
            f.violations,
            vec![FreshnessViolation {
                source_name: "stale".into(),
                age_ms: 120_000,
                sla_ms: 60_000,
            }]
        );
    }

    #[test]
    fn age_equal_to_sla_is_not_a_violation() {
        let f = FreshnessClassifier::classify(&[aged("a", 60)], Some(Duration::from_secs(60)), now());
        assert_eq!(f.status, FreshnessStatus::Guaranteed);
    }

    #[test]
    fn future_timestamps_count_as_fresh() {
        let f = FreshnessClassifier::classify(&[aged("a", -30)], Some(Duration::ZERO), now());
        assert_eq!(f.status, FreshnessStatus::Guaranteed);
        assert_eq!(f.stalest_age_ms, 0);
    }

    #[test]
    fn untimed_items_never_violate() {
        let f = FreshnessClassifier::classify(&[untimed("s")], Some(Duration::ZERO), now());
        assert_eq!(f.status, FreshnessStatus::Guaranteed);
        assert!(f.violations.is_empty());
    }

    #[test]
    fn removing_stale_items_never_worsens_status() {
        let sla = Some(Duration::from_secs(60));
        let all = [aged("a", 10), aged("b", 100), aged("c", 200)];
        let full = FreshnessClassifier::classify(&all, sla, now());
        for skip in 0..all.len() {
            let subset: Vec<Candidate> = all
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, c)| c.clone())
                .collect();
            let partial = FreshnessClassifier::classify(&subset, sla, now());
            assert!(partial.status.rank() <= full.status.rank());
            assert!(partial.violations.len() <= full.violations.len());
        }
    }

    #[test]
    fn raising_the_sla_never_worsens_status() {
        let items = [aged("a", 5), aged("b", 45), aged("c", 120), aged("d", 900), untimed("e")];
        let first = FreshnessClassifier::classify(&items, Some(Duration::ZERO), now());
        assert_eq!(first.status, FreshnessStatus::Degraded);
        assert_eq!(first.violations.len(), 4);

        let mut prev: Option<Freshness> = None;
        for sla_secs in [0, 1, 5, 30, 45, 46, 119, 120, 600, 900, 3_600] {
            let sla = Some(Duration::from_secs(sla_secs));
            let current = FreshnessClassifier::classify(&items, sla, now());
            if let Some(prev) = &prev {
                assert!(current.status.rank() <= prev.status.rank(), "sla {sla_secs}s");
                assert!(current.violations.len() <= prev.violations.len(), "sla {sla_secs}s");
            }
            assert_eq!(current.stalest_age_ms, 900_000);
            prev = Some(current);
        }
        let last = prev.unwrap();
        assert_eq!(last.status, FreshnessStatus::Guaranteed);
        assert!(last.violations.is_empty());
    }
}
