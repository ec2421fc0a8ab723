//! Collaborator interfaces — feature stores, retrievers, clocks, id generators.
//!
//! The engine assumes nothing about these beyond what the traits promise.
//! Implementations live outside the core (or in tests).

use crate::error::SourceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use uuid::Uuid;

/// A feature value with the time it was computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureValue {
    pub value: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Point lookup of computed features.
#[async_trait]
pub trait FeatureAccessor: Send + Sync {
    /// Fetch a feature for an entity.
    ///
    /// Unknown features fail with [`SourceError::NotFound`]; a known feature
    /// with no data for this entity returns `Ok(None)`.
    async fn get(
        &self,
        feature_name: &str,
        entity_id: &str,
    ) -> std::result::Result<Option<FeatureValue>, SourceError>;
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Similarity search over some document index.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Search for `query`. No matches is an empty vec, never an error.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: &BTreeMap<String, String>,
    ) -> std::result::Result<Vec<RetrievedDocument>, SourceError>;
}

/// Source of "now" for freshness comparisons.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used in tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Produces globally unique, time-sortable identifiers.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// UUIDv7 ids: millisecond timestamp prefix plus random bits, so the string
/// form sorts by creation time.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV7Generator;

impl IdGenerator for UuidV7Generator {
    fn next_id(&self) -> String {
        Uuid::now_v7().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_v7_ids_are_unique_and_sortable() {
        let generator = UuidV7Generator;
        let first = generator.next_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = generator.next_id();
        assert_ne!(first, second);
        assert!(first < second);
        assert_eq!(Uuid::parse_str(&first).unwrap().get_version_num(), 7);
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(5));
    }
}
