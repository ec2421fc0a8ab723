//! In-memory ledger — useful for testing and ephemeral services.

use async_trait::async_trait;
use contextforge_core::{ContextLedger, LedgerError, LedgerQuery, LineageRecord};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Records keyed by id. Ids are time-ordered, so the map iterates oldest
/// first.
pub struct InMemoryLedger {
    records: Arc<RwLock<BTreeMap<String, LineageRecord>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Newest-first records matching `query`, at most `query.limit`.
pub(crate) fn select<'a>(
    records: impl DoubleEndedIterator<Item = &'a LineageRecord>,
    query: &LedgerQuery,
) -> Vec<LineageRecord> {
    records
        .rev()
        .filter(|r| query.matches(r))
        .take(query.limit)
        .cloned()
        .collect()
}

#[async_trait]
impl ContextLedger for InMemoryLedger {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, record: LineageRecord) -> Result<(), LedgerError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(LedgerError::Duplicate(record.id));
        }
        debug!(record_id = %record.id, "Stored context record");
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<LineageRecord, LedgerError> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    async fn list(&self, query: &LedgerQuery) -> Result<Vec<LineageRecord>, LedgerError> {
        let records = self.records.read().await;
        Ok(select(records.values(), query))
    }

    async fn count(&self) -> Result<usize, LedgerError> {
        Ok(self.records.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::record;
    use contextforge_core::FreshnessStatus;

    #[tokio::test]
    async fn put_and_get() {
        let ledger = InMemoryLedger::new();
        let rec = record(1, "support", FreshnessStatus::Guaranteed);
        ledger.put(rec.clone()).await.unwrap();

        assert_eq!(ledger.get(&rec.id).await.unwrap(), rec);
        assert_eq!(ledger.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_id_is_not_found() {
        let ledger = InMemoryLedger::new();
        let err = ledger.get("nope").await.unwrap_err();
        assert_eq!(err, LedgerError::NotFound("nope".into()));
    }

    #[tokio::test]
    async fn records_are_never_overwritten() {
        let ledger = InMemoryLedger::new();
        let original = record(1, "support", FreshnessStatus::Guaranteed);
        ledger.put(original.clone()).await.unwrap();

        let mut altered = original.clone();
        altered.content = "tampered".into();
        let err = ledger.put(altered).await.unwrap_err();

        assert!(matches!(err, LedgerError::Duplicate(_)));
        assert_eq!(ledger.get(&original.id).await.unwrap().content, original.content);
    }

    #[tokio::test]
    async fn list_is_newest_first_with_filters() {
        let ledger = InMemoryLedger::new();
        for n in 1..=5 {
            let status = if n % 2 == 0 {
                FreshnessStatus::Degraded
            } else {
                FreshnessStatus::Guaranteed
            };
            let context = if n <= 3 { "support" } else { "sales" };
            ledger.put(record(n, context, status)).await.unwrap();
        }

        let all = ledger.list(&LedgerQuery::new(10)).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["0190-0005", "0190-0004", "0190-0003", "0190-0002", "0190-0001"]);

        let page = ledger.list(&LedgerQuery::new(2).before("0190-0004")).await.unwrap();
        let ids: Vec<&str> = page.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["0190-0003", "0190-0002"]);

        let degraded = ledger
            .list(&LedgerQuery::new(10).with_freshness(FreshnessStatus::Degraded))
            .await
            .unwrap();
        assert_eq!(degraded.len(), 2);

        let sales = ledger
            .list(&LedgerQuery::new(10).with_context_name("sales"))
            .await
            .unwrap();
        assert_eq!(sales.len(), 2);
    }

    #[tokio::test]
    async fn diff_between_stored_records() {
        let ledger = InMemoryLedger::new();
        ledger.put(record(1, "support", FreshnessStatus::Degraded)).await.unwrap();
        ledger.put(record(2, "support", FreshnessStatus::Guaranteed)).await.unwrap();

        let diff = ledger.diff("0190-0001", "0190-0002").await.unwrap();
        assert!(diff.has_changes);
        assert!(diff.freshness_improved);
        assert_eq!(diff.time_delta_ms, 1_000);

        let err = ledger.diff("0190-0001", "missing").await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }
}
