//! Context ledger trait — append-only store of finalized lineage records.
//!
//! Records are never mutated once stored; a correction is a new record.
//! Ids are UUIDv7 strings, so lexical order is creation order and `before`
//! cursors work on the id alone.

use crate::assembly::FreshnessStatus;
use crate::diff::{ContextDiff, compare_records};
use crate::error::LedgerError;
use crate::lineage::LineageRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Filter for [`ContextLedger::list`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerQuery {
    /// Maximum number of records to return.
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Only records with an id strictly lower than this (older).
    #[serde(default)]
    pub before: Option<String>,

    #[serde(default)]
    pub freshness: Option<FreshnessStatus>,

    /// Only records produced by this context definition.
    #[serde(default)]
    pub context_name: Option<String>,
}

fn default_limit() -> usize {
    50
}

impl Default for LedgerQuery {
    fn default() -> Self {
        Self::new(default_limit())
    }
}

impl LedgerQuery {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            before: None,
            freshness: None,
            context_name: None,
        }
    }

    pub fn before(mut self, id: impl Into<String>) -> Self {
        self.before = Some(id.into());
        self
    }

    pub fn with_freshness(mut self, status: FreshnessStatus) -> Self {
        self.freshness = Some(status);
        self
    }

    pub fn with_context_name(mut self, name: impl Into<String>) -> Self {
        self.context_name = Some(name.into());
        self
    }

    /// Whether a record passes every filter except `limit`.
    pub fn matches(&self, record: &LineageRecord) -> bool {
        if let Some(before) = &self.before {
            if record.id.as_str() >= before.as_str() {
                return false;
            }
        }
        if let Some(status) = self.freshness {
            if record.outcome.freshness_status != status {
                return false;
            }
        }
        if let Some(name) = &self.context_name {
            if record.context_name.as_deref() != Some(name.as_str()) {
                return false;
            }
        }
        true
    }
}

/// The replay store.
///
/// Implementations: in-memory, JSONL file, SQLite.
#[async_trait]
pub trait ContextLedger: Send + Sync {
    /// The backend name (e.g., "memory", "file", "sqlite").
    fn name(&self) -> &str;

    /// Append a record. Fails with [`LedgerError::Duplicate`] if the id exists.
    async fn put(&self, record: LineageRecord) -> std::result::Result<(), LedgerError>;

    /// Fetch a record by id.
    async fn get(&self, id: &str) -> std::result::Result<LineageRecord, LedgerError>;

    /// Records matching `query`, newest first.
    async fn list(&self, query: &LedgerQuery) -> std::result::Result<Vec<LineageRecord>, LedgerError>;

    /// Number of stored records.
    async fn count(&self) -> std::result::Result<usize, LedgerError>;

    /// Structural difference between two stored records (`id_a` is the base).
    async fn diff(&self, id_a: &str, id_b: &str) -> std::result::Result<ContextDiff, LedgerError> {
        let base = self.get(id_a).await?;
        let comparison = self.get(id_b).await?;
        Ok(compare_records(&base, &comparison))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_defaults() {
        let q = LedgerQuery::default();
        assert_eq!(q.limit, 50);
        assert!(q.before.is_none());
    }

    #[test]
    fn query_deserializes_with_defaults() {
        let q: LedgerQuery = serde_json::from_str(r#"{"freshness":"degraded"}"#).unwrap();
        assert_eq!(q.limit, 50);
        assert_eq!(q.freshness, Some(FreshnessStatus::Degraded));
    }
}
