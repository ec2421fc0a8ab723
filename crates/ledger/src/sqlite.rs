//! SQLite ledger.
//!
//! One table, `contexts`, holding the full record as JSON next to the
//! columns `list` filters and orders on. Rows are only ever inserted; a
//! duplicate id violates the primary key and surfaces as
//! [`LedgerError::Duplicate`].

use async_trait::async_trait;
use contextforge_core::{ContextLedger, LedgerError, LedgerQuery, LineageRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (or create) a ledger database.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| LedgerError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| LedgerError::Storage(format!("Failed to open SQLite: {e}")))?;

        let ledger = Self { pool };
        ledger.run_migrations().await?;
        info!("SQLite ledger initialized at {path}");
        Ok(ledger)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, LedgerError> {
        let ledger = Self { pool };
        ledger.run_migrations().await?;
        Ok(ledger)
    }

    async fn run_migrations(&self) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contexts (
                id               TEXT PRIMARY KEY NOT NULL,
                created_at       TEXT NOT NULL,
                context_name     TEXT,
                model_id         TEXT NOT NULL,
                freshness_status TEXT NOT NULL,
                total_tokens     INTEGER NOT NULL,
                cost_usd         REAL NOT NULL,
                record           TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("contexts table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_contexts_name ON contexts(context_name, id DESC)")
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("context_name index: {e}")))?;

        debug!("SQLite ledger migrations complete");
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<LineageRecord, LedgerError> {
        let json: String = row
            .try_get("record")
            .map_err(|e| LedgerError::Storage(format!("record column: {e}")))?;
        serde_json::from_str(&json).map_err(|e| LedgerError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl ContextLedger for SqliteLedger {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn put(&self, record: LineageRecord) -> Result<(), LedgerError> {
        let json = serde_json::to_string(&record)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO contexts
                (id, created_at, context_name, model_id, freshness_status, total_tokens, cost_usd, record)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&record.id)
        .bind(record.created_at.to_rfc3339())
        .bind(&record.context_name)
        .bind(&record.model_id)
        .bind(record.outcome.freshness_status.as_str())
        .bind(record.outcome.total_tokens as i64)
        .bind(record.cost_estimate_usd)
        .bind(&json)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(record_id = %record.id, "Stored context record");
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(LedgerError::Duplicate(record.id))
            }
            Err(e) => Err(LedgerError::Storage(format!("INSERT failed: {e}"))),
        }
    }

    async fn get(&self, id: &str) -> Result<LineageRecord, LedgerError> {
        let row = sqlx::query("SELECT record FROM contexts WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("SELECT failed: {e}")))?;

        match row {
            Some(row) => Self::row_to_record(&row),
            None => Err(LedgerError::NotFound(id.to_string())),
        }
    }

    async fn list(&self, query: &LedgerQuery) -> Result<Vec<LineageRecord>, LedgerError> {
        let mut conditions = Vec::new();
        if query.before.is_some() {
            conditions.push("id < ?");
        }
        if query.freshness.is_some() {
            conditions.push("freshness_status = ?");
        }
        if query.context_name.is_some() {
            conditions.push("context_name = ?");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!("SELECT record FROM contexts {where_clause} ORDER BY id DESC LIMIT ?");

        let mut q = sqlx::query(&sql);
        if let Some(before) = &query.before {
            q = q.bind(before);
        }
        if let Some(status) = query.freshness {
            q = q.bind(status.as_str());
        }
        if let Some(name) = &query.context_name {
            q = q.bind(name);
        }
        let rows = q
            .bind(query.limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("List failed: {e}")))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn count(&self) -> Result<usize, LedgerError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM contexts")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("COUNT failed: {e}")))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| LedgerError::Storage(format!("count column: {e}")))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::record;
    use contextforge_core::FreshnessStatus;

    async fn memory_ledger() -> SqliteLedger {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteLedger::from_pool(pool).await.unwrap()
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let ledger = memory_ledger().await;
        let rec = record(1, "support", FreshnessStatus::Guaranteed);
        ledger.put(rec.clone()).await.unwrap();

        assert_eq!(ledger.get(&rec.id).await.unwrap(), rec);
        assert_eq!(ledger.count().await.unwrap(), 1);
        assert!(matches!(
            ledger.get("missing").await.unwrap_err(),
            LedgerError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let ledger = memory_ledger().await;
        ledger.put(record(1, "a", FreshnessStatus::Unknown)).await.unwrap();
        let err = ledger.put(record(1, "b", FreshnessStatus::Unknown)).await.unwrap_err();
        assert_eq!(err, LedgerError::Duplicate("0190-0001".into()));
        assert_eq!(ledger.get("0190-0001").await.unwrap().context_name.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn list_filters_and_orders() {
        let ledger = memory_ledger().await;
        for n in 1..=6 {
            let status = if n % 3 == 0 {
                FreshnessStatus::Degraded
            } else {
                FreshnessStatus::Guaranteed
            };
            let context = if n % 2 == 0 { "even" } else { "odd" };
            ledger.put(record(n, context, status)).await.unwrap();
        }

        let newest = ledger.list(&LedgerQuery::new(2)).await.unwrap();
        let ids: Vec<&str> = newest.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["0190-0006", "0190-0005"]);

        let combined = ledger
            .list(
                &LedgerQuery::new(10)
                    .before("0190-0006")
                    .with_context_name("odd")
                    .with_freshness(FreshnessStatus::Degraded),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = combined.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["0190-0003"]);
    }

    #[tokio::test]
    async fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("ledger.sqlite").display());

        {
            let ledger = SqliteLedger::new(&url).await.unwrap();
            ledger.put(record(7, "x", FreshnessStatus::Guaranteed)).await.unwrap();
        }

        let reopened = SqliteLedger::new(&url).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        assert_eq!(reopened.get("0190-0007").await.unwrap().model_id, "gpt-4o");
    }
}
