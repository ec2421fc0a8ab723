//! File-based ledger — append-only JSON-lines storage.
//!
//! Each line is one JSON-encoded `LineageRecord`. The file is read once on
//! open; every `put` appends a single line and never rewrites earlier ones.
//!
//! Default location: `~/.contextforge/ledger.jsonl`

use crate::in_memory::select;
use async_trait::async_trait;
use contextforge_core::{ContextLedger, LedgerError, LedgerQuery, LineageRecord};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub struct FileLedger {
    path: PathBuf,
    records: Arc<RwLock<BTreeMap<String, LineageRecord>>>,
}

impl FileLedger {
    /// Open the ledger at `path`, loading existing records.
    ///
    /// A missing file starts empty; it is created on the first `put`.
    pub fn new(path: PathBuf) -> Self {
        let records = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = records.len(), "File ledger loaded");
        Self {
            path,
            records: Arc::new(RwLock::new(records)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> BTreeMap<String, LineageRecord> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return BTreeMap::new(),
        };

        let mut records = BTreeMap::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LineageRecord>(line) {
                Ok(record) => {
                    // First write wins; a later line with the same id is not trusted.
                    records.entry(record.id.clone()).or_insert(record);
                }
                Err(e) => warn!(line = line_no + 1, error = %e, "Skipping corrupted ledger line"),
            }
        }
        records
    }

    fn append_line(&self, line: &str) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LedgerError::Storage(format!("Failed to create ledger directory: {e}"))
            })?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LedgerError::Storage(format!("Failed to open ledger file: {e}")))?;
        writeln!(file, "{line}")
            .map_err(|e| LedgerError::Storage(format!("Failed to append to ledger file: {e}")))?;
        file.sync_data()
            .map_err(|e| LedgerError::Storage(format!("Failed to sync ledger file: {e}")))
    }
}

#[async_trait]
impl ContextLedger for FileLedger {
    fn name(&self) -> &str {
        "file"
    }

    async fn put(&self, record: LineageRecord) -> Result<(), LedgerError> {
        let line = serde_json::to_string(&record)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;

        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(LedgerError::Duplicate(record.id));
        }
        self.append_line(&line)?;
        debug!(record_id = %record.id, "Appended context record");
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
