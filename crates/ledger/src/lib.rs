//! Context ledger implementations for ContextForge.

pub mod file_backend;
pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(test)]
pub(crate) mod testing;

pub use contextforge_core::diff::{ChangeType, ContextDiff, compare_records};
pub use contextforge_core::{ContextLedger, LedgerError, LedgerQuery};
pub use file_backend::FileLedger;
pub use in_memory::InMemoryLedger;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLedger;

use contextforge_config::LedgerConfig;
use std::sync::Arc;

/// Open the ledger backend named in config.
pub async fn open(config: &LedgerConfig) -> Result<Arc<dyn ContextLedger>, LedgerError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryLedger::new())),
        "file" => Ok(Arc::new(FileLedger::new(config.resolved_path()))),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = config.resolved_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LedgerError::Storage(format!("Failed to create ledger directory: {e}"))
                })?;
            }
            let url = format!("sqlite://{}", path.display());
            Ok(Arc::new(SqliteLedger::new(&url).await?))
        }
        other => Err(LedgerError::Storage(format!(
            "Unsupported ledger backend '{other}'"
        ))),
    }
}
