pub mod config_cmd;
pub mod context;
pub mod estimate;
pub mod status;

use contextforge_config::EngineConfig;
use contextforge_core::ContextLedger;
use std::sync::Arc;

/// Load config and open the ledger it names.
pub async fn open_ledger() -> Result<(EngineConfig, Arc<dyn ContextLedger>), Box<dyn std::error::Error>>
{
    let config = EngineConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let ledger = contextforge_ledger::open(&config.ledger)
        .await
        .map_err(|e| format!("Failed to open ledger: {e}"))?;
    tracing::debug!(backend = ledger.name(), "Ledger opened");
    Ok((config, ledger))
}
