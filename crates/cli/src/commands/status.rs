//! `contextforge status` — Show ledger and configuration status.

use super::open_ledger;
use contextforge_config::EngineConfig;
use contextforge_core::ContextLedger;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let (config, ledger) = open_ledger().await?;
    let count = ledger.count().await?;

    println!("🧩 ContextForge Status");
    println!("======================");
    println!("  Config dir:   {}", EngineConfig::config_dir().display());
    println!("  Model:        {}", config.default_model);
    println!("  Budget:       {} tokens", config.default_budget_tokens);
    match config.default_freshness_sla_ms {
        Some(ms) => println!("  SLA:          {ms}ms"),
        None => println!("  SLA:          none"),
    }
    println!(
        "  Cache:        {} (ttl {}s)",
        if config.cache.enabled { "enabled" } else { "disabled" },
        config.cache.default_ttl_secs
    );
    println!("  Timeout:      {}ms", config.gateway.default_timeout_ms);
    println!("  Ledger:       {}", ledger.name());
    if config.ledger.backend != "memory" {
        println!("  Ledger path:  {}", config.ledger.resolved_path().display());
    }
    println!("  Contexts:     {count}");

    let config_path = EngineConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file; run `contextforge config init` to create one");
    }

    Ok(())
}
