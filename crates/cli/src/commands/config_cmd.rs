//! `contextforge config` — Configuration management commands.

use contextforge_config::EngineConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match EngineConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Model:      {}", config.default_model);
            println!("   Budget:     {} tokens", config.default_budget_tokens);
            println!("   Ledger:     {}", config.ledger.backend);
            println!("   Schemes:    {}", config.tokens.len());
            println!("   Prices:     {}", config.pricing.len());
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Settings that load fine but are probably not what the user wants.
pub fn warnings(config: &EngineConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();

    if config.default_freshness_sla_ms.is_none() {
        warnings.push("No default freshness SLA; contexts will be classified 'unknown'");
    }
    if !config.cache.enabled || config.cache.default_ttl_secs == 0 {
        warnings.push("Source cache is disabled; every request fetches every source");
    }
    if config.gateway.default_timeout_ms == 0 {
        warnings.push("Gateway timeout is 0ms; every source will time out");
    }
    if config.ledger.backend == "memory" {
        warnings.push("Ledger backend is 'memory'; records are lost on exit");
    }

    warnings
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = EngineConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let dir = EngineConfig::config_dir();
    let config_path = dir.join("config.toml");

    if config_path.exists() {
        println!("⚠️  Config already exists at {}", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&dir)?;
    std::fs::write(&config_path, EngineConfig::default_toml())?;
    println!("✅ Wrote default config to {}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = EngineConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn defaults_warn_only_about_missing_sla() {
        let warnings = warnings(&EngineConfig::default());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("freshness SLA"));
    }

    #[test]
    fn memory_ledger_and_disabled_cache_warn() {
        let mut config = EngineConfig::default();
        config.default_freshness_sla_ms = Some(60_000);
        config.cache.enabled = false;
        config.ledger.backend = "memory".into();
        assert_eq!(warnings(&config).len(), 2);
    }
}
