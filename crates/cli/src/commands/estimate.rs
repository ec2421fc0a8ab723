//! `contextforge estimate` — Token and cost estimate for a piece of text.

use contextforge_config::EngineConfig;
use contextforge_engine::TokenEstimator;
use contextforge_telemetry::{ModelPricing, PricingTable};
use std::path::PathBuf;

pub async fn run(
    text: Option<String>,
    model: Option<String>,
    file: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let content = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?,
        (None, None) => return Err("Provide text or --file".into()),
    };
    let model = model.unwrap_or_else(|| config.default_model.clone());

    print!("{}", render_estimate(&config, &content, &model));
    Ok(())
}

pub fn render_estimate(config: &EngineConfig, content: &str, model: &str) -> String {
    let estimator = TokenEstimator::from_config(&config.tokens);
    let pricing = PricingTable::with_defaults();
    for (name, price) in &config.pricing {
        pricing.set(name.clone(), ModelPricing::new(price.input_per_m));
    }

    let scheme = estimator.scheme_for(model);
    let tokens = estimator.estimate(content, model);
    let cost = pricing.context_cost(model, tokens);
    let budget = config.default_budget_tokens;

    let mut out = String::new();
    out.push_str("🔢 Token Estimate\n");
    out.push_str("================\n");
    out.push_str(&format!("  Model:      {model}\n"));
    out.push_str(&format!("  Scheme:     {} chars : {} tokens\n", scheme.chars, scheme.tokens));
    out.push_str(&format!("  Chars:      {}\n", content.chars().count()));
    out.push_str(&format!("  Tokens:     {tokens}\n"));
    match pricing.resolve(model) {
        Some(p) => out.push_str(&format!(
            "  Cost:       ${cost:.6} (${:.2}/M input)\n",
            p.input_per_m
        )),
        None => out.push_str("  Cost:       unknown model, not priced\n"),
    }
    if tokens > budget {
        out.push_str(&format!(
            "\n  ⚠️  Exceeds the default budget of {budget} tokens\n"
        ));
    }
    out
}
