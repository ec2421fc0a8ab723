//! `contextforge show | list | diff | export` — Ledger inspection commands.

use super::open_ledger;
use crate::ExportFormat;
use contextforge_core::{ContextLedger, FreshnessStatus, LedgerQuery, LineageRecord};
use std::path::PathBuf;

type CmdResult<T> = Result<T, Box<dyn std::error::Error>>;

pub async fn show(id: &str, json: bool) -> CmdResult<()> {
    let (_, ledger) = open_ledger().await?;
    let record = ledger.get(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print!("{}", render_record(&record));
    }
    Ok(())
}

pub async fn list(
    limit: usize,
    before: Option<String>,
    freshness: Option<String>,
    context: Option<String>,
) -> CmdResult<()> {
    let (_, ledger) = open_ledger().await?;
    let query = build_query(limit, before, freshness.as_deref(), context)?;
    let records = ledger.list(&query).await?;
    print!("{}", render_list(&records));
    Ok(())
}

pub async fn diff(base: &str, comparison: &str, detail: bool, json: bool) -> CmdResult<()> {
    let (_, ledger) = open_ledger().await?;
    let diff = ledger.diff(base, comparison).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
    } else if detail {
        print!("{diff:#}");
    } else {
        print!("{diff}");
    }
    Ok(())
}

pub async fn export(id: &str, format: ExportFormat, output: Option<PathBuf>) -> CmdResult<()> {
    let (_, ledger) = open_ledger().await?;
    let rendered = export_record(ledger.as_ref(), id, format).await?;

    match output {
        Some(path) => {
            std::fs::write(&path, &rendered)?;
            println!("📦 Exported {id} to {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

/// Fetch a record and render it in the requested export format.
pub async fn export_record(
    ledger: &dyn ContextLedger,
    id: &str,
    format: ExportFormat,
) -> CmdResult<String> {
    let record = ledger.get(id).await?;
    Ok(match format {
        ExportFormat::Json => format!("{}\n", serde_json::to_string_pretty(&record)?),
        ExportFormat::Text => render_export_text(&record),
    })
}

pub fn build_query(
    limit: usize,
    before: Option<String>,
    freshness: Option<&str>,
    context: Option<String>,
) -> CmdResult<LedgerQuery> {
    let mut query = LedgerQuery::new(limit);
    if let Some(id) = before {
        query = query.before(id);
    }
    if let Some(status) = freshness {
        query = query.with_freshness(status.parse::<FreshnessStatus>()?);
    }
    if let Some(name) = context {
        query = query.with_context_name(name);
    }
    Ok(query)
}

pub fn render_record(record: &LineageRecord) -> String {
    let outcome = &record.outcome;
    let mut out = String::new();

    out.push_str(&format!("🧩 Context {}\n", record.id));
    out.push_str(&format!("{}\n", "=".repeat(60)));
    out.push_str(&format!("  Created:    {}\n", record.created_at.to_rfc3339()));
    if let Some(name) = &record.context_name {
        out.push_str(&format!("  Context:    {name}\n"));
    }
    for (key, value) in &record.context_args {
        out.push_str(&format!("    {key} = {value}\n"));
    }
    out.push_str(&format!("  Model:      {}\n", record.model_id));
    out.push_str(&format!(
        "  Tokens:     {} / {} ({:.1}%)\n",
        outcome.payload_tokens(),
        outcome.budget_tokens,
        outcome.utilization_pct()
    ));
    out.push_str(&format!("  Freshness:  {}\n", outcome.freshness_status));
    out.push_str(&format!("  Cost:       ${:.6}\n", record.cost_estimate_usd));
    out.push_str(&format!("  Latency:    {}ms\n", record.assembly_latency_ms));
    out.push_str(&format!("  Digest:     {}\n", record.request_digest));

    out.push_str(&format!("\n  Included ({}):\n", outcome.included.len()));
    for c in &outcome.included {
        let marker = if c.truncated { " [truncated]" } else { "" };
        out.push_str(&format!(
            "    p{:<3} {:<24} {:>6} tokens{marker}\n",
            c.priority(),
            c.source_name(),
            c.token_count
        ));
    }

    if !outcome.dropped.is_empty() {
        out.push_str(&format!("\n  Dropped ({}):\n", outcome.dropped.len()));
        for c in &outcome.dropped {
            out.push_str(&format!(
                "    p{:<3} {:<24} {:>6} tokens\n",
                c.priority(),
                c.source_name(),
                c.token_count
            ));
        }
    }

    if !outcome.violations.is_empty() {
        out.push_str("\n  ⚠️  Freshness violations:\n");
        for v in &outcome.violations {
            out.push_str(&format!(
                "    {}: {}ms old (SLA {}ms)\n",
                v.source_name, v.age_ms, v.sla_ms
            ));
        }
    }

    if !outcome.source_failures.is_empty() {
        out.push_str("\n  ⚠️  Source failures:\n");
        for f in &outcome.source_failures {
            out.push_str(&format!("    {}: {}\n", f.source_name, f.reason));
        }
    }

    if !record.per_source_timing.is_empty() {
        out.push_str("\n  Sources:\n");
        for (name, timing) in &record.per_source_timing {
            let cache = if timing.cache_hit { "cache hit" } else { "fetched" };
            out.push_str(&format!("    {name:<24} {:>6}ms  {cache}\n", timing.latency_ms));
        }
    }

    out
}

pub fn render_list(records: &[LineageRecord]) -> String {
    if records.is_empty() {
        return "📭 No stored contexts.\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!("📚 Stored contexts ({})\n", records.len()));
    out.push_str(&format!("{}\n", "=".repeat(60)));
    for r in records {
        out.push_str(&format!(
            "  {}  {}  {:<16} {:>6} tok  {:<10} {}\n",
            r.id,
            r.created_at.format("%Y-%m-%d %H:%M:%S"),
            r.context_name.as_deref().unwrap_or("-"),
            r.outcome.payload_tokens(),
            r.outcome.freshness_status,
            r.model_id
        ));
    }
    if let Some(last) = records.last() {
        out.push_str(&format!("\n  Next page: --before {}\n", last.id));
    }
    out
}

/// Audit export: header lines followed by the payload exactly as delivered.
pub fn render_export_text(record: &LineageRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!("# context_id: {}\n", record.id));
    out.push_str(&format!("# created_at: {}\n", record.created_at.to_rfc3339()));
    out.push_str(&format!("# model: {}\n", record.model_id));
    out.push_str(&format!(
        "# tokens: {}/{}\n",
        record.outcome.payload_tokens(),
        record.outcome.budget_tokens
    ));
    out.push_str(&format!("# freshness: {}\n", record.outcome.freshness_status));
    out.push_str(&format!("# digest: {}\n", record.request_digest));
    out.push('\n');
    out.push_str(&record.content);
    out.push('\n');
    out
}
