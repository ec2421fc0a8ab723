//! The assembly pipeline driver.
//!
//! Each request moves through `Gathering → Packing → Classifying →
//! Recorded`, or ends in `Failed` from gathering or packing. Phases run
//! inside one tracing span per request so every transition carries the
//! context name and, once assigned, the record id.

use crate::cache::SourceCache;
use crate::freshness::FreshnessClassifier;
use crate::gateway::{ContextDefinition, SourceGateway, SourcePayload};
use crate::lineage::{LineageRecorder, RecordInput};
use crate::packer::BudgetPacker;
use crate::token::TokenEstimator;
use contextforge_config::EngineConfig;
use contextforge_core::{
    AssemblyError, AssemblyOutcome, AssemblyRequest, Candidate, Clock, ContentItem,
    ContextLedger, DEFAULT_SEPARATOR, Error, IdGenerator, LineageRecord, SystemClock,
    UuidV7Generator,
};
use contextforge_telemetry::{AssemblyMetrics, MetricsSnapshot, ModelPricing, PricingTable};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

/// Where a request is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyPhase {
    Gathering,
    Packing,
    Classifying,
    Recorded,
    Failed,
}

impl std::fmt::Display for AssemblyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Gathering => "gathering",
            Self::Packing => "packing",
            Self::Classifying => "classifying",
            Self::Recorded => "recorded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

fn enter(phase: AssemblyPhase) {
    debug!(phase = %phase, "Assembly phase");
}

/// Per-call overrides of the engine defaults.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub model_id: Option<String>,
    pub budget_tokens: Option<usize>,
    pub freshness_sla: Option<Duration>,
}

impl RunOptions {
    pub fn model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn budget(mut self, tokens: usize) -> Self {
        self.budget_tokens = Some(tokens);
        self
    }

    pub fn sla(mut self, sla: Duration) -> Self {
        self.freshness_sla = Some(sla);
        self
    }
}

/// A finished, persisted context.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub record: LineageRecord,
}

impl AssembledContext {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// The payload to hand to the model.
    pub fn content(&self) -> &str {
        &self.record.content
    }

    pub fn outcome(&self) -> &AssemblyOutcome {
        &self.record.outcome
    }

    pub fn total_tokens(&self) -> usize {
        self.record.outcome.total_tokens
    }
}

/// The context assembly engine.
///
/// Holds the long-lived collaborators: the shared source cache, the ledger,
/// pricing and token schemes. Per-request state lives inside each call.
pub struct ContextEngine {
    ledger: Arc<dyn ContextLedger>,
    cache: Arc<SourceCache<SourcePayload>>,
    estimator: Arc<TokenEstimator>,
    pricing: Arc<PricingTable>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    metrics: Arc<AssemblyMetrics>,
    config: EngineConfig,
}

impl ContextEngine {
    /// Create an engine writing to `ledger`, with token schemes, pricing
    /// overrides and defaults taken from `config`.
    pub fn new(ledger: Arc<dyn ContextLedger>, config: EngineConfig) -> Self {
        let pricing = PricingTable::with_defaults();
        for (model, price) in &config.pricing {
            pricing.set(model.clone(), ModelPricing::new(price.input_per_m));
        }

        Self {
            ledger,
            cache: Arc::new(SourceCache::new()),
            estimator: Arc::new(TokenEstimator::from_config(&config.tokens)),
            pricing: Arc::new(pricing),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidV7Generator),
            metrics: Arc::new(AssemblyMetrics::new()),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Share a cache with other engines in the same process.
    pub fn with_cache(mut self, cache: Arc<SourceCache<SourcePayload>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_pricing(mut self, pricing: Arc<PricingTable>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn ledger(&self) -> &Arc<dyn ContextLedger> {
        &self.ledger
    }

    pub fn cache(&self) -> &Arc<SourceCache<SourcePayload>> {
        &self.cache
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Drop all cached source results.
    pub fn shutdown(&self) {
        let entries = self.cache.len();
        self.cache.clear();
        info!(entries, "Context engine shut down, source cache cleared");
    }

    fn gateway(&self) -> SourceGateway {
        SourceGateway::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.estimator),
            Arc::clone(&self.clock),
        )
        .configure(&self.config)
    }

    fn packer(&self) -> BudgetPacker {
        BudgetPacker::new(Arc::clone(&self.estimator))
    }

    fn recorder(&self) -> LineageRecorder {
        LineageRecorder::new(
            Arc::clone(&self.ids),
            Arc::clone(&self.clock),
            Arc::clone(&self.pricing),
        )
    }

    /// Pack and classify caller-supplied items. No I/O and nothing recorded.
    pub fn assemble(&self, request: AssemblyRequest) -> Result<AssemblyOutcome, Error> {
        if request.budget_tokens == 0 {
            return Err(AssemblyError::InvalidRequest("budget_tokens must be > 0".into()).into());
        }

        let candidates: Vec<Candidate> = request
            .candidates
            .into_iter()
            .map(|item| {
                let tokens = self.estimator.estimate(&item.content, &request.model_id);
                Candidate::new(item, tokens)
            })
            .collect();

        self.pack_and_classify(
            candidates,
            request.budget_tokens,
            &request.model_id,
            request.freshness_sla,
            &request.separator,
        )
        .map_err(Error::from)
    }

    fn pack_and_classify(
        &self,
        candidates: Vec<Candidate>,
        budget_tokens: usize,
        model_id: &str,
        sla: Option<Duration>,
        separator: &str,
    ) -> Result<AssemblyOutcome, AssemblyError> {
        enter(AssemblyPhase::Packing);
        let packer = self.packer().with_separator(separator);
        let packed = match packer.pack(candidates, budget_tokens, model_id) {
            Ok(p) => p,
            Err(e) => {
                enter(AssemblyPhase::Failed);
                self.metrics.record_budget_failure();
                warn!(error = %e, "Packing failed");
                return Err(e);
            }
        };

        enter(AssemblyPhase::Classifying);
        let freshness = FreshnessClassifier::classify(&packed.included, sla, self.clock.now());

        Ok(AssemblyOutcome {
            total_tokens: packed.total_tokens,
            separator_tokens: packed.separator_tokens,
            separator: separator.to_string(),
            included: packed.included,
            dropped: packed.dropped,
            budget_tokens,
            freshness_status: freshness.status,
            violations: freshness.violations,
            stalest_age_ms: freshness.stalest_age_ms,
            source_failures: Vec::new(),
        })
    }

    /// Run the full pipeline for `definition` and persist the record.
    ///
    /// Strict source failures and unsatisfiable required items fail the
    /// request; nothing is recorded for a failed request.
    pub async fn run(
        &self,
        definition: &ContextDefinition,
        args: &BTreeMap<String, String>,
        options: RunOptions,
    ) -> Result<AssembledContext, Error> {
        let span = info_span!(
            "assemble",
            context = %definition.name,
            record_id = tracing::field::Empty
        );
        self.run_inner(definition, args, options)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        definition: &ContextDefinition,
        args: &BTreeMap<String, String>,
        options: RunOptions,
    ) -> Result<AssembledContext, Error> {
        let started = Instant::now();
        let model_id = options
            .model_id
            .unwrap_or_else(|| self.config.default_model.clone());
        let budget_tokens = options
            .budget_tokens
            .unwrap_or(self.config.default_budget_tokens);
        let sla = options
            .freshness_sla
            .or(self.config.default_freshness_sla_ms.map(Duration::from_millis));

        if budget_tokens == 0 {
            return Err(AssemblyError::InvalidRequest("budget_tokens must be > 0".into()).into());
        }
        definition.validate()?;

        enter(AssemblyPhase::Gathering);
        let gathered = match self.gateway().gather(&definition.bindings, args, &model_id).await {
            Ok(g) => g,
            Err(e) => {
                enter(AssemblyPhase::Failed);
                self.metrics.record_strict_failure();
                return Err(e.into());
            }
        };
        self.metrics.record_absorbed_failures(gathered.failures.len());

        let items: Vec<ContentItem> = gathered.candidates.iter().map(|c| c.item.clone()).collect();
        let mut outcome = self.pack_and_classify(
            gathered.candidates,
            budget_tokens,
            &model_id,
            sla,
            DEFAULT_SEPARATOR,
        )?;
        outcome.source_failures = gathered.failures;

        let record = self.recorder().record(RecordInput {
            context_name: Some(&definition.name),
            context_args: args,
            model_id: &model_id,
            budget_tokens,
            freshness_sla: sla,
            candidates: &items,
            outcome,
            calls: &gathered.calls,
            timings: &gathered.timings,
            assembly_latency_ms: started.elapsed().as_millis() as u64,
        });
        tracing::Span::current().record("record_id", record.id.as_str());

        if let Err(e) = self.ledger.put(record.clone()).await {
            enter(AssemblyPhase::Failed);
            return Err(e.into());
        }
        enter(AssemblyPhase::Recorded);

        let outcome = &record.outcome;
        let truncated = outcome.included.iter().filter(|c| c.truncated).count();
        self.metrics.record_success(
            outcome.total_tokens,
            outcome.dropped.len(),
            truncated,
            outcome.freshness_status == contextforge_core::FreshnessStatus::Degraded,
        );
        info!(
            record_id = %record.id,
            tokens = outcome.payload_tokens(),
            budget = outcome.budget_tokens,
            included = outcome.included.len(),
            dropped = outcome.dropped.len(),
            freshness = %outcome.freshness_status,
            "Context assembled"
        );

        Ok(AssembledContext { record })
    }
}
