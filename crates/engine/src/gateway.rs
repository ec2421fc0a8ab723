//! Concurrent fan-out over a context's statically declared sources.
//!
//! Every binding is fetched at the same time, each through the shared
//! [`SourceCache`] and under its own timeout. Non-strict failures become
//! [`SourceFailure`] data; a strict failure aborts the whole gather.

use crate::cache::{CacheStatus, SourceCache};
use crate::sources::{ContextSource, cache_key};
use crate::token::TokenEstimator;
use contextforge_config::EngineConfig;
use contextforge_core::{
    AssemblyError, Candidate, Clock, ContentItem, SourceError, SourceFailure, SourceKind,
    SourceTiming, TruncatePolicy,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// What the cache stores per source call.
pub type SourcePayload = Arc<Vec<ContentItem>>;

/// One use of a source inside a [`ContextDefinition`].
#[derive(Clone)]
pub struct SourceBinding {
    pub source: Arc<dyn ContextSource>,
    /// Priority stamped on every item, 0 = highest.
    pub priority: u32,
    pub required: bool,
    pub truncate_policy: TruncatePolicy,
    /// A failure of a strict source fails the whole request.
    pub strict: bool,
    /// Falls back to the gateway default when `None`.
    pub timeout: Option<Duration>,
    /// Falls back to the gateway default when `None`; zero disables caching.
    pub cache_ttl: Option<Duration>,
}

impl SourceBinding {
    pub fn new(source: Arc<dyn ContextSource>) -> Self {
        Self {
            source,
            priority: 0,
            required: false,
            truncate_policy: TruncatePolicy::None,
            strict: false,
            timeout: None,
            cache_ttl: None,
        }
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn truncate(mut self, policy: TruncatePolicy) -> Self {
        self.truncate_policy = policy;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }
}

impl std::fmt::Debug for SourceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceBinding")
            .field("source", &self.source.name())
            .field("kind", &self.source.kind())
            .field("priority", &self.priority)
            .field("required", &self.required)
            .field("strict", &self.strict)
            .finish()
    }
}

/// A named context and every source it uses, declared up front.
///
/// Source names key timings, lineage and the cache, so they must be unique
/// within a definition; [`ContextDefinition::validate`] enforces it.
#[derive(Debug, Clone)]
pub struct ContextDefinition {
    pub name: String,
    pub bindings: Vec<SourceBinding>,
}

impl ContextDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bindings: Vec::new(),
        }
    }

    pub fn bind(mut self, binding: SourceBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Like [`bind`](Self::bind), but rejects a source name already bound.
    pub fn try_bind(self, binding: SourceBinding) -> Result<Self, AssemblyError> {
        if self.bindings.iter().any(|b| b.name() == binding.name()) {
            return Err(duplicate(&self.name, binding.name()));
        }
        Ok(self.bind(binding))
    }

    /// Fails on the first source name bound twice.
    pub fn validate(&self) -> Result<(), AssemblyError> {
        let mut seen = BTreeSet::new();
        for binding in &self.bindings {
            if !seen.insert(binding.name()) {
                return Err(duplicate(&self.name, binding.name()));
            }
        }
        Ok(())
    }
}

fn duplicate(context: &str, source: &str) -> AssemblyError {
    AssemblyError::InvalidRequest(format!(
        "context '{context}' binds source '{source}' more than once"
    ))
}

/// A source call as seen by lineage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCall {
    pub source_name: String,
    pub kind: SourceKind,
    pub query: Option<String>,
    pub item_count: usize,
    pub timing: SourceTiming,
}

/// Everything one gather produced.
#[derive(Debug, Clone, Default)]
pub struct GatherOutput {
    /// Binding order, then each source's own item order.
    pub candidates: Vec<Candidate>,
    pub failures: Vec<SourceFailure>,
    /// Every consulted source; failures are never cache hits.
    pub timings: BTreeMap<String, SourceTiming>,
    /// Successful calls, binding order.
    pub calls: Vec<SourceCall>,
}

/// Fans out to sources through the shared cache.
pub struct SourceGateway {
    cache: Arc<SourceCache<SourcePayload>>,
    estimator: Arc<TokenEstimator>,
    clock: Arc<dyn Clock>,
    default_timeout: Duration,
    default_ttl: Duration,
}

impl SourceGateway {
    pub fn new(
        cache: Arc<SourceCache<SourcePayload>>,
        estimator: Arc<TokenEstimator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache,
            estimator,
            clock,
            default_timeout: Duration::from_secs(5),
            default_ttl: Duration::from_secs(300),
        }
    }

    /// Apply the `[gateway]` and `[cache]` defaults from config.
    pub fn configure(mut self, config: &EngineConfig) -> Self {
        self.default_timeout = Duration::from_millis(config.gateway.default_timeout_ms);
        self.default_ttl = if config.cache.enabled {
            Duration::from_secs(config.cache.default_ttl_secs)
        } else {
            Duration::ZERO
        };
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn cache(&self) -> &Arc<SourceCache<SourcePayload>> {
        &self.cache
    }

    /// Fetch every binding concurrently and turn the results into
    /// candidates priced for `model_id`.
    pub async fn gather(
        &self,
        bindings: &[SourceBinding],
        args: &BTreeMap<String, String>,
        model_id: &str,
    ) -> Result<GatherOutput, SourceError> {
        let fetches = bindings.iter().map(|b| self.fetch_one(b, args));
        let results = futures::future::join_all(fetches).await;

        let mut out = GatherOutput::default();
        for (binding, (result, timing)) in bindings.iter().zip(results) {
            let name = binding.name();
            out.timings.insert(name.to_string(), timing);
            match result {
                Ok(items) => {
                    out.calls.push(SourceCall {
                        source_name: name.to_string(),
                        kind: binding.source.kind(),
                        query: binding.source.query(args),
                        item_count: items.len(),
                        timing,
                    });
                    for item in items.iter() {
                        let item = self.stamp(binding, item.clone());
                        let tokens = self.estimator.estimate(&item.content, model_id);
                        out.candidates.push(Candidate::new(item, tokens));
                    }
                }
                Err(e) if binding.strict => {
                    error!(source = %name, error = %e, "Strict source failed, aborting gather");
                    return Err(e);
                }
                Err(e) => {
                    warn!(source = %name, error = %e, "Source failed, continuing without it");
                    out.failures.push(SourceFailure {
                        source_name: name.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        debug!(
            candidates = out.candidates.len(),
            failures = out.failures.len(),
            "Gather complete"
        );
        Ok(out)
    }

    async fn fetch_one(
        &self,
        binding: &SourceBinding,
        args: &BTreeMap<String, String>,
    ) -> (Result<SourcePayload, SourceError>, SourceTiming) {
        let source = Arc::clone(&binding.source);
        let name = source.name().to_string();
        let key = cache_key(source.as_ref(), args);
        let timeout = binding.timeout.unwrap_or(self.default_timeout);
        let ttl = binding.cache_ttl.unwrap_or(self.default_ttl);

        let clock = Arc::clone(&self.clock);
        let owned_args = args.clone();
        let compute = move || async move {
            let fetched_at = clock.now();
            let mut items = source.fetch(&owned_args).await?;
            // Data with no timestamp of its own is as fresh as the fetch.
            for item in items.iter_mut() {
                if item.source_kind != SourceKind::Static && item.source_timestamp.is_none() {
                    item.source_timestamp = Some(fetched_at);
                }
            }
            Ok::<_, SourceError>(Arc::new(items))
        };

        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.cache.fetch(&key, ttl, compute)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut timing = SourceTiming {
            latency_ms,
            cache_hit: false,
        };
        let result = match result {
            Ok(Ok((items, status))) => {
                debug!(source = %name, key = %key, ?status, latency_ms, "Source fetched");
                timing.cache_hit = status != CacheStatus::Miss;
                Ok(items)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SourceError::Timeout {
                source_name: name,
                timeout_ms: timeout.as_millis() as u64,
            }),
        };
        (result, timing)
    }

    fn stamp(&self, binding: &SourceBinding, mut item: ContentItem) -> ContentItem {
        item.source_name = binding.name().to_string();
        item.priority = binding.priority;
        item.required = binding.required;
        item.truncate_policy = binding.truncate_policy;
        item
    }
}
