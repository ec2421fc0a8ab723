//! Context sources — adapters from collaborators to content items.
//!
//! A [`ContextSource`] turns request arguments into zero or more
//! [`ContentItem`]s. The gateway stamps items with the binding's
//! priority/required/truncation settings afterwards, so sources only care
//! about content, kind, timestamps and metadata.

use async_trait::async_trait;
use contextforge_core::item::{ITEM_ID_KEY, content_hash};
use contextforge_core::{ContentItem, FeatureAccessor, Retriever, SourceError, SourceKind};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Metadata keys written by the built-in sources.
pub mod meta {
    pub const FEATURE_NAME: &str = "feature_name";
    pub const ENTITY_ID: &str = "entity_id";
    /// JSON encoding of the feature value.
    pub const VALUE: &str = "value";
    pub const QUERY: &str = "query";
    pub const SCORE: &str = "score";
    pub const POSITION: &str = "position";
}

/// Anything that can contribute content to a context.
#[async_trait]
pub trait ContextSource: Send + Sync {
    /// Unique name within a context definition.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Request arguments this source reads. They form its cache key.
    fn arg_keys(&self) -> Vec<&str> {
        Vec::new()
    }

    /// The query this source will run for `args`, if it runs one.
    fn query(&self, _args: &BTreeMap<String, String>) -> Option<String> {
        None
    }

    async fn fetch(&self, args: &BTreeMap<String, String>) -> Result<Vec<ContentItem>, SourceError>;
}

/// Cache key for a source call: `"{source}|{k=v;...}"` over its declared
/// argument keys, in declaration order. Missing arguments render empty.
pub fn cache_key(source: &dyn ContextSource, args: &BTreeMap<String, String>) -> String {
    let parts: Vec<String> = source
        .arg_keys()
        .into_iter()
        .map(|k| format!("{k}={}", args.get(k).map(String::as_str).unwrap_or("")))
        .collect();
    format!("{}|{}", source.name(), parts.join(";"))
}

fn required_arg<'a>(
    source: &str,
    args: &'a BTreeMap<String, String>,
    key: &str,
) -> Result<&'a str, SourceError> {
    args.get(key)
        .map(String::as_str)
        .ok_or_else(|| SourceError::failed(source, format!("missing argument '{key}'")))
}

// ── Static ────────────────────────────────────────────────────────────────

/// Fixed text, e.g. a system instruction.
pub struct StaticSource {
    name: String,
    content: String,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

#[async_trait]
impl ContextSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Static
    }

    async fn fetch(&self, _args: &BTreeMap<String, String>) -> Result<Vec<ContentItem>, SourceError> {
        Ok(vec![ContentItem::new(SourceKind::Static, &self.name, &self.content)])
    }
}

// ── Features ──────────────────────────────────────────────────────────────

/// Reads a list of features for the entity named by one request argument.
pub struct FeatureSource {
    name: String,
    accessor: Arc<dyn FeatureAccessor>,
    features: Vec<String>,
    entity_arg: String,
}

impl FeatureSource {
    pub fn new(
        name: impl Into<String>,
        accessor: Arc<dyn FeatureAccessor>,
        entity_arg: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            accessor,
            features: Vec::new(),
            entity_arg: entity_arg.into(),
        }
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.push(feature.into());
        self
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features.extend(features.into_iter().map(Into::into));
        self
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ContextSource for FeatureSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Feature
    }

    fn arg_keys(&self) -> Vec<&str> {
        vec![self.entity_arg.as_str()]
    }

    async fn fetch(&self, args: &BTreeMap<String, String>) -> Result<Vec<ContentItem>, SourceError> {
        let entity_id = required_arg(&self.name, args, &self.entity_arg)?;

        let lookups = self
            .features
            .iter()
            .map(|feature| self.accessor.get(feature, entity_id));
        let results = futures::future::join_all(lookups).await;

        let mut items = Vec::with_capacity(self.features.len());
        for (feature, result) in self.features.iter().zip(results) {
            let Some(fv) = result? else {
                debug!(source = %self.name, feature = %feature, entity = %entity_id, "Feature has no value, skipping");
                continue;
            };
            let item = ContentItem::new(
                SourceKind::Feature,
                &self.name,
                format!("{feature}: {}", render_value(&fv.value)),
            )
            .with_timestamp(fv.timestamp)
            .with_metadata(meta::FEATURE_NAME, feature)
            .with_metadata(meta::ENTITY_ID, entity_id)
            .with_metadata(meta::VALUE, fv.value.to_string())
            .with_metadata(ITEM_ID_KEY, format!("{feature}:{entity_id}"));
            items.push(item);
        }
        Ok(items)
    }
}

// ── Retriever ─────────────────────────────────────────────────────────────

/// Runs a similarity search with the query taken from one request argument.
pub struct RetrieverSource {
    name: String,
    retriever: Arc<dyn Retriever>,
    query_arg: String,
    top_k: usize,
    filters: BTreeMap<String, String>,
}

impl RetrieverSource {
    pub fn new(
        name: impl Into<String>,
        retriever: Arc<dyn Retriever>,
        query_arg: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            retriever,
            query_arg: query_arg.into(),
            top_k: 5,
            filters: BTreeMap::new(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl ContextSource for RetrieverSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Retriever
    }

    fn arg_keys(&self) -> Vec<&str> {
        vec![self.query_arg.as_str()]
    }

    fn query(&self, args: &BTreeMap<String, String>) -> Option<String> {
        args.get(&self.query_arg).cloned()
    }

    async fn fetch(&self, args: &BTreeMap<String, String>) -> Result<Vec<ContentItem>, SourceError> {
        let query = required_arg(&self.name, args, &self.query_arg)?;
        if self.top_k == 0 {
            warn!(source = %self.name, "top_k is 0, retriever not called");
            return Ok(Vec::new());
        }

        let docs = self.retriever.search(query, self.top_k, &self.filters).await?;
        debug!(source = %self.name, results = docs.len(), "Retriever returned");

        Ok(docs
            .into_iter()
            .take(self.top_k)
            .enumerate()
            .map(|(position, doc)| {
                let item_id = doc
                    .metadata
                    .get("id")
                    .or_else(|| doc.metadata.get("chunk_id"))
                    .cloned()
                    .unwrap_or_else(|| format!("{}#{}", self.name, &content_hash(&doc.content)[..16]));
                let mut item = ContentItem::new(SourceKind::Retriever, &self.name, doc.content);
                item.metadata = doc.metadata;
                item.with_metadata(meta::QUERY, query)
                    .with_metadata(meta::SCORE, format!("{:.4}", doc.score))
                    .with_metadata(meta::POSITION, position.to_string())
                    .with_metadata(ITEM_ID_KEY, item_id)
            })
            .collect())
    }
}
