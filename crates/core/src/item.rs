//! Content items and candidates — the unit of context assembly.
//!
//! A [`ContentItem`] is what a source produces. A [`Candidate`] is an item
//! with its token cost attached, scoped to one assembly request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Metadata key that overrides [`ContentItem::identity`].
pub const ITEM_ID_KEY: &str = "item_id";

/// How an item may be shrunk when it does not fit the remaining budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncatePolicy {
    /// Never truncate: the item is included whole or not at all.
    #[default]
    None,
    /// Drop the trailing portion (keep a prefix).
    End,
    /// Drop the leading portion (keep a suffix).
    Start,
    /// Keep a prefix and a suffix, drop the interior.
    Middle,
}

/// Which kind of source produced an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Static,
    Feature,
    Retriever,
}

impl SourceKind {
    /// Whether partial content of this kind is still meaningful.
    ///
    /// A truncated feature value is not a value at all, so features are
    /// always all-or-nothing.
    pub fn supports_truncation(self) -> bool {
        !matches!(self, Self::Feature)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Feature => write!(f, "feature"),
            Self::Retriever => write!(f, "retriever"),
        }
    }
}

/// A single piece of content offered for inclusion in a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// The text to include.
    pub content: String,

    /// Priority, 0 = highest.
    #[serde(default)]
    pub priority: u32,

    /// Whether failing to include this item must fail the assembly.
    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub truncate_policy: TruncatePolicy,

    pub source_kind: SourceKind,

    /// Name of the source that produced the item.
    pub source_name: String,

    /// When the underlying data was produced (None if unknown/static).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ContentItem {
    /// Create an item with default priority (0), not required, no truncation.
    pub fn new(
        source_kind: SourceKind,
        source_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            priority: 0,
            required: false,
            truncate_policy: TruncatePolicy::None,
            source_kind,
            source_name: source_name.into(),
            source_timestamp: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_truncate(mut self, policy: TruncatePolicy) -> Self {
        self.truncate_policy = policy;
        self
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.source_timestamp = Some(ts);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Stable identity used to match the same item across two assemblies.
    ///
    /// `metadata["item_id"]` wins; otherwise the source name plus a short
    /// content hash.
    pub fn identity(&self) -> String {
        if let Some(id) = self.metadata.get(ITEM_ID_KEY) {
            return id.clone();
        }
        format!("{}#{}", self.source_name, &content_hash(&self.content)[..16])
    }
}

/// Hex-encoded SHA-256 of a string.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// An item plus its estimated token cost for one assembly request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(flatten)]
    pub item: ContentItem,

    /// Estimated tokens of `item.content` (after truncation, if any).
    pub token_count: usize,

    /// Whether the packer shrank the content.
    #[serde(default)]
    pub truncated: bool,

    /// Token count before truncation.
    pub original_tokens: usize,
}

impl Candidate {
    pub fn new(item: ContentItem, token_count: usize) -> Self {
        Self {
            item,
            token_count,
            truncated: false,
            original_tokens: token_count,
        }
    }

    pub fn content(&self) -> &str {
        &self.item.content
    }

    pub fn priority(&self) -> u32 {
        self.item.priority
    }

    pub fn source_name(&self) -> &str {
        &self.item.source_name
    }
}
