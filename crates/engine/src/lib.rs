//! # ContextForge Engine
//!
//! Assembles bounded-size context payloads for LLM requests:
//!
//! 1. **Gather**: fan out to every source a [`ContextDefinition`] declares,
//!    through a shared single-flight [`SourceCache`], each under a timeout
//! 2. **Pack**: choose what fits the token budget in priority order,
//!    truncating where allowed ([`BudgetPacker`])
//! 3. **Classify**: compare item ages against the freshness SLA
//!    ([`FreshnessClassifier`])
//! 4. **Record**: build an immutable [`LineageRecord`](contextforge_core::LineageRecord)
//!    and append it to the ledger ([`LineageRecorder`])
//!
//! [`ContextEngine`] drives the whole pipeline.

pub mod assembler;
pub mod cache;
pub mod freshness;
pub mod gateway;
pub mod lineage;
pub mod packer;
pub mod sources;
pub mod token;

pub use assembler::{AssembledContext, AssemblyPhase, ContextEngine, RunOptions};
pub use cache::{CacheStats, CacheStatus, SourceCache};
pub use freshness::{Freshness, FreshnessClassifier};
pub use gateway::{
    ContextDefinition, GatherOutput, SourceBinding, SourceCall, SourceGateway, SourcePayload,
};
pub use lineage::{LineageRecorder, RecordInput, request_digest};
pub use packer::{BudgetPacker, Packed};
pub use sources::{ContextSource, FeatureSource, RetrieverSource, StaticSource};
pub use token::{TokenEstimator, TokenScheme};
