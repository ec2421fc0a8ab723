//! # ContextForge Core
//!
//! Domain types, traits, and error definitions for the ContextForge context
//! assembly engine. It does no I/O and starts no runtime; it defines the
//! model that the engine, ledger backends and CLI implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is a trait here ([`FeatureAccessor`], [`Retriever`],
//! [`Clock`], [`IdGenerator`], [`ContextLedger`]). Implementations live in
//! their respective crates or in tests, which keeps the dependency graph
//! pointing inward.

pub mod assembly;
pub mod diff;
pub mod error;
pub mod item;
pub mod ledger;
pub mod lineage;
pub mod source;

// Re-export key types at crate root for ergonomics
pub use assembly::{
    AssemblyOutcome, AssemblyRequest, DEFAULT_SEPARATOR, FreshnessStatus, FreshnessViolation,
    SourceFailure,
};
pub use diff::{ChangeType, ContentDiff, ContextDiff, compare_content, compare_records};
pub use error::{AssemblyError, Error, LedgerError, Result, SourceError};
pub use item::{Candidate, ContentItem, SourceKind, TruncatePolicy};
pub use ledger::{ContextLedger, LedgerQuery};
pub use lineage::{FeatureLineage, LineageRecord, RetrieverLineage, SourceTiming};
pub use source::{
    Clock, FeatureAccessor, FeatureValue, IdGenerator, ManualClock, RetrievedDocument, Retriever,
    SystemClock, UuidV7Generator,
};
