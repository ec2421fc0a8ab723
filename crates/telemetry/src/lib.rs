//! Cost estimation and running metrics for ContextForge.
//!
//! Prices an assembled context as model input using a built-in pricing
//! table, and keeps lock-free counters of assembly outcomes.

pub mod metrics;
pub mod pricing;

pub use metrics::{AssemblyMetrics, MetricsSnapshot};
pub use pricing::{ModelPricing, PricingTable};
