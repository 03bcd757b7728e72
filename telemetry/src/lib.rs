//! Skylink telemetry library
//!
//! Flow metadata accounting for the on-device control plane: canonical flow
//! keys and per-flow accumulators, the windowed metadata aggregator with
//! conntrack zone merging and peer-report enrichment, and the DPI client
//! registry fanning decoded flow attributes out to subscriber plugins.

pub mod aggr;
pub mod config;
pub mod dpi;
pub mod flow;
pub mod metrics;
pub mod pipeline;
pub mod report;

pub use aggr::{Aggregator, AggregatorConfig, ReportType};
pub use flow::{FlowCounters, FlowKey, FlowSample, MacAddr};
