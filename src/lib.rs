// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:    Configuration structs loaded from JSON
// - error:     Typed errors for callers, collectors and sinks
// - schema:    Strongly typed normalized record definitions
// - util:      Shared helpers (time, source keys, durations)
// - metrics:   Per-pipeline runtime counters and reports
// - collector: Periodic fetch/normalize/persist runtime
// - sources:   Upstream API adapters and source registry
// - sinks:     Persistence and alert backends
// - pipeline:  Orchestrator and health monitor
//
pub mod collector;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod schema;
pub mod sinks;
pub mod sources;
pub mod util;

pub use error::{CollectorError, NormalizeError, PipelineError, SinkError};
pub use pipeline::{Orchestrator, PipelineState, PipelineStatus};
