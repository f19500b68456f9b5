//! Pipeline layer: collector lifecycle and health monitoring.
//!
//! - `orchestrator`: starts/stops collectors as a group, restarts single
//!   collectors, exposes status and metrics
//! - `monitor`:      staleness and no-data checks on their own cadence
//!
//! The two communicate only through `StatusHandle` reads.

pub mod monitor;
pub mod orchestrator;

pub use monitor::{HealthMonitor, TickReport};
pub use orchestrator::{Orchestrator, PipelineState, PipelineStatus};
