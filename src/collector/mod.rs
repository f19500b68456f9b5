/// Collector module
///
/// This module groups all logic shared by every source:
/// - The `DataSource` contract implemented per external domain
/// - The per-collector liveness record (`CollectorStatus`)
/// - The runtime driving one source (timer loop, fan-out,
///   normalization, persistence)
///
/// Design notes:
/// - Source-specific logic MUST NOT live here
/// - Failures are contained per record, per sub-fetch and per cycle
///
pub mod runner;
pub mod source;
pub mod status;

pub use runner::{Collector, CycleReport};
pub use source::{DataSource, FetchTarget};
pub use status::{CollectorState, CollectorStatus, ErrorEntry, StatusHandle, MAX_RECENT_ERRORS};
