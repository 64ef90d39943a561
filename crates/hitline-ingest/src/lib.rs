//! hitline-ingest: telemetry normalization and reconciliation.
//!
//! Raw vendor events are translated to canonical events, deduplicated against
//! per-device cumulative counters, and reordered by device time before they
//! reach split computation. All types here are synchronous and clock-free.

pub mod pipeline;
pub mod reconnect;
pub mod reorder;
pub mod translate;

pub use pipeline::{IngestOutcome, TelemetryPipeline};
pub use reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectTracker};
pub use reorder::ReorderBuffer;
pub use translate::{RawTelemetryEvent, translate};
