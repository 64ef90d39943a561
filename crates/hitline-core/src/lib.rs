//! hitline-core: domain types and pure state machines for timed
//! multi-target training sessions.
//!
//! Nothing in this crate performs IO or reads a clock; every time value is
//! passed in by the caller.

pub mod activation;
pub mod classify;
pub mod goals;
pub mod lifecycle;
pub mod splits;
pub mod summary;
pub mod types;

pub use activation::{ActivationRecord, ActivationTracker};
pub use classify::{RawDeviceStatus, classify_device_status};
pub use goals::{GoalDecision, GoalTerminationPolicy};
pub use lifecycle::{Lifecycle, LifecycleError, LifecycleStep, SessionLifecycleState};
pub use splits::{SplitTransitionComputer, SplitUpdate};
pub use summary::{SummaryInput, build_summary};
