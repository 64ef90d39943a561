//! hitline-session: session lifecycle engine and its async runtime.
//!
//! - [`engine::SessionEngine`]: sans-IO state owner; input events in, actions out.
//! - [`runner::SessionRunner`]: tokio event loop performing those actions.
//! - [`orchestrator::CommandOrchestrator`]: concurrent device command fan-out.
//! - [`telemetry::TelemetrySubscription`]: telemetry stream with reconnection.
//! - [`ports`]: collaborator traits (device RPC, telemetry, roster, persistence, clock).

pub mod config;
pub mod engine;
mod finalizer;
pub mod orchestrator;
pub mod ports;
pub mod roster;
pub mod runner;
pub mod telemetry;

pub use config::{ConfigError, SessionConfig};
pub use engine::{
    BatchKind, EngineAction, EngineSnapshot, SessionEngine, SessionError, SessionNotice,
    SessionSetup, SessionTimer,
};
pub use orchestrator::CommandOrchestrator;
pub use ports::{
    Ack, Clock, DeviceTransport, ManualClock, PersistError, Persistence, Roster, RosterEntry,
    SystemClock, TelemetrySource, TelemetryStream, TransportError,
};
pub use roster::refresh_roster;
pub use runner::{SessionHandle, SessionPorts, SessionRunner};
pub use telemetry::{TelemetryMessage, TelemetrySubscription};
