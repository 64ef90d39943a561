//! CLI definition using clap derive.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use hitline_core::types::GoalMap;
use hitline_ingest::ReconnectPolicy;
use hitline_session::SessionConfig;

use crate::sim::FleetSpec;

#[derive(Parser)]
#[command(name = "hitline", about = "timed multi-target training sessions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one session against a simulated fleet and print its summary (JSON)
    Simulate(SimulateOpts),
    /// Show the simulated fleet's classified roster
    Roster(RosterOpts),
}

#[derive(clap::Args, Clone)]
pub struct FleetOpts {
    /// Number of simulated targets (named target-1 .. target-N)
    #[arg(long, env = "HITLINE_DEVICES", default_value = "3")]
    pub devices: usize,

    /// Targets that never answer commands and report as offline
    #[arg(long, value_delimiter = ',')]
    pub offline: Vec<String>,
}

impl FleetOpts {
    pub fn spec(&self) -> FleetSpec {
        FleetSpec {
            devices: self.devices,
            offline: self.offline.iter().cloned().collect(),
            ..FleetSpec::default()
        }
    }
}

#[derive(clap::Args, Clone)]
pub struct SimulateOpts {
    #[command(flatten)]
    pub fleet: FleetOpts,

    /// Targets to select (default: every target not offline)
    #[arg(long, value_delimiter = ',')]
    pub targets: Vec<String>,

    /// Per-target hit goal, e.g. `--goal target-1=5` (repeatable)
    #[arg(long = "goal", value_parser = parse_goal)]
    pub goals: Vec<(String, u32)>,

    /// Session length in seconds (default: until goals are met or ctrl-c)
    #[arg(long, env = "HITLINE_DURATION_SECS")]
    pub duration_secs: Option<u64>,

    /// Interval between simulated hits on each target
    #[arg(long, default_value = "800")]
    pub hit_interval_ms: u64,

    /// Targets that reject the first start command
    #[arg(long, value_delimiter = ',')]
    pub fail_start: Vec<String>,

    /// Drop every Nth hit event before it reaches the session
    #[arg(long)]
    pub drop_every: Option<u64>,

    /// Telemetry subscription attempts that fail before one succeeds
    #[arg(long, default_value = "0")]
    pub stream_failures: u32,

    /// Retry failed starts once the session is running
    #[arg(long)]
    pub retry_failed: bool,

    /// Per-device command timeout in milliseconds
    #[arg(long, env = "HITLINE_COMMAND_TIMEOUT_MS", default_value = "5000")]
    pub command_timeout_ms: u64,

    /// Wait for first telemetry after launch, in milliseconds
    #[arg(long, env = "HITLINE_LAUNCH_GRACE_MS", default_value = "10000")]
    pub launch_grace_ms: u64,

    /// How long hits are held for timestamp reordering, in milliseconds
    #[arg(long, env = "HITLINE_REORDER_HOLD_MS", default_value = "250")]
    pub reorder_hold_ms: u64,

    /// Cap on manual retries per session (default: unlimited)
    #[arg(long, env = "HITLINE_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// First telemetry reconnect delay in milliseconds
    #[arg(long, env = "HITLINE_RECONNECT_MS", default_value = "1000")]
    pub reconnect_ms: u64,

    /// JSON-lines file that finished summaries are appended to
    #[arg(long, env = "HITLINE_SUMMARY_PATH", default_value = "hitline-sessions.jsonl")]
    pub out: PathBuf,
}

impl SimulateOpts {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            command_timeout_ms: self.command_timeout_ms,
            launch_grace_ms: self.launch_grace_ms,
            default_duration_secs: self.duration_secs,
            reorder_hold_ms: self.reorder_hold_ms,
            max_manual_retries: self.max_retries,
            reconnect: ReconnectPolicy {
                initial_backoff_ms: self.reconnect_ms,
                ..ReconnectPolicy::default()
            },
            ..SessionConfig::default()
        }
    }

    pub fn fleet_spec(&self) -> FleetSpec {
        FleetSpec {
            hit_interval: Duration::from_millis(self.hit_interval_ms),
            fail_start: self.fail_start.iter().cloned().collect(),
            drop_every: self.drop_every,
            stream_failures: self.stream_failures,
            ..self.fleet.spec()
        }
    }

    pub fn goal_map(&self) -> GoalMap {
        self.goals.iter().cloned().collect()
    }

    pub fn target_filter(&self) -> Option<BTreeSet<String>> {
        (!self.targets.is_empty()).then(|| self.targets.iter().cloned().collect())
    }
}

#[derive(clap::Args, Clone)]
pub struct RosterOpts {
    #[command(flatten)]
    pub fleet: FleetOpts,

    /// Print the roster as JSON
    #[arg(long)]
    pub json: bool,
}

/// Parse `DEVICE=N`.
fn parse_goal(s: &str) -> Result<(String, u32), String> {
    let (device, goal) = s
        .split_once('=')
        .ok_or_else(|| format!("expected DEVICE=N, got {s:?}"))?;
    let device = device.trim();
    if device.is_empty() {
        return Err(format!("missing device id in {s:?}"));
    }
    let goal: u32 = goal
        .trim()
        .parse()
        .map_err(|e| format!("invalid goal in {s:?}: {e}"))?;
    Ok((device.to_string(), goal))
}
