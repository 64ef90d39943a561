//! Session lifecycle state machine.
//!
//! `Idle → Selecting → Launching → Running → Stopping → Finalizing → Idle`,
//! plus `Selecting → Idle` (cancel) and `Launching → Idle` (launch failure).
//! Every other edge is rejected. Time is passed in; no clock access.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of transitions retained in [`Lifecycle::history`].
pub const DEFAULT_HISTORY_LEN: usize = 32;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionLifecycleState {
    #[default]
    Idle,
    Selecting,
    Launching,
    Running,
    Stopping,
    Finalizing,
}

impl SessionLifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Selecting => "selecting",
            Self::Launching => "launching",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Finalizing => "finalizing",
        }
    }

    /// Locked states disable device/room/duration selection.
    pub fn is_locked(self) -> bool {
        matches!(
            self,
            Self::Launching | Self::Running | Self::Stopping | Self::Finalizing
        )
    }

    /// Whether `self → to` is one of the permitted edges.
    pub fn can_transition_to(self, to: Self) -> bool {
        use SessionLifecycleState::*;
        matches!(
            (self, to),
            (Idle, Selecting)
                | (Selecting, Idle)
                | (Selecting, Launching)
                | (Launching, Running)
                | (Launching, Idle)
                | (Running, Stopping)
                | (Stopping, Finalizing)
                | (Finalizing, Idle)
        )
    }
}

impl fmt::Display for SessionLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid lifecycle transition: {from} -> {to}")]
pub struct LifecycleError {
    pub from: SessionLifecycleState,
    pub to: SessionLifecycleState,
}

/// One applied transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleStep {
    pub from: SessionLifecycleState,
    pub to: SessionLifecycleState,
    pub at: DateTime<Utc>,
}

/// Owns the current lifecycle state and a bounded transition history.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: SessionLifecycleState,
    history: VecDeque<LifecycleStep>,
    history_len: usize,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::with_history_len(DEFAULT_HISTORY_LEN)
    }

    pub fn with_history_len(history_len: usize) -> Self {
        Self {
            state: SessionLifecycleState::Idle,
            history: VecDeque::new(),
            history_len: history_len.max(1),
        }
    }

    pub fn state(&self) -> SessionLifecycleState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    /// Apply `current → to`, or reject it leaving the state unchanged.
    pub fn transition(
        &mut self,
        to: SessionLifecycleState,
        now: DateTime<Utc>,
    ) -> Result<LifecycleStep, LifecycleError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(LifecycleError { from, to });
        }
        self.state = to;
        let step = LifecycleStep { from, to, at: now };
        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(step.clone());
        Ok(step)
    }

    /// Oldest-first transition history.
    pub fn history(&self) -> impl Iterator<Item = &LifecycleStep> {
        self.history.iter()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ────────────────────────────────────────────────────────
