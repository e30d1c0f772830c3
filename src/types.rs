//! Shared state and statistics types for vidpipe-rs
//!
//! # Main Types
//!
//! - [`EngineState`] - Lifecycle state of an engine
//! - [`ModuleState`] - Per-module runtime state, including the `Faulted` substate
//! - [`EngineEvent`] - Notifications published on the engine's event channel
//! - [`EngineStats`] - Point-in-time statistics snapshot
//!
//! Snapshots derive `Serialize` so front ends can log or export them as JSON.

use crate::pipeline::module_type::ModuleType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EngineState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Cleaned,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Runtime state of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum ModuleState {
    #[default]
    Idle = 0,
    Running = 1,
    /// Work loop ended on its own (source exhausted or inputs closed).
    Finished = 2,
    /// Work loop returned an error; the module no longer pulls or pushes.
    Faulted = 3,
    /// Work loop exited because the engine stopped it.
    Stopped = 4,
    /// Worker did not exit within the stop grace period.
    Abandoned = 5,
    Cleaned = 6,
}

impl ModuleState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ModuleState::Running,
            2 => ModuleState::Finished,
            3 => ModuleState::Faulted,
            4 => ModuleState::Stopped,
            5 => ModuleState::Abandoned,
            6 => ModuleState::Cleaned,
            _ => ModuleState::Idle,
        }
    }

    /// Whether the module's worker has exited.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ModuleState::Finished | ModuleState::Faulted | ModuleState::Stopped | ModuleState::Cleaned
        )
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Notifications published by running modules and the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EngineEvent {
    ModuleStarted { module: String },
    ModuleFinished { module: String },
    ModuleFaulted { module: String, error: String },
    /// Recoverable transport problem (retry, peer disconnect).
    TransportError { module: String, message: String },
    /// A fault triggered a whole-engine stop (`halt_on_fault`).
    HaltRequested { module: String },
    Stopped,
}

/// Statistics for one module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleStats {
    pub name: String,
    pub module_type: ModuleType,
    pub state: ModuleState,
    /// Units of work completed since start.
    pub frames_processed: u64,
    /// Units of work per second over the trailing window.
    pub process_fps: f64,
    /// Average duration of the last 25 units of work.
    pub avg_latency_ms: f64,
    /// Slowest of those units of work.
    pub max_latency_ms: f64,
}

/// Statistics for one connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub from: String,
    pub to: String,
    pub capacity: usize,
    pub queued: usize,
    pub push_fps: f64,
    pub pushed: u64,
    pub popped: u64,
}

/// Point-in-time snapshot of an engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub state: EngineState,
    pub modules: Vec<ModuleStats>,
    pub connections: Vec<ConnectionStats>,
    pub subscriptions: usize,
}

impl EngineStats {
    pub fn module(&self, name: &str) -> Option<&ModuleStats> {
        self.modules.iter().find(|m| m.name == name)
    }
}
