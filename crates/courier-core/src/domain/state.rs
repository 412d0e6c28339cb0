//! Worker lifecycle state.

use serde::{Deserialize, Serialize};

/// Worker state machine.
///
/// Transitions:
/// - Stopped -> Starting -> Running
/// - Running -> Stopping -> Stopped (explicit `stop()` or a self-stop limit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl WorkerState {
    pub fn is_running(self) -> bool {
        matches!(self, WorkerState::Starting | WorkerState::Running)
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            WorkerState::Stopped => 0,
            WorkerState::Starting => 1,
            WorkerState::Running => 2,
            WorkerState::Stopping => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Starting,
            2 => WorkerState::Running,
            3 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }
}
