use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a script instance
///
/// Each queued state corresponds to exactly one scheduler queue; every other
/// state means the instance is on no queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Constructing,
    QueuedToStart,
    Running,
    QueuedToYield,
    Sleeping,
    RemovingFromSleep,
    Idle,
    Suspended,
    /// Held only by the thread performing a reset
    Resetting,
    Disposed,
}

/// Queue an instance must be on for a given state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    None,
    Start,
    Yield,
    Sleep,
}

impl InstanceState {
    pub fn queue(self) -> QueueKind {
        match self {
            InstanceState::QueuedToStart => QueueKind::Start,
            InstanceState::QueuedToYield => QueueKind::Yield,
            InstanceState::Sleeping => QueueKind::Sleep,
            _ => QueueKind::None,
        }
    }

    /// Nothing to do until an event arrives or a host call changes things
    pub fn is_quiescent(self) -> bool {
        matches!(
            self,
            InstanceState::Idle | InstanceState::Suspended | InstanceState::Disposed
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Constructing => "constructing",
            InstanceState::QueuedToStart => "queued_to_start",
            InstanceState::Running => "running",
            InstanceState::QueuedToYield => "queued_to_yield",
            InstanceState::Sleeping => "sleeping",
            InstanceState::RemovingFromSleep => "removing_from_sleep",
            InstanceState::Idle => "idle",
            InstanceState::Suspended => "suspended",
            InstanceState::Resetting => "resetting",
            InstanceState::Disposed => "disposed",
        };
        f.write_str(s)
    }
}
