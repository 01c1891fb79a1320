//! Engine error taxonomy
//!
//! Script-visible faults are `vm::errors::ErrorInfo` values. The types here are
//! what the engine reports to its host.

use std::fmt;
use thiserror::Error;

use crate::types::InstanceId;
use crate::vm::Activity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Heap,
    Stack,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Heap => write!(f, "heap"),
            ResourceKind::Stack => write!(f, "stack"),
        }
    }
}

/// A mutation or call would push an instance past one of its limits.
/// The offending change is never committed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} limit exceeded: {requested} bytes requested, limit {limit}")]
pub struct ResourceExceeded {
    pub kind: ResourceKind,
    pub requested: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("failed to compile {asset_id}: {}", diagnostics.join("; "))]
    Failed {
        asset_id: String,
        diagnostics: Vec<String>,
    },

    #[error("{asset_id} imports unknown capability '{name}'")]
    UnresolvedImport { asset_id: String, name: String },

    #[error("{asset_id} is malformed: {message}")]
    Invalid { asset_id: String, message: String },
}

/// Misuse of the continuation API. Always a scheduler bug, never a script bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContinuationError {
    #[error("start called on a continuation that is {0:?}")]
    AlreadyStarted(Activity),

    #[error("resume called on a continuation that is {0:?}")]
    NotPaused(Activity),
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration version {found} does not match engine version {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("saved state was produced by a different compilation of {asset_id}")]
    FingerprintMismatch { asset_id: String },

    #[error("saved state is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("saved state does not fit the script: {0}")]
    Incompatible(String),

    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Errors after which the payload is discarded and the instance starts fresh
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            MigrationError::VersionMismatch { .. } | MigrationError::FingerprintMismatch { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("no script instance {0}")]
    UnknownInstance(InstanceId),

    #[error("script instance {0} already exists")]
    DuplicateInstance(InstanceId),

    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("event table self-check failed: {0}")]
    EventTable(String),

    #[error("scheduler invariant violated: {0}")]
    InvariantViolation(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("engine is shut down")]
    ShutDown,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
