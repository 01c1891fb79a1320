//! Host capability table
//!
//! Scripts reach the outside world only through named capabilities the host
//! registers here. A script's imports are resolved against the table once, at
//! load time; an unknown import fails the load.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::events::{DetectParams, EventCode};
use crate::types::{InstanceId, ObjectId};
use crate::vm::errors::{ErrorInfo, HOST_ERROR, TYPE_ERROR};
use crate::vm::Val;

/// Longest single sleep; longer requests are clamped to it
pub const MAX_SLEEP: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Wake-up time for a sleep, with host-supplied durations capped at [`MAX_SLEEP`]
pub(crate) fn sleep_deadline(d: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(d.min(MAX_SLEEP)).unwrap_or(now)
}

/// What the running handler looks like to a capability
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub instance_id: InstanceId,
    pub object_id: ObjectId,
    pub state: &'a str,
    pub event: Option<EventCode>,
    pub detect: &'a [DetectParams],
}

/// Result of a capability call
#[derive(Debug, Clone, PartialEq)]
pub enum HostOutcome {
    Value(Val),
    /// Suspend the calling instance; the call returns null when it wakes
    Sleep(Duration),
    /// Raised in the script as a catchable error
    Fault(ErrorInfo),
    /// Reset the calling instance at the end of this call
    Reset,
    /// Terminate the calling instance
    Die,
}

impl HostOutcome {
    pub fn fault(message: impl Into<String>) -> Self {
        HostOutcome::Fault(ErrorInfo::new(HOST_ERROR, message))
    }
}

pub type NativeFn = dyn Fn(&CallContext<'_>, &[Val]) -> HostOutcome + Send + Sync;

#[derive(Clone)]
pub enum Capability {
    Function(Arc<NativeFn>),
    Constant(Val),
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Function(_) => f.write_str("Function(..)"),
            Capability::Constant(v) => write!(f, "Constant({:?})", v),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    entries: HashMap<String, Capability>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding the capabilities the engine itself implements:
    /// `sleep`, `reset_script` and `die`.
    pub fn with_core() -> Self {
        let mut table = Self::new();
        table.register_fn("sleep", |_, args| match args.first().and_then(Val::as_float) {
            Some(secs) if secs > 0.0 => HostOutcome::Sleep(
                Duration::try_from_secs_f64(secs).map_or(MAX_SLEEP, |d| d.min(MAX_SLEEP)),
            ),
            Some(_) => HostOutcome::Value(Val::Null),
            None => HostOutcome::Fault(ErrorInfo::new(
                TYPE_ERROR,
                "sleep expects a number of seconds",
            )),
        });
        table.register_fn("reset_script", |_, _| HostOutcome::Reset);
        table.register_fn("die", |_, _| HostOutcome::Die);
        table
    }

    pub fn register_fn<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&CallContext<'_>, &[Val]) -> HostOutcome + Send + Sync + 'static,
    {
        self.entries
            .insert(name.to_string(), Capability::Function(Arc::new(f)));
        self
    }

    pub fn register_const(&mut self, name: &str, val: Val) -> &mut Self {
        self.entries
            .insert(name.to_string(), Capability::Constant(val));
        self
    }

    /// Add every entry of `other`, replacing entries with the same name
    pub fn extend(&mut self, other: &CapabilityTable) -> &mut Self {
        self.entries
            .extend(other.entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a script's import list. Returns the first unknown name on failure.
    pub fn resolve(&self, imports: &[String]) -> Result<HashMap<String, Capability>, String> {
        imports
            .iter()
            .map(|name| match self.entries.get(name) {
                Some(cap) => Ok((name.clone(), cap.clone())),
                None => Err(name.clone()),
            })
            .collect()
    }
}
