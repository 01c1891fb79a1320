//! Everything a running handler can see outside its own frames

use std::sync::atomic::{AtomicBool, Ordering};

use super::types::Val;
use crate::capabilities::CallContext;
use crate::heap::HeapAccountant;
use crate::script::LoadedScript;

/// Polled at every checkpoint. Returning true makes the handler yield.
pub trait CheckpointSignal {
    fn should_pause(&self) -> bool;
}

/// Never asks the handler to pause
pub struct NeverPause;

impl CheckpointSignal for NeverPause {
    fn should_pause(&self) -> bool {
        false
    }
}

impl CheckpointSignal for AtomicBool {
    fn should_pause(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

pub struct ExecContext<'a> {
    pub script: &'a LoadedScript,
    pub globals: &'a mut Vec<Val>,
    pub heap: &'a HeapAccountant,
    pub signal: &'a dyn CheckpointSignal,
    pub call: CallContext<'a>,
    /// Maximum stack units (call frames plus their arguments)
    pub stack_limit: usize,
}
