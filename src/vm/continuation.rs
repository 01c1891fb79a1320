//! Suspendable handler executions
//!
//! A `Continuation` owns the VM of one handler invocation and tracks whether
//! it is running, paused at a checkpoint or gone. Paused continuations can be
//! snapshotted and rebuilt, which is what migration uses.

use serde::{Deserialize, Serialize};

use super::context::ExecContext;
use super::errors::{ErrorInfo, THROWN};
use super::exec_loop::run_until_done;
use super::types::{Control, Val};
use super::vm::{PauseReason, Step, VM};
use crate::errors::ContinuationError;
use crate::heap::HeapAccountant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activity {
    Inactive,
    Paused,
    Running,
}

/// How a handler ended normally
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Returned(Val),
    StateChange(usize),
    Reset,
    Die,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    Completed(Completion),
    /// Uncaught error; the handler is over
    Threw(ErrorInfo),
    Paused(PauseReason),
}

#[derive(Debug)]
pub struct Continuation {
    vm: Option<VM>,
    activity: Activity,
}

impl Default for Continuation {
    fn default() -> Self {
        Self::new()
    }
}

impl Continuation {
    pub fn new() -> Self {
        Self {
            vm: None,
            activity: Activity::Inactive,
        }
    }

    /// Rebuild a paused continuation from a snapshot
    pub fn from_snapshot(vm: VM) -> Self {
        Self {
            vm: Some(vm),
            activity: Activity::Paused,
        }
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }

    pub fn is_paused(&self) -> bool {
        self.activity == Activity::Paused
    }

    /// Run `vm` from its first statement until it pauses or ends
    pub fn start(
        &mut self,
        vm: VM,
        ctx: &mut ExecContext<'_>,
    ) -> Result<RunResult, ContinuationError> {
        if self.activity != Activity::Inactive {
            return Err(ContinuationError::AlreadyStarted(self.activity));
        }
        self.vm = Some(vm);
        Ok(self.drive(ctx))
    }

    /// Continue a paused handler from its checkpoint
    pub fn resume(&mut self, ctx: &mut ExecContext<'_>) -> Result<RunResult, ContinuationError> {
        if self.activity != Activity::Paused {
            return Err(ContinuationError::NotPaused(self.activity));
        }
        Ok(self.drive(ctx))
    }

    fn drive(&mut self, ctx: &mut ExecContext<'_>) -> RunResult {
        let Some(vm) = self.vm.as_mut() else {
            self.activity = Activity::Inactive;
            return RunResult::Completed(Completion::Returned(Val::Null));
        };
        self.activity = Activity::Running;

        match run_until_done(vm, ctx) {
            Step::Pause(reason) => {
                self.activity = Activity::Paused;
                RunResult::Paused(reason)
            }
            Step::Done | Step::Continue => {
                let control = std::mem::replace(&mut vm.control, Control::None);
                vm.release(ctx.heap);
                self.vm = None;
                self.activity = Activity::Inactive;
                match control {
                    Control::None | Control::Break | Control::Continue => {
                        RunResult::Completed(Completion::Returned(Val::Null))
                    }
                    Control::Return(v) => RunResult::Completed(Completion::Returned(v)),
                    Control::StateChange(code) => {
                        RunResult::Completed(Completion::StateChange(code))
                    }
                    Control::Reset => RunResult::Completed(Completion::Reset),
                    Control::Die => RunResult::Completed(Completion::Die),
                    Control::Throw(Val::Error(e)) => RunResult::Threw(e),
                    Control::Throw(other) => {
                        RunResult::Threw(ErrorInfo::new(THROWN, other.to_string()))
                    }
                }
            }
        }
    }

    /// The paused VM, for serialization. None unless paused.
    pub fn snapshot(&self) -> Option<&VM> {
        match self.activity {
            Activity::Paused => self.vm.as_ref(),
            _ => None,
        }
    }

    /// Discard a paused handler without running it further
    pub fn abandon(&mut self, heap: &HeapAccountant) {
        if let Some(mut vm) = self.vm.take() {
            vm.release(heap);
        }
        self.activity = Activity::Inactive;
    }
}
