//! Running one time slice of an instance

use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, error, warn};

use super::{RunData, ScriptInstance};
use crate::capabilities::CallContext;
use crate::errors::{ContinuationError, ResourceExceeded};
use crate::events::{EventCode, EventParams};
use crate::heap::value_size;
use crate::vm::{Completion, ExecContext, PauseReason, RunResult, VM};

/// How a slice left the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The current event is done (or there was nothing to run)
    Finished,
    /// Paused at a checkpoint and wants to continue later
    Yield,
    /// Paused in a sleep call until the given time
    Sleep(Instant),
    /// The script asked to be removed
    Die,
}

/// Change to the event queue the worker applies under the mailbox lock
#[derive(Debug, Clone, PartialEq)]
pub enum MailboxOp {
    None,
    PushFront(EventParams),
    /// Drop every queued event, then queue this one
    ReplaceWith(EventParams),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SliceResult {
    pub outcome: RunOutcome,
    pub op: MailboxOp,
}

impl SliceResult {
    pub fn finished() -> Self {
        Self {
            outcome: RunOutcome::Finished,
            op: MailboxOp::None,
        }
    }

    fn finished_with(op: MailboxOp) -> Self {
        Self {
            outcome: RunOutcome::Finished,
            op,
        }
    }

    fn paused(outcome: RunOutcome) -> Self {
        Self {
            outcome,
            op: MailboxOp::None,
        }
    }
}

impl ScriptInstance {
    /// Resume the paused handler, or start the handler for `next`
    ///
    /// Called only by the worker that moved the instance to `Running`. When a
    /// handler is paused `next` must be `None`; the caller leaves the queue
    /// alone until the paused handler finishes.
    pub fn run_slice(&self, next: Option<EventParams>) -> SliceResult {
        let mut guard = self.run.lock();
        let run = &mut *guard;

        if run.needs_global_init {
            if let Err(e) = self.install_globals(run) {
                warn!(
                    instance = %self.id,
                    object = %self.object_id,
                    "global initialisation failed: {}", e
                );
                return SliceResult::finished();
            }
        }

        let result = if run.continuation.is_paused() {
            if let Some(evt) = &next {
                error!(instance = %self.id, event = %evt.event, "event delivered to a paused instance");
            }
            self.drive(run, None)
        } else {
            let Some(evt) = next else {
                return SliceResult::finished();
            };
            let Some(handler) = self.script.handler(run.state_code, evt.event) else {
                debug!(instance = %self.id, event = %evt.event, "no handler");
                return self.finish_event(run, evt.event);
            };
            let vm = match VM::for_handler(&handler.body, &handler.params, evt.args.clone(), &self.heap)
            {
                Ok(vm) => vm,
                Err(e) => {
                    warn!(
                        instance = %self.id,
                        object = %self.object_id,
                        event = %evt.event,
                        code = %e.code,
                        "handler could not start: {}", e.message
                    );
                    return self.finish_event(run, evt.event);
                }
            };
            run.current_event = Some(evt);
            self.drive(run, Some(vm))
        };

        let result = match result {
            Ok(r) => r,
            Err(e) => {
                error!(instance = %self.id, "continuation misuse: {}", e);
                run.continuation.abandon(&self.heap);
                self.paused.store(false, Ordering::Release);
                run.current_event = None;
                return SliceResult::finished();
            }
        };
        self.paused
            .store(run.continuation.is_paused(), Ordering::Release);

        let event = run
            .current_event
            .as_ref()
            .map(|e| e.event)
            .unwrap_or(EventCode::StateEntry);

        match result {
            RunResult::Paused(PauseReason::Yield) => SliceResult::paused(RunOutcome::Yield),
            RunResult::Paused(PauseReason::Sleep(until)) => {
                SliceResult::paused(RunOutcome::Sleep(until))
            }
            RunResult::Completed(Completion::Returned(_)) => self.finish_event(run, event),
            RunResult::Threw(e) => {
                warn!(
                    instance = %self.id,
                    object = %self.object_id,
                    event = %event,
                    code = %e.code,
                    "script fault: {}", e.message
                );
                self.finish_event(run, event)
            }
            RunResult::Completed(Completion::StateChange(code)) => {
                if event == EventCode::StateExit || code == run.state_code {
                    return self.finish_event(run, event);
                }
                run.current_event = None;
                run.pending_state = Some(code);
                SliceResult::finished_with(MailboxOp::ReplaceWith(EventParams::new(
                    EventCode::StateExit,
                    vec![],
                )))
            }
            RunResult::Completed(Completion::Reset) => {
                run.reset(&self.heap);
                SliceResult::finished_with(MailboxOp::ReplaceWith(EventParams::new(
                    EventCode::StateEntry,
                    vec![],
                )))
            }
            RunResult::Completed(Completion::Die) => {
                run.current_event = None;
                SliceResult::paused(RunOutcome::Die)
            }
        }
    }

    /// Drop whatever handler was running when a slice panicked
    ///
    /// Globals keep their last committed values and the heap is recounted
    /// from them. A pending state change whose `state_exit` panicked still
    /// completes.
    pub(crate) fn recover_after_panic(&self) -> SliceResult {
        let mut guard = self.run.lock();
        let run = &mut *guard;
        run.continuation.abandon(&self.heap);
        self.heap
            .reset_to(run.globals.iter().map(value_size).sum());
        self.paused.store(false, Ordering::Release);
        let event = run
            .current_event
            .as_ref()
            .map(|e| e.event)
            .unwrap_or(EventCode::StateEntry);
        self.finish_event(run, event)
    }

    fn install_globals(&self, run: &mut RunData) -> Result<(), ResourceExceeded> {
        let initial = self.script.initial_globals();
        let size: usize = initial.iter().map(value_size).sum();
        self.heap.try_charge(size)?;
        run.globals = initial;
        run.needs_global_init = false;
        Ok(())
    }

    fn drive(&self, run: &mut RunData, start: Option<VM>) -> Result<RunResult, ContinuationError> {
        let RunData {
            globals,
            continuation,
            state_code,
            current_event,
            ..
        } = run;
        let (event, detect) = match current_event.as_ref() {
            Some(e) => (Some(e.event), e.detect.as_slice()),
            None => (None, &[][..]),
        };
        let mut ctx = ExecContext {
            script: &self.script,
            globals,
            heap: &self.heap,
            signal: self,
            call: CallContext {
                instance_id: self.id,
                object_id: self.object_id,
                state: self.script.state_name(*state_code),
                event,
                detect,
            },
            stack_limit: self.stack_limit,
        };
        match start {
            Some(vm) => continuation.start(vm, &mut ctx),
            None => continuation.resume(&mut ctx),
        }
    }

    /// The handler for `event` is over. Completes a pending state change
    /// once its `state_exit` has run.
    fn finish_event(&self, run: &mut RunData, event: EventCode) -> SliceResult {
        run.current_event = None;
        if event != EventCode::StateExit {
            return SliceResult::finished();
        }
        match run.pending_state.take() {
            Some(code) => {
                debug!(
                    instance = %self.id,
                    from = self.script.state_name(run.state_code),
                    to = self.script.state_name(code),
                    "state change"
                );
                run.state_code = code;
                SliceResult::finished_with(MailboxOp::PushFront(EventParams::new(
                    EventCode::StateEntry,
                    vec![],
                )))
            }
            None => SliceResult::finished(),
        }
    }
}
