use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, trace};

use super::{ReadyKind, Scheduler, Shared};
use crate::instance::{InstanceState, MailboxOp, RunOutcome, SliceResult};

/// Body of one worker thread. Returns when the scheduler shuts down.
pub(crate) fn worker_loop(sched: Arc<Scheduler>, index: usize) {
    debug!(worker = index, "worker started");
    while let Some(instance) = sched.next_ready() {
        run_once(&sched, &instance);
    }
    debug!(worker = index, "worker stopped");
}

impl Scheduler {
    /// Block until an instance is ready, then claim it
    pub(super) fn next_ready(&self) -> Option<Shared> {
        let mut ready = self.ready.lock();
        loop {
            if self.is_shut_down() {
                return None;
            }
            if !self.is_paused() {
                if let Some((kind, instance)) = ready.pop() {
                    let mut mb = instance.mailbox();
                    let expected = match kind {
                        ReadyKind::Start => InstanceState::QueuedToStart,
                        ReadyKind::Yield => InstanceState::QueuedToYield,
                    };
                    if mb.state != expected {
                        error!(
                            instance = %instance.id,
                            state = %mb.state,
                            queue = ?kind,
                            "dequeued instance in the wrong state"
                        );
                        panic!(
                            "scheduler invariant violated: {} on {:?} queue in state {}",
                            instance.id, kind, mb.state
                        );
                    }
                    mb.state = InstanceState::Running;
                    drop(mb);
                    return Some(instance);
                }
            }
            self.ready_cv.wait(&mut ready);
        }
    }

    /// Apply the outcome of a slice to the instance's state and queues
    fn after_slice(&self, instance: &Shared, result: SliceResult) {
        let mut queues = self.lock_queues();
        let mut mb = instance.mailbox();

        match result.op {
            MailboxOp::None => {}
            MailboxOp::PushFront(evt) => mb.events.push_front(evt),
            MailboxOp::ReplaceWith(evt) => {
                mb.events.clear();
                mb.events.push_front(evt);
            }
        }

        if instance.is_disposed() || result.outcome == RunOutcome::Die {
            instance.mark_disposed();
            queues.transition(instance, &mut mb, InstanceState::Disposed);
            instance.teardown_locked(&mut mb);
            debug!(instance = %instance.id, "instance disposed");
            return;
        }

        if instance.reset_requested() {
            queues.transition(instance, &mut mb, InstanceState::Resetting);
            instance.reset_locked(&mut mb);
            queues.transition(instance, &mut mb, InstanceState::QueuedToStart);
            return;
        }

        if let RunOutcome::Sleep(until) = result.outcome {
            mb.sleep_until = Some(until);
        }

        if instance.suspend_count() > 0 {
            queues.transition(instance, &mut mb, InstanceState::Suspended);
            return;
        }

        let next = match result.outcome {
            RunOutcome::Sleep(_) => {
                self.sleeps.fetch_add(1, Ordering::Relaxed);
                InstanceState::Sleeping
            }
            RunOutcome::Yield => {
                self.yields.fetch_add(1, Ordering::Relaxed);
                InstanceState::QueuedToYield
            }
            _ if instance.is_paused() => InstanceState::QueuedToYield,
            _ if !mb.events.is_empty() => InstanceState::QueuedToStart,
            _ => InstanceState::Idle,
        };
        trace!(instance = %instance.id, state = %next, "slice done");
        queues.transition(instance, &mut mb, next);
    }
}

fn run_once(sched: &Scheduler, instance: &Shared) {
    sched.mark_running(instance);
    sched.slices.fetch_add(1, Ordering::Relaxed);

    let held = instance.is_disposed() || instance.reset_requested() || instance.suspend_count() > 0;
    let result = if held {
        SliceResult::finished()
    } else {
        let next = if instance.is_paused() {
            None
        } else {
            instance.mailbox().events.pop()
        };
        let event = next.as_ref().map(|e| e.event);
        match panic::catch_unwind(AssertUnwindSafe(|| instance.run_slice(next))) {
            Ok(result) => result,
            Err(cause) => {
                let cause = cause
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| cause.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                error!(
                    instance = %instance.id,
                    event = ?event,
                    "slice panicked, handler abandoned: {}", cause
                );
                sched.panics.fetch_add(1, Ordering::Relaxed);
                instance.recover_after_panic()
            }
        }
    };

    sched.unmark_running(instance.id);
    sched.after_slice(instance, result);
}
