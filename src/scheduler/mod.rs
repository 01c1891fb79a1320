//! Cooperative scheduler
//!
//! A fixed pool of worker threads takes instances off two ready queues and
//! runs one slice at a time. Two service threads feed it: the sleep service
//! moves expired sleepers to the yield queue, and the time-slice service asks
//! every running instance to yield once per period, so no slice outlives the
//! period in which it started.
//!
//! Lock order, outermost first: sleep queue, ready queues, instance mailbox,
//! instance run data. The running set and the service lock are leaves.

mod queues;
mod sleep_service;
mod timeslice;
mod worker;

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use crate::errors::{EngineError, Result};
use crate::instance::{InstanceState, Mailbox, QueueKind, ScriptInstance};
use crate::types::InstanceId;

pub use queues::{ReadyKind, ReadySet, SleepSet};
pub(crate) use sleep_service::sleep_loop;
pub(crate) use timeslice::timeslice_loop;
pub(crate) use worker::worker_loop;

type Shared = Arc<ScriptInstance>;

/// Counters for admin and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SchedulerStats {
    pub slices: u64,
    pub yields: u64,
    pub sleeps: u64,
    pub wakeups: u64,
    /// Slices that panicked and were abandoned
    pub panics: u64,
}

#[derive(Debug)]
pub struct Scheduler {
    ready: Mutex<ReadySet<Shared>>,
    ready_cv: Condvar,
    sleep: Mutex<SleepSet<Shared>>,
    sleep_cv: Condvar,
    running: Mutex<HashMap<InstanceId, Shared>>,
    service: Mutex<()>,
    service_cv: Condvar,
    paused: AtomicBool,
    shutdown: AtomicBool,
    slices: AtomicU64,
    yields: AtomicU64,
    sleeps: AtomicU64,
    wakeups: AtomicU64,
    panics: AtomicU64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            ready: Mutex::new(ReadySet::new()),
            ready_cv: Condvar::new(),
            sleep: Mutex::new(SleepSet::new()),
            sleep_cv: Condvar::new(),
            running: Mutex::new(HashMap::new()),
            service: Mutex::new(()),
            service_cv: Condvar::new(),
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            slices: AtomicU64::new(0),
            yields: AtomicU64::new(0),
            sleeps: AtomicU64::new(0),
            wakeups: AtomicU64::new(0),
            panics: AtomicU64::new(0),
        }
    }

    /// Take both queue locks in order
    pub fn lock_queues(&self) -> QueueGuard<'_> {
        let sleep = self.sleep.lock();
        let ready = self.ready.lock();
        QueueGuard {
            sched: self,
            sleep,
            ready,
            wake_workers: 0,
            wake_sleeper: false,
        }
    }

    /// Stop handing out work; posting keeps working
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn unpause(&self) {
        let _ready = self.ready.lock();
        self.paused.store(false, Ordering::Release);
        self.ready_cv.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.flag_running();
        {
            let _ready = self.ready.lock();
            self.ready_cv.notify_all();
        }
        {
            let _sleep = self.sleep.lock();
            self.sleep_cv.notify_all();
        }
        let _service = self.service.lock();
        self.service_cv.notify_all();
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            slices: self.slices.load(Ordering::Relaxed),
            yields: self.yields.load(Ordering::Relaxed),
            sleeps: self.sleeps.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }

    pub fn ready_len(&self) -> usize {
        self.ready.lock().len()
    }

    pub fn sleeping_len(&self) -> usize {
        self.sleep.lock().len()
    }

    pub fn running_len(&self) -> usize {
        self.running.lock().len()
    }

    fn mark_running(&self, instance: &Shared) {
        instance.clear_yield();
        self.running.lock().insert(instance.id, Arc::clone(instance));
    }

    fn unmark_running(&self, id: InstanceId) {
        self.running.lock().remove(&id);
    }

    /// Ask every running instance to yield at its next checkpoint
    fn flag_running(&self) -> usize {
        let running = self.running.lock();
        for instance in running.values() {
            instance.request_yield();
        }
        running.len()
    }

    /// Check that every instance sits on exactly the queue its state names
    pub fn check_consistency<'a>(
        &self,
        instances: impl IntoIterator<Item = &'a Shared>,
    ) -> Result<()> {
        let queues = self.lock_queues();
        let mut expected_ready = 0;
        let mut expected_sleep = 0;

        for instance in instances {
            let mb = instance.mailbox();
            let id = instance.id;
            let found = [
                (QueueKind::Start, queues.ready.count(ReadyKind::Start, id)),
                (QueueKind::Yield, queues.ready.count(ReadyKind::Yield, id)),
                (QueueKind::Sleep, queues.sleep.count(id)),
            ];
            let want = mb.state.queue();
            for (kind, count) in found {
                let expected = usize::from(kind == want);
                if count != expected {
                    return Err(EngineError::InvariantViolation(format!(
                        "instance {} in state {} found {} time(s) on {:?} queue",
                        id, mb.state, count, kind
                    )));
                }
            }
            match want {
                QueueKind::Start | QueueKind::Yield => expected_ready += 1,
                QueueKind::Sleep => expected_sleep += 1,
                QueueKind::None => {}
            }
        }

        if queues.ready.len() != expected_ready || queues.sleep.len() != expected_sleep {
            return Err(EngineError::InvariantViolation(format!(
                "queues hold {} ready and {} sleeping entries, registry accounts for {} and {}",
                queues.ready.len(),
                queues.sleep.len(),
                expected_ready,
                expected_sleep
            )));
        }
        if !queues.sleep.is_sorted() {
            return Err(EngineError::InvariantViolation(
                "sleep queue out of order".into(),
            ));
        }
        Ok(())
    }
}

/// Both queue locks, held while an instance changes state
///
/// Waiting threads are woken when the guard drops.
pub struct QueueGuard<'a> {
    sched: &'a Scheduler,
    sleep: MutexGuard<'a, SleepSet<Shared>>,
    ready: MutexGuard<'a, ReadySet<Shared>>,
    wake_workers: usize,
    wake_sleeper: bool,
}

impl QueueGuard<'_> {
    /// Move `instance` to state `to`, keeping queue membership in step
    ///
    /// The caller holds the instance's mailbox. Moving to `Sleeping` requires
    /// `mailbox.sleep_until`.
    pub fn transition(&mut self, instance: &Shared, mailbox: &mut Mailbox, to: InstanceState) {
        let id = instance.id;
        let removed = match mailbox.state.queue() {
            QueueKind::None => true,
            QueueKind::Start => self.ready.remove(ReadyKind::Start, id).is_some(),
            QueueKind::Yield => self.ready.remove(ReadyKind::Yield, id).is_some(),
            QueueKind::Sleep => self.sleep.remove(id).is_some(),
        };
        if !removed {
            error!(instance = %id, state = %mailbox.state, "instance missing from its queue");
            panic!("scheduler invariant violated: {} in state {} not queued", id, mailbox.state);
        }

        mailbox.state = to;
        match to.queue() {
            QueueKind::None => {}
            QueueKind::Start => {
                self.ready.push(ReadyKind::Start, id, Arc::clone(instance));
                self.wake_workers += 1;
            }
            QueueKind::Yield => {
                self.ready.push(ReadyKind::Yield, id, Arc::clone(instance));
                self.wake_workers += 1;
            }
            QueueKind::Sleep => {
                let until = *mailbox.sleep_until.get_or_insert_with(Instant::now);
                if self.sleep.insert(until, id, Arc::clone(instance)) {
                    self.wake_sleeper = true;
                }
            }
        }
    }
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        if self.wake_sleeper {
            self.sched.sleep_cv.notify_one();
        }
        for _ in 0..self.wake_workers {
            self.sched.ready_cv.notify_one();
        }
    }
}

#[cfg(test)]
mod tests;
