//! Script instances
//!
//! One instance runs one compiled script for one host object. Its data is
//! split by who may touch it:
//!
//! - the mailbox (state tag, event queue, wake time) is shared with posting
//!   threads and the scheduler and is only ever held briefly;
//! - the run data (globals, paused continuation, script state) belongs to the
//!   worker running the instance, or to migration while it is not running;
//! - cooperative flags are atomics polled at every checkpoint.

mod run;
mod state;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::events::{EventCode, EventParams, EventQueue};
use crate::heap::HeapAccountant;
use crate::script::LoadedScript;
use crate::types::{InstanceId, InstanceSummary, ObjectId};
use crate::vm::{CheckpointSignal, Continuation, Val};

pub use run::{MailboxOp, RunOutcome, SliceResult};
pub use state::{InstanceState, QueueKind};

/// Part of an instance shared with posting threads
#[derive(Debug)]
pub struct Mailbox {
    pub state: InstanceState,
    pub events: EventQueue,
    /// Absolute wake time, set while sleeping (or suspended during a sleep)
    pub sleep_until: Option<Instant>,
    /// Whether the instance accepts events at all
    pub running: bool,
}

/// Part of an instance owned by whoever is executing it
#[derive(Debug)]
pub struct RunData {
    pub globals: Vec<Val>,
    pub continuation: Continuation,
    pub state_code: usize,
    /// Target of a state change waiting for its state_exit handler
    pub pending_state: Option<usize>,
    /// Event whose handler is running or paused
    pub current_event: Option<EventParams>,
    /// Globals hold nothing yet and are installed before the next handler
    pub needs_global_init: bool,
}

impl RunData {
    fn fresh() -> Self {
        Self {
            globals: Vec::new(),
            continuation: Continuation::new(),
            state_code: 0,
            pending_state: None,
            current_event: None,
            needs_global_init: true,
        }
    }

    /// Drop all run state and return the instance to its compiled defaults
    pub fn reset(&mut self, heap: &HeapAccountant) {
        self.continuation.abandon(heap);
        heap.reset_to(0);
        *self = Self::fresh();
    }
}

pub struct ScriptInstance {
    pub id: InstanceId,
    pub object_id: ObjectId,
    pub item_name: String,
    pub created_at: DateTime<Utc>,
    script: Arc<LoadedScript>,
    heap: HeapAccountant,
    stack_limit: usize,
    mailbox: Mutex<Mailbox>,
    run: Mutex<RunData>,
    yield_requested: AtomicBool,
    suspend_count: AtomicU32,
    disposed: AtomicBool,
    reset_requested: AtomicBool,
    /// Mirrors `run.continuation.is_paused()` so the scheduler can read it
    /// without the run lock
    paused: AtomicBool,
}

impl std::fmt::Debug for ScriptInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptInstance")
            .field("id", &self.id)
            .field("object_id", &self.object_id)
            .field("asset_id", &self.script.asset_id())
            .finish()
    }
}

impl ScriptInstance {
    pub fn new(
        id: InstanceId,
        object_id: ObjectId,
        item_name: String,
        script: Arc<LoadedScript>,
        heap_limit: usize,
        stack_limit: usize,
        max_event_queue: usize,
    ) -> Self {
        Self {
            id,
            object_id,
            item_name,
            created_at: Utc::now(),
            script,
            heap: HeapAccountant::new(heap_limit),
            stack_limit,
            mailbox: Mutex::new(Mailbox {
                state: InstanceState::Constructing,
                events: EventQueue::new(max_event_queue),
                sleep_until: None,
                running: true,
            }),
            run: Mutex::new(RunData::fresh()),
            yield_requested: AtomicBool::new(false),
            suspend_count: AtomicU32::new(0),
            disposed: AtomicBool::new(false),
            reset_requested: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    pub fn script(&self) -> &Arc<LoadedScript> {
        &self.script
    }

    pub fn heap(&self) -> &HeapAccountant {
        &self.heap
    }

    pub fn mailbox(&self) -> parking_lot::MutexGuard<'_, Mailbox> {
        self.mailbox.lock()
    }

    pub fn run_data(&self) -> parking_lot::MutexGuard<'_, RunData> {
        self.run.lock()
    }

    pub fn state(&self) -> InstanceState {
        self.mailbox.lock().state
    }

    /* ===================== Cooperative flags ===================== */

    pub fn request_yield(&self) {
        self.yield_requested.store(true, Ordering::Release);
    }

    pub fn clear_yield(&self) {
        self.yield_requested.store(false, Ordering::Release);
    }

    pub fn suspend_count(&self) -> u32 {
        self.suspend_count.load(Ordering::Acquire)
    }

    pub fn add_suspend(&self) -> u32 {
        self.suspend_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the count after the decrement; never goes below zero
    pub fn release_suspend(&self) -> u32 {
        match self
            .suspend_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
        {
            Ok(prev) => prev - 1,
            Err(_) => 0,
        }
    }

    pub fn mark_disposed(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::Release);
    }

    pub fn reset_requested(&self) -> bool {
        self.reset_requested.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    /* ===================== Lifecycle helpers ===================== */

    /// Reset run state and queue `state_entry`
    ///
    /// Caller holds the mailbox and guarantees the instance is not running.
    /// A reset also lifts any suspension.
    pub fn reset_locked(&self, mailbox: &mut Mailbox) {
        let mut run = self.run.lock();
        run.reset(&self.heap);
        self.paused.store(false, Ordering::Release);
        self.reset_requested.store(false, Ordering::Release);
        self.suspend_count.store(0, Ordering::Release);
        mailbox.events.clear();
        mailbox.sleep_until = None;
        mailbox
            .events
            .push_front(EventParams::new(EventCode::StateEntry, vec![]));
    }

    /// Release every resource the instance holds. Caller holds the mailbox.
    pub fn teardown_locked(&self, mailbox: &mut Mailbox) {
        mailbox.state = InstanceState::Disposed;
        mailbox.events.clear();
        mailbox.sleep_until = None;
        mailbox.running = false;
        let mut run = self.run.lock();
        run.reset(&self.heap);
        run.needs_global_init = false;
        self.paused.store(false, Ordering::Release);
    }

    pub fn summary(&self) -> InstanceSummary {
        let mb = self.mailbox.lock();
        let script_state = {
            let run = self.run.try_lock();
            run.map(|r| self.script.state_name(r.state_code).to_string())
                .unwrap_or_else(|| "?".to_string())
        };
        InstanceSummary {
            id: self.id,
            object_id: self.object_id,
            item_name: self.item_name.clone(),
            asset_id: self.script.asset_id().to_string(),
            state: mb.state,
            script_state,
            running: mb.running,
            queued_events: mb.events.len(),
            lost_events: mb.events.lost(),
            heap_used: self.heap.used(),
            heap_limit: self.heap.limit(),
            created_at: self.created_at,
        }
    }
}

impl CheckpointSignal for ScriptInstance {
    fn should_pause(&self) -> bool {
        self.yield_requested.load(Ordering::Acquire)
            || self.suspend_count.load(Ordering::Acquire) > 0
            || self.disposed.load(Ordering::Acquire)
            || self.reset_requested.load(Ordering::Acquire)
    }
}
