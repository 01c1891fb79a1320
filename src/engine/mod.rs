//! Engine facade
//!
//! The engine owns the script cache, the instance registry and the scheduler
//! threads. Hosts load scripts into instances and talk to them only through
//! the posting API here.

mod admin;
mod registry;

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capabilities::CapabilityTable;
use crate::config::EngineConfig;
use crate::errors::{EngineError, Result};
use crate::events::{validate_event_table, EventCode, EventParams};
use crate::instance::{InstanceState, ScriptInstance};
use crate::migration::{self, Restored, StateEnvelope};
use crate::scheduler::{sleep_loop, timeslice_loop, worker_loop, Scheduler};
use crate::script::cache::ScriptCache;
use crate::script::loader::{PrecompiledLoader, ScriptCompiler, ScriptSource};
use crate::types::{CreateInstanceParams, InstanceId, InstanceSummary, ObjectId};
use crate::vm::Val;

pub use admin::EngineStatus;
use registry::Registry;

/// How long `migrate_out` waits for a running handler to reach a checkpoint
const CHECKPOINT_WAIT: Duration = Duration::from_secs(5);

pub(crate) struct EngineInner {
    config: EngineConfig,
    cache: ScriptCache,
    registry: Mutex<Registry>,
    scheduler: Arc<Scheduler>,
    version_stamp: AtomicU32,
}

/// Saved state to load into a new instance
enum SavedState {
    None,
    /// Look for `<state_dir>/<id>.state`
    Disk,
    Bytes(Vec<u8>),
}

pub struct Engine {
    inner: Arc<EngineInner>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Start an engine: check the event table, validate the configuration and
    /// spawn the worker and service threads
    pub fn new(
        config: EngineConfig,
        compiler: Arc<dyn ScriptCompiler>,
        capabilities: CapabilityTable,
    ) -> Result<Self> {
        validate_event_table()?;
        config.validate()?;

        let scheduler = Arc::new(Scheduler::new());
        let inner = Arc::new(EngineInner {
            version_stamp: AtomicU32::new(config.migration_version),
            cache: ScriptCache::new(compiler, Arc::new(capabilities)),
            registry: Mutex::new(Registry::default()),
            scheduler: Arc::clone(&scheduler),
            config,
        });

        let engine = Self {
            inner,
            threads: Mutex::new(Vec::new()),
        };
        engine.spawn_threads()?;
        info!(
            engine = %engine.inner.config.engine_name,
            workers = engine.inner.config.worker_threads,
            "engine started"
        );
        Ok(engine)
    }

    /// Engine reading JSON script descriptors, with the core capabilities
    pub fn precompiled(config: EngineConfig, capabilities: CapabilityTable) -> Result<Self> {
        let mut table = CapabilityTable::with_core();
        table.extend(&capabilities);
        Self::new(config, Arc::new(PrecompiledLoader), table)
    }

    fn spawn_threads(&self) -> Result<()> {
        let config = &self.inner.config;
        let mut threads = self.threads.lock();

        for index in 0..config.worker_threads {
            let sched = Arc::clone(&self.inner.scheduler);
            threads.push(
                thread::Builder::new()
                    .name(format!("strand-worker-{}", index))
                    .spawn(move || worker_loop(sched, index))?,
            );
        }

        let sched = Arc::clone(&self.inner.scheduler);
        let watchdog = config.sleep_watchdog();
        threads.push(
            thread::Builder::new()
                .name("strand-sleep".into())
                .spawn(move || sleep_loop(sched, watchdog))?,
        );

        let sched = Arc::clone(&self.inner.scheduler);
        let period = config.time_slice();
        threads.push(
            thread::Builder::new()
                .name("strand-timeslice".into())
                .spawn(move || timeslice_loop(sched, period))?,
        );
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &ScriptCache {
        &self.inner.cache
    }

    fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    fn lookup(&self, id: InstanceId) -> Result<Arc<ScriptInstance>> {
        self.inner
            .registry
            .lock()
            .get(id)
            .ok_or(EngineError::UnknownInstance(id))
    }

    fn check_running(&self) -> Result<()> {
        if self.scheduler().is_shut_down() {
            return Err(EngineError::ShutDown);
        }
        Ok(())
    }

    /* ===================== Instance lifecycle ===================== */

    /// Create an instance of `source` and schedule its `state_entry`
    ///
    /// If the state directory holds saved state for the instance id, it is
    /// restored first. Stale or unreadable state is discarded with a warning.
    pub fn load_script(
        &self,
        source: &ScriptSource,
        params: CreateInstanceParams,
    ) -> Result<InstanceId> {
        self.construct(source, params, SavedState::Disk)
    }

    /// Create an instance of `source` from a payload produced by `migrate_out`
    pub fn migrate_in(
        &self,
        bytes: Vec<u8>,
        source: &ScriptSource,
        params: CreateInstanceParams,
    ) -> Result<InstanceId> {
        self.construct(source, params, SavedState::Bytes(bytes))
    }

    /// Create an instance without looking for saved state
    pub fn create_instance(
        &self,
        source: &ScriptSource,
        params: CreateInstanceParams,
    ) -> Result<InstanceId> {
        self.construct(source, params, SavedState::None)
    }

    fn construct(
        &self,
        source: &ScriptSource,
        params: CreateInstanceParams,
        saved: SavedState,
    ) -> Result<InstanceId> {
        self.check_running()?;
        let script = self.inner.cache.get_or_load(source)?;
        let config = &self.inner.config;
        let id = params.id.unwrap_or_else(Uuid::new_v4);
        let instance = Arc::new(ScriptInstance::new(
            id,
            params.object_id,
            params.item_name,
            script,
            config.heap_limit,
            config.stack_limit,
            config.max_event_queue,
        ));

        {
            let mut registry = self.inner.registry.lock();
            registry.insert(Arc::clone(&instance))?;
            if let Some(root) = params.root_id {
                registry.link(root, params.object_id);
            }
        }

        let bytes = match saved {
            SavedState::None => None,
            SavedState::Bytes(bytes) => Some(bytes),
            SavedState::Disk => match migration::load_state(&config.state_dir, id) {
                Ok(Some(envelope)) => Some(envelope.payload.into_bytes()),
                Ok(None) => None,
                Err(e) => {
                    warn!(instance = %id, "ignoring unreadable saved state: {}", e);
                    None
                }
            },
        };
        let restored = bytes.and_then(|b| self.restore_into(&instance, &b));
        self.finish_construction(&instance, restored, params.start_disabled);

        debug!(
            instance = %id,
            object = %instance.object_id,
            asset = instance.script().asset_id(),
            restored = restored.is_some(),
            "instance created"
        );
        Ok(id)
    }

    fn restore_into(&self, instance: &ScriptInstance, bytes: &[u8]) -> Option<Restored> {
        let version = self.version_stamp();
        let mut mb = instance.mailbox();
        match migration::restore(instance, &mut mb, bytes, version) {
            Ok(restored) => Some(restored),
            Err(e) if e.is_stale() => {
                warn!(instance = %instance.id, "discarding stale saved state: {}", e);
                None
            }
            Err(e) => {
                warn!(instance = %instance.id, "discarding saved state: {}", e);
                None
            }
        }
    }

    /// Leave `Constructing` for the first scheduled state
    fn finish_construction(
        &self,
        instance: &Arc<ScriptInstance>,
        restored: Option<Restored>,
        start_disabled: bool,
    ) {
        let mut queues = self.scheduler().lock_queues();
        let mut mb = instance.mailbox();

        if instance.is_disposed() {
            queues.transition(instance, &mut mb, InstanceState::Disposed);
            instance.teardown_locked(&mut mb);
            return;
        }
        if instance.reset_requested() {
            instance.reset_locked(&mut mb);
        } else if restored.is_none() {
            mb.events
                .push_front(EventParams::new(EventCode::StateEntry, vec![]));
        }
        if start_disabled {
            mb.running = false;
        }

        let now = Instant::now();
        let next = if instance.suspend_count() > 0 {
            InstanceState::Suspended
        } else if mb.sleep_until.is_some_and(|t| t > now) {
            InstanceState::Sleeping
        } else if instance.is_paused() {
            mb.sleep_until = None;
            InstanceState::QueuedToYield
        } else if !start_disabled && !mb.events.is_empty() {
            InstanceState::QueuedToStart
        } else {
            InstanceState::Idle
        };
        queues.transition(instance, &mut mb, next);
    }

    /// Remove an instance. A running handler stops at its next checkpoint.
    pub fn dispose(&self, id: InstanceId) -> Result<()> {
        let instance = self
            .inner
            .registry
            .lock()
            .remove(id)
            .ok_or(EngineError::UnknownInstance(id))?;
        instance.mark_disposed();

        let mut queues = self.scheduler().lock_queues();
        let mut mb = instance.mailbox();
        mb.running = false;
        match mb.state {
            InstanceState::Running | InstanceState::Constructing | InstanceState::Disposed => {}
            _ => {
                queues.transition(&instance, &mut mb, InstanceState::Disposed);
                instance.teardown_locked(&mut mb);
            }
        }
        debug!(instance = %id, "dispose requested");
        Ok(())
    }

    /// Return an instance to its compiled defaults and rerun `state_entry`
    pub fn reset(&self, id: InstanceId) -> Result<()> {
        let instance = self.lookup(id)?;
        let mut queues = self.scheduler().lock_queues();
        let mut mb = instance.mailbox();
        match mb.state {
            InstanceState::Running | InstanceState::Constructing => instance.request_reset(),
            InstanceState::Disposed => {}
            _ => {
                queues.transition(&instance, &mut mb, InstanceState::Resetting);
                instance.reset_locked(&mut mb);
                queues.transition(&instance, &mut mb, InstanceState::QueuedToStart);
            }
        }
        Ok(())
    }

    /* ===================== Posting ===================== */

    /// Queue an event for one instance
    ///
    /// Returns false if the instance ignored the event (not running, or the
    /// per-event cap was reached).
    pub fn post_to_instance(&self, id: InstanceId, event: EventParams) -> Result<bool> {
        let instance = self.lookup(id)?;
        Ok(self.deliver(&instance, event))
    }

    fn deliver(&self, instance: &Arc<ScriptInstance>, event: EventParams) -> bool {
        let mut queues = self.scheduler().lock_queues();
        let mut mb = instance.mailbox();
        if !mb.running || mb.state == InstanceState::Disposed || instance.is_disposed() {
            return false;
        }
        if !mb.events.push(event) {
            debug!(instance = %instance.id, "event dropped at queue cap");
            return false;
        }
        if mb.state == InstanceState::Idle {
            queues.transition(instance, &mut mb, InstanceState::QueuedToStart);
        }
        true
    }

    /// Queue an event for every instance on an object. `attach` also reaches
    /// every object linked with it. Returns how many instances took the event.
    pub fn post_to_object(&self, object: ObjectId, event: EventParams) -> Result<usize> {
        let targets: Vec<Arc<ScriptInstance>> = {
            let registry = self.inner.registry.lock();
            let objects = if event.event == EventCode::Attach {
                registry.linked_set(object)
            } else {
                vec![object]
            };
            objects
                .into_iter()
                .flat_map(|o| registry.for_object(o))
                .collect()
        };
        Ok(targets
            .iter()
            .filter(|instance| self.deliver(instance, event.clone()))
            .count())
    }

    pub fn link_objects(&self, root: ObjectId, child: ObjectId) {
        self.inner.registry.lock().link(root, child);
    }

    pub fn unlink_object(&self, object: ObjectId) {
        self.inner.registry.lock().unlink(object);
    }

    /// Switch whether an instance accepts events
    pub fn set_running(&self, id: InstanceId, running: bool) -> Result<()> {
        let instance = self.lookup(id)?;
        let mut queues = self.scheduler().lock_queues();
        let mut mb = instance.mailbox();
        mb.running = running;
        if running && mb.state == InstanceState::Idle && !mb.events.is_empty() {
            queues.transition(&instance, &mut mb, InstanceState::QueuedToStart);
        }
        Ok(())
    }

    /* ===================== Suspension ===================== */

    /// Add one hold on the instance. It stops at its next checkpoint (or
    /// right away if it is not running) and queues events until released.
    pub fn try_suspend(&self, id: InstanceId) -> Result<()> {
        let instance = self.lookup(id)?;
        let mut queues = self.scheduler().lock_queues();
        let mut mb = instance.mailbox();
        instance.add_suspend();
        match mb.state {
            InstanceState::Idle
            | InstanceState::QueuedToStart
            | InstanceState::QueuedToYield
            | InstanceState::Sleeping => {
                queues.transition(&instance, &mut mb, InstanceState::Suspended);
            }
            _ => {}
        }
        Ok(())
    }

    /// Release one hold. When none remain the instance picks up where it
    /// stopped.
    pub fn try_resume(&self, id: InstanceId) -> Result<()> {
        let instance = self.lookup(id)?;
        let mut queues = self.scheduler().lock_queues();
        let mut mb = instance.mailbox();
        if instance.release_suspend() > 0 || mb.state != InstanceState::Suspended {
            return Ok(());
        }

        let now = Instant::now();
        let next = if mb.sleep_until.is_some_and(|t| t > now) {
            InstanceState::Sleeping
        } else {
            mb.sleep_until = None;
            if instance.is_paused() {
                InstanceState::QueuedToYield
            } else if mb.running && !mb.events.is_empty() {
                InstanceState::QueuedToStart
            } else {
                InstanceState::Idle
            }
        };
        queues.transition(&instance, &mut mb, next);
        Ok(())
    }

    /* ===================== Migration ===================== */

    /// Stop the instance at a checkpoint and serialize it
    ///
    /// The instance carries on afterwards; the payload is a copy.
    pub fn migrate_out(&self, id: InstanceId) -> Result<Vec<u8>> {
        let instance = self.lookup(id)?;
        self.try_suspend(id)?;
        let result = self.capture_suspended(&instance);
        self.try_resume(id)?;
        result
    }

    fn capture_suspended(&self, instance: &ScriptInstance) -> Result<Vec<u8>> {
        let deadline = Instant::now() + CHECKPOINT_WAIT;
        loop {
            {
                let mb = instance.mailbox();
                match mb.state {
                    InstanceState::Running | InstanceState::Constructing => {}
                    InstanceState::Disposed => {
                        return Err(EngineError::UnknownInstance(instance.id))
                    }
                    _ => {
                        return Ok(migration::capture(
                            instance,
                            &mb,
                            self.version_stamp(),
                        )?)
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(EngineError::Timeout(format!(
                    "instance {} to reach a checkpoint",
                    instance.id
                )));
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Write the instance's state to `<state_dir>/<id>.state`
    pub fn save_state(&self, id: InstanceId) -> Result<PathBuf> {
        let instance = self.lookup(id)?;
        let payload = self.migrate_out(id)?;
        let envelope = StateEnvelope::new(&self.inner.config.engine_name, &instance, payload)?;
        let path = migration::save_state(&self.inner.config.state_dir, &envelope)?;
        debug!(instance = %id, path = %path.display(), "state saved");
        Ok(path)
    }

    /* ===================== Inspection ===================== */

    pub fn summary(&self, id: InstanceId) -> Result<InstanceSummary> {
        Ok(self.lookup(id)?.summary())
    }

    pub fn state_of(&self, id: InstanceId) -> Result<InstanceState> {
        Ok(self.lookup(id)?.state())
    }

    /// Copy of the instance's globals. Waits while a slice is running.
    pub fn globals(&self, id: InstanceId) -> Result<Vec<Val>> {
        Ok(self.lookup(id)?.run_data().globals.clone())
    }

    pub fn heap_used(&self, id: InstanceId) -> Result<usize> {
        Ok(self.lookup(id)?.heap().used())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests;
