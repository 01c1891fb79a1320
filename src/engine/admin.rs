//! Administrative surface: listing, global pause, version stamps, shutdown

use serde::Serialize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

use super::Engine;
use crate::errors::Result;
use crate::scheduler::SchedulerStats;
use crate::types::InstanceSummary;

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub engine_name: String,
    pub instances: usize,
    pub ready: usize,
    pub sleeping: usize,
    pub running: usize,
    pub paused: bool,
    pub version_stamp: u32,
    pub stats: SchedulerStats,
}

impl Engine {
    pub fn list_instances(&self) -> Vec<InstanceSummary> {
        let instances: Vec<_> = {
            let mut registry = self.inner.registry.lock();
            registry.prune_disposed();
            registry.all().cloned().collect()
        };
        let mut summaries: Vec<_> = instances.iter().map(|i| i.summary()).collect();
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    /// Stop all scheduling. Running slices finish; posting still works.
    pub fn suspend_all(&self) {
        info!("scheduling paused");
        self.scheduler().pause();
    }

    pub fn resume_all(&self) {
        info!("scheduling resumed");
        self.scheduler().unpause();
    }

    pub fn version_stamp(&self) -> u32 {
        self.inner.version_stamp.load(Ordering::Acquire)
    }

    /// Change the stamp written into and expected from migration payloads.
    /// Bumping it invalidates all previously saved state.
    pub fn set_version_stamp(&self, stamp: u32) {
        self.inner.version_stamp.store(stamp, Ordering::Release);
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler().stats()
    }

    pub fn status(&self) -> EngineStatus {
        let sched = self.scheduler();
        EngineStatus {
            engine_name: self.inner.config.engine_name.clone(),
            instances: self.inner.registry.lock().len(),
            ready: sched.ready_len(),
            sleeping: sched.sleeping_len(),
            running: sched.running_len(),
            paused: sched.is_paused(),
            version_stamp: self.version_stamp(),
            stats: sched.stats(),
        }
    }

    /// Scan every instance's state against queue membership
    pub fn check_consistency(&self) -> Result<()> {
        let registry = self.inner.registry.lock();
        self.scheduler().check_consistency(registry.all())
    }

    /// Wait until no instance is queued, sleeping or running. Returns false on
    /// timeout.
    pub fn wait_quiescent(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let instances: Vec<_> = self.inner.registry.lock().all().cloned().collect();
            if instances.iter().all(|i| i.state().is_quiescent()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Stop all threads. Running handlers are asked to yield first.
    pub fn shutdown(&self) {
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        self.scheduler().shutdown();
        for handle in handles {
            let name = handle.thread().name().unwrap_or("?").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "engine thread panicked");
            }
        }
        info!(engine = %self.inner.config.engine_name, "engine stopped");
    }
}
