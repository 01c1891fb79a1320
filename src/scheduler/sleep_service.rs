use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

use super::{ReadyKind, Scheduler};
use crate::instance::InstanceState;

/// Body of the sleep service thread
///
/// Waits for the earliest wake time (never longer than `watchdog`), then
/// moves every expired sleeper to the yield queue.
pub(crate) fn sleep_loop(sched: Arc<Scheduler>, watchdog: Duration) {
    debug!("sleep service started");
    let mut sleep = sched.sleep.lock();
    loop {
        if sched.is_shut_down() {
            break;
        }

        let now = Instant::now();
        let next_wake = sleep.next_wake();
        if next_wake.is_some_and(|t| t <= now) {
            let expired = sleep.pop_expired(now);
            let mut ready = sched.ready.lock();
            for instance in &expired {
                let mut mb = instance.mailbox();
                if mb.state != InstanceState::Sleeping {
                    error!(instance = %instance.id, state = %mb.state, "sleep queue entry not sleeping");
                    panic!(
                        "scheduler invariant violated: {} on sleep queue in state {}",
                        instance.id, mb.state
                    );
                }
                mb.state = InstanceState::RemovingFromSleep;
                mb.sleep_until = None;
                mb.state = InstanceState::QueuedToYield;
                ready.push(ReadyKind::Yield, instance.id, Arc::clone(instance));
                trace!(instance = %instance.id, "woke");
            }
            sched
                .wakeups
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            for _ in 0..expired.len() {
                sched.ready_cv.notify_one();
            }
            continue;
        }

        let timeout = next_wake
            .map(|t| t.saturating_duration_since(now).min(watchdog))
            .unwrap_or(watchdog);
        sched.sleep_cv.wait_for(&mut sleep, timeout);
    }
    debug!("sleep service stopped");
}
