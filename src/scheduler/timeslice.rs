use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::Scheduler;

/// Body of the time-slice service thread
pub(crate) fn timeslice_loop(sched: Arc<Scheduler>, period: Duration) {
    debug!(period_ms = period.as_millis() as u64, "time-slice service started");
    let mut service = sched.service.lock();
    while !sched.is_shut_down() {
        sched.service_cv.wait_for(&mut service, period);
        if sched.is_shut_down() {
            break;
        }
        let flagged = sched.flag_running();
        if flagged > 0 {
            trace!(flagged, "requested yields");
        }
    }
    debug!("time-slice service stopped");
}
