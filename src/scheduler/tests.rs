use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::*;
use crate::vm::tests::helpers::Harness;
use crate::vm::CheckpointSignal;

fn instance() -> Shared {
    let script = Arc::new(Harness::plain().script);
    Arc::new(ScriptInstance::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        "test".to_string(),
        script,
        4096,
        64,
        8,
    ))
}

fn move_to(sched: &Scheduler, instance: &Shared, to: InstanceState) {
    let mut queues = sched.lock_queues();
    let mut mb = instance.mailbox();
    queues.transition(instance, &mut mb, to);
}

#[test]
fn test_transitions_keep_queues_in_step() {
    let sched = Scheduler::new();
    let a = instance();

    move_to(&sched, &a, InstanceState::QueuedToStart);
    assert_eq!(sched.ready_len(), 1);
    sched.check_consistency([&a]).unwrap();

    move_to(&sched, &a, InstanceState::QueuedToYield);
    assert_eq!(sched.ready_len(), 1);
    sched.check_consistency([&a]).unwrap();

    a.mailbox().sleep_until = Some(Instant::now() + Duration::from_secs(60));
    move_to(&sched, &a, InstanceState::Sleeping);
    assert_eq!((sched.ready_len(), sched.sleeping_len()), (0, 1));
    sched.check_consistency([&a]).unwrap();

    move_to(&sched, &a, InstanceState::Suspended);
    assert_eq!((sched.ready_len(), sched.sleeping_len()), (0, 0));
    sched.check_consistency([&a]).unwrap();
}

#[test]
fn test_consistency_catches_unqueued_state() {
    let sched = Scheduler::new();
    let a = instance();
    let b = instance();
    move_to(&sched, &a, InstanceState::Idle);
    b.mailbox().state = InstanceState::QueuedToStart;

    let err = sched.check_consistency([&a, &b]).unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation(_)));
}

#[test]
fn test_consistency_catches_stray_queue_entry() {
    let sched = Scheduler::new();
    let a = instance();
    move_to(&sched, &a, InstanceState::QueuedToStart);

    // A queued instance the caller no longer accounts for
    assert!(sched.check_consistency(std::iter::empty()).is_err());
}

#[test]
#[should_panic(expected = "scheduler invariant violated")]
fn test_transition_from_missing_queue_entry_panics() {
    let sched = Scheduler::new();
    let a = instance();
    a.mailbox().state = InstanceState::QueuedToYield;
    move_to(&sched, &a, InstanceState::Idle);
}

#[test]
fn test_next_ready_claims_in_arrival_order() {
    let sched = Scheduler::new();
    let a = instance();
    let b = instance();
    move_to(&sched, &a, InstanceState::QueuedToYield);
    move_to(&sched, &b, InstanceState::QueuedToStart);

    let first = sched.next_ready().unwrap();
    assert_eq!(first.id, a.id);
    assert_eq!(a.state(), InstanceState::Running);
    let second = sched.next_ready().unwrap();
    assert_eq!(second.id, b.id);
}

#[test]
fn test_paused_scheduler_hands_out_nothing() {
    let sched = Arc::new(Scheduler::new());
    let a = instance();
    sched.pause();
    move_to(&sched, &a, InstanceState::QueuedToStart);

    let waiter = {
        let sched = Arc::clone(&sched);
        thread::spawn(move || sched.next_ready().map(|i| i.id))
    };
    thread::sleep(Duration::from_millis(50));
    assert_eq!(a.state(), InstanceState::QueuedToStart);

    sched.unpause();
    assert_eq!(waiter.join().unwrap(), Some(a.id));
}

#[test]
fn test_shutdown_releases_waiting_worker() {
    let sched = Arc::new(Scheduler::new());
    let waiter = {
        let sched = Arc::clone(&sched);
        thread::spawn(move || sched.next_ready().is_none())
    };
    thread::sleep(Duration::from_millis(20));
    sched.shutdown();
    assert!(waiter.join().unwrap());
}

#[test]
fn test_tick_flags_every_running_instance() {
    let sched = Scheduler::new();
    let a = instance();
    let b = instance();
    sched.mark_running(&a);
    assert!(!a.should_pause());

    // Just started counts as running
    sched.mark_running(&b);
    assert_eq!(sched.flag_running(), 2);
    assert!(a.should_pause());
    assert!(b.should_pause());

    // A new slice starts with the flag cleared
    sched.unmark_running(a.id);
    sched.mark_running(&a);
    assert!(!a.should_pause());

    sched.unmark_running(a.id);
    sched.unmark_running(b.id);
    assert_eq!(sched.running_len(), 0);
    assert_eq!(sched.flag_running(), 0);
}

#[test]
fn test_timeslice_service_flags_running_instance() {
    let sched = Arc::new(Scheduler::new());
    let a = instance();
    sched.mark_running(&a);

    let period = Duration::from_millis(20);
    let service = {
        let sched = Arc::clone(&sched);
        thread::spawn(move || timeslice_loop(sched, period))
    };
    let started = Instant::now();
    while !a.should_pause() && started.elapsed() < Duration::from_secs(5) {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(a.should_pause());

    sched.shutdown();
    service.join().unwrap();
}

#[test]
fn test_sleep_service_wakes_in_deadline_order() {
    let sched = Arc::new(Scheduler::new());
    let now = Instant::now();
    let late = instance();
    let early = instance();
    for (inst, delay) in [(&late, 80), (&early, 30)] {
        inst.mailbox().sleep_until = Some(now + Duration::from_millis(delay));
        move_to(&sched, inst, InstanceState::Sleeping);
    }

    let service = {
        let sched = Arc::clone(&sched);
        thread::spawn(move || sleep_loop(sched, Duration::from_millis(10)))
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while sched.stats().wakeups < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    assert!(now.elapsed() >= Duration::from_millis(80));
    assert_eq!(sched.stats().wakeups, 2);
    assert_eq!(early.state(), InstanceState::QueuedToYield);
    assert!(late.mailbox().sleep_until.is_none());
    sched.check_consistency([&early, &late]).unwrap();

    assert_eq!(sched.next_ready().unwrap().id, early.id);
    assert_eq!(sched.next_ready().unwrap().id, late.id);

    sched.shutdown();
    service.join().unwrap();
}
