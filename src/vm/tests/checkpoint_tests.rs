//! Pausing at checkpoints, snapshots and resumption

use super::helpers::*;
use crate::errors::ContinuationError;
use crate::vm::*;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// i = 0; s = 0; while (i < 10) { i = i + 1; s = s + i } return s
fn counting_loop() -> Stmt {
    block(vec![
        let_("i", int(0)),
        let_("s", int(0)),
        while_(
            bin(BinOp::Lt, ident("i"), int(10)),
            vec![
                assign("i", bin(BinOp::Add, ident("i"), int(1))),
                assign("s", bin(BinOp::Add, ident("s"), ident("i"))),
            ],
        ),
        ret(ident("s")),
    ])
}

struct AlwaysPause;

impl CheckpointSignal for AlwaysPause {
    fn should_pause(&self) -> bool {
        true
    }
}

#[test]
fn test_pause_at_back_edge_and_resume_from_snapshot() {
    let mut h = Harness::plain();
    let flag = AtomicBool::new(true);

    let mut vm = VM::new(counting_loop());
    let step = run_until_done(&mut vm, &mut h.ctx(&flag));
    assert_eq!(step, Step::Pause(PauseReason::Yield));

    // First back-edge: one iteration done
    assert_eq!(vm.env.get("i"), Some(&Val::Int(1)));

    let json = serde_json::to_string(&vm).unwrap();
    let mut restored: VM = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, vm);

    flag.store(false, Ordering::Release);
    let step = run_until_done(&mut restored, &mut h.ctx(&flag));
    assert_eq!(step, Step::Done);
    assert_eq!(restored.control, Control::Return(Val::Int(55)));
}

#[test]
fn test_pause_at_every_checkpoint() {
    let mut h = Harness::plain();
    let mut cont = Continuation::new();
    let mut pauses = 0;

    let mut result = cont
        .start(VM::new(counting_loop()), &mut h.ctx(&AlwaysPause))
        .unwrap();
    while let RunResult::Paused(PauseReason::Yield) = result {
        pauses += 1;
        assert!(cont.snapshot().is_some());
        result = cont.resume(&mut h.ctx(&AlwaysPause)).unwrap();
    }

    assert_eq!(result, RunResult::Completed(Completion::Returned(Val::Int(55))));
    // One back-edge per iteration
    assert_eq!(pauses, 10);
    assert_eq!(cont.activity(), Activity::Inactive);
    assert_eq!(h.heap.used(), 0);
}

#[test]
fn test_call_site_is_a_checkpoint() {
    let mut h = Harness::new(json!([]), vec![function("f", &[], vec![ret(int(1))])]);
    let mut cont = Continuation::new();

    let program = block(vec![
        let_("a", int(0)),
        call("f", vec![], Some("a")),
        invoke("echo", vec![ident("a")], Some("a")),
        ret(ident("a")),
    ]);
    let first = cont
        .start(VM::new(program), &mut h.ctx(&AlwaysPause))
        .unwrap();
    assert_eq!(first, RunResult::Paused(PauseReason::Yield));

    let second = cont.resume(&mut h.ctx(&AlwaysPause)).unwrap();
    assert_eq!(second, RunResult::Paused(PauseReason::Yield));

    let done = cont.resume(&mut h.ctx(&NeverPause)).unwrap();
    assert_eq!(done, RunResult::Completed(Completion::Returned(Val::Int(1))));
}

#[test]
fn test_sleep_pauses_after_the_call() {
    let mut h = Harness::plain();
    let mut cont = Continuation::new();
    let before = Instant::now();

    let program = block(vec![
        let_("r", int(1)),
        invoke("sleep", vec![Expr::LitFloat { v: 0.25 }], Some("r")),
        ret(ident("r")),
    ]);
    let result = cont
        .start(VM::new(program), &mut h.ctx(&NeverPause))
        .unwrap();

    let RunResult::Paused(PauseReason::Sleep(until)) = result else {
        panic!("expected a sleep pause, got {:?}", result);
    };
    assert!(until >= before + std::time::Duration::from_millis(250));

    let done = cont.resume(&mut h.ctx(&NeverPause)).unwrap();
    assert_eq!(done, RunResult::Completed(Completion::Returned(Val::Null)));
}

#[test]
fn test_continuation_misuse() {
    let mut h = Harness::plain();
    let mut cont = Continuation::new();

    assert_eq!(
        cont.resume(&mut h.ctx(&NeverPause)).unwrap_err(),
        ContinuationError::NotPaused(Activity::Inactive)
    );

    cont.start(VM::new(counting_loop()), &mut h.ctx(&AlwaysPause))
        .unwrap();
    assert_eq!(
        cont.start(VM::new(counting_loop()), &mut h.ctx(&NeverPause))
            .unwrap_err(),
        ContinuationError::AlreadyStarted(Activity::Paused)
    );

    cont.abandon(&h.heap);
    assert_eq!(cont.activity(), Activity::Inactive);
    assert_eq!(h.heap.used(), 0);
}

#[test]
fn test_state_change_ends_handler() {
    let mut h = Harness::new(json!([{"name": "after", "type": "int"}]), vec![]);
    let result = h.run_handler(block(vec![
        Stmt::State {
            name: "other".into(),
        },
        set_global(0, int(1)),
    ]));

    assert_eq!(result, RunResult::Completed(Completion::StateChange(1)));
    assert_eq!(h.globals[0], Val::Int(0));
}

#[test]
fn test_reset_and_die_from_host() {
    let mut h = Harness::plain();
    assert_eq!(
        h.run_handler(block(vec![invoke("reset_script", vec![], None)])),
        RunResult::Completed(Completion::Reset)
    );
    assert_eq!(
        h.run_handler(block(vec![
            while_(Expr::LitBool { v: true }, vec![invoke("die", vec![], None)]),
        ])),
        RunResult::Completed(Completion::Die)
    );
}
