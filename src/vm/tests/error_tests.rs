//! Throw/catch, script faults and heap limits

use super::helpers::*;
use crate::heap::value_size;
use crate::vm::errors::{DIVISION_BY_ZERO, HEAP_EXCEEDED, HOST_ERROR, THROWN};
use crate::vm::*;
use serde_json::json;

#[test]
fn test_throw_caught_with_binding() {
    let mut h = Harness::plain();
    let vm = h.run(block(vec![
        let_("r", int(0)),
        try_(
            vec![
                Stmt::Throw { value: str_("boom") },
                assign("r", int(99)),
            ],
            Some("e"),
            vec![assign("r", ident("e"))],
        ),
        ret(ident("r")),
    ]));

    assert_eq!(vm.control, Control::Return(Val::Str("boom".into())));
}

#[test]
fn test_nested_try_rethrow() {
    let mut h = Harness::plain();
    let vm = h.run(block(vec![
        let_("log", str_("")),
        try_(
            vec![try_(
                vec![Stmt::Throw { value: int(1) }],
                Some("inner"),
                vec![
                    assign("log", bin(BinOp::Add, ident("log"), str_("inner;"))),
                    Stmt::Throw { value: int(2) },
                ],
            )],
            Some("outer"),
            vec![assign("log", bin(BinOp::Add, ident("log"), str_("outer")))],
        ),
        ret(ident("log")),
    ]));

    assert_eq!(vm.control, Control::Return(Val::Str("inner;outer".into())));
}

#[test]
fn test_runtime_fault_is_catchable() {
    let mut h = Harness::plain();
    let vm = h.run(block(vec![
        try_(
            vec![let_("x", bin(BinOp::Div, int(1), int(0)))],
            Some("e"),
            vec![ret(ident("e"))],
        ),
    ]));

    let Control::Return(Val::Error(err)) = &vm.control else {
        panic!("expected caught error, got {:?}", vm.control);
    };
    assert_eq!(err.code, DIVISION_BY_ZERO);
}

#[test]
fn test_uncaught_throw_ends_handler() {
    let mut h = Harness::plain();
    let result = h.run_handler(block(vec![Stmt::Throw { value: int(3) }]));

    assert_eq!(
        result,
        RunResult::Threw(ErrorInfo::new(THROWN, "3"))
    );
}

#[test]
fn test_host_fault() {
    let mut h = Harness::plain();
    let result = h.run_handler(block(vec![invoke("fail", vec![], None)]));

    let RunResult::Threw(err) = result else {
        panic!("expected host error, got {:?}", result);
    };
    assert_eq!(err.code, HOST_ERROR);
}

#[test]
fn test_append_needs_only_the_growth() {
    // Old and new string together exceed the limit, the result alone does not
    let mut h = Harness::new(json!([{"name": "g", "type": "str"}]), vec![]);
    h.heap.set_limit(256);
    h.run(block(vec![set_global(0, str_(&"a".repeat(130)))]));
    assert_eq!(h.heap.used(), 146);

    let result = h.run_handler(block(vec![set_global(
        0,
        bin(BinOp::Add, global(0), str_("y")),
    )]));

    assert!(matches!(result, RunResult::Completed(_)), "got {:?}", result);
    assert_eq!(h.globals[0], Val::Str(format!("{}y", "a".repeat(130))));
    assert_eq!(h.heap.used(), 147);
}

#[test]
fn test_temporary_larger_than_limit_is_rejected() {
    let mut h = Harness::plain();
    h.heap.set_limit(64);

    let result = h.run_handler(block(vec![let_(
        "s",
        bin(BinOp::Add, str_(&"a".repeat(40)), str_(&"b".repeat(40))),
    )]));

    let RunResult::Threw(err) = result else {
        panic!("expected heap error, got {:?}", result);
    };
    assert_eq!(err.code, HEAP_EXCEEDED);
    assert_eq!(h.heap.used(), 0);
}

#[test]
fn test_heap_limit_keeps_last_good_value() {
    // g = ""; while (true) { g = g + "0123456789" }
    let mut h = Harness::new(json!([{"name": "g", "type": "str"}]), vec![]);
    h.heap.set_limit(200);

    let result = h.run_handler(block(vec![while_(
        Expr::LitBool { v: true },
        vec![set_global(
            0,
            bin(BinOp::Add, global(0), str_("0123456789")),
        )],
    )]));

    let RunResult::Threw(err) = result else {
        panic!("expected heap error, got {:?}", result);
    };
    assert_eq!(err.code, HEAP_EXCEEDED);

    let Val::Str(s) = &h.globals[0] else {
        panic!("global changed type");
    };
    assert_eq!(s.len() % 10, 0);
    assert!(value_size(&h.globals[0]) <= 200);
    assert_eq!(h.heap.used(), value_size(&h.globals[0]));
}

#[test]
fn test_heap_fault_is_catchable() {
    let mut h = Harness::plain();
    h.heap.set_limit(64);

    let vm = h.run(block(vec![
        let_("ok", int(1)),
        try_(
            vec![let_("big", str_(&"x".repeat(100)))],
            None,
            vec![assign("ok", int(2))],
        ),
        ret(ident("ok")),
    ]));

    assert_eq!(vm.control, Control::Return(Val::Int(2)));
    assert_eq!(h.heap.used(), 0);
}
