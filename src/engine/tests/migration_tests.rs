use serde_json::json;
use uuid::Uuid;

use super::helpers::*;
use crate::events::{EventCode, EventParams};
use crate::instance::InstanceState;
use crate::migration::{self, MigrationPayload};
use crate::script::ScriptSource;
use crate::types::CreateInstanceParams;
use crate::vm::*;

/// Counts to 20 into global 0, pausing for a second at 10
fn counter() -> ScriptSource {
    source(
        "migrant",
        json!([{"name": "last", "type": "int"}]),
        vec![
            handler("default", EventCode::StateEntry, &[], vec![record(str_("entry"))]),
            handler(
                "default",
                EventCode::TouchStart,
                &[],
                vec![
                    let_("i", int(0)),
                    while_(
                        bin(BinOp::Lt, ident("i"), int(20)),
                        vec![
                            assign("i", bin(BinOp::Add, ident("i"), int(1))),
                            set_global(0, ident("i")),
                            record(ident("i")),
                            if_(
                                bin(BinOp::Eq, ident("i"), int(10)),
                                vec![invoke("sleep", vec![float(1.0)], None)],
                                None,
                            ),
                        ],
                    ),
                ],
            ),
        ],
        vec![],
    )
}

fn ints(range: std::ops::RangeInclusive<i64>) -> Vec<Val> {
    range.map(Val::Int).collect()
}

/// Start the counter and return once it is asleep at 10
fn sleeping_counter(engine: &crate::engine::Engine, rec: &Recorder) -> Uuid {
    let id = engine
        .load_script(&counter(), CreateInstanceParams::new(Uuid::new_v4(), "counter"))
        .unwrap();
    engine
        .post_to_instance(id, EventParams::new(EventCode::TouchStart, vec![]))
        .unwrap();
    assert!(wait_until(WAIT, || engine.state_of(id).unwrap() == InstanceState::Sleeping));
    assert_eq!(rec.values().last(), Some(&Val::Int(10)));
    id
}

#[test]
fn test_migrated_handler_continues_mid_loop() {
    let rec_a = Recorder::default();
    let engine_a = start(test_config().build().unwrap(), &rec_a);
    let id = sleeping_counter(&engine_a, &rec_a);

    let bytes = engine_a.migrate_out(id).unwrap();
    // The source instance keeps going after being copied
    assert_eq!(engine_a.state_of(id).unwrap(), InstanceState::Sleeping);

    let payload: MigrationPayload = serde_json::from_slice(&bytes).unwrap();
    assert!(payload.continuation.is_some());
    assert!(payload.sleep_remaining_ms.is_some());
    assert_eq!(payload.globals, vec![Val::Int(10)]);

    let rec_b = Recorder::default();
    let engine_b = start(test_config().build().unwrap(), &rec_b);
    let copy = engine_b
        .migrate_in(bytes, &counter(), CreateInstanceParams::new(Uuid::new_v4(), "copy"))
        .unwrap();
    assert_eq!(engine_b.state_of(copy).unwrap(), InstanceState::Sleeping);

    assert!(wait_until(WAIT, || rec_a.len() == 21));
    assert!(wait_until(WAIT, || rec_b.len() == 10));
    assert!(engine_a.wait_quiescent(WAIT));
    assert!(engine_b.wait_quiescent(WAIT));

    // No state_entry on the copy, and no repeats of 1..=10
    assert_eq!(rec_b.values(), ints(11..=20));
    assert_eq!(engine_a.globals(id).unwrap(), engine_b.globals(copy).unwrap());
    assert_eq!(engine_a.heap_used(id).unwrap(), engine_b.heap_used(copy).unwrap());
    engine_b.check_consistency().unwrap();
}

#[test]
fn test_version_mismatch_starts_fresh() {
    let rec_a = Recorder::default();
    let engine_a = start(test_config().build().unwrap(), &rec_a);
    let id = sleeping_counter(&engine_a, &rec_a);
    let bytes = engine_a.migrate_out(id).unwrap();

    let rec_b = Recorder::default();
    let engine_b = start(test_config().build().unwrap(), &rec_b);
    engine_b.set_version_stamp(engine_a.version_stamp() + 1);
    let copy = engine_b
        .migrate_in(bytes, &counter(), CreateInstanceParams::new(Uuid::new_v4(), "copy"))
        .unwrap();

    assert!(engine_b.wait_quiescent(WAIT));
    assert_eq!(rec_b.values(), vec![Val::Str("entry".into())]);
    assert_eq!(engine_b.globals(copy).unwrap(), vec![Val::Int(0)]);
}

#[test]
fn test_unbounded_sleep_in_payload_starts_fresh() {
    let rec_a = Recorder::default();
    let engine_a = start(test_config().build().unwrap(), &rec_a);
    let id = sleeping_counter(&engine_a, &rec_a);
    let mut payload: MigrationPayload =
        serde_json::from_slice(&engine_a.migrate_out(id).unwrap()).unwrap();
    payload.sleep_remaining_ms = Some(u64::MAX);
    let bytes = serde_json::to_vec(&payload).unwrap();

    let rec_b = Recorder::default();
    let engine_b = start(test_config().build().unwrap(), &rec_b);
    let copy = engine_b
        .migrate_in(bytes, &counter(), CreateInstanceParams::new(Uuid::new_v4(), "copy"))
        .unwrap();

    assert!(engine_b.wait_quiescent(WAIT));
    assert_eq!(rec_b.values(), vec![Val::Str("entry".into())]);
    assert_eq!(engine_b.globals(copy).unwrap(), vec![Val::Int(0)]);
    engine_b.check_consistency().unwrap();
}

#[test]
fn test_migrating_idle_instance_keeps_queued_events() {
    let rec_a = Recorder::default();
    let engine_a = start(test_config().build().unwrap(), &rec_a);
    let id = engine_a
        .load_script(&counter(), CreateInstanceParams::new(Uuid::new_v4(), "counter"))
        .unwrap();
    assert!(engine_a.wait_quiescent(WAIT));

    engine_a.suspend_all();
    engine_a
        .post_to_instance(id, EventParams::new(EventCode::TouchStart, vec![]))
        .unwrap();
    let bytes = engine_a.migrate_out(id).unwrap();
    engine_a.dispose(id).unwrap();
    engine_a.resume_all();

    let payload: MigrationPayload = serde_json::from_slice(&bytes).unwrap();
    assert!(payload.continuation.is_none());
    assert_eq!(payload.events.len(), 1);

    let rec_b = Recorder::default();
    let engine_b = start(test_config().build().unwrap(), &rec_b);
    engine_b
        .migrate_in(bytes, &counter(), CreateInstanceParams::new(Uuid::new_v4(), "copy"))
        .unwrap();
    assert!(wait_until(WAIT, || rec_b.len() == 20));
    assert_eq!(rec_b.values(), ints(1..=20));
}

#[test]
fn test_saved_state_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let id = Uuid::new_v4();
    let object = Uuid::new_v4();
    let params = || {
        let mut p = CreateInstanceParams::new(object, "saved");
        p.id = Some(id);
        p
    };
    let tally = source(
        "tally",
        json!([{"name": "n", "type": "int"}]),
        vec![
            handler("default", EventCode::StateEntry, &[], vec![record(str_("entry"))]),
            handler(
                "default",
                EventCode::TouchStart,
                &[],
                vec![set_global(0, bin(BinOp::Add, global(0), int(1)))],
            ),
        ],
        vec![],
    );
    let touch = || EventParams::new(EventCode::TouchStart, vec![]);

    let rec_a = Recorder::default();
    let engine_a = start(test_config().state_dir(dir.path()).build().unwrap(), &rec_a);
    engine_a.load_script(&tally, params()).unwrap();
    for _ in 0..3 {
        engine_a.post_to_instance(id, touch()).unwrap();
    }
    assert!(engine_a.wait_quiescent(WAIT));
    let path = engine_a.save_state(id).unwrap();
    assert_eq!(path, migration::state_path(dir.path(), id));
    let envelope = migration::read_envelope(&path).unwrap();
    assert_eq!(envelope.instance_id, id);
    assert_eq!(envelope.script_asset_id, "tally");
    engine_a.shutdown();

    let rec_b = Recorder::default();
    let engine_b = start(test_config().state_dir(dir.path()).build().unwrap(), &rec_b);
    engine_b.load_script(&tally, params()).unwrap();
    assert!(engine_b.wait_quiescent(WAIT));
    assert_eq!(engine_b.globals(id).unwrap(), vec![Val::Int(3)]);
    assert!(rec_b.values().is_empty());

    engine_b.post_to_instance(id, touch()).unwrap();
    assert!(engine_b.wait_quiescent(WAIT));
    assert_eq!(engine_b.globals(id).unwrap(), vec![Val::Int(4)]);
}
