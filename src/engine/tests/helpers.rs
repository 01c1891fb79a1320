//! Engine test fixtures

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::capabilities::{CapabilityTable, HostOutcome};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::events::EventCode;
use crate::script::{CompiledScript, FunctionDef, HandlerDef, ScriptSource};
use crate::vm::{Expr, Stmt, Val};

pub use crate::vm::tests::helpers::*;

/// Values passed to the `record` capability, in call order
///
/// Also registers `stamp`, which logs the call time, and `boom`, which panics.
#[derive(Clone, Default)]
pub struct Recorder {
    log: Arc<Mutex<Vec<Val>>>,
    stamps: Arc<Mutex<Vec<Instant>>>,
}

impl Recorder {
    pub fn values(&self) -> Vec<Val> {
        self.log.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn stamps(&self) -> Vec<Instant> {
        self.stamps.lock().clone()
    }

    pub fn capabilities(&self) -> CapabilityTable {
        let mut table = CapabilityTable::new();
        let log = Arc::clone(&self.log);
        table.register_fn("record", move |_, args| {
            log.lock().push(args.first().cloned().unwrap_or(Val::Null));
            HostOutcome::Value(Val::Null)
        });
        let stamps = Arc::clone(&self.stamps);
        table.register_fn("stamp", move |_, _| {
            stamps.lock().push(Instant::now());
            HostOutcome::Value(Val::Null)
        });
        table.register_fn("boom", |_, _| panic!("boom capability called"));
        table
    }
}

pub fn test_config() -> crate::config::EngineConfigBuilder {
    EngineConfig::builder()
        .isolated()
        .worker_threads(2)
        .sleep_watchdog_ms(100)
        .state_dir(std::env::temp_dir().join("strand-engine-tests"))
}

pub fn start(config: EngineConfig, recorder: &Recorder) -> Engine {
    Engine::precompiled(config, recorder.capabilities()).unwrap()
}

pub fn handler(state: &str, event: EventCode, params: &[&str], body: Vec<Stmt>) -> HandlerDef {
    HandlerDef {
        state: state.to_string(),
        event,
        params: params.iter().map(|p| p.to_string()).collect(),
        body: block(body),
    }
}

pub fn record(expr: Expr) -> Stmt {
    invoke("record", vec![expr], None)
}

pub fn float(v: f64) -> Expr {
    Expr::LitFloat { v }
}

/// Descriptor JSON for a script in states `default` and `other`
pub fn source(
    asset_id: &str,
    globals: serde_json::Value,
    handlers: Vec<HandlerDef>,
    functions: Vec<FunctionDef>,
) -> ScriptSource {
    let mut compiled: CompiledScript = serde_json::from_value(serde_json::json!({
        "asset_id": asset_id,
        "states": ["default", "other"],
        "globals": globals,
        "imports": ["sleep", "reset_script", "die", "record", "stamp", "boom"]
    }))
    .unwrap();
    compiled.handlers = handlers;
    compiled.functions = functions;
    ScriptSource::new(asset_id, serde_json::to_string(&compiled).unwrap())
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

pub const WAIT: Duration = Duration::from_secs(10);
