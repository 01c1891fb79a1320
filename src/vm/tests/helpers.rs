//! Test helpers for VM tests
//!
//! Small constructors for compiled code plus a harness that owns everything
//! an `ExecContext` borrows.

use serde_json::json;
use uuid::Uuid;

use crate::capabilities::{CallContext, CapabilityTable, HostOutcome};
use crate::heap::HeapAccountant;
use crate::script::{CompiledScript, FunctionDef, LoadedScript};
use crate::vm::*;

/* ===================== Code builders ===================== */

pub fn int(v: i64) -> Expr {
    Expr::LitInt { v }
}

pub fn str_(v: &str) -> Expr {
    Expr::LitStr { v: v.to_string() }
}

pub fn ident(name: &str) -> Expr {
    Expr::Ident {
        name: name.to_string(),
    }
}

pub fn global(slot: usize) -> Expr {
    Expr::Global { slot }
}

pub fn bin(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn block(body: Vec<Stmt>) -> Stmt {
    Stmt::Block { body }
}

pub fn let_(name: &str, init: Expr) -> Stmt {
    Stmt::Let {
        name: name.to_string(),
        init: Some(init),
    }
}

pub fn local(name: &str) -> Target {
    Target::Local {
        name: name.to_string(),
    }
}

pub fn assign(name: &str, expr: Expr) -> Stmt {
    Stmt::Assign {
        target: local(name),
        expr,
    }
}

pub fn set_global(slot: usize, expr: Expr) -> Stmt {
    Stmt::Assign {
        target: Target::Global { slot },
        expr,
    }
}

pub fn while_(test: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::While {
        test,
        body: Box::new(block(body)),
    }
}

pub fn if_(test: Expr, then_s: Vec<Stmt>, else_s: Option<Vec<Stmt>>) -> Stmt {
    Stmt::If {
        test,
        then_s: Box::new(block(then_s)),
        else_s: else_s.map(|b| Box::new(block(b))),
    }
}

pub fn ret(expr: Expr) -> Stmt {
    Stmt::Return { value: Some(expr) }
}

pub fn call(function: &str, args: Vec<Expr>, dest: Option<&str>) -> Stmt {
    Stmt::Call {
        function: function.to_string(),
        args,
        dest: dest.map(local),
    }
}

pub fn invoke(name: &str, args: Vec<Expr>, dest: Option<&str>) -> Stmt {
    Stmt::Invoke {
        name: name.to_string(),
        args,
        dest: dest.map(local),
    }
}

pub fn try_(body: Vec<Stmt>, catch_var: Option<&str>, handler: Vec<Stmt>) -> Stmt {
    Stmt::Try {
        body: Box::new(block(body)),
        catch_var: catch_var.map(str::to_string),
        handler: Box::new(block(handler)),
    }
}

pub fn function(name: &str, params: &[&str], body: Vec<Stmt>) -> FunctionDef {
    FunctionDef {
        name: name.to_string(),
        params: params.iter().map(|p| p.to_string()).collect(),
        body: block(body),
    }
}

/* ===================== Harness ===================== */

/// Capabilities available to VM tests
pub fn test_capabilities() -> CapabilityTable {
    let mut table = CapabilityTable::with_core();
    table.register_fn("echo", |_, args| {
        HostOutcome::Value(args.first().cloned().unwrap_or(Val::Null))
    });
    table.register_fn("fail", |_, _| HostOutcome::fault("host refused"));
    table
}

pub struct Harness {
    pub script: LoadedScript,
    pub globals: Vec<Val>,
    pub heap: HeapAccountant,
    pub stack_limit: usize,
}

impl Harness {
    /// Script with the given globals and functions, importing every test capability
    pub fn new(globals: serde_json::Value, functions: Vec<FunctionDef>) -> Self {
        let mut compiled: CompiledScript = serde_json::from_value(json!({
            "asset_id": "vm-test",
            "states": ["default", "other"],
            "globals": globals,
            "imports": ["sleep", "reset_script", "die", "echo", "fail"]
        }))
        .expect("test script must deserialize");
        compiled.functions = functions;
        let script =
            LoadedScript::load(compiled, &test_capabilities()).expect("test script must load");
        let globals = script.initial_globals();
        let heap = HeapAccountant::new(4096);
        for g in &globals {
            heap.try_charge(crate::heap::value_size(g)).unwrap();
        }
        Self {
            script,
            globals,
            heap,
            stack_limit: 64,
        }
    }

    pub fn plain() -> Self {
        Self::new(json!([]), vec![])
    }

    pub fn ctx<'a>(&'a mut self, signal: &'a dyn CheckpointSignal) -> ExecContext<'a> {
        ExecContext {
            script: &self.script,
            globals: &mut self.globals,
            heap: &self.heap,
            signal,
            call: CallContext {
                instance_id: Uuid::nil(),
                object_id: Uuid::nil(),
                state: "default",
                event: None,
                detect: &[],
            },
            stack_limit: self.stack_limit,
        }
    }

    /// Run a program to completion with no pauses
    pub fn run(&mut self, program: Stmt) -> VM {
        let mut vm = VM::new(program);
        let step = run_until_done(&mut vm, &mut self.ctx(&NeverPause));
        assert_eq!(step, Step::Done);
        vm
    }

    /// Run a handler through a continuation with no pauses
    pub fn run_handler(&mut self, program: Stmt) -> RunResult {
        let mut cont = Continuation::new();
        cont.start(VM::new(program), &mut self.ctx(&NeverPause))
            .unwrap()
    }
}
