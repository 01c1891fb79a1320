//! Compiled scripts
//!
//! A `CompiledScript` is what a front end produces: state names, typed global
//! slots, per-state event handlers, user functions and the host capabilities
//! the script imports. `LoadedScript` is the validated, immutable form that
//! instances share. It owns the handler table and the resolved capabilities.

pub mod cache;
pub mod loader;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

use crate::capabilities::{Capability, CapabilityTable};
use crate::errors::CompileError;
use crate::events::EventCode;
use crate::vm::{Expr, SlotType, Stmt, Target, Val};

pub use cache::ScriptCache;
pub use loader::{PrecompiledLoader, ScriptCompiler, ScriptSource};

/// Name of the state every instance starts in
pub const DEFAULT_STATE: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSlot {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SlotType,
    /// Initializer. Falls back to the type's default value.
    #[serde(default)]
    pub init: Option<Val>,
}

impl GlobalSlot {
    pub fn initial_value(&self) -> Val {
        self.init.clone().unwrap_or_else(|| self.ty.default_value())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerDef {
    pub state: String,
    pub event: EventCode,
    #[serde(default)]
    pub params: Vec<String>,
    pub body: Stmt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub body: Stmt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledScript {
    #[serde(default)]
    pub asset_id: String,
    pub states: Vec<String>,
    #[serde(default)]
    pub globals: Vec<GlobalSlot>,
    #[serde(default)]
    pub handlers: Vec<HandlerDef>,
    #[serde(default)]
    pub functions: Vec<FunctionDef>,
    #[serde(default)]
    pub imports: Vec<String>,
}

impl CompiledScript {
    /// SHA-256 over the canonical JSON form, hex encoded
    pub fn fingerprint(&self) -> Result<String, CompileError> {
        let bytes = serde_json::to_vec(self).map_err(|e| CompileError::Invalid {
            asset_id: self.asset_id.clone(),
            message: e.to_string(),
        })?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// A validated script ready to be instantiated
#[derive(Debug)]
pub struct LoadedScript {
    asset_id: String,
    fingerprint: String,
    states: Vec<String>,
    globals: Vec<GlobalSlot>,
    /// `handlers[state_code][event.index()]`
    handlers: Vec<Vec<Option<HandlerDef>>>,
    functions: HashMap<String, FunctionDef>,
    capabilities: HashMap<String, Capability>,
}

impl LoadedScript {
    pub fn load(compiled: CompiledScript, table: &CapabilityTable) -> Result<Self, CompileError> {
        let fingerprint = compiled.fingerprint()?;
        let asset_id = compiled.asset_id.clone();
        let invalid = |message: String| CompileError::Invalid {
            asset_id: asset_id.clone(),
            message,
        };

        if compiled.states.first().map(String::as_str) != Some(DEFAULT_STATE) {
            return Err(invalid(format!(
                "first state must be '{}'",
                DEFAULT_STATE
            )));
        }
        let mut state_names = HashSet::new();
        for name in &compiled.states {
            if !state_names.insert(name.as_str()) {
                return Err(invalid(format!("duplicate state '{}'", name)));
            }
        }

        let capabilities = table
            .resolve(&compiled.imports)
            .map_err(|name| CompileError::UnresolvedImport {
                asset_id: asset_id.clone(),
                name,
            })?;

        let mut functions = HashMap::new();
        for f in &compiled.functions {
            if functions.insert(f.name.clone(), f.clone()).is_some() {
                return Err(invalid(format!("duplicate function '{}'", f.name)));
            }
        }

        let mut handlers = vec![vec![None; EventCode::ALL.len()]; compiled.states.len()];
        for h in &compiled.handlers {
            let Some(code) = compiled.states.iter().position(|s| *s == h.state) else {
                return Err(invalid(format!(
                    "handler {} refers to unknown state '{}'",
                    h.event, h.state
                )));
            };
            let slot = &mut handlers[code][h.event.index()];
            if slot.is_some() {
                return Err(invalid(format!(
                    "state '{}' defines {} twice",
                    h.state, h.event
                )));
            }
            *slot = Some(h.clone());
        }

        let script = LoadedScript {
            asset_id: asset_id.clone(),
            fingerprint,
            states: compiled.states,
            globals: compiled.globals,
            handlers,
            functions,
            capabilities,
        };

        let mut diagnostics = Vec::new();
        for h in script.handlers.iter().flatten().flatten() {
            script.check_body(&format!("{} {}", h.state, h.event), &h.body, &mut diagnostics);
        }
        for f in script.functions.values() {
            script.check_body(&format!("function {}", f.name), &f.body, &mut diagnostics);
        }
        if !diagnostics.is_empty() {
            diagnostics.sort();
            return Err(CompileError::Failed {
                asset_id,
                diagnostics,
            });
        }
        Ok(script)
    }

    fn check_body(&self, owner: &str, body: &Stmt, out: &mut Vec<String>) {
        self.check_stmt(owner, body, false, out);
    }

    fn check_stmt(&self, owner: &str, stmt: &Stmt, in_loop: bool, out: &mut Vec<String>) {
        for expr in stmt.exprs() {
            expr.walk(&mut |e| match e {
                Expr::Global { slot } if *slot >= self.globals.len() => {
                    out.push(format!("{}: global slot {} out of range", owner, slot))
                }
                Expr::Const { name } => match self.capabilities.get(name) {
                    Some(Capability::Constant(_)) => {}
                    Some(Capability::Function(_)) => {
                        out.push(format!("{}: '{}' is a function, not a constant", owner, name))
                    }
                    None => out.push(format!("{}: constant '{}' is not imported", owner, name)),
                },
                _ => {}
            });
        }
        if let Some(Target::Global { slot }) = stmt.target() {
            if *slot >= self.globals.len() {
                out.push(format!("{}: global slot {} out of range", owner, slot));
            }
        }

        match stmt {
            Stmt::Block { body } => body
                .iter()
                .for_each(|s| self.check_stmt(owner, s, in_loop, out)),
            Stmt::If { then_s, else_s, .. } => {
                self.check_stmt(owner, then_s, in_loop, out);
                if let Some(e) = else_s {
                    self.check_stmt(owner, e, in_loop, out);
                }
            }
            Stmt::While { body, .. } => self.check_stmt(owner, body, true, out),
            Stmt::Try { body, handler, .. } => {
                self.check_stmt(owner, body, in_loop, out);
                self.check_stmt(owner, handler, in_loop, out);
            }
            Stmt::Break | Stmt::Continue if !in_loop => {
                out.push(format!("{}: break/continue outside a loop", owner))
            }
            Stmt::Call { function, args, .. } => match self.functions.get(function) {
                Some(f) if f.params.len() != args.len() => out.push(format!(
                    "{}: {} takes {} arguments, {} given",
                    owner,
                    function,
                    f.params.len(),
                    args.len()
                )),
                Some(_) => {}
                None => out.push(format!("{}: unknown function '{}'", owner, function)),
            },
            Stmt::Invoke { name, .. } => match self.capabilities.get(name) {
                Some(Capability::Function(_)) => {}
                Some(Capability::Constant(_)) => {
                    out.push(format!("{}: '{}' is a constant, not a function", owner, name))
                }
                None => out.push(format!("{}: capability '{}' is not imported", owner, name)),
            },
            Stmt::State { name } if self.state_index(name).is_none() => {
                out.push(format!("{}: unknown state '{}'", owner, name))
            }
            _ => {}
        }
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn states(&self) -> &[String] {
        &self.states
    }

    pub fn state_index(&self, name: &str) -> Option<usize> {
        self.states.iter().position(|s| s == name)
    }

    pub fn state_name(&self, code: usize) -> &str {
        self.states.get(code).map(String::as_str).unwrap_or("?")
    }

    pub fn globals(&self) -> &[GlobalSlot] {
        &self.globals
    }

    pub fn initial_globals(&self) -> Vec<Val> {
        self.globals.iter().map(GlobalSlot::initial_value).collect()
    }

    pub fn handler(&self, state_code: usize, event: EventCode) -> Option<&HandlerDef> {
        self.handlers
            .get(state_code)
            .and_then(|row| row[event.index()].as_ref())
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name)
    }

    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.get(name)
    }
}
