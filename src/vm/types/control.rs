//! Control flow and execution frame types

use super::ast::Stmt;
use super::phase::{BlockPhase, CallPhase, IfPhase, InvokePhase, TryPhase, WhilePhase};
use super::values::Val;
use serde::{Deserialize, Serialize};

/* ===================== Control Flow ===================== */

/// Control flow state
///
/// When control != None, the VM unwinds the stack to find the appropriate
/// handler. `StateChange`, `Reset` and `Die` always unwind the whole handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Control {
    None,
    Break,
    Continue,
    Return(Val),
    Throw(Val),
    /// Index into the script's state names
    StateChange(usize),
    Reset,
    Die,
}

/* ===================== Frames ===================== */

/// Frame kind - the type and state of a statement being executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "k")]
pub enum FrameKind {
    Block { phase: BlockPhase, idx: usize },
    If { phase: IfPhase },
    While { phase: WhilePhase },
    Call { phase: CallPhase, stack_cost: usize },
    Invoke { phase: InvokePhase },
    Try { phase: TryPhase },
    /// Single-step statements (let, assign, throw, return, state, break, continue)
    Simple,
}

/// Execution frame - one per active statement
///
/// The frame stack replaces the native call stack, which is what makes a
/// paused handler serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(flatten)]
    pub kind: FrameKind,

    /// Where this frame's variables start in the environment
    pub scope_base_sp: usize,

    /// The statement this frame represents
    pub node: Stmt,
}
