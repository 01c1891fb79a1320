//! Virtual Machine state
//!
//! The VM holds all execution state of one handler invocation:
//! - frames: Stack of active statements
//! - env: Locals of the handler and of every active function call
//! - control: Current control flow state (return, throw, state change, ...)
//! - stack_used: Stack units charged by active function calls

use super::env::Env;
use super::errors::{ErrorInfo, ARITY_MISMATCH};
use super::types::{
    BlockPhase, CallPhase, Control, Frame, FrameKind, IfPhase, InvokePhase, Stmt, TryPhase, Val,
    WhilePhase,
};
use crate::heap::HeapAccountant;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/* ===================== VM ===================== */

/// Virtual Machine state
///
/// This contains everything needed to execute (and serialize/resume) a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VM {
    /// Stack of execution frames
    pub frames: Vec<Frame>,

    /// Local variables
    pub env: Env,

    /// Current control flow state
    pub control: Control,

    /// Stack units in use by active calls
    pub stack_used: usize,
}

impl VM {
    /// Create a new VM with a program and an empty environment
    pub fn new(program: Stmt) -> Self {
        let mut vm = VM {
            frames: vec![],
            env: Env::new(),
            control: Control::None,
            stack_used: 0,
        };

        push_stmt(&mut vm, &program);

        vm
    }

    /// Create a VM for an event handler, binding `args` to `params`
    ///
    /// Parameters are charged to the heap like any other local. On failure
    /// nothing stays charged.
    pub fn for_handler(
        body: &Stmt,
        params: &[String],
        args: Vec<Val>,
        heap: &HeapAccountant,
    ) -> Result<Self, ErrorInfo> {
        if params.len() != args.len() {
            return Err(ErrorInfo::new(
                ARITY_MISMATCH,
                format!(
                    "handler takes {} arguments, event carries {}",
                    params.len(),
                    args.len()
                ),
            ));
        }

        let mut env = Env::new();
        for (name, val) in params.iter().zip(args) {
            if let Err(e) = env.declare(name, val, heap) {
                env.truncate(0, heap);
                return Err(e.into());
            }
        }

        let mut vm = VM {
            frames: vec![],
            env,
            control: Control::None,
            stack_used: 0,
        };
        push_stmt(&mut vm, body);
        Ok(vm)
    }

    /// Drop every frame and local, returning their heap charge
    pub fn release(&mut self, heap: &HeapAccountant) {
        self.frames.clear();
        while self.env.call_depth() > 0 {
            self.env.leave_call(heap);
        }
        self.env.truncate(0, heap);
        self.stack_used = 0;
    }
}

/* ===================== Frame Management ===================== */

/// Push a new frame for a statement onto the stack
///
/// This determines the initial phase based on the statement type.
pub fn push_stmt(vm: &mut VM, stmt: &Stmt) {
    let base = vm.env.sp();

    let kind = match stmt {
        Stmt::Block { .. } => FrameKind::Block {
            phase: BlockPhase::Execute,
            idx: 0,
        },

        Stmt::If { .. } => FrameKind::If {
            phase: IfPhase::Eval,
        },

        Stmt::While { .. } => FrameKind::While {
            phase: WhilePhase::Check,
        },

        Stmt::Call { .. } => FrameKind::Call {
            phase: CallPhase::Checkpoint,
            stack_cost: 0,
        },

        Stmt::Invoke { .. } => FrameKind::Invoke {
            phase: InvokePhase::Checkpoint,
        },

        Stmt::Try { .. } => FrameKind::Try {
            phase: TryPhase::Enter,
        },

        Stmt::Let { .. }
        | Stmt::Assign { .. }
        | Stmt::Throw { .. }
        | Stmt::Return { .. }
        | Stmt::State { .. }
        | Stmt::Break
        | Stmt::Continue => FrameKind::Simple,
    };

    vm.frames.push(Frame {
        kind,
        scope_base_sp: base,
        node: stmt.clone(),
    });
}

/* ===================== Step Result ===================== */

/// Why a handler stopped at a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Asked to give up the worker; resume as soon as possible
    Yield,
    /// Resume no earlier than the given instant
    Sleep(Instant),
}

/// Result of executing one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Continue to next step
    Continue,
    /// Stopped at a checkpoint; state is preserved for resumption
    Pause(PauseReason),
    /// Execution complete; inspect `vm.control` for how it ended
    Done,
}
