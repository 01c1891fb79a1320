//! Core execution loop
//!
//! This module contains the step() function - the heart of the interpreter.
//! It processes one frame at a time, advancing execution phases and managing the frame stack.
//!
//! ## Function Organization
//! 1. run_until_done() - Top-level driver (calls step repeatedly)
//! 2. step() - Main execution loop (dispatches to statement handlers)
//! 3. unwind() - Control flow propagation

use super::context::ExecContext;
use super::errors::{ErrorInfo, TYPE_ERROR};
use super::statements::{
    execute_block, execute_call, execute_if, execute_invoke, execute_simple, execute_try,
    execute_while, finish_call,
};
use super::types::{CallPhase, Control, FrameKind, Stmt, TryPhase, Val, WhilePhase};
use super::vm::{push_stmt, Step, VM};

/* ===================== Public API ===================== */

/// Run the VM until it completes or pauses at a checkpoint
///
/// After completion, inspect `vm.control` for the final state.
pub fn run_until_done(vm: &mut VM, ctx: &mut ExecContext<'_>) -> Step {
    loop {
        match step(vm, ctx) {
            Step::Continue => continue,
            other => return other,
        }
    }
}

/// Execute one step of the VM
pub fn step(vm: &mut VM, ctx: &mut ExecContext<'_>) -> Step {
    if vm.control != Control::None {
        return unwind(vm, ctx);
    }

    let Some(frame) = vm.frames.last() else {
        return Step::Done;
    };

    // Clone frame data we need (to avoid borrow checker issues)
    let (kind, node) = (frame.kind.clone(), frame.node.clone());

    match (kind, &node) {
        (FrameKind::Block { phase, idx }, Stmt::Block { body }) => {
            execute_block(vm, ctx, phase, idx, body)
        }

        (FrameKind::If { phase }, Stmt::If { test, then_s, else_s }) => {
            execute_if(vm, ctx, phase, test, then_s, else_s.as_deref())
        }

        (FrameKind::While { phase }, Stmt::While { test, body }) => {
            execute_while(vm, ctx, phase, test, body)
        }

        (
            FrameKind::Call { phase, stack_cost },
            Stmt::Call {
                function,
                args,
                dest,
            },
        ) => execute_call(vm, ctx, phase, stack_cost, function, args, dest.as_ref()),

        (FrameKind::Invoke { phase }, Stmt::Invoke { name, args, dest }) => {
            execute_invoke(vm, ctx, phase, name, args, dest.as_ref())
        }

        (FrameKind::Try { phase }, Stmt::Try { body, .. }) => execute_try(vm, ctx, phase, body),

        (FrameKind::Simple, node) => execute_simple(vm, ctx, node),

        // Frame kind does not match its node; only possible with a corrupt snapshot
        _ => {
            vm.frames.pop();
            vm.control = Control::Throw(Val::Error(ErrorInfo::new(
                TYPE_ERROR,
                "frame kind does not match statement",
            )));
            Step::Continue
        }
    }
}

/* ===================== Control Flow ===================== */

/// Unwind the stack while control flow is active
///
/// - Break/Continue stop at the innermost While
/// - Return stops at the innermost entered Call, or ends the handler
/// - Throw stops at the innermost Try still running its protected body
/// - StateChange/Reset/Die always end the handler
fn unwind(vm: &mut VM, ctx: &mut ExecContext<'_>) -> Step {
    while let Some(frame) = vm.frames.last() {
        let kind = frame.kind.clone();
        let base = frame.scope_base_sp;

        match (&vm.control, kind) {
            (Control::Break, FrameKind::While { .. }) => {
                vm.frames.pop();
                vm.env.truncate(base, ctx.heap);
                vm.control = Control::None;
                return Step::Continue;
            }

            (Control::Continue, FrameKind::While { .. }) => {
                // Take the back-edge, which is also a checkpoint
                if let Some(f) = vm.frames.last_mut() {
                    f.kind = FrameKind::While {
                        phase: WhilePhase::BackEdge,
                    };
                }
                vm.env.truncate(base, ctx.heap);
                vm.control = Control::None;
                return Step::Continue;
            }

            (
                Control::Return(_),
                FrameKind::Call {
                    phase: CallPhase::Body,
                    stack_cost,
                },
            ) => {
                let Control::Return(val) = std::mem::replace(&mut vm.control, Control::None)
                else {
                    unreachable!("matched Return above");
                };
                let dest = match &frame.node {
                    Stmt::Call { dest, .. } => dest.clone(),
                    _ => None,
                };
                finish_call(vm, ctx, stack_cost, dest.as_ref(), val);
                return Step::Continue;
            }

            (
                Control::Throw(_),
                FrameKind::Try {
                    phase: TryPhase::ExecuteTry,
                },
            ) => {
                let Control::Throw(err) = std::mem::replace(&mut vm.control, Control::None)
                else {
                    unreachable!("matched Throw above");
                };
                let (catch_var, handler) = match &frame.node {
                    Stmt::Try {
                        catch_var, handler, ..
                    } => (catch_var.clone(), handler.as_ref().clone()),
                    _ => (None, Stmt::Block { body: vec![] }),
                };
                vm.env.truncate(base, ctx.heap);
                if let Some(f) = vm.frames.last_mut() {
                    f.kind = FrameKind::Try {
                        phase: TryPhase::ExecuteCatch,
                    };
                }
                if let Some(name) = catch_var {
                    if let Err(e) = vm.env.declare(&name, err, ctx.heap) {
                        // Propagates past this Try, now in its catch phase
                        vm.control = Control::Throw(Val::Error(e.into()));
                        return Step::Continue;
                    }
                }
                push_stmt(vm, &handler);
                return Step::Continue;
            }

            (
                _,
                FrameKind::Call {
                    phase: CallPhase::Body,
                    stack_cost,
                },
            ) => {
                vm.env.leave_call(ctx.heap);
                vm.stack_used = vm.stack_used.saturating_sub(stack_cost);
                vm.frames.pop();
                vm.env.truncate(base, ctx.heap);
            }

            _ => {
                vm.frames.pop();
                vm.env.truncate(base, ctx.heap);
            }
        }
    }

    // Ran out of frames: the handler is over. Return and StateChange etc.
    // stay in `control` for the caller to inspect.
    Step::Done
}
