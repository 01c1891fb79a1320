//! Statement execution handlers
//!
//! Each statement type has its own handler function that processes
//! the statement based on its current execution phase.

use super::context::ExecContext;
use super::errors::{
    ErrorInfo, BAD_GLOBAL_SLOT, STACK_EXCEEDED, UNDEFINED_FUNCTION, UNDEFINED_STATE,
    UNDEFINED_VARIABLE,
};
use super::expressions::eval_expr;
use super::types::{
    BlockPhase, CallPhase, Control, Expr, FrameKind, IfPhase, InvokePhase, Stmt, Target,
    TryPhase, Val, WhilePhase,
};
use super::vm::{push_stmt, PauseReason, Step, VM};
use crate::capabilities::{sleep_deadline, Capability, HostOutcome};
use crate::heap::assign_tracked;

/// Fixed stack units charged per call, on top of one unit per argument
pub const CALL_FRAME_COST: usize = 1;

/* ===================== Helpers ===================== */

/// Raise a script-visible error. The current frame is popped by unwinding.
pub fn throw(vm: &mut VM, err: ErrorInfo) -> Step {
    vm.control = Control::Throw(Val::Error(err));
    Step::Continue
}

fn set_kind(vm: &mut VM, kind: FrameKind) {
    if let Some(frame) = vm.frames.last_mut() {
        frame.kind = kind;
    }
}

/// Pop the current frame and drop any locals it declared
fn pop_scope(vm: &mut VM, ctx: &ExecContext<'_>) {
    if let Some(frame) = vm.frames.pop() {
        vm.env.truncate(frame.scope_base_sp, ctx.heap);
    }
}

/// Store a value into a local or global, charging the heap
pub fn store(
    vm: &mut VM,
    ctx: &mut ExecContext<'_>,
    target: &Target,
    val: Val,
) -> Result<(), ErrorInfo> {
    match target {
        Target::Local { name } => {
            if vm.env.assign(name, val, ctx.heap)? {
                Ok(())
            } else {
                Err(ErrorInfo::new(
                    UNDEFINED_VARIABLE,
                    format!("assignment to undeclared '{}'", name),
                ))
            }
        }
        Target::Global { slot } => {
            let Some(cell) = ctx.globals.get_mut(*slot) else {
                return Err(ErrorInfo::new(
                    BAD_GLOBAL_SLOT,
                    format!("no global slot {}", slot),
                ));
            };
            assign_tracked(ctx.heap, cell, val)?;
            Ok(())
        }
    }
}

fn eval_args(vm: &VM, ctx: &ExecContext<'_>, args: &[Expr]) -> Result<Vec<Val>, ErrorInfo> {
    args.iter().map(|a| eval_expr(a, &vm.env, ctx)).collect()
}

/* ===================== Statement Handlers ===================== */

/// Execute Block statement
pub fn execute_block(
    vm: &mut VM,
    ctx: &mut ExecContext<'_>,
    phase: BlockPhase,
    idx: usize,
    body: &[Stmt],
) -> Step {
    match phase {
        BlockPhase::Execute => {
            if idx >= body.len() {
                pop_scope(vm, ctx);
                return Step::Continue;
            }

            set_kind(
                vm,
                FrameKind::Block {
                    phase: BlockPhase::Execute,
                    idx: idx + 1,
                },
            );
            push_stmt(vm, &body[idx]);

            Step::Continue
        }
    }
}

/// Execute If statement
pub fn execute_if(
    vm: &mut VM,
    ctx: &mut ExecContext<'_>,
    phase: IfPhase,
    test: &Expr,
    then_s: &Stmt,
    else_s: Option<&Stmt>,
) -> Step {
    match phase {
        IfPhase::Eval => {
            let cond = match eval_expr(test, &vm.env, ctx) {
                Ok(v) => v.is_truthy(),
                Err(e) => return throw(vm, e),
            };
            set_kind(vm, FrameKind::If { phase: IfPhase::Done });
            if cond {
                push_stmt(vm, then_s);
            } else if let Some(else_s) = else_s {
                push_stmt(vm, else_s);
            }
            Step::Continue
        }
        IfPhase::Done => {
            pop_scope(vm, ctx);
            Step::Continue
        }
    }
}

/// Execute While statement
///
/// The back-edge is a checkpoint: the phase is reset to `Check` before the
/// pause so a resumed loop re-evaluates its test instead of pausing again.
pub fn execute_while(
    vm: &mut VM,
    ctx: &mut ExecContext<'_>,
    phase: WhilePhase,
    test: &Expr,
    body: &Stmt,
) -> Step {
    match phase {
        WhilePhase::Check => {
            let cond = match eval_expr(test, &vm.env, ctx) {
                Ok(v) => v.is_truthy(),
                Err(e) => return throw(vm, e),
            };
            if !cond {
                pop_scope(vm, ctx);
                return Step::Continue;
            }
            set_kind(
                vm,
                FrameKind::While {
                    phase: WhilePhase::BackEdge,
                },
            );
            push_stmt(vm, body);
            Step::Continue
        }
        WhilePhase::BackEdge => {
            set_kind(
                vm,
                FrameKind::While {
                    phase: WhilePhase::Check,
                },
            );
            if ctx.signal.should_pause() {
                return Step::Pause(PauseReason::Yield);
            }
            Step::Continue
        }
    }
}

/// Execute a call to a user-defined function
pub fn execute_call(
    vm: &mut VM,
    ctx: &mut ExecContext<'_>,
    phase: CallPhase,
    stack_cost: usize,
    function: &str,
    args: &[Expr],
    dest: Option<&Target>,
) -> Step {
    match phase {
        CallPhase::Checkpoint => {
            let cost = CALL_FRAME_COST + args.len();
            if vm.stack_used + cost > ctx.stack_limit {
                return throw(
                    vm,
                    ErrorInfo::new(
                        STACK_EXCEEDED,
                        format!(
                            "call to {} needs {} stack units, {} of {} in use",
                            function, cost, vm.stack_used, ctx.stack_limit
                        ),
                    ),
                );
            }
            set_kind(
                vm,
                FrameKind::Call {
                    phase: CallPhase::Enter,
                    stack_cost: cost,
                },
            );
            if ctx.signal.should_pause() {
                return Step::Pause(PauseReason::Yield);
            }
            Step::Continue
        }

        CallPhase::Enter => {
            let Some(def) = ctx.script.function(function) else {
                return throw(
                    vm,
                    ErrorInfo::new(
                        UNDEFINED_FUNCTION,
                        format!("function '{}' is not defined", function),
                    ),
                );
            };
            let values = match eval_args(vm, ctx, args) {
                Ok(v) => v,
                Err(e) => return throw(vm, e),
            };

            // From here on the frame owns a call base and stack units; unwinding
            // a Body-phase Call frame gives both back.
            set_kind(
                vm,
                FrameKind::Call {
                    phase: CallPhase::Body,
                    stack_cost,
                },
            );
            vm.stack_used += stack_cost;
            vm.env.enter_call();

            for (name, val) in def.params.iter().zip(values) {
                if let Err(e) = vm.env.declare(name, val, ctx.heap) {
                    return throw(vm, e.into());
                }
            }
            let body = def.body.clone();
            push_stmt(vm, &body);
            Step::Continue
        }

        CallPhase::Body => {
            // Body fell off its end: implicit null return
            finish_call(vm, ctx, stack_cost, dest, Val::Null);
            Step::Continue
        }
    }
}

/// Leave a Body-phase call frame on top of the stack and deliver its result
pub fn finish_call(
    vm: &mut VM,
    ctx: &mut ExecContext<'_>,
    stack_cost: usize,
    dest: Option<&Target>,
    result: Val,
) {
    vm.env.leave_call(ctx.heap);
    vm.stack_used = vm.stack_used.saturating_sub(stack_cost);
    vm.frames.pop();
    if let Some(dest) = dest {
        if let Err(e) = store(vm, ctx, dest, result) {
            vm.control = Control::Throw(Val::Error(e));
        }
    }
}

/// Execute a call to a host capability
pub fn execute_invoke(
    vm: &mut VM,
    ctx: &mut ExecContext<'_>,
    phase: InvokePhase,
    name: &str,
    args: &[Expr],
    dest: Option<&Target>,
) -> Step {
    match phase {
        InvokePhase::Checkpoint => {
            set_kind(
                vm,
                FrameKind::Invoke {
                    phase: InvokePhase::Invoke,
                },
            );
            if ctx.signal.should_pause() {
                return Step::Pause(PauseReason::Yield);
            }
            Step::Continue
        }

        InvokePhase::Invoke => {
            let Some(Capability::Function(f)) = ctx.script.capability(name) else {
                return throw(
                    vm,
                    ErrorInfo::new(
                        UNDEFINED_FUNCTION,
                        format!("capability '{}' is not imported", name),
                    ),
                );
            };
            let f = f.clone();
            let values = match eval_args(vm, ctx, args) {
                Ok(v) => v,
                Err(e) => return throw(vm, e),
            };

            match f(&ctx.call, &values) {
                HostOutcome::Value(v) => {
                    vm.frames.pop();
                    if let Some(dest) = dest {
                        if let Err(e) = store(vm, ctx, dest, v) {
                            vm.control = Control::Throw(Val::Error(e));
                        }
                    }
                    Step::Continue
                }
                HostOutcome::Sleep(d) => {
                    // The call has completed; waking up just continues after it
                    vm.frames.pop();
                    if let Some(dest) = dest {
                        if let Err(e) = store(vm, ctx, dest, Val::Null) {
                            vm.control = Control::Throw(Val::Error(e));
                            return Step::Continue;
                        }
                    }
                    Step::Pause(PauseReason::Sleep(sleep_deadline(d)))
                }
                HostOutcome::Fault(e) => throw(vm, e),
                HostOutcome::Reset => {
                    vm.control = Control::Reset;
                    Step::Continue
                }
                HostOutcome::Die => {
                    vm.control = Control::Die;
                    Step::Continue
                }
            }
        }
    }
}

/// Execute Try statement
pub fn execute_try(
    vm: &mut VM,
    ctx: &mut ExecContext<'_>,
    phase: TryPhase,
    body: &Stmt,
) -> Step {
    match phase {
        TryPhase::Enter => {
            set_kind(
                vm,
                FrameKind::Try {
                    phase: TryPhase::ExecuteTry,
                },
            );
            push_stmt(vm, body);
            Step::Continue
        }
        // Body or handler finished normally
        TryPhase::ExecuteTry | TryPhase::ExecuteCatch => {
            pop_scope(vm, ctx);
            Step::Continue
        }
    }
}

/// Execute single-step statements: let, assign, throw, return, state, break, continue
pub fn execute_simple(vm: &mut VM, ctx: &mut ExecContext<'_>, node: &Stmt) -> Step {
    match node {
        Stmt::Let { name, init } => {
            let val = match init {
                Some(expr) => match eval_expr(expr, &vm.env, ctx) {
                    Ok(v) => v,
                    Err(e) => return throw(vm, e),
                },
                None => Val::Null,
            };
            // Pop first so the local lands in the enclosing scope
            vm.frames.pop();
            if let Err(e) = vm.env.declare(name, val, ctx.heap) {
                vm.control = Control::Throw(Val::Error(e.into()));
            }
            Step::Continue
        }

        Stmt::Assign { target, expr } => {
            let val = match eval_expr(expr, &vm.env, ctx) {
                Ok(v) => v,
                Err(e) => return throw(vm, e),
            };
            if let Err(e) = store(vm, ctx, target, val) {
                return throw(vm, e);
            }
            vm.frames.pop();
            Step::Continue
        }

        Stmt::Throw { value } => {
            let val = match eval_expr(value, &vm.env, ctx) {
                Ok(v) => v,
                Err(e) => return throw(vm, e),
            };
            vm.control = Control::Throw(val);
            Step::Continue
        }

        Stmt::Return { value } => {
            let val = match value {
                Some(expr) => match eval_expr(expr, &vm.env, ctx) {
                    Ok(v) => v,
                    Err(e) => return throw(vm, e),
                },
                None => Val::Null,
            };
            vm.control = Control::Return(val);
            Step::Continue
        }

        Stmt::State { name } => match ctx.script.state_index(name) {
            Some(code) => {
                vm.control = Control::StateChange(code);
                Step::Continue
            }
            None => throw(
                vm,
                ErrorInfo::new(UNDEFINED_STATE, format!("state '{}' is not defined", name)),
            ),
        },

        Stmt::Break => {
            vm.control = Control::Break;
            Step::Continue
        }

        Stmt::Continue => {
            vm.control = Control::Continue;
            Step::Continue
        }

        // Compound statements never get a Simple frame
        _ => throw(
            vm,
            ErrorInfo::new(
                super::errors::TYPE_ERROR,
                "malformed frame for compound statement",
            ),
        ),
    }
}
