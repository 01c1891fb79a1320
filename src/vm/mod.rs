//! # Resumable Stack-Driven Interpreter
//!
//! Runs the compiled handlers of a script instance.
//!
//! ## Core Principles
//!
//! 1. **Stack-driven execution**: All state in `frames: Vec<Frame>`, no recursion
//! 2. **Statement-level execution**: Each frame has a phase tracking micro-steps
//! 3. **Centralized control flow**: `Control` enum manages break/continue/return/throw
//!    as well as state changes, resets and termination
//! 4. **Checkpoints**: Loop back-edges and call sites poll the pause signal; a
//!    paused VM is plain data and can be serialized
//! 5. **Accounting**: Every stored value goes through the heap accountant and every
//!    call through the stack budget

pub mod context;
pub mod continuation;
pub mod env;
pub mod errors;
pub mod exec_loop;
pub mod expressions;
pub mod statements;
pub mod types;
pub mod vm;

#[cfg(test)]
pub(crate) mod tests;

// Re-export commonly used items
pub use context::{CheckpointSignal, ExecContext, NeverPause};
pub use continuation::{Activity, Completion, Continuation, RunResult};
pub use env::Env;
pub use errors::ErrorInfo;
pub use exec_loop::{run_until_done, step};
pub use types::{BinOp, Control, Expr, SlotType, Stmt, Target, UnaryOp, Val, Vector};
pub use vm::{PauseReason, Step, VM};
