//! Type definitions for the VM
//!
//! - Compiled handler code (Stmt, Expr)
//! - Runtime values (Val)
//! - Control flow (Control, Frame, FrameKind)
//! - Per-statement execution phases

pub mod ast;
pub mod control;
pub mod phase;
pub mod values;

pub use ast::{BinOp, Expr, Stmt, Target, UnaryOp};
pub use control::{Control, Frame, FrameKind};
pub use phase::*;
pub use values::{SlotType, Val, Vector};
