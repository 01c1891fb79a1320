//! Execution phase enums for each statement type
//!
//! Each statement type has its own Phase enum that tracks which execution step
//! it's currently at. Together with the frame stack they are the program
//! counter of a paused handler.

use serde::{Deserialize, Serialize};

/// Execution phase for Block statements
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlockPhase {
    Execute = 0,
}

/// Execution phase for If statements
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum IfPhase {
    /// Evaluate the test and push the chosen branch
    Eval = 0,
    /// Branch finished
    Done = 1,
}

/// Execution phase for While statements
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WhilePhase {
    /// Evaluate the loop test
    Check = 0,
    /// Body finished; checkpoint before taking the back-edge
    BackEdge = 1,
}

/// Execution phase for user-function calls
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CallPhase {
    /// Stack budget and pause checks
    Checkpoint = 0,
    /// Bind arguments and push the function body
    Enter = 1,
    /// Body running; falling through here means an implicit null return
    Body = 2,
}

/// Execution phase for host capability calls
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum InvokePhase {
    Checkpoint = 0,
    Invoke = 1,
}

/// Execution phase for Try statements
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TryPhase {
    /// About to push the protected body
    Enter = 0,
    /// Executing the protected body
    ExecuteTry = 1,
    /// Executing the handler (error was caught)
    ExecuteCatch = 2,
}
