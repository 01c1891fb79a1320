//! Execution engine for sandboxed, event-driven scripts
//!
//! Many small script instances run on a fixed pool of worker threads. Each
//! instance reacts to events in its current state, can sleep or be preempted
//! mid-handler, and can be serialized at any checkpoint and resumed elsewhere.

pub mod capabilities;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod heap;
pub mod instance;
pub mod migration;
pub mod scheduler;
pub mod script;
pub mod types;
pub mod vm;

pub use config::EngineConfig;
pub use engine::Engine;
pub use errors::{EngineError, Result};
pub use events::{EventCode, EventParams};
pub use instance::InstanceState;
pub use script::ScriptSource;
pub use types::*;
