//! Tests for the VM
//!
//! Organized by feature area

pub(crate) mod helpers;

mod checkpoint_tests;
mod error_tests;
