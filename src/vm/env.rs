//! Local variable environment
//!
//! Locals live in one flat slot vector. Blocks remember the stack pointer they
//! started at and truncate back to it on exit; function calls push a call base
//! so name lookup never sees the caller's locals. Every slot is charged to the
//! heap accountant while it is live.

use serde::{Deserialize, Serialize};

use super::types::Val;
use crate::errors::ResourceExceeded;
use crate::heap::{assign_tracked, value_size, HeapAccountant};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Local {
    pub name: String,
    pub val: Val,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Env {
    slots: Vec<Local>,
    /// Stack pointer at entry of each active user-function call
    call_bases: Vec<usize>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sp(&self) -> usize {
        self.slots.len()
    }

    pub fn call_depth(&self) -> usize {
        self.call_bases.len()
    }

    fn visible_base(&self) -> usize {
        self.call_bases.last().copied().unwrap_or(0)
    }

    fn resolve(&self, name: &str) -> Option<usize> {
        let base = self.visible_base();
        (base..self.slots.len())
            .rev()
            .find(|&i| self.slots[i].name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Val> {
        self.resolve(name).map(|i| &self.slots[i].val)
    }

    pub fn declare(
        &mut self,
        name: &str,
        val: Val,
        heap: &HeapAccountant,
    ) -> Result<(), ResourceExceeded> {
        heap.try_charge(value_size(&val))?;
        self.slots.push(Local {
            name: name.to_string(),
            val,
        });
        Ok(())
    }

    /// Assign to an existing local. Returns `Ok(false)` if the name is unknown.
    pub fn assign(
        &mut self,
        name: &str,
        val: Val,
        heap: &HeapAccountant,
    ) -> Result<bool, ResourceExceeded> {
        let Some(idx) = self.resolve(name) else {
            return Ok(false);
        };
        assign_tracked(heap, &mut self.slots[idx].val, val)?;
        Ok(true)
    }

    pub fn enter_call(&mut self) {
        self.call_bases.push(self.slots.len());
    }

    pub fn leave_call(&mut self, heap: &HeapAccountant) {
        if let Some(base) = self.call_bases.pop() {
            self.truncate(base, heap);
        }
    }

    /// Drop locals above `base`, releasing their heap charge
    pub fn truncate(&mut self, base: usize, heap: &HeapAccountant) {
        if base >= self.slots.len() {
            return;
        }
        let released: usize = self.slots[base..].iter().map(|l| value_size(&l.val)).sum();
        self.slots.truncate(base);
        heap.release(released);
        while self.call_bases.last().is_some_and(|&b| b > base) {
            self.call_bases.pop();
        }
    }

    /// Bytes currently charged for live locals
    pub fn tracked_size(&self) -> usize {
        self.slots.iter().map(|l| value_size(&l.val)).sum()
    }

    pub fn locals(&self) -> &[Local] {
        &self.slots
    }
}
