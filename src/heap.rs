//! Heap accountant
//!
//! Every heap-resident value an instance holds (globals, locals, handler and
//! function parameters) is charged against a per-instance byte limit. Values
//! are stored through `assign_tracked`, which computes the new size, moves the
//! running total by `new - old` with a single compare-and-swap and only then
//! commits the store. A rejected store leaves both the slot and the total
//! untouched.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::{ResourceExceeded, ResourceKind};
use crate::vm::Val;

pub const SCALAR_SIZE: usize = 8;
pub const VECTOR_SIZE: usize = 24;
pub const CONTAINER_OVERHEAD: usize = 16;

/// Byte size charged for a value. Containers recurse.
pub fn value_size(val: &Val) -> usize {
    match val {
        Val::Null => 0,
        Val::Bool(_) | Val::Int(_) | Val::Float(_) => SCALAR_SIZE,
        Val::Vector(_) => VECTOR_SIZE,
        Val::Str(s) => CONTAINER_OVERHEAD + s.len(),
        Val::List(items) => CONTAINER_OVERHEAD + items.iter().map(value_size).sum::<usize>(),
        Val::Map(m) => {
            CONTAINER_OVERHEAD
                + m.iter()
                    .map(|(k, v)| k.len() + value_size(v))
                    .sum::<usize>()
        }
        Val::Error(e) => CONTAINER_OVERHEAD + e.code.len() + e.message.len(),
    }
}

#[derive(Debug)]
pub struct HeapAccountant {
    limit: AtomicUsize,
    used: AtomicUsize,
}

impl HeapAccountant {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit),
            used: AtomicUsize::new(0),
        }
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.limit().saturating_sub(self.used())
    }

    /// Replace a tracked value of `old` bytes with one of `new` bytes.
    ///
    /// Shrinking always succeeds, even when the instance is already over a
    /// limit that was lowered after the fact.
    pub fn try_replace(&self, old: usize, new: usize) -> Result<(), ResourceExceeded> {
        let limit = self.limit();
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                let next = cur.saturating_sub(old) + new;
                if new > old && next > limit {
                    None
                } else {
                    Some(next)
                }
            })
            .map(|_| ())
            .map_err(|cur| ResourceExceeded {
                kind: ResourceKind::Heap,
                requested: cur.saturating_sub(old) + new,
                limit,
            })
    }

    pub fn try_charge(&self, size: usize) -> Result<(), ResourceExceeded> {
        self.try_replace(0, size)
    }

    pub fn release(&self, size: usize) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.saturating_sub(size))
            });
    }

    /// Overwrite the running total, used when state is rebuilt from a snapshot
    pub fn reset_to(&self, total: usize) {
        self.used.store(total, Ordering::Release);
    }

    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::Release);
    }
}

/// Store `new` into `slot`, charging the size difference first.
pub fn assign_tracked(
    heap: &HeapAccountant,
    slot: &mut Val,
    new: Val,
) -> Result<(), ResourceExceeded> {
    heap.try_replace(value_size(slot), value_size(&new))?;
    *slot = new;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn test_value_sizes() {
        assert_eq!(value_size(&Val::Null), 0);
        assert_eq!(value_size(&Val::Int(7)), SCALAR_SIZE);
        assert_eq!(value_size(&Val::Str("abc".into())), CONTAINER_OVERHEAD + 3);

        let nested = Val::List(vec![Val::Int(1), Val::Str("xy".into())]);
        assert_eq!(
            value_size(&nested),
            CONTAINER_OVERHEAD + SCALAR_SIZE + CONTAINER_OVERHEAD + 2
        );

        let map = Val::Map(btreemap! { "k".to_string() => Val::Bool(true) });
        assert_eq!(value_size(&map), CONTAINER_OVERHEAD + 1 + SCALAR_SIZE);
    }

    #[test]
    fn test_assign_within_limit_updates_total() {
        let heap = HeapAccountant::new(100);
        let mut slot = Val::Null;

        assign_tracked(&heap, &mut slot, Val::Str("hello".into())).unwrap();
        assert_eq!(heap.used(), CONTAINER_OVERHEAD + 5);

        assign_tracked(&heap, &mut slot, Val::Int(1)).unwrap();
        assert_eq!(heap.used(), SCALAR_SIZE);
    }

    #[test]
    fn test_rejected_assign_leaves_slot_and_total() {
        let heap = HeapAccountant::new(40);
        let mut slot = Val::Str("a".repeat(20));
        heap.try_charge(value_size(&slot)).unwrap();
        let before = heap.used();

        let err = assign_tracked(&heap, &mut slot, Val::Str("a".repeat(25))).unwrap_err();

        assert_eq!(err.kind, ResourceKind::Heap);
        assert_eq!(err.limit, 40);
        assert_eq!(heap.used(), before);
        assert_eq!(slot, Val::Str("a".repeat(20)));
    }

    #[test]
    fn test_shrink_allowed_over_lowered_limit() {
        let heap = HeapAccountant::new(100);
        heap.try_charge(80).unwrap();
        heap.set_limit(50);

        assert!(heap.try_replace(80, 60).is_ok());
        assert_eq!(heap.used(), 60);
        assert!(heap.try_replace(0, 1).is_err());
    }

    #[test]
    fn test_release_saturates() {
        let heap = HeapAccountant::new(10);
        heap.try_charge(5).unwrap();
        heap.release(50);
        assert_eq!(heap.used(), 0);
    }
}
