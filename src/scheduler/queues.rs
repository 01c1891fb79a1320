//! Ready and sleep queues
//!
//! These are plain data structures. Callers hold the owning mutex while they
//! change an instance's state and its queue membership together.

use std::collections::VecDeque;
use std::time::Instant;

use crate::types::InstanceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyKind {
    Start,
    Yield,
}

#[derive(Debug)]
struct ReadyEntry<T> {
    ticket: u64,
    id: InstanceId,
    item: T,
}

/// Start and yield queues
///
/// Every insert takes a ticket from one counter shared by both queues. `pop`
/// returns whichever head holds the older ticket, so instances leave in
/// overall arrival order and neither queue can starve the other.
#[derive(Debug)]
pub struct ReadySet<T> {
    start: VecDeque<ReadyEntry<T>>,
    yielded: VecDeque<ReadyEntry<T>>,
    next_ticket: u64,
}

impl<T> Default for ReadySet<T> {
    fn default() -> Self {
        Self {
            start: VecDeque::new(),
            yielded: VecDeque::new(),
            next_ticket: 0,
        }
    }
}

impl<T> ReadySet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: ReadyKind, id: InstanceId, item: T) {
        let entry = ReadyEntry {
            ticket: self.next_ticket,
            id,
            item,
        };
        self.next_ticket += 1;
        match kind {
            ReadyKind::Start => self.start.push_back(entry),
            ReadyKind::Yield => self.yielded.push_back(entry),
        }
    }

    pub fn pop(&mut self) -> Option<(ReadyKind, T)> {
        let take_start = match (self.start.front(), self.yielded.front()) {
            (Some(s), Some(y)) => s.ticket < y.ticket,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return None,
        };
        if take_start {
            self.start.pop_front().map(|e| (ReadyKind::Start, e.item))
        } else {
            self.yielded.pop_front().map(|e| (ReadyKind::Yield, e.item))
        }
    }

    pub fn remove(&mut self, kind: ReadyKind, id: InstanceId) -> Option<T> {
        let queue = match kind {
            ReadyKind::Start => &mut self.start,
            ReadyKind::Yield => &mut self.yielded,
        };
        let pos = queue.iter().position(|e| e.id == id)?;
        queue.remove(pos).map(|e| e.item)
    }

    pub fn count(&self, kind: ReadyKind, id: InstanceId) -> usize {
        let queue = match kind {
            ReadyKind::Start => &self.start,
            ReadyKind::Yield => &self.yielded,
        };
        queue.iter().filter(|e| e.id == id).count()
    }

    pub fn len(&self) -> usize {
        self.start.len() + self.yielded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_empty() && self.yielded.is_empty()
    }
}

#[derive(Debug)]
struct SleepEntry<T> {
    until: Instant,
    id: InstanceId,
    item: T,
}

/// Sleeping instances, ascending by wake time
///
/// Inserts go after any entry with the same wake time.
#[derive(Debug)]
pub struct SleepSet<T> {
    entries: VecDeque<SleepEntry<T>>,
}

impl<T> Default for SleepSet<T> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<T> SleepSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert in order. Returns true if the entry became the new head.
    pub fn insert(&mut self, until: Instant, id: InstanceId, item: T) -> bool {
        let pos = self.entries.partition_point(|e| e.until <= until);
        self.entries.insert(pos, SleepEntry { until, id, item });
        pos == 0
    }

    pub fn next_wake(&self) -> Option<Instant> {
        self.entries.front().map(|e| e.until)
    }

    /// Take every entry due at or before `now`, earliest first
    pub fn pop_expired(&mut self, now: Instant) -> Vec<T> {
        let due = self.entries.partition_point(|e| e.until <= now);
        self.entries.drain(..due).map(|e| e.item).collect()
    }

    pub fn remove(&mut self, id: InstanceId) -> Option<T> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        self.entries.remove(pos).map(|e| e.item)
    }

    pub fn count(&self, id: InstanceId) -> usize {
        self.entries.iter().filter(|e| e.id == id).count()
    }

    pub fn is_sorted(&self) -> bool {
        self.entries
            .iter()
            .zip(self.entries.iter().skip(1))
            .all(|(a, b)| a.until <= b.until)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
